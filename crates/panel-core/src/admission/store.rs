//! Key-value backing for admission counters.
//!
//! `AdmissionStore` is the seam for swapping the in-process `MemoryStore` for a shared
//! backing store. Every operation is atomic per key; different keys never contend on
//! the same logical lock.

use crate::clock::Clock;
use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-identity counters. Which fields are meaningful depends on the key namespace
/// (`:win`, `:fixed`, `:daily`, `:bot`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitRecord {
    /// Sliding window: request instants inside the trailing window, oldest first.
    pub timestamps: VecDeque<Instant>,
    /// Fixed window: count since `fixed_reset_at - window`.
    pub fixed_count: u64,
    pub fixed_reset_at: Option<Instant>,
    /// Daily quota: count for `daily_date` (UTC).
    pub daily_count: u32,
    pub daily_date: Option<NaiveDate>,
    /// Burst detector: consecutive sub-threshold gaps.
    pub rapid_count: u32,
    pub last_seen: Option<Instant>,
    pub flagged_until: Option<Instant>,
}

pub trait AdmissionStore: Send + Sync {
    /// Live record for `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> Option<RateLimitRecord>;

    /// Replace the record and its expiry.
    fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration);

    /// Fixed-window increment: the expiry is set when the window opens and is not
    /// refreshed by later increments. Returns the count including this call.
    fn increment(&self, key: &str, ttl: Duration) -> u64;

    /// Atomic read-modify-write. An absent or expired record starts from default.
    /// The expiry is refreshed to `now + ttl`.
    fn update(&self, key: &str, ttl: Duration, f: &mut dyn FnMut(&mut RateLimitRecord));

    /// Remove expired entries. Returns how many were dropped.
    fn sweep(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    record: RateLimitRecord,
    expires_at: Instant,
}

/// In-process store on `DashMap`. Suitable for a single gateway instance.
pub struct MemoryStore {
    entries: DashMap<String, StoredRecord>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

impl AdmissionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<RateLimitRecord> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone())
    }

    fn set(&self, key: &str, record: RateLimitRecord, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.entries
            .insert(key.to_string(), StoredRecord { record, expires_at });
    }

    fn increment(&self, key: &str, ttl: Duration) -> u64 {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredRecord {
                record: RateLimitRecord::default(),
                expires_at: now + ttl,
            });
        if entry.expires_at <= now {
            entry.record = RateLimitRecord::default();
            entry.expires_at = now + ttl;
        }
        let reset_at = entry.expires_at;
        entry.record.fixed_reset_at = Some(reset_at);
        entry.record.fixed_count += 1;
        entry.record.fixed_count
    }

    fn update(&self, key: &str, ttl: Duration, f: &mut dyn FnMut(&mut RateLimitRecord)) {
        let now = self.clock.now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get_mut();
                if stored.expires_at <= now {
                    stored.record = RateLimitRecord::default();
                }
                f(&mut stored.record);
                stored.expires_at = now + ttl;
            }
            Entry::Vacant(vacant) => {
                let mut record = RateLimitRecord::default();
                f(&mut record);
                vacant.insert(StoredRecord {
                    record,
                    expires_at: now + ttl,
                });
            }
        }
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
