//! Integration test: loading `PanelConfig` from a TOML file on disk.

use panel_core::{PanelConfig, PipelineMode};
use std::io::Write;

#[test]
fn load_from_file_layers_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("panel.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        r#"
port = 9100

[admission]
daily_free = 5

[admission.turn_message]
max_requests = 12
window_secs = 30

[pipeline]
mode = "sequential"
llm_timeout_ms = 4000
"#
    )
    .unwrap();

    let cfg = PanelConfig::load_from_path(&path).unwrap();
    assert_eq!(cfg.port, 9100);
    assert_eq!(cfg.admission.daily_free, 5);
    assert_eq!(cfg.admission.turn_message.max_requests, 12);
    assert_eq!(cfg.admission.daily_paid, 30);
    assert_eq!(cfg.pipeline.mode, PipelineMode::Sequential);
    assert_eq!(cfg.pipeline.llm_timeout_ms, 4000);
    assert_eq!(cfg.pipeline.stt_timeout_ms, 8000);
    assert!(cfg.validate().is_ok());
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = PanelConfig::load_from_path(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg.port, 8010);
    assert_eq!(cfg.session.turn_budget_secs, 120);
    assert_eq!(cfg.session.idle_evict_secs, 900);
}

#[test]
fn idle_eviction_must_be_positive() {
    let err = PanelConfig::from_toml_str(
        r#"
        [session]
        idle_evict_secs = 0
        "#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("idle_evict_secs"));
}
