use panel_core::PanelConfig;
use panel_gateway::{build_app, AppState};
use panel_voice::PanelServices;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[panel-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,panel=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match PanelConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[panel-gateway] invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let services = match PanelServices::from_env(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[panel-gateway] could not build services: {}", e);
            std::process::exit(1);
        }
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        target: "panel::gateway",
        %addr,
        production = config.production,
        mode = config.pipeline.mode.as_str(),
        "panel-gateway listening"
    );
    let state = AppState::new(config, services);
    let _eviction = state.spawn_eviction();
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(target: "panel::gateway", "bind {} failed: {}", addr, e);
            std::process::exit(1);
        }
    };
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "panel::gateway", "Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "panel::gateway", "Shutdown (Ctrl+C received)");
        }
    }
}
