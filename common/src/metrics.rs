use std::sync::OnceLock;

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static SERVER_STARTED: OnceLock<()> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Start the Prometheus scrape endpoint if METRICS_PORT is set. Safe to
/// call more than once; only the first call spawns the server.
pub fn maybe_spawn_metrics_server() {
    let Some(port) = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    else {
        return;
    };

    if SERVER_STARTED.set(()).is_ok() {
        let _ = install_recorder_once();
        tokio::spawn(run_metrics_server(port));
    }
}

async fn run_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    let metrics_route = get(move || async move { handle.render() });
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", metrics_route);
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("🛑 Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        format!("{}", port).green().dimmed(),
    );
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("🛑 Metrics server failed: {}", e);
    }
}
