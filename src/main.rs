use std::env;
use std::process;

use pipeline::Pipeline;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: flowpipeline <pipeline.yml> [args...]");
        process::exit(1);
    });

    let raw = match std::fs::read(&config_path) {
        Ok(raw) => raw,
        Err(err) => {
            tracing::error!(path = %config_path, error = %err, "cannot read pipeline description");
            process::exit(1);
        }
    };

    let mut pipeline = match Pipeline::from_config(&raw) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            tracing::error!(error = %err, "pipeline build failed");
            process::exit(1);
        }
    };

    pipeline.start();
    // Nothing here consumes Out; drain it so the tail never blocks.
    pipeline.auto_drain();
    tracing::info!(path = %config_path, "pipeline running, Ctrl+C to stop");

    let shutdown = pipeline.shutdown();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "signal handler failed");
            }
            tracing::info!("stopping pipeline");
        }
        _ = shutdown.triggered() => {
            tracing::info!("a segment requested shutdown, stopping pipeline");
        }
    }
    pipeline.close().await;
}
