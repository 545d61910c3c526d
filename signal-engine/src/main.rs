use anyhow::{Context, Result};
use signal_engine::{create_config_template, load_config, SignalEngine, DEFAULT_CONFIG_PATH};
use tokio::sync::watch;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--init") {
        let path = args.get(1).map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
        create_config_template(path).with_context(|| format!("Failed to write {}", path))?;
        info!("Wrote configuration template to {}", path);
        return Ok(());
    }

    let path = args.first().map(String::as_str).unwrap_or(DEFAULT_CONFIG_PATH);
    let config = load_config(path)?;

    info!("Starting Signal Consensus Engine");

    let engine = SignalEngine::simulated(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engine_task = tokio::spawn(engine.run(shutdown_rx));

    tokio::select! {
        result = &mut engine_task => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down gracefully...");
            let _ = shutdown_tx.send(true);
            engine_task.await??;
        }
    }

    Ok(())
}
