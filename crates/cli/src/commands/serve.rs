//! `ragline serve` — Start the HTTP gateway.

use std::path::Path;
use std::sync::Arc;

use ragline_gateway::HttpGateway;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stack;

pub async fn run(config_path: Option<&Path>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = stack::load_config(config_path)?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    // The SSE route relays fragments as they are generated.
    config.pipeline.stream_tokens = true;

    let agent = stack::build_agent(&config).await?;
    let gateway = Arc::new(
        HttpGateway::from_config(&config.gateway).with_model(agent.pipeline().model()),
    );

    println!("🌐 Ragline gateway on http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   GET  /health");
    println!("   POST /v1/prompt");
    println!("   POST /v1/prompt/stream");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            on_signal.cancel();
        }
    });

    agent.serve(gateway, cancel).await?;
    Ok(())
}
