//! `ragline chat` — Interactive terminal chat.

use std::path::Path;
use std::sync::Arc;

use ragline_channels::CliGateway;
use tokio_util::sync::CancellationToken;

use crate::stack;

pub async fn run(
    config_path: Option<&Path>,
    system_prompt: String,
    show_reasoning: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = stack::load_config(config_path)?;
    config.pipeline.stream_tokens = !show_reasoning;
    let agent = stack::build_agent(&config).await?;

    println!("🤖 Ragline — {} ({})", agent.name(), agent.pipeline().model());
    println!("   Type 'exit' or 'quit' to leave.\n");

    let gateway = Arc::new(
        CliGateway::stdio()
            .with_system_prompt(system_prompt)
            .with_reasoning(show_reasoning)
            .with_metrics(true),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    agent.serve(gateway, cancel).await?;
    println!("👋 Bye");
    Ok(())
}
