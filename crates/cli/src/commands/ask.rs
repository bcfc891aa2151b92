//! `ragline ask` — One prompt, one answer.
//!
//! The answer goes to stdout so it can be piped; metrics go to stderr.

use std::path::Path;

use ragline_core::PromptRequest;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::stack;

pub async fn run(
    config_path: Option<&Path>,
    message: String,
    system_prompt: String,
    show_reasoning: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = stack::load_config(config_path)?;
    let pipeline = stack::build_pipeline(&config).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let request = PromptRequest::new(message, system_prompt);
    let outcome = pipeline.handle(&request, None, &cancel).await?;

    if show_reasoning && !outcome.split.reasoning.trim().is_empty() {
        println!("[reasoning]\n{}\n[answer]", outcome.split.reasoning.trim());
    }
    println!("{}", outcome.answer().trim());
    eprintln!(
        "[{} tokens in {:.2}s, {:.2} tok/s]",
        outcome.payload.response_length, outcome.payload.elapsed_time, outcome.payload.speed
    );

    if let Err(e) = pipeline.persist(&request.prompt, outcome.answer(), &cancel).await {
        warn!(error = %e, "Exchange not persisted");
    }
    Ok(())
}
