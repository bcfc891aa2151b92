//! `ragline memory` — Inspect or seed the knowledge store.

use std::path::Path;

use ragline_core::EntryKind;
use tokio_util::sync::CancellationToken;

use crate::stack;

pub async fn add(config_path: Option<&Path>, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = stack::load_config(config_path)?;
    let knowledge = stack::build_knowledge(&config).await?;

    let id = EntryKind::Note.fresh_id();
    knowledge.remember(text, &id, &CancellationToken::new()).await?;
    println!("🧠 Remembered as {id}");
    Ok(())
}

pub async fn search(
    config_path: Option<&Path>,
    query: &str,
    k: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = stack::load_config(config_path)?;
    let knowledge = stack::build_knowledge(&config).await?;

    println!("🔍 Searching knowledge for: \"{query}\"");
    println!();

    let vector = knowledge.embedder().embed(query).await?;
    let texts = knowledge.store().query(&vector, k.max(1)).await?;
    if texts.is_empty() {
        println!("  (no entries)");
    }
    for (i, text) in texts.iter().enumerate() {
        println!("  {}. {}", i + 1, text.replace('\n', " "));
    }
    Ok(())
}

pub async fn count(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = stack::load_config(config_path)?;
    let knowledge = stack::build_knowledge(&config).await?;

    println!("🧠 Knowledge Store");
    println!("==================");
    println!("  Backend:    {}", knowledge.store().name());
    println!("  Collection: {}", config.store.collection);
    println!("  Entries:    {}", knowledge.count().await?);
    Ok(())
}
