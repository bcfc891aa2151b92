//! `ragline init` — Write the default configuration file.

use std::path::Path;

use ragline_config::AppConfig;

pub async fn run(config_path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_path);

    println!("🚀 Ragline Setup");
    println!("================\n");

    if path.exists() && !force {
        println!("  ✅ Config already exists at: {}", path.display());
        println!("     Pass --force to overwrite it.");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("  ✅ Created config: {}", path.display());

    println!();
    println!("  Next steps:");
    println!("    1. Point model.model_file at a GGUF file (or export MODEL_FILE)");
    println!("       or set model.runtime = \"llama_server\" and model.server_url");
    println!("    2. Run: ragline doctor");
    println!("    3. Run: ragline chat");
    Ok(())
}
