//! `ragline doctor` — Diagnose configuration and startup preconditions.

use std::path::Path;

use ragline_config::{AppConfig, RuntimeKind, StoreBackend};

use crate::stack;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Ragline Doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_path);
    if !path.exists() {
        println!("  ⚠️  No config file at {} — using defaults (run `ragline init`)", path.display());
    }

    let config = match AppConfig::load(config_path) {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    match config.preflight() {
        Ok(()) => println!("  ✅ Startup preconditions met"),
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    if config.model.runtime == RuntimeKind::LlamaServer {
        match ragline_providers::build_runtime(&config) {
            Ok(runtime) => match runtime.health_check().await {
                Ok(true) => println!("  ✅ llama.cpp server reachable at {}", config.model.server_url),
                Ok(false) | Err(_) => {
                    println!("  ❌ llama.cpp server not healthy at {}", config.model.server_url);
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ {e}");
                issues += 1;
            }
        }
    }

    let store = stack::build_store(&config).await;
    match store {
        Ok(store) => match store.count().await {
            Ok(n) => println!("  ✅ Knowledge store `{}` ({n} entries)", store.name()),
            Err(e) => {
                println!("  ❌ Knowledge store unreadable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }
    if config.store.backend == StoreBackend::Memory {
        println!("  ⚠️  Memory store is not persisted between runs");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
