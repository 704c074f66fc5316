//! `memtier config` — Configuration management commands.

use super::load_config;
use memtier_config::{AppConfig, ProviderKind, StorageBackend};
use std::path::Path;

pub async fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match load_config(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let m = &config.memory;
            let mut warnings = Vec::new();

            if config.provider.kind == ProviderKind::OpenaiCompat
                && config.provider.api_key.is_none()
                && !config.provider.base_url.contains("localhost")
            {
                warnings.push("No API key set for a remote provider (set MEMTIER_API_KEY)");
            }
            if m.min_fragment_tokens > m.token_budget_default {
                warnings.push("min_fragment_tokens exceeds the default budget; nothing will be truncated");
            }
            if m.summarization_trigger_count < m.window_size {
                warnings.push("summarization_trigger_count below window_size produces single-window summaries");
            }
            if config.storage.backend == StorageBackend::Memory {
                warnings.push("Memory backend: nothing survives the process");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Provider:   {:?}", config.provider.kind);
            println!("   Storage:    {:?} ({})", config.storage.backend, config.storage.resolved_path().display());
            println!("   Budget:     {} tokens", m.token_budget_default);
            println!("   TTL:        {}s", m.short_term_ttl_seconds);
            println!("   Windows:    {} items, {} overlap", m.window_size, m.overlap);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
