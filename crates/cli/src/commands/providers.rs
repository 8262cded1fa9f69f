//! `picoagent providers` — list known provider specs.

use picoagent_providers::ProviderRegistry;

use crate::CliResult;

pub async fn run() -> CliResult {
    let registry = ProviderRegistry::with_default_specs();
    println!("{:<12} {:<42} {:<32} key env", "name", "base url", "default model");
    for spec in registry.list() {
        let configured = std::env::var(&spec.api_key_env)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        println!(
            "{:<12} {:<42} {:<32} {}{}",
            spec.name,
            spec.base_url,
            spec.default_chat_model,
            spec.api_key_env,
            if configured { " (set)" } else { "" },
        );
    }
    Ok(())
}
