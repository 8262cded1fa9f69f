//! `picoagent tools` — list registered tools.

use picoagent_config::AppConfig;

use crate::{CliError, CliResult};

pub async fn run() -> CliResult {
    let config = AppConfig::load()?;
    let registry = picoagent_tools::default_registry(&config)
        .map_err(|e| CliError::Config(format!("tool registry: {e}")))?;

    for descriptor in registry.list() {
        let flags = [
            descriptor.cacheable.then_some("cacheable"),
            descriptor.timeout_seconds.map(|_| "custom-timeout"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
        println!("{:<10} {}", descriptor.name, descriptor.description);
        if !flags.is_empty() {
            println!("{:<10} [{flags}]", "");
        }
    }
    Ok(())
}
