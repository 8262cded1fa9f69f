//! `picoagent doctor` — diagnose config, workspace, memory, and provider.

use picoagent_config::AppConfig;
use picoagent_memory::VectorMemory;
use picoagent_providers::ProviderRegistry;

use crate::{CliError, CliResult};

pub async fn run() -> CliResult {
    // Config
    let config = match AppConfig::load() {
        Ok(config) => {
            println!("ok    config ({})", AppConfig::config_path().display());
            config
        }
        Err(e) => {
            println!("FAIL  config: {e}");
            return Err(CliError::Config(e.to_string()));
        }
    };

    // Workspace
    let workspace = config.workspace_root_path();
    match std::fs::create_dir_all(&workspace)
        .and_then(|_| std::fs::write(workspace.join(".doctor-probe"), b"ok"))
        .and_then(|_| std::fs::remove_file(workspace.join(".doctor-probe")))
    {
        Ok(()) => println!("ok    workspace writable ({})", workspace.display()),
        Err(e) => println!("FAIL  workspace: {e}"),
    }

    // Vector memory
    let memory_path = AppConfig::memory_path();
    if memory_path.exists() {
        let mut memory = VectorMemory::new();
        match memory.load(&memory_path, None) {
            Ok(count) => println!("ok    vector memory ({count} records)"),
            Err(e) => println!("FAIL  vector memory: {e}"),
        }
    } else {
        println!("ok    vector memory (empty, first run)");
    }

    // Provider
    let client = ProviderRegistry::with_default_specs().create_client(&config);
    if client.name() == "heuristic" {
        println!("warn  no provider key configured; running on offline heuristics");
        return Ok(());
    }
    if client.health_check().await {
        println!("ok    provider {} reachable", client.name());
        Ok(())
    } else {
        println!("FAIL  provider {} unreachable", client.name());
        Err(CliError::Provider(format!("{} unreachable", client.name())))
    }
}
