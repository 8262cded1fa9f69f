//! `picoagent export-session` / `import-session`.

use picoagent_agent::SessionManager;
use picoagent_config::AppConfig;

use crate::{CliError, CliResult};

pub async fn export(id: &str) -> CliResult {
    let manager = SessionManager::new(AppConfig::sessions_path());
    match manager.export(id).await {
        Some(json) => {
            println!("{json}");
            Ok(())
        }
        None => {
            let known = manager.keys().await;
            Err(CliError::User(format!(
                "no session '{id}'. Known sessions: {}",
                if known.is_empty() { "(none)".into() } else { known.join(", ") }
            )))
        }
    }
}

pub async fn import(file: &str) -> CliResult {
    let json = std::fs::read_to_string(file)
        .map_err(|e| CliError::User(format!("read {file}: {e}")))?;
    let manager = SessionManager::new(AppConfig::sessions_path());
    let id = manager
        .import(&json)
        .await
        .map_err(|e| CliError::User(format!("import: {e}")))?;
    println!("imported session '{id}'");
    Ok(())
}
