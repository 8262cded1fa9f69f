//! `picoagent onboard` — first-run setup.

use picoagent_config::AppConfig;

use crate::{CliError, CliResult};

pub async fn run() -> CliResult {
    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("Config already present at {}", config_path.display());
    } else {
        let config = AppConfig::default();
        config.save_to(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
    }

    let config = AppConfig::load()?;
    let workspace = config.workspace_root_path();
    std::fs::create_dir_all(&workspace)
        .map_err(|e| CliError::Config(format!("create workspace {}: {e}", workspace.display())))?;
    std::fs::create_dir_all(AppConfig::skills_dir())
        .map_err(|e| CliError::Config(format!("create skills dir: {e}")))?;

    println!("Workspace: {}", workspace.display());
    println!("Skills:    {}", AppConfig::skills_dir().display());
    println!(
        "Provider:  {} (set the key env var, or edit {})",
        config.provider,
        config_path.display()
    );
    println!("Try: picoagent agent -m \"list the files in my workspace\"");
    Ok(())
}
