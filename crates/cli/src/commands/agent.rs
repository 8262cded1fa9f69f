//! `picoagent agent` — interactive chat or single-message mode.

use picoagent_agent::{AgentLoop, ContextBuilder, SessionManager, SubagentCoordinator};
use picoagent_channels::CliChannel;
use picoagent_config::AppConfig;
use picoagent_core::channel::Channel;
use picoagent_memory::{DualMemoryStore, VectorMemory};
use picoagent_providers::ProviderRegistry;
use picoagent_routing::{AdaptiveConfig, AdaptiveThreshold, EntropyScheduler};
use picoagent_skills::SkillLibrary;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::{CliError, CliResult};

pub async fn run(message: Option<String>) -> CliResult {
    let config = AppConfig::load()?;
    let agent = build_agent(&config)?;

    match message {
        Some(text) => {
            let outcome = agent.handle_message("cli", "local", &text).await;
            println!("{}", outcome.response);
            Ok(())
        }
        None => {
            println!("picoagent — type a message, or 'exit' to quit.");
            let channel = CliChannel::new();
            loop {
                let batch = channel
                    .poll()
                    .await
                    .map_err(|e| CliError::User(format!("stdin: {e}")))?;
                if batch.is_empty() {
                    break;
                }
                for inbound in batch {
                    let outcome = agent
                        .handle_message(&inbound.channel, &inbound.sender, &inbound.text)
                        .await;
                    if let Err(e) = channel.send(&inbound.sender, &outcome.response).await {
                        warn!(error = %e, "Failed to deliver reply");
                    }
                }
            }
            Ok(())
        }
    }
}

/// Wire the full runtime from config.
pub(crate) fn build_agent(config: &AppConfig) -> Result<AgentLoop, CliError> {
    let provider = ProviderRegistry::with_default_specs().create_client(config);

    let tools = picoagent_tools::default_registry(config)
        .map_err(|e| CliError::Config(format!("tool registry: {e}")))?;

    let mut memory = VectorMemory::new()
        .with_half_life_secs(config.memory.half_life_days * 86_400.0)
        .with_max_records(config.memory.max_records);
    if let Err(e) = memory.load(&AppConfig::memory_path(), None) {
        warn!(error = %e, "Vector memory unreadable, starting empty");
    }

    let adaptive = AdaptiveThreshold::new(AdaptiveConfig {
        initial_threshold_bits: config.entropy_threshold_bits,
        ..AdaptiveConfig::default()
    })
    .map_err(CliError::Config)?
    .with_persistence(AppConfig::threshold_path());

    let sessions = Arc::new(SessionManager::new(AppConfig::sessions_path()));
    let skills = Arc::new(SkillLibrary::new(
        AppConfig::skills_dir(),
        AppConfig::skill_usage_path(),
    ));
    let dual = Arc::new(DualMemoryStore::new(config.dual_memory_dir()));

    let mut agent = AgentLoop::new(
        provider,
        Arc::new(tools),
        sessions,
        config.workspace_root_path(),
    )
    .with_scheduler(EntropyScheduler::new(config.entropy_threshold_bits))
    .with_memory(memory, Some(AppConfig::memory_path()))
    .with_skills(skills)
    .with_dual_memory(dual)
    .with_context(ContextBuilder::new())
    .with_max_tool_chain(config.max_tool_chain)
    .with_memory_top_k(config.memory.top_k)
    .with_history_window(config.session.history_window)
    .with_consolidation_window(config.session.consolidation_window)
    .with_turn_deadline(Duration::from_secs(config.turn_deadline_seconds));

    if config.adaptive_threshold_enabled {
        agent = agent.with_adaptive(adaptive);
    }
    if config.subagent.enabled {
        agent = agent.with_subagent(
            SubagentCoordinator::new()
                .with_min_confidence(config.subagent.min_confidence)
                .with_budget(Duration::from_secs(config.subagent.budget_seconds)),
        );
    }

    Ok(agent)
}
