//! `picoagent prune-memory` — remove old or decayed records.

use picoagent_config::AppConfig;
use picoagent_memory::{PruneCriteria, VectorMemory};

use crate::{CliError, CliResult};

pub async fn prune(older_than_days: Option<f64>, min_score: Option<f32>) -> CliResult {
    let criteria = match (older_than_days, min_score) {
        (Some(days), None) => PruneCriteria::OlderThan(days * 86_400.0),
        (None, Some(score)) => PruneCriteria::MinDecay(score),
        (Some(_), Some(_)) => {
            return Err(CliError::User(
                "pass either --older-than or --min-score, not both".into(),
            ))
        }
        (None, None) => {
            return Err(CliError::User(
                "pass --older-than DAYS or --min-score SCORE".into(),
            ))
        }
    };

    let config = AppConfig::load()?;
    let path = AppConfig::memory_path();
    let mut memory = VectorMemory::new()
        .with_half_life_secs(config.memory.half_life_days * 86_400.0)
        .with_max_records(config.memory.max_records);
    let loaded = memory
        .load(&path, None)
        .map_err(|e| CliError::User(format!("load memory: {e}")))?;
    if loaded == 0 {
        println!("memory is empty, nothing to prune");
        return Ok(());
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let removed = memory.prune(criteria, now);
    memory
        .save(&path)
        .map_err(|e| CliError::User(format!("save memory: {e}")))?;
    println!("pruned {removed} of {loaded} records, {} remain", memory.len());
    Ok(())
}
