//! `picoagent threshold-stats` — show the adaptive threshold state.

use picoagent_config::AppConfig;
use picoagent_routing::{AdaptiveConfig, AdaptiveThreshold};

use crate::{CliError, CliResult};

pub async fn run() -> CliResult {
    let config = AppConfig::load()?;
    let adaptive = AdaptiveThreshold::new(AdaptiveConfig {
        initial_threshold_bits: config.entropy_threshold_bits,
        ..AdaptiveConfig::default()
    })
    .map_err(CliError::Config)?
    .with_persistence(AppConfig::threshold_path());

    let stats = adaptive.stats();
    println!("threshold: {:.3} bits", stats.threshold_bits);
    println!("win rate:  {:.1}% (recent acts)", stats.win_rate * 100.0);
    println!("samples:   {}", stats.sample_count);
    if !config.adaptive_threshold_enabled {
        println!("note: adaptive tuning is disabled in config");
    }
    Ok(())
}
