//! `recollect config`: Configuration management commands.

use recollect_config::EngineConfig;
use std::path::Path;

pub fn show(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

pub fn defaults() {
    println!("{}", EngineConfig::default_toml());
}

pub fn path() {
    println!("{}", EngineConfig::config_dir().join("config.toml").display());
}

pub fn validate(file: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let loaded = match file {
        Some(path) => EngineConfig::load_from(path),
        None => EngineConfig::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.correction.enable_auto_correction {
        warnings.push("Auto-correction disabled: the loop only logs what it would do");
    }
    if config.correction.remove_threshold == config.correction.review_threshold {
        warnings.push("remove_threshold equals review_threshold: no REVIEW band");
    }
    if config.tiers.hot_threshold < config.correction.review_threshold {
        warnings.push("hot_threshold is below review_threshold: REVIEW blocks can stay HOT");
    }
    for w in &warnings {
        println!("   ⚠️  {w}");
    }

    println!();
    println!(
        "   Tiers:       HOT {} / WARM {} / COLD {}",
        config.tiers.hot_capacity, config.tiers.warm_capacity, config.tiers.cold_capacity
    );
    println!(
        "   Thresholds:  remove < {} ≤ review < {} ≤ retain",
        config.correction.remove_threshold, config.correction.review_threshold
    );
    println!("   Interval:    {}s", config.correction.correction_interval_seconds);
    println!("   Batch size:  {}", config.correction.batch_size);
    Ok(())
}
