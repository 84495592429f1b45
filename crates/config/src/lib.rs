//! Configuration loading, validation, and management for Recollect.
//!
//! Loads configuration from `~/.recollect/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`EngineConfig`] is passed explicitly to every component at construction.

use recollect_core::MemoryTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tolerance when checking that evaluation weights sum to 1.0.
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// The root configuration structure.
///
/// Maps directly to `~/.recollect/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tier capacities and migration policy
    #[serde(default)]
    pub tiers: TierConfig,

    /// Self-correction loop settings
    #[serde(default)]
    pub correction: CorrectionConfig,

    /// Relevance evaluation settings
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Stats sampling and broadcast settings
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default = "default_hot_capacity")]
    pub hot_capacity: usize,

    #[serde(default = "default_warm_capacity")]
    pub warm_capacity: usize,

    #[serde(default = "default_cold_capacity")]
    pub cold_capacity: usize,

    /// Minimum relevance score for a young block to stay HOT.
    #[serde(default = "default_hot_threshold")]
    pub hot_threshold: f32,

    /// Age after which a block is no longer eligible for HOT.
    #[serde(default = "default_compress_after_secs")]
    pub compress_after_secs: u64,

    /// Age after which a block is archived to COLD.
    #[serde(default = "default_archive_after_secs")]
    pub archive_after_secs: u64,

    /// Length of the lossy summary kept live for WARM blocks.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
}

fn default_hot_capacity() -> usize {
    100
}
fn default_warm_capacity() -> usize {
    500
}
fn default_cold_capacity() -> usize {
    2000
}
fn default_hot_threshold() -> f32 {
    0.7
}
fn default_compress_after_secs() -> u64 {
    30 * 60
}
fn default_archive_after_secs() -> u64 {
    24 * 60 * 60
}
fn default_summary_chars() -> usize {
    160
}

impl TierConfig {
    pub fn capacity(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::Hot => self.hot_capacity,
            MemoryTier::Warm => self.warm_capacity,
            MemoryTier::Cold => self.cold_capacity,
        }
    }

    pub fn compress_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.compress_after_secs as i64)
    }

    pub fn archive_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.archive_after_secs as i64)
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            hot_capacity: default_hot_capacity(),
            warm_capacity: default_warm_capacity(),
            cold_capacity: default_cold_capacity(),
            hot_threshold: default_hot_threshold(),
            compress_after_secs: default_compress_after_secs(),
            archive_after_secs: default_archive_after_secs(),
            summary_chars: default_summary_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// When false the loop only logs the decisions it would make.
    #[serde(default = "default_true")]
    pub enable_auto_correction: bool,

    #[serde(default = "default_correction_interval")]
    pub correction_interval_seconds: u64,

    /// Most recent blocks re-evaluated per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_remove_threshold")]
    pub remove_threshold: f32,

    #[serde(default = "default_review_threshold")]
    pub review_threshold: f32,

    /// Consecutive REVIEW cycles before escalating to removal.
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,

    /// Attempts per block when a concurrent writer collides.
    #[serde(default = "default_max_mutation_attempts")]
    pub max_mutation_attempts: u32,

    /// Ask the completion provider to rewrite REVIEW blocks.
    #[serde(default)]
    pub improve_review_blocks: bool,

    #[serde(default = "default_improvement_timeout_ms")]
    pub improvement_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_correction_interval() -> u64 {
    60
}
fn default_batch_size() -> usize {
    10
}
fn default_remove_threshold() -> f32 {
    0.4
}
fn default_review_threshold() -> f32 {
    0.6
}
fn default_max_review_cycles() -> u32 {
    3
}
fn default_max_mutation_attempts() -> u32 {
    3
}
fn default_improvement_timeout_ms() -> u64 {
    10_000
}

impl CorrectionConfig {
    /// Remove below 0.4, review below 0.6, retain otherwise.
    pub fn split_thresholds() -> Self {
        Self::default()
    }

    /// One cutoff: remove below it, retain at or above it. No REVIEW band.
    pub fn single_cutoff(cutoff: f32) -> Self {
        Self {
            remove_threshold: cutoff,
            review_threshold: cutoff,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.correction_interval_seconds)
    }

    pub fn improvement_timeout(&self) -> Duration {
        Duration::from_millis(self.improvement_timeout_ms)
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enable_auto_correction: true,
            correction_interval_seconds: default_correction_interval(),
            batch_size: default_batch_size(),
            remove_threshold: default_remove_threshold(),
            review_threshold: default_review_threshold(),
            max_review_cycles: default_max_review_cycles(),
            max_mutation_attempts: default_max_mutation_attempts(),
            improve_review_blocks: false,
            improvement_timeout_ms: default_improvement_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Bound on each sub-scorer call before it counts as failed.
    #[serde(default = "default_scorer_timeout_ms")]
    pub scorer_timeout_ms: u64,

    /// Age at which the temporal decay term halves.
    #[serde(default = "default_recency_half_life_secs")]
    pub recency_half_life_secs: u64,

    /// Preceding blocks used as conversational context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    #[serde(default)]
    pub weights: EvaluationWeights,
}

fn default_scorer_timeout_ms() -> u64 {
    3000
}
fn default_recency_half_life_secs() -> u64 {
    3600
}
fn default_context_window() -> usize {
    5
}

impl EvaluationConfig {
    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_millis(self.scorer_timeout_ms)
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            scorer_timeout_ms: default_scorer_timeout_ms(),
            recency_half_life_secs: default_recency_half_life_secs(),
            context_window: default_context_window(),
            weights: EvaluationWeights::default(),
        }
    }
}

/// Weights of the five relevance dimensions. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationWeights {
    #[serde(default = "default_semantic_weight")]
    pub semantic_alignment: f32,
    #[serde(default = "default_temporal_weight")]
    pub temporal_relevance: f32,
    #[serde(default = "default_goal_weight")]
    pub goal_contribution: f32,
    #[serde(default = "default_quality_weight")]
    pub information_quality: f32,
    #[serde(default = "default_consistency_weight")]
    pub factual_consistency: f32,
}

fn default_semantic_weight() -> f32 {
    0.30
}
fn default_temporal_weight() -> f32 {
    0.20
}
fn default_goal_weight() -> f32 {
    0.25
}
fn default_quality_weight() -> f32 {
    0.15
}
fn default_consistency_weight() -> f32 {
    0.10
}

impl EvaluationWeights {
    /// Equal weight on every dimension.
    pub fn uniform() -> Self {
        Self {
            semantic_alignment: 0.2,
            temporal_relevance: 0.2,
            goal_contribution: 0.2,
            information_quality: 0.2,
            factual_consistency: 0.2,
        }
    }

    pub fn as_array(&self) -> [f32; 5] {
        [
            self.semantic_alignment,
            self.temporal_relevance,
            self.goal_contribution,
            self.information_quality,
            self.factual_consistency,
        ]
    }

    pub fn sum(&self) -> f32 {
        self.as_array().iter().sum()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.as_array().iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(ConfigError::ValidationError(
                "evaluation weights must each be between 0.0 and 1.0".into(),
            ));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::ValidationError(format!(
                "evaluation weights must sum to 1.0 (got {sum:.4})"
            )));
        }
        Ok(())
    }
}

impl Default for EvaluationWeights {
    fn default() -> Self {
        Self {
            semantic_alignment: default_semantic_weight(),
            temporal_relevance: default_temporal_weight(),
            goal_contribution: default_goal_weight(),
            information_quality: default_quality_weight(),
            factual_consistency: default_consistency_weight(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Snapshot cadence, independent of the correction interval.
    #[serde(default = "default_stats_interval")]
    pub interval_secs: u64,

    /// Snapshots buffered per subscriber before the oldest is dropped.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,

    #[serde(default = "default_active_session_window")]
    pub active_session_window_secs: u64,
}

fn default_stats_interval() -> u64 {
    5
}
fn default_subscriber_queue() -> usize {
    32
}
fn default_active_session_window() -> u64 {
    30 * 60
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn active_session_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.active_session_window_secs as i64)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_stats_interval(),
            subscriber_queue: default_subscriber_queue(),
            active_session_window_secs: default_active_session_window(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.recollect/config.toml).
    ///
    /// Environment variables override the file:
    /// - `RECOLLECT_CORRECTION_INTERVAL` (seconds)
    /// - `RECOLLECT_AUTO_CORRECTION` (`true`/`false`)
    /// - `RECOLLECT_HOT_CAPACITY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RECOLLECT_CORRECTION_INTERVAL") {
            self.correction.correction_interval_seconds = parse_env("RECOLLECT_CORRECTION_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RECOLLECT_AUTO_CORRECTION") {
            self.correction.enable_auto_correction = parse_env("RECOLLECT_AUTO_CORRECTION", &v)?;
        }
        if let Some(v) = lookup("RECOLLECT_HOT_CAPACITY") {
            self.tiers.hot_capacity = parse_env("RECOLLECT_HOT_CAPACITY", &v)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".recollect")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tiers;
        if t.hot_capacity == 0 || t.warm_capacity == 0 || t.cold_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "tier capacities must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&t.hot_threshold) {
            return Err(ConfigError::ValidationError(
                "hot_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if t.compress_after_secs > t.archive_after_secs {
            return Err(ConfigError::ValidationError(
                "compress_after_secs must not exceed archive_after_secs".into(),
            ));
        }

        let c = &self.correction;
        for (name, value) in [
            ("remove_threshold", c.remove_threshold),
            ("review_threshold", c.review_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if c.remove_threshold > c.review_threshold {
            return Err(ConfigError::ValidationError(
                "remove_threshold must not exceed review_threshold".into(),
            ));
        }
        if c.correction_interval_seconds == 0 || c.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "correction_interval_seconds and batch_size must be greater than 0".into(),
            ));
        }
        if c.max_mutation_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_mutation_attempts must be at least 1".into(),
            ));
        }

        self.evaluation.weights.validate()?;

        if self.stats.interval_secs == 0 || self.stats.subscriber_queue == 0 {
            return Err(ConfigError::ValidationError(
                "stats interval_secs and subscriber_queue must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!("{key} has an invalid value '{value}'"))
    })
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for recollect_core::Error {
    fn from(e: ConfigError) -> Self {
        recollect_core::Error::Config {
            message: e.to_string(),
        }
    }
}
