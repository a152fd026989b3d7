//! Configuration types for the search methods.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fan-out and budget settings shared by every search method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Concurrent oracle calls per cycle.
    #[serde(default = "default_num_samplers")]
    pub num_samplers: usize,
    /// Maximum concurrent evaluator calls.
    #[serde(default = "default_num_evaluators")]
    pub num_evaluators: usize,
    /// Sample budget. `None` runs until cancelled.
    #[serde(default)]
    pub max_samples: Option<u64>,
    /// Log population statistics every this many samples.
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_samplers: default_num_samplers(),
            num_evaluators: default_num_evaluators(),
            max_samples: None,
            stats_interval: default_stats_interval(),
        }
    }
}

fn default_num_samplers() -> usize {
    4
}
fn default_num_evaluators() -> usize {
    4
}
fn default_stats_interval() -> u64 {
    50
}
fn default_num_islands() -> usize {
    10
}
fn default_solutions_per_prompt() -> usize {
    2
}
fn default_reset_period_secs() -> u64 {
    4 * 60 * 60
}
fn default_max_idle_cycles() -> u32 {
    3
}

/// Island-model search (multiple sub-populations, periodic reset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IslandSearchConfig {
    /// Directory holding `run_state.json` and `population.json`.
    pub output_dir: PathBuf,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default = "default_num_islands")]
    pub num_islands: usize,
    /// Reference solutions drawn into each prompt.
    #[serde(default = "default_solutions_per_prompt")]
    pub solutions_per_prompt: usize,
    /// Seconds between island resets.
    #[serde(default = "default_reset_period_secs")]
    pub reset_period_secs: u64,
    /// Consecutive cycles without prompt material before the run stops.
    #[serde(default = "default_max_idle_cycles")]
    pub max_idle_cycles: u32,
    /// Seed for island selection. Random when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl IslandSearchConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sampling: SamplingConfig::default(),
            num_islands: default_num_islands(),
            solutions_per_prompt: default_solutions_per_prompt(),
            reset_period_secs: default_reset_period_secs(),
            max_idle_cycles: default_max_idle_cycles(),
            random_seed: None,
        }
    }

    #[inline]
    pub fn reset_period(&self) -> Duration {
        Duration::from_secs(self.reset_period_secs)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_output_dir(&self.output_dir)?;
        self.sampling.validate()?;
        if self.num_islands == 0 {
            return Err(ConfigError::InvalidIslandCount);
        }
        if self.solutions_per_prompt == 0 {
            return Err(ConfigError::InvalidSolutionsPerPrompt);
        }
        if self.reset_period_secs == 0 {
            return Err(ConfigError::InvalidResetPeriod);
        }
        if self.max_idle_cycles == 0 {
            return Err(ConfigError::InvalidIdleLimit);
        }
        Ok(())
    }
}

/// Single-incumbent hill climbing, ES(1+1) style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HillClimbConfig {
    /// Directory holding `run_state.json`.
    pub output_dir: PathBuf,
    #[serde(default)]
    pub sampling: SamplingConfig,
    /// Consecutive cycles without a valid incumbent before the run stops.
    #[serde(default = "default_max_idle_cycles")]
    pub max_idle_cycles: u32,
}

impl HillClimbConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            sampling: SamplingConfig::default(),
            max_idle_cycles: default_max_idle_cycles(),
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_output_dir(&self.output_dir)?;
        self.sampling.validate()?;
        if self.max_idle_cycles == 0 {
            return Err(ConfigError::InvalidIdleLimit);
        }
        Ok(())
    }
}

impl SamplingConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_samplers == 0 {
            return Err(ConfigError::InvalidSamplers);
        }
        if self.num_evaluators == 0 {
            return Err(ConfigError::InvalidEvaluators);
        }
        if self.max_samples == Some(0) {
            return Err(ConfigError::InvalidSampleBudget);
        }
        if self.stats_interval == 0 {
            return Err(ConfigError::InvalidStatsInterval);
        }
        Ok(())
    }
}

fn validate_output_dir(dir: &std::path::Path) -> Result<(), ConfigError> {
    if dir.as_os_str().is_empty() {
        return Err(ConfigError::MissingOutputDir);
    }
    Ok(())
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Output directory must be set")]
    MissingOutputDir,
    #[error("Sampler count must be non-zero")]
    InvalidSamplers,
    #[error("Evaluator count must be non-zero")]
    InvalidEvaluators,
    #[error("Sample budget must be positive when set")]
    InvalidSampleBudget,
    #[error("Statistics interval must be non-zero")]
    InvalidStatsInterval,
    #[error("Island count must be non-zero")]
    InvalidIslandCount,
    #[error("Solutions per prompt must be non-zero")]
    InvalidSolutionsPerPrompt,
    #[error("Reset period must be positive")]
    InvalidResetPeriod,
    #[error("Idle cycle limit must be non-zero")]
    InvalidIdleLimit,
}
