//! Run ledger and progress reporting types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Candidate, UsageRecord, UsageTotals};

/// Usage stage for oracle calls made while sampling.
pub const SAMPLE_STAGE: &str = "sample";

/// Crash-resumable ledger of one run.
///
/// Only the search loop that owns the run mutates it; the checkpoint manager
/// persists it after every merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Evaluated sampled candidates. The seed is not counted.
    #[serde(default)]
    pub total_samples: u64,
    /// Every evaluated candidate in completion order, seed first.
    #[serde(default)]
    pub history: Vec<Candidate>,
    /// Oracle usage per stage.
    #[serde(default)]
    pub usage_history: BTreeMap<String, Vec<UsageRecord>>,
    #[serde(default)]
    pub is_done: bool,
}

impl RunState {
    /// Append an evaluated sample and count it.
    pub fn record_sample(&mut self, candidate: Candidate) {
        self.history.push(candidate);
        self.total_samples += 1;
    }

    pub fn record_usage(&mut self, stage: &str, usage: UsageRecord) {
        self.usage_history
            .entry(stage.to_string())
            .or_default()
            .push(usage);
    }

    /// Best valid candidate in history, earliest wins ties.
    pub fn best_valid(&self) -> Option<&Candidate> {
        self.history
            .iter()
            .filter(|c| c.is_valid())
            .fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if b.rank_score().total_cmp(&c.rank_score()).is_ge() => Some(b),
                _ => Some(c),
            })
    }

    pub fn valid_count(&self) -> usize {
        self.history.iter().filter(|c| c.is_valid()).count()
    }

    pub fn usage_totals(&self, stage: &str) -> UsageTotals {
        self.usage_history
            .get(stage)
            .map(|records| records.iter().collect())
            .unwrap_or_default()
    }

    /// Whether the sample budget is spent.
    pub fn budget_exhausted(&self, max_samples: Option<u64>) -> bool {
        max_samples.is_some_and(|max| self.total_samples >= max)
    }
}

/// Current phase of a search run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SearchPhase {
    /// Building or restoring the seed and population.
    #[default]
    Initializing,
    /// Running propose/evaluate/register cycles.
    Sampling,
    /// Run finished and final checkpoint written.
    Done,
    /// Stopped by a cancellation request.
    Interrupted,
}

/// Reason a search run stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Sample budget reached.
    BudgetExhausted,
    /// User cancelled.
    Cancelled,
    /// No valid candidate to prompt from for too many cycles.
    Starved,
}

/// Progress update passed to callbacks after every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchProgress {
    pub phase: SearchPhase,
    /// Cycles started this session.
    pub cycle: u64,
    pub total_samples: u64,
    pub max_samples: Option<u64>,
    pub best_score: Option<f64>,
}
