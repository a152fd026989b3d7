//! Single-incumbent hill climbing, ES(1+1) style.
//!
//! There is no population: the incumbent is the best valid candidate in the
//! run history, recomputed every cycle. Each cycle asks the oracle for
//! `num_samplers` variations of the incumbent and the run state is
//! checkpointed after every single evaluation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::schema::{
    Candidate, HillClimbConfig, RunState, SAMPLE_STAGE, SearchPhase, SearchProgress, StopReason,
};

use super::checkpoint::CheckpointManager;
use super::collaborators::{Adapter, GenerativeOracle, SandboxEvaluator};
use super::error::{CheckpointError, SearchError};
use super::pool::{WorkerPool, panic_message};
use super::search::SearchOutcome;
use super::stages::{budget_label, cycle_quota, evaluate_each, generate_batch, make_seed};

/// Hill-climbing search over a single incumbent.
pub struct HillClimb<A, O, E> {
    config: HillClimbConfig,
    adapter: A,
    oracle: O,
    evaluator: E,
    checkpoints: CheckpointManager,
    samplers: WorkerPool,
    evaluators: WorkerPool,
    cancelled: Arc<AtomicBool>,
    /// Cycle that panics before doing any work.
    #[cfg(test)]
    panic_on_cycle: Option<u64>,
}

impl<A, O, E> HillClimb<A, O, E>
where
    A: Adapter,
    O: GenerativeOracle,
    E: SandboxEvaluator,
{
    pub fn new(
        config: HillClimbConfig,
        adapter: A,
        oracle: O,
        evaluator: E,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let checkpoints = CheckpointManager::new(&config.output_dir)?;
        let samplers = WorkerPool::new("sampler", config.sampling.num_samplers)?;
        let evaluators = WorkerPool::new("evaluator", config.sampling.num_evaluators)?;

        Ok(Self {
            config,
            adapter,
            oracle,
            evaluator,
            checkpoints,
            samplers,
            evaluators,
            cancelled: Arc::new(AtomicBool::new(false)),
            #[cfg(test)]
            panic_on_cycle: None,
        })
    }

    pub fn config(&self) -> &HillClimbConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn run(&mut self) -> Result<SearchOutcome, SearchError> {
        self.run_with_callback(|_| {})
    }

    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<SearchOutcome, SearchError>
    where
        F: FnMut(&SearchProgress),
    {
        let max_samples = self.config.sampling.max_samples;
        let mut state = self.initialize()?;
        callback(&self.progress(SearchPhase::Initializing, 0, &state));

        info!(
            "Hill climb started: {}/{} samples",
            state.total_samples,
            budget_label(max_samples)
        );

        let mut cycle = 0u64;
        let mut idle_cycles = 0u32;
        let stop_reason = loop {
            if self.cancelled.load(Ordering::Relaxed) {
                break StopReason::Cancelled;
            }
            if state.budget_exhausted(max_samples) {
                break StopReason::BudgetExhausted;
            }
            if idle_cycles >= self.config.max_idle_cycles {
                warn!("No valid incumbent after {} cycles; stopping", idle_cycles);
                break StopReason::Starved;
            }

            cycle += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle(cycle, &mut state))) {
                Ok(Ok(true)) => idle_cycles = 0,
                Ok(Ok(false)) => idle_cycles += 1,
                Ok(Err(e)) => return Err(e),
                Err(payload) => {
                    error!("Cycle {} panicked: {}", cycle, panic_message(payload.as_ref()));
                }
            }

            callback(&self.progress(SearchPhase::Sampling, cycle, &state));
        };

        state.is_done = true;
        self.checkpoints.save_run_state(&state)?;

        let phase = match stop_reason {
            StopReason::Cancelled => SearchPhase::Interrupted,
            _ => SearchPhase::Done,
        };
        callback(&self.progress(phase, cycle, &state));

        let best = state.best_valid().cloned();
        info!(
            "Hill climb stopped ({:?}): {} samples, best score {:?}",
            stop_reason,
            state.total_samples,
            best.as_ref().and_then(Candidate::score)
        );

        Ok(SearchOutcome {
            stop_reason,
            total_samples: state.total_samples,
            history_len: state.history.len(),
            best,
            statistics: None,
        })
    }

    fn initialize(&mut self) -> Result<RunState, SearchError> {
        let mut state = self.checkpoints.load_run_state_or_default()?;
        state.is_done = false;

        if state.history.is_empty() {
            let seed = make_seed(&self.adapter, &self.evaluator)?;
            state.history.push(seed);
        } else {
            info!(
                "Resuming from {}: {} samples",
                self.checkpoints.output_dir().display(),
                state.total_samples
            );
        }

        self.checkpoints.save_run_state(&state)?;
        Ok(state)
    }

    /// One round of proposals from the incumbent. `Ok(false)` when there is
    /// no valid incumbent to propose from.
    fn run_cycle(&mut self, cycle: u64, state: &mut RunState) -> Result<bool, SearchError> {
        #[cfg(test)]
        if self.panic_on_cycle == Some(cycle) {
            panic!("injected fault in cycle {cycle}");
        }

        let Some(incumbent) = state.best_valid().cloned() else {
            debug!("Cycle {}: no valid incumbent; skipping", cycle);
            return Ok(false);
        };
        let incumbent_score = incumbent.score();

        let quota = cycle_quota(
            state,
            self.config.sampling.num_samplers,
            self.config.sampling.max_samples,
        );
        let candidates = generate_batch(
            &self.samplers,
            &self.adapter,
            &self.oracle,
            std::slice::from_ref(&incumbent),
            quota,
            state,
        );

        let checkpoints = &self.checkpoints;
        let stats_interval = self.config.sampling.stats_interval;
        let mut save_error: Option<CheckpointError> = None;
        evaluate_each(&self.evaluators, &self.evaluator, candidates, |candidate| {
            if let (Some(score), Some(best)) = (candidate.score(), incumbent_score)
                && score > best
            {
                info!("Improved on incumbent: {} -> {}", best, score);
            }
            state.record_sample(candidate);
            if state.total_samples % stats_interval == 0 {
                let usage = state.usage_totals(SAMPLE_STAGE);
                info!(
                    "{} samples ({} valid), best score {:?}, {} tokens",
                    state.total_samples,
                    state.valid_count(),
                    state.best_valid().and_then(Candidate::score),
                    usage.total_tokens()
                );
            }
            if save_error.is_none()
                && let Err(e) = checkpoints.save_run_state(state)
            {
                save_error = Some(e);
            }
        });

        match save_error {
            Some(e) => Err(e.into()),
            None => Ok(true),
        }
    }

    fn progress(&self, phase: SearchPhase, cycle: u64, state: &RunState) -> SearchProgress {
        SearchProgress {
            phase,
            cycle,
            total_samples: state.total_samples,
            max_samples: self.config.sampling.max_samples,
            best_score: state.best_valid().and_then(Candidate::score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::testing::{EchoAdapter, ScriptedOracle, StepEvaluator};
    use crate::schema::SamplingConfig;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(dir: &Path, max_samples: u64) -> HillClimbConfig {
        HillClimbConfig {
            sampling: SamplingConfig {
                num_samplers: 2,
                num_evaluators: 1,
                max_samples: Some(max_samples),
                stats_interval: 50,
            },
            ..HillClimbConfig::new(dir)
        }
    }

    #[test]
    fn test_incumbent_is_recomputed_each_cycle() {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(EchoAdapter::default());
        let mut climber = HillClimb::new(
            config(dir.path(), 6),
            adapter.clone(),
            ScriptedOracle::default(),
            StepEvaluator::default(),
        )
        .unwrap();

        let outcome = climber.run().unwrap();
        assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(outcome.total_samples, 6);
        assert_eq!(outcome.history_len, 7);
        assert!(outcome.statistics.is_none());

        // Cycle 1 prompts from the seed, cycle 2 from cand-2, cycle 3 from cand-4.
        let prompts = adapter.prompts();
        assert_eq!(prompts.len(), 6);
        assert!(prompts.iter().all(|refs| refs.len() == 1));
        assert_eq!(prompts[0], vec!["seed".to_string()]);
        assert_eq!(prompts[2], vec!["cand-2".to_string()]);
        assert_eq!(prompts[4], vec!["cand-4".to_string()]);
        assert_eq!(outcome.best.unwrap().text(), "cand-6");
    }

    #[test]
    fn test_no_valid_incumbent_starves() {
        let dir = tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::default());
        let mut climber = HillClimb::new(
            config(dir.path(), 6),
            EchoAdapter::default().with_invalid_seed(),
            oracle.clone(),
            StepEvaluator::default(),
        )
        .unwrap();

        let outcome = climber.run().unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Starved);
        assert_eq!(outcome.total_samples, 0);
        assert_eq!(oracle.calls(), 0);
        assert!(climber.checkpoints().load_run_state().unwrap().unwrap().is_done);
    }

    #[test]
    fn test_invalid_proposals_keep_incumbent() {
        let dir = tempdir().unwrap();
        let adapter = Arc::new(EchoAdapter::default().with_seed_score(-5.0));
        let mut climber = HillClimb::new(
            config(dir.path(), 4),
            adapter.clone(),
            ScriptedOracle::default(),
            StepEvaluator::always_invalid(),
        )
        .unwrap();

        let outcome = climber.run().unwrap();
        assert_eq!(outcome.total_samples, 4);
        assert_eq!(outcome.best.unwrap().text(), "seed");
        assert!(adapter.prompts().iter().all(|refs| refs == &["seed".to_string()]));
    }

    #[test]
    fn test_cycle_panic_is_logged_and_run_continues() {
        let dir = tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::default());
        let mut climber = HillClimb::new(
            config(dir.path(), 4),
            EchoAdapter::default(),
            oracle.clone(),
            StepEvaluator::default(),
        )
        .unwrap();
        climber.panic_on_cycle = Some(2);

        let mut cycles = Vec::new();
        let outcome = climber.run_with_callback(|p| cycles.push(p.cycle)).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(outcome.total_samples, 4);
        assert_eq!(oracle.calls(), 4);
        assert_eq!(cycles, vec![0, 1, 2, 3, 3]);
        assert!(climber.checkpoints().load_run_state().unwrap().unwrap().is_done);
    }

    #[test]
    fn test_resume_keeps_history() {
        let dir = tempdir().unwrap();
        let mut climber = HillClimb::new(
            config(dir.path(), 2),
            EchoAdapter::default(),
            ScriptedOracle::default(),
            StepEvaluator::default(),
        )
        .unwrap();
        climber.run().unwrap();

        let adapter = Arc::new(EchoAdapter::default());
        let mut resumed = HillClimb::new(
            config(dir.path(), 4),
            adapter.clone(),
            ScriptedOracle::default(),
            StepEvaluator::default(),
        )
        .unwrap();
        let outcome = resumed.run().unwrap();

        assert_eq!(adapter.seed_calls(), 0);
        assert_eq!(outcome.total_samples, 4);
        assert_eq!(outcome.history_len, 5);
        // Resumed prompts start from the best candidate of the first run.
        assert_eq!(adapter.prompts()[0], vec!["cand-2".to_string()]);
    }
}
