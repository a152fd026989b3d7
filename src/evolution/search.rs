//! Island-model search loop.
//!
//! Each cycle picks one island, prompts the oracle with its best members,
//! evaluates the answers and registers the valid ones back into that island.
//! Run state and population are checkpointed after every cycle, so a run
//! killed at any point resumes from the last completed cycle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::schema::{
    Candidate, IslandSearchConfig, RunState, SAMPLE_STAGE, SearchPhase, SearchProgress, StopReason,
};

use super::checkpoint::CheckpointManager;
use super::collaborators::{Adapter, GenerativeOracle, SandboxEvaluator};
use super::error::SearchError;
use super::pool::{WorkerPool, panic_message};
use super::population::{PopulationSnapshot, PopulationStatistics, PopulationStore};
use super::stages::{budget_label, cycle_quota, evaluate_each, generate_batch, make_seed};

/// Summary returned when a search run stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub stop_reason: StopReason,
    pub total_samples: u64,
    pub history_len: usize,
    /// Best valid candidate seen by the run.
    pub best: Option<Candidate>,
    /// Population statistics at stop time. `None` for methods without islands.
    pub statistics: Option<PopulationStatistics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// Candidates were generated and merged.
    Progressed,
    /// Nothing to prompt from; no state change.
    Idle,
}

/// Island-model evolutionary search.
pub struct IslandSearch<A, O, E> {
    config: IslandSearchConfig,
    adapter: A,
    oracle: O,
    evaluator: E,
    checkpoints: CheckpointManager,
    samplers: WorkerPool,
    evaluators: WorkerPool,
    rng: StdRng,
    cancelled: Arc<AtomicBool>,
    /// Cycle that panics before doing any work.
    #[cfg(test)]
    panic_on_cycle: Option<u64>,
}

impl<A, O, E> IslandSearch<A, O, E>
where
    A: Adapter,
    O: GenerativeOracle,
    E: SandboxEvaluator,
{
    /// Validate the config and set up pools and the checkpoint directory.
    pub fn new(
        config: IslandSearchConfig,
        adapter: A,
        oracle: O,
        evaluator: E,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        let checkpoints = CheckpointManager::new(&config.output_dir)?;
        let samplers = WorkerPool::new("sampler", config.sampling.num_samplers)?;
        let evaluators = WorkerPool::new("evaluator", config.sampling.num_evaluators)?;
        let seed = config.random_seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            adapter,
            oracle,
            evaluator,
            checkpoints,
            samplers,
            evaluators,
            rng: StdRng::seed_from_u64(seed),
            cancelled: Arc::new(AtomicBool::new(false)),
            #[cfg(test)]
            panic_on_cycle: None,
        })
    }

    pub fn config(&self) -> &IslandSearchConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Get cancellation handle. Checked at the top of every cycle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Run until the budget is spent, the run is cancelled or it starves.
    pub fn run(&mut self) -> Result<SearchOutcome, SearchError> {
        self.run_with_callback(|_| {})
    }

    /// Run with a progress callback invoked after initialization and after
    /// every cycle.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<SearchOutcome, SearchError>
    where
        F: FnMut(&SearchProgress),
    {
        let max_samples = self.config.sampling.max_samples;
        let (mut state, mut store) = self.initialize()?;
        callback(&self.progress(SearchPhase::Initializing, 0, &state, &store));

        info!(
            "Island search started: {}/{} samples, {} islands",
            state.total_samples,
            budget_label(max_samples),
            store.num_islands()
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
                warn!(
                    "No island has prompt material after {} cycles; stopping",
                    idle_cycles
                );
                break StopReason::Starved;
            }

            cycle += 1;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                self.run_cycle(cycle, &mut state, &mut store)
            }));
            match result {
                Ok(Ok(CycleOutcome::Progressed)) => idle_cycles = 0,
                Ok(Ok(CycleOutcome::Idle)) => idle_cycles += 1,
                Ok(Err(e)) => return Err(e),
                Err(payload) => {
                    error!("Cycle {} panicked: {}", cycle, panic_message(payload.as_ref()));
                }
            }

            callback(&self.progress(SearchPhase::Sampling, cycle, &state, &store));
        };

        state.is_done = true;
        self.checkpoint(&state, &store)?;

        let phase = match stop_reason {
            StopReason::Cancelled => SearchPhase::Interrupted,
            _ => SearchPhase::Done,
        };
        callback(&self.progress(phase, cycle, &state, &store));

        let statistics = store.statistics();
        info!(
            "Island search stopped ({:?}): {} samples, {} programs, best score {:?}",
            stop_reason, state.total_samples, statistics.total_programs, statistics.global_best_score
        );

        Ok(SearchOutcome {
            stop_reason,
            total_samples: state.total_samples,
            history_len: state.history.len(),
            best: state.best_valid().cloned(),
            statistics: Some(statistics),
        })
    }

    /// Load or create the run state and population.
    fn initialize(&mut self) -> Result<(RunState, PopulationStore), SearchError> {
        let mut state = self.checkpoints.load_run_state_or_default()?;
        state.is_done = false;

        let store = if state.history.is_empty() {
            let mut store = self.empty_store();
            let seed = make_seed(&self.adapter, &self.evaluator)?;
            store.register_solution(seed.clone(), None);
            state.history.push(seed);
            store
        } else {
            info!(
                "Resuming from {}: {} samples, {} history entries",
                self.checkpoints.output_dir().display(),
                state.total_samples,
                state.history.len()
            );
            self.restore_population(&state)
        };

        self.checkpoint(&state, &store)?;
        Ok((state, store))
    }

    fn empty_store(&self) -> PopulationStore {
        PopulationStore::new(
            self.config.num_islands,
            self.config.solutions_per_prompt,
            self.config.reset_period(),
        )
    }

    /// Restore the saved population, falling back to a replay of history.
    fn restore_population(&self, state: &RunState) -> PopulationStore {
        let problem = match self.checkpoints.load_population_state() {
            Ok(Some(PopulationSnapshot {
                history_len: Some(len),
                ..
            })) if len != state.history.len() => format!(
                "snapshot taken at {} history entries, run state has {}",
                len,
                state.history.len()
            ),
            Ok(Some(snapshot)) => match PopulationStore::from_snapshot(snapshot) {
                Ok(store) if store.num_islands() == self.config.num_islands => return store,
                Ok(store) => format!(
                    "snapshot has {} islands, expected {}",
                    store.num_islands(),
                    self.config.num_islands
                ),
                Err(e) => e.to_string(),
            },
            Ok(None) => "no population snapshot".to_string(),
            Err(e) => e.to_string(),
        };

        warn!(
            "Rebuilding population from history ({}); island assignment is lost",
            problem
        );
        PopulationStore::replay(
            &state.history,
            self.config.num_islands,
            self.config.solutions_per_prompt,
            self.config.reset_period(),
        )
    }

    fn run_cycle(
        &mut self,
        cycle: u64,
        state: &mut RunState,
        store: &mut PopulationStore,
    ) -> Result<CycleOutcome, SearchError> {
        #[cfg(test)]
        if self.panic_on_cycle == Some(cycle) {
            panic!("injected fault in cycle {cycle}");
        }

        let (references, island) = store.select_prompt_solutions(&mut self.rng);
        if references.is_empty() {
            debug!("Cycle {}: island {} has no members; skipping", cycle, island);
            return Ok(CycleOutcome::Idle);
        }

        let quota = cycle_quota(
            state,
            self.config.sampling.num_samplers,
            self.config.sampling.max_samples,
        );
        let candidates = generate_batch(
            &self.samplers,
            &self.adapter,
            &self.oracle,
            &references,
            quota,
            state,
        );
        debug!(
            "Island {}: {} of {} samples parsed",
            island,
            candidates.len(),
            quota
        );

        let stats_interval = self.config.sampling.stats_interval;
        evaluate_each(&self.evaluators, &self.evaluator, candidates, |candidate| {
            if candidate.is_valid() {
                store.register_solution(candidate.clone(), Some(island));
            }
            state.record_sample(candidate);
            if state.total_samples % stats_interval == 0 {
                log_statistics(state, store);
            }
        });

        self.checkpoint(state, store)?;
        Ok(CycleOutcome::Progressed)
    }

    fn checkpoint(&self, state: &RunState, store: &PopulationStore) -> Result<(), SearchError> {
        let mut snapshot = store.to_snapshot();
        snapshot.history_len = Some(state.history.len());
        self.checkpoints.save_run_state(state)?;
        self.checkpoints.save_population_state(&snapshot)?;
        Ok(())
    }

    fn progress(
        &self,
        phase: SearchPhase,
        cycle: u64,
        state: &RunState,
        store: &PopulationStore,
    ) -> SearchProgress {
        SearchProgress {
            phase,
            cycle,
            total_samples: state.total_samples,
            max_samples: self.config.sampling.max_samples,
            best_score: store.best_solution().and_then(Candidate::score),
        }
    }
}

fn log_statistics(state: &RunState, store: &PopulationStore) {
    let stats = store.statistics();
    let usage = state.usage_totals(SAMPLE_STAGE);
    info!(
        "{} samples ({} valid): {} programs on {} islands, best score {:?}, {} tokens, cost {:.4}",
        state.total_samples,
        state.valid_count(),
        stats.total_programs,
        stats.num_islands,
        stats.global_best_score,
        usage.total_tokens(),
        usage.cost
    );
    for summary in store.island_summaries() {
        debug!(
            "  island {}: {} members, best {:?}",
            summary.id, summary.size, summary.best_score
        );
    }
}
