//! Generation and evaluation stages shared by the search methods.

use log::{debug, info, warn};

use crate::schema::{Candidate, RunState, SAMPLE_STAGE, UsageRecord};

use super::collaborators::{Adapter, GenerativeOracle, SandboxEvaluator};
use super::error::{SearchError, TaskError};
use super::pool::{TaskOutcome, WorkerPool};

/// Oracle answer for one sampler slot. Usage is kept even when parsing fails.
pub(crate) struct Proposal {
    pub usage: UsageRecord,
    pub candidate: Result<Candidate, TaskError>,
}

fn propose<A: Adapter, O: GenerativeOracle>(
    adapter: &A,
    oracle: &O,
    references: &[Candidate],
) -> Result<Proposal, TaskError> {
    let prompt = adapter.build_prompt(references);
    let response = oracle.respond(&prompt).map_err(TaskError::Oracle)?;
    let candidate = adapter
        .parse_response(&response.text)
        .map_err(TaskError::Parse)
        .map(|mut candidate| {
            // Only the sandbox assigns verdicts to sampled candidates.
            if candidate.take_verdict().is_some() {
                warn!("Adapter returned a candidate with a verdict; discarding it");
            }
            candidate
        });
    Ok(Proposal {
        usage: response.usage,
        candidate,
    })
}

fn evaluate<E: SandboxEvaluator>(evaluator: &E, mut candidate: Candidate) -> Result<Candidate, TaskError> {
    let verdict = evaluator
        .evaluate(candidate.text())
        .map_err(TaskError::Evaluation)?;
    let passed = verdict.valid;
    if !candidate.set_verdict(verdict) {
        warn!("Candidate already evaluated; keeping its first verdict");
    } else if passed && !candidate.is_valid() {
        warn!("Evaluator returned a non-finite score; candidate marked invalid");
    }
    Ok(candidate)
}

/// Fan out `count` oracle calls and collect parsed candidates in arrival order.
///
/// Usage of every answered call is appended to `state`.
pub(crate) fn generate_batch<A: Adapter, O: GenerativeOracle>(
    pool: &WorkerPool,
    adapter: &A,
    oracle: &O,
    references: &[Candidate],
    count: usize,
    state: &mut RunState,
) -> Vec<Candidate> {
    let outcomes = pool.run_all(vec![(); count], |_, ()| propose(adapter, oracle, references));

    let mut candidates = Vec::with_capacity(outcomes.len());
    for TaskOutcome { index, result } in outcomes {
        match result {
            Ok(Proposal { usage, candidate }) => {
                state.record_usage(SAMPLE_STAGE, usage);
                match candidate {
                    Ok(candidate) => {
                        debug!("Sampler {}: generated a candidate", index);
                        candidates.push(candidate);
                    }
                    Err(e) => warn!("Sampler {}: {}", index, e),
                }
            }
            Err(e) => warn!("Sampler {}: {}", index, e),
        }
    }
    candidates
}

/// Evaluate candidates on the pool, handing each finished one to `on_evaluated`
/// in completion order. Failed evaluations are logged and dropped.
pub(crate) fn evaluate_each<E, F>(
    pool: &WorkerPool,
    evaluator: &E,
    candidates: Vec<Candidate>,
    mut on_evaluated: F,
) where
    E: SandboxEvaluator,
    F: FnMut(Candidate),
{
    pool.for_each_completed(
        candidates,
        |_, candidate| evaluate(evaluator, candidate),
        |TaskOutcome { index, result }| match result {
            Ok(candidate) => {
                debug!(
                    "Candidate {} evaluated: valid={}, score={:?}",
                    index,
                    candidate.is_valid(),
                    candidate.score()
                );
                on_evaluated(candidate);
            }
            Err(e) => warn!("Candidate {} dropped: {}", index, e),
        },
    );
}

/// Build the seed candidate, evaluating it unless the adapter already did.
pub(crate) fn make_seed<A: Adapter, E: SandboxEvaluator>(
    adapter: &A,
    evaluator: &E,
) -> Result<Candidate, SearchError> {
    let seed = adapter.make_initial_solution();
    let seed = if seed.is_evaluated() {
        seed
    } else {
        evaluate(evaluator, seed).map_err(SearchError::Seed)?
    };
    info!(
        "Initialized with seed candidate (valid={}, score={:?})",
        seed.is_valid(),
        seed.score()
    );
    Ok(seed)
}

/// Number of samples to request this cycle without overshooting the budget.
pub(crate) fn cycle_quota(state: &RunState, per_cycle: usize, max_samples: Option<u64>) -> usize {
    match max_samples {
        Some(max) => {
            let remaining = max.saturating_sub(state.total_samples);
            per_cycle.min(usize::try_from(remaining).unwrap_or(usize::MAX))
        }
        None => per_cycle,
    }
}

/// Human-readable budget for log lines.
pub(crate) fn budget_label(max_samples: Option<u64>) -> String {
    max_samples.map_or_else(|| "unlimited".to_string(), |m| m.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::testing::{EchoAdapter, ScriptedOracle, StepEvaluator};

    #[test]
    fn test_usage_kept_when_parse_fails() {
        let pool = WorkerPool::new("gen", 2).unwrap();
        let adapter = EchoAdapter::default();
        let oracle = ScriptedOracle::with_replies(vec!["garbage", "ok-1"]);
        let mut state = RunState::default();

        let candidates = generate_batch(&pool, &adapter, &oracle, &[], 2, &mut state);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text(), "ok-1");
        assert_eq!(state.usage_totals(SAMPLE_STAGE).calls, 2);
    }

    #[test]
    fn test_oracle_failure_records_no_usage() {
        let pool = WorkerPool::new("gen", 2).unwrap();
        let oracle = ScriptedOracle::failing_every(1);
        let mut state = RunState::default();

        let candidates =
            generate_batch(&pool, &EchoAdapter::default(), &oracle, &[], 3, &mut state);
        assert!(candidates.is_empty());
        assert_eq!(state.usage_totals(SAMPLE_STAGE).calls, 0);
    }

    #[test]
    fn test_failed_evaluations_are_dropped() {
        let pool = WorkerPool::new("eval", 2).unwrap();
        let evaluator = StepEvaluator::default().failing_on("boom");
        let inputs = vec![
            Candidate::new("cand-1"),
            Candidate::new("boom"),
            Candidate::new("cand-2"),
        ];

        let mut evaluated = Vec::new();
        evaluate_each(&pool, &evaluator, inputs, |c| evaluated.push(c));

        let mut texts: Vec<_> = evaluated.iter().map(|c| c.text().to_string()).collect();
        texts.sort();
        assert_eq!(texts, vec!["cand-1", "cand-2"]);
        assert!(evaluated.iter().all(Candidate::is_evaluated));
    }

    #[test]
    fn test_parsed_verdicts_are_discarded() {
        let pool = WorkerPool::new("gen", 1).unwrap();
        let oracle = ScriptedOracle::with_replies(vec!["preset-1"]);
        let mut state = RunState::default();

        let candidates =
            generate_batch(&pool, &EchoAdapter::default(), &oracle, &[], 1, &mut state);
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].is_evaluated());

        let evaluator = StepEvaluator::default();
        let mut evaluated = Vec::new();
        evaluate_each(&pool, &evaluator, candidates, |c| evaluated.push(c));
        assert_eq!(evaluator.calls(), 1);
        assert_eq!(evaluated[0].score(), Some(1.0));
    }

    #[test]
    fn test_non_finite_score_marks_candidate_invalid() {
        let pool = WorkerPool::new("eval", 1).unwrap();
        let evaluator = StepEvaluator::default();

        let mut evaluated = Vec::new();
        evaluate_each(&pool, &evaluator, vec![Candidate::new("cand-NaN")], |c| {
            evaluated.push(c)
        });

        assert_eq!(evaluated.len(), 1);
        assert!(evaluated[0].is_evaluated());
        assert!(!evaluated[0].is_valid());
        assert_eq!(evaluated[0].score(), None);
    }

    #[test]
    fn test_seed_with_preset_verdict_is_not_reevaluated() {
        let adapter = EchoAdapter::default().with_seed_score(-7.0);
        let evaluator = StepEvaluator::default();
        let seed = make_seed(&adapter, &evaluator).unwrap();

        assert_eq!(seed.score(), Some(-7.0));
        assert_eq!(evaluator.calls(), 0);
    }

    #[test]
    fn test_cycle_quota_respects_budget() {
        let mut state = RunState::default();
        assert_eq!(cycle_quota(&state, 3, None), 3);
        assert_eq!(cycle_quota(&state, 3, Some(2)), 2);
        state.total_samples = 5;
        assert_eq!(cycle_quota(&state, 3, Some(4)), 0);
    }
}
