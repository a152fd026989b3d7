//! evosearch - LLM-driven evolutionary search over program text.
//!
//! A generative oracle proposes candidate programs from reference solutions,
//! a sandbox evaluator scores them, and a search loop keeps the good ones.
//! Runs are checkpointed after every cycle and resume from the output
//! directory after a crash or cancellation.
//!
//! # Architecture
//!
//! - `schema`: Candidates, verdicts, run ledger and configuration types
//! - `evolution`: Population store, island search, hill climbing, checkpoints
//! - `resource_lock`: Host-wide lock for evaluators sharing one device
//!
//! # Example
//!
//! ```rust,no_run
//! use evosearch::{
//!     Adapter, BoxError, GenerativeOracle, IslandSearch, OracleResponse, SandboxEvaluator,
//!     schema::{Candidate, IslandSearchConfig, PromptMessage, UsageRecord, Verdict},
//! };
//!
//! struct Oracle;
//! impl GenerativeOracle for Oracle {
//!     fn respond(&self, _prompt: &[PromptMessage]) -> Result<OracleResponse, BoxError> {
//!         Ok(OracleResponse { text: "x = 2".into(), usage: UsageRecord::default() })
//!     }
//! }
//!
//! struct Evaluator;
//! impl SandboxEvaluator for Evaluator {
//!     fn evaluate(&self, text: &str) -> Result<Verdict, BoxError> {
//!         Ok(Verdict::from_cost(text.len() as f64))
//!     }
//! }
//!
//! struct Task;
//! impl Adapter for Task {
//!     fn make_initial_solution(&self) -> Candidate {
//!         Candidate::new("x = 1 + 1")
//!     }
//!     fn build_prompt(&self, references: &[Candidate]) -> Vec<PromptMessage> {
//!         let body = references.iter().map(Candidate::text).collect::<Vec<_>>().join("\n");
//!         vec![PromptMessage::user(body)]
//!     }
//!     fn parse_response(&self, text: &str) -> Result<Candidate, BoxError> {
//!         Ok(Candidate::new(text))
//!     }
//! }
//!
//! let mut config = IslandSearchConfig::new("runs/demo");
//! config.sampling.max_samples = Some(20);
//!
//! let mut search = IslandSearch::new(config, Task, Oracle, Evaluator)?;
//! let outcome = search.run()?;
//! println!("Stopped: {:?}, best: {:?}", outcome.stop_reason, outcome.best);
//! # Ok::<(), evosearch::SearchError>(())
//! ```

pub mod evolution;
pub mod resource_lock;
pub mod schema;

// Re-export commonly used types
pub use evolution::{
    Adapter, BoxError, CheckpointManager, GenerativeOracle, HillClimb, IslandSearch,
    OracleResponse, PopulationStore, SandboxEvaluator, SearchError, SearchOutcome,
};
pub use resource_lock::{ExclusiveEvaluator, ResourceGuard, ResourceLock};
pub use schema::{Candidate, HillClimbConfig, IslandSearchConfig, RunState, Verdict};
