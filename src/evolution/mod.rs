//! Evolution module - Population store, search loops and checkpointing.
//!
//! Two search methods share the same plumbing:
//!
//! - [`IslandSearch`]: island-model search with periodic island resets.
//! - [`HillClimb`]: single-incumbent ES(1+1) hill climbing.
//!
//! Both fan generation and evaluation out over bounded [`WorkerPool`]s,
//! merge results on the loop thread, and checkpoint through a
//! [`CheckpointManager`] so an interrupted run resumes where it stopped.

mod checkpoint;
mod collaborators;
mod error;
mod hill_climb;
mod pool;
mod population;
mod search;
mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use checkpoint::{CheckpointManager, POPULATION_FILE, RUN_STATE_FILE};
pub use collaborators::{Adapter, BoxError, GenerativeOracle, OracleResponse, SandboxEvaluator};
pub use error::{CheckpointError, CorruptStateError, SearchError, TaskError};
pub use hill_climb::HillClimb;
pub use pool::{TaskOutcome, WorkerPool, partition};
pub use population::{
    Island, IslandSummary, Member, PopulationSnapshot, PopulationStatistics, PopulationStore,
};
pub use search::{IslandSearch, SearchOutcome};
