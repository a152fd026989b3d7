//! Schema module - Candidates, run ledger and configuration types.

mod candidate;
mod config;
mod run_state;

pub use candidate::*;
pub use config::*;
pub use run_state::*;
