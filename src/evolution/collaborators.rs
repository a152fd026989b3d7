//! Contracts for the external collaborators driven by the search loops.
//!
//! Concrete oracles (HTTP LLM clients), sandboxes (compile/run/time) and
//! task adapters live outside this crate and are plugged in at construction.

use crate::schema::{Candidate, PromptMessage, UsageRecord, Verdict};

/// Error type returned by collaborator implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raw oracle output for one prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleResponse {
    pub text: String,
    pub usage: UsageRecord,
}

/// Source of new candidate text (usually an LLM).
pub trait GenerativeOracle: Send + Sync {
    fn respond(&self, prompt: &[PromptMessage]) -> Result<OracleResponse, BoxError>;
}

/// Scores candidate text.
///
/// Implementations may be slow and may serialize access to a shared device
/// through [`crate::ResourceLock`]; see [`crate::ExclusiveEvaluator`].
pub trait SandboxEvaluator: Send + Sync {
    fn evaluate(&self, text: &str) -> Result<Verdict, BoxError>;
}

/// Task-specific glue between candidates and oracle prompts.
pub trait Adapter: Send + Sync {
    /// Seed candidate for an empty run. It may carry a pre-computed verdict.
    fn make_initial_solution(&self) -> Candidate;

    /// Build a prompt from reference candidates (ordered worst to best).
    fn build_prompt(&self, references: &[Candidate]) -> Vec<PromptMessage>;

    /// Extract a candidate from raw oracle text.
    fn parse_response(&self, text: &str) -> Result<Candidate, BoxError>;
}

impl<T: GenerativeOracle + ?Sized> GenerativeOracle for std::sync::Arc<T> {
    fn respond(&self, prompt: &[PromptMessage]) -> Result<OracleResponse, BoxError> {
        (**self).respond(prompt)
    }
}

impl<T: SandboxEvaluator + ?Sized> SandboxEvaluator for std::sync::Arc<T> {
    fn evaluate(&self, text: &str) -> Result<Verdict, BoxError> {
        (**self).evaluate(text)
    }
}

impl<T: Adapter + ?Sized> Adapter for std::sync::Arc<T> {
    fn make_initial_solution(&self) -> Candidate {
        (**self).make_initial_solution()
    }

    fn build_prompt(&self, references: &[Candidate]) -> Vec<PromptMessage> {
        (**self).build_prompt(references)
    }

    fn parse_response(&self, text: &str) -> Result<Candidate, BoxError> {
        (**self).parse_response(text)
    }
}
