//! Candidate solutions, evaluation verdicts and oracle usage records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result of evaluating one candidate in the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the candidate compiled, ran and passed the correctness check.
    pub valid: bool,
    /// Score, higher is better. Only meaningful when `valid` is true.
    #[serde(default)]
    pub score: Option<f64>,
    /// Evaluator diagnostics (compiler output, runtimes, error messages).
    #[serde(default)]
    pub diagnostics: BTreeMap<String, Value>,
}

impl Verdict {
    /// A passing verdict with the given score.
    pub fn valid(score: f64) -> Self {
        Self {
            valid: true,
            score: Some(score),
            diagnostics: BTreeMap::new(),
        }
    }

    /// A failing verdict.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            score: None,
            diagnostics: BTreeMap::new(),
        }
    }

    /// A passing verdict for a minimisation target: `score = -cost`.
    pub fn from_cost(cost: f64) -> Self {
        Self::valid(-cost)
    }

    /// Attach a diagnostic entry.
    pub fn with_diagnostic(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.diagnostics.insert(key.into(), value.into());
        self
    }

    /// Demote a passing verdict whose score is NaN or infinite.
    ///
    /// Such scores cannot be ranked and do not survive JSON.
    fn checked(mut self) -> Self {
        if let Some(score) = self.score.filter(|s| self.valid && !s.is_finite()) {
            self.valid = false;
            self.score = None;
            self.diagnostics
                .insert("non_finite_score".to_string(), Value::String(score.to_string()));
        }
        self
    }
}

/// A unit of evolvable content.
///
/// The text is fixed at construction. The verdict is assigned at most once,
/// by the evaluation that consumes the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    text: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    verdict: Option<Verdict>,
}

impl Candidate {
    /// Create an unevaluated candidate.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: None,
            verdict: None,
        }
    }

    /// Attach adapter metadata.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Create a candidate that already carries a verdict (e.g. a seed whose
    /// score is known up front).
    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict.checked());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    /// Record the evaluation verdict.
    ///
    /// Returns `false` and keeps the existing verdict if one was already set.
    /// A passing verdict with a non-finite score is stored as failing.
    pub fn set_verdict(&mut self, verdict: Verdict) -> bool {
        if self.verdict.is_some() {
            return false;
        }
        self.verdict = Some(verdict.checked());
        true
    }

    /// Remove and return the verdict.
    pub(crate) fn take_verdict(&mut self) -> Option<Verdict> {
        self.verdict.take()
    }

    pub fn is_evaluated(&self) -> bool {
        self.verdict.is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.valid)
    }

    /// Score of a valid candidate. Invalid or unevaluated candidates have none.
    pub fn score(&self) -> Option<f64> {
        self.verdict
            .as_ref()
            .filter(|v| v.valid)
            .and_then(|v| v.score)
    }

    /// Score used for ranking; valid candidates without a score rank last.
    pub(crate) fn rank_score(&self) -> f64 {
        self.score().unwrap_or(f64::NEG_INFINITY)
    }
}

/// Token and cost accounting for one oracle call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cost: f64,
    /// Provider-specific fields passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Sum of usage over a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl<'a> FromIterator<&'a UsageRecord> for UsageTotals {
    fn from_iter<I: IntoIterator<Item = &'a UsageRecord>>(iter: I) -> Self {
        iter.into_iter().fold(Self::default(), |mut acc, record| {
            acc.calls += 1;
            acc.prompt_tokens += record.prompt_tokens;
            acc.completion_tokens += record.completion_tokens;
            acc.cost += record.cost;
            acc
        })
    }
}

/// Speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message sent to the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
