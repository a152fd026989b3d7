//! Deterministic collaborators for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::schema::{Candidate, PromptMessage, UsageRecord, Verdict};

use super::collaborators::{Adapter, BoxError, GenerativeOracle, OracleResponse, SandboxEvaluator};

/// Replies `cand-<n>` for the n-th call (1-based) unless scripted otherwise.
#[derive(Default)]
pub struct ScriptedOracle {
    calls: AtomicUsize,
    replies: Vec<String>,
    fail_every: Option<usize>,
}

impl ScriptedOracle {
    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self {
            replies: replies.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    /// Every `k`-th call fails.
    pub fn failing_every(k: usize) -> Self {
        Self {
            fail_every: Some(k),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerativeOracle for ScriptedOracle {
    fn respond(&self, _prompt: &[PromptMessage]) -> Result<OracleResponse, BoxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every.is_some_and(|k| n % k == 0) {
            return Err(format!("oracle call {n} timed out").into());
        }
        let text = self
            .replies
            .get(n - 1)
            .cloned()
            .unwrap_or_else(|| format!("cand-{n}"));
        Ok(OracleResponse {
            text,
            usage: UsageRecord {
                prompt_tokens: 10,
                completion_tokens: 5,
                cost: 0.01,
                ..Default::default()
            },
        })
    }
}

/// Scores `xxx-<n>` as `n`; text without a number scores 0.
#[derive(Default)]
pub struct StepEvaluator {
    calls: AtomicUsize,
    always_invalid: bool,
    fail_on: Option<String>,
}

impl StepEvaluator {
    pub fn always_invalid() -> Self {
        Self {
            always_invalid: true,
            ..Default::default()
        }
    }

    /// Evaluations of text containing `needle` return an error.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SandboxEvaluator for StepEvaluator {
    fn evaluate(&self, text: &str) -> Result<Verdict, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref().is_some_and(|needle| text.contains(needle)) {
            return Err(format!("sandbox crashed on {text}").into());
        }
        if self.always_invalid {
            return Ok(Verdict::invalid().with_diagnostic("compilation_error", true));
        }
        let score = text
            .rsplit('-')
            .next()
            .and_then(|n| n.parse::<f64>().ok())
            .unwrap_or(0.0);
        Ok(Verdict::valid(score))
    }
}

/// Passes oracle text through unchanged and records every prompt's references.
#[derive(Default)]
pub struct EchoAdapter {
    seed_calls: AtomicUsize,
    seed_verdict: Option<Verdict>,
    prompts: Mutex<Vec<Vec<String>>>,
}

impl EchoAdapter {
    pub fn with_seed_score(mut self, score: f64) -> Self {
        self.seed_verdict = Some(Verdict::valid(score));
        self
    }

    pub fn with_invalid_seed(mut self) -> Self {
        self.seed_verdict = Some(Verdict::invalid());
        self
    }

    pub fn seed_calls(&self) -> usize {
        self.seed_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Vec<String>> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Adapter for EchoAdapter {
    fn make_initial_solution(&self) -> Candidate {
        self.seed_calls.fetch_add(1, Ordering::SeqCst);
        let seed = Candidate::new("seed");
        match &self.seed_verdict {
            Some(verdict) => seed.with_verdict(verdict.clone()),
            None => seed,
        }
    }

    fn build_prompt(&self, references: &[Candidate]) -> Vec<PromptMessage> {
        let texts: Vec<String> = references.iter().map(|c| c.text().to_string()).collect();
        let body = texts.join("\n---\n");
        self.prompts.lock().unwrap().push(texts);
        vec![
            PromptMessage::system("Improve the program."),
            PromptMessage::user(body),
        ]
    }

    fn parse_response(&self, text: &str) -> Result<Candidate, BoxError> {
        if text.starts_with("garbage") {
            return Err("no code block in response".into());
        }
        if text.starts_with("preset") {
            // Misbehaving adapter that scores its own output.
            return Ok(Candidate::new(text).with_verdict(Verdict::valid(1000.0)));
        }
        Ok(Candidate::new(text))
    }
}
