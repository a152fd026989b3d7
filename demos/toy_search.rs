//! Toy island search: guess an integer with an in-process "oracle".
//!
//! The oracle perturbs the best number it is shown and the evaluator scores
//! a guess by its distance to a hidden target. Run with
//! `cargo run --example toy_search -- [output_dir] [max_samples]`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use rand::Rng;

use evosearch::{
    Adapter, BoxError, ExclusiveEvaluator, GenerativeOracle, HillClimb, IslandSearch,
    OracleResponse, ResourceLock, SandboxEvaluator,
    schema::{
        Candidate, HillClimbConfig, IslandSearchConfig, PromptMessage, SearchPhase, UsageRecord,
        Verdict,
    },
};

const TARGET: i64 = 4242;

struct GuessTask;

impl Adapter for GuessTask {
    fn make_initial_solution(&self) -> Candidate {
        Candidate::new("guess = 0")
    }

    fn build_prompt(&self, references: &[Candidate]) -> Vec<PromptMessage> {
        let mut body = String::from("Previous guesses, worst to best:\n");
        for candidate in references {
            body.push_str(candidate.text());
            body.push('\n');
        }
        vec![
            PromptMessage::system("Propose a better guess as `guess = <integer>`."),
            PromptMessage::user(body),
        ]
    }

    fn parse_response(&self, text: &str) -> Result<Candidate, BoxError> {
        let line = text
            .lines()
            .find(|line| line.starts_with("guess = "))
            .ok_or("no guess in response")?;
        Ok(Candidate::new(line))
    }
}

fn parse_guess(text: &str) -> Option<i64> {
    text.strip_prefix("guess = ")?.trim().parse().ok()
}

/// Perturbs the last (best) guess in the prompt.
struct JitterOracle;

impl GenerativeOracle for JitterOracle {
    fn respond(&self, prompt: &[PromptMessage]) -> Result<OracleResponse, BoxError> {
        let mut rng = rand::thread_rng();
        if rng.gen_bool(0.05) {
            return Err("rate limited".into());
        }

        let last = prompt
            .last()
            .and_then(|m| m.content.lines().filter_map(parse_guess).last())
            .unwrap_or(0);
        let step = rng.gen_range(-500..=500);
        let text = if rng.gen_bool(0.1) {
            "I am not sure.".to_string()
        } else {
            format!("Here you go:\nguess = {}", last + step)
        };

        let prompt_tokens: u64 = prompt
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        Ok(OracleResponse {
            usage: UsageRecord {
                prompt_tokens,
                completion_tokens: text.split_whitespace().count() as u64,
                cost: 1e-6 * prompt_tokens as f64,
                ..Default::default()
            },
            text,
        })
    }
}

struct DistanceEvaluator;

impl SandboxEvaluator for DistanceEvaluator {
    fn evaluate(&self, text: &str) -> Result<Verdict, BoxError> {
        match parse_guess(text) {
            Some(guess) if guess >= 0 => {
                Ok(Verdict::from_cost((guess - TARGET).abs() as f64).with_diagnostic("guess", guess))
            }
            Some(guess) => Ok(Verdict::invalid().with_diagnostic("error", format!("{guess} < 0"))),
            None => Ok(Verdict::invalid().with_diagnostic("error", "unparseable guess")),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let output_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("runs/toy"));
    let max_samples: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(200);

    let mut config = IslandSearchConfig::new(output_dir.join("island"));
    config.sampling.max_samples = Some(max_samples);
    config.sampling.stats_interval = 20;
    config.num_islands = 4;

    let lock = ResourceLock::new(std::env::temp_dir().join("evosearch_toy.lock"));
    let evaluator = Arc::new(ExclusiveEvaluator::with_lock(DistanceEvaluator, lock));

    println!("Toy island search (target {})", TARGET);
    println!("=============================");
    let mut search = IslandSearch::new(config, GuessTask, JitterOracle, Arc::clone(&evaluator))?;

    // Stop early once the target is hit.
    let cancel = search.cancel_handle();
    let outcome = search.run_with_callback(|progress| {
        if progress.phase == SearchPhase::Sampling && progress.best_score == Some(0.0) {
            cancel.store(true, Ordering::Relaxed);
        }
    })?;
    println!(
        "Island search: {:?} after {} samples, best {:?}",
        outcome.stop_reason,
        outcome.total_samples,
        outcome.best.as_ref().map(Candidate::text)
    );

    let mut hill_config = HillClimbConfig::new(output_dir.join("hill_climb"));
    hill_config.sampling.max_samples = Some(max_samples);
    let mut climber = HillClimb::new(hill_config, GuessTask, JitterOracle, evaluator)?;
    let outcome = climber.run()?;
    println!(
        "Hill climb: {:?} after {} samples, best {:?}",
        outcome.stop_reason,
        outcome.total_samples,
        outcome.best.as_ref().map(Candidate::text)
    );

    Ok(())
}
