//! evosearch CLI - Inspect run directories and hold the resource lock.

use std::path::{Path, PathBuf};
use std::process::{self, Command};

use evosearch::{
    CheckpointManager, PopulationStore, ResourceLock,
    schema::{HillClimbConfig, IslandSearchConfig, RunState, SAMPLE_STAGE},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    match args[1].as_str() {
        "--example" => print_example_config(),
        "status" => status(&output_dir_arg(&args)),
        "best" => best(&output_dir_arg(&args)),
        "with-lock" => with_lock(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_usage(&args[0]);
            process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <command> [args]", program);
    eprintln!();
    eprintln!("Inspect evolutionary search runs.");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status <output_dir>                 Summarize a run directory");
    eprintln!("  best <output_dir>                   Print the best valid candidate");
    eprintln!("  with-lock [--lock <path>] -- <cmd>  Run a command holding the resource lock");
    eprintln!("  --example                           Print example configurations");
}

fn output_dir_arg(args: &[String]) -> PathBuf {
    match args.get(2) {
        Some(dir) => PathBuf::from(dir),
        None => {
            eprintln!("Missing <output_dir> argument");
            process::exit(1);
        }
    }
}

fn load_run(output_dir: &Path) -> (CheckpointManager, RunState) {
    if !output_dir.is_dir() {
        eprintln!("Not a directory: {}", output_dir.display());
        process::exit(1);
    }
    let checkpoints = CheckpointManager::new(output_dir).unwrap_or_else(|e| {
        eprintln!("Error opening run directory: {}", e);
        process::exit(1);
    });
    let state = match checkpoints.load_run_state() {
        Ok(Some(state)) => state,
        Ok(None) => {
            eprintln!("No run state in {}", output_dir.display());
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error loading run state: {}", e);
            process::exit(1);
        }
    };
    (checkpoints, state)
}

fn status(output_dir: &Path) {
    let (checkpoints, state) = load_run(output_dir);
    let usage = state.usage_totals(SAMPLE_STAGE);

    println!("Run: {}", output_dir.display());
    println!("==========");
    println!("Samples: {}", state.total_samples);
    println!(
        "History: {} entries ({} valid)",
        state.history.len(),
        state.valid_count()
    );
    println!("Done: {}", state.is_done);
    println!(
        "Usage: {} calls, {} prompt + {} completion tokens, cost {:.4}",
        usage.calls, usage.prompt_tokens, usage.completion_tokens, usage.cost
    );

    match checkpoints.load_population_state() {
        Ok(Some(snapshot)) => match PopulationStore::from_snapshot(snapshot) {
            Ok(store) => {
                let stats = store.statistics();
                println!();
                println!(
                    "Population: {} programs on {} islands ({} resets)",
                    stats.total_programs,
                    stats.num_islands,
                    store.resets()
                );
                println!("Best score: {:?}", stats.global_best_score);
                for summary in store.island_summaries() {
                    println!(
                        "  Island {}: {} members, best {:?}",
                        summary.id, summary.size, summary.best_score
                    );
                }
            }
            Err(e) => println!("Population: unreadable ({})", e),
        },
        Ok(None) => println!("Population: none"),
        Err(e) => println!("Population: unreadable ({})", e),
    }
}

fn best(output_dir: &Path) {
    let (_, state) = load_run(output_dir);
    match state.best_valid() {
        Some(best) => {
            println!("Score: {:?}", best.score());
            println!();
            println!("{}", best.text());
        }
        None => {
            eprintln!("No valid candidate in {}", output_dir.display());
            process::exit(1);
        }
    }
}

/// `with-lock [--lock <path>] -- <cmd> [args..]`
fn with_lock(args: &[String]) {
    let mut lock = ResourceLock::host_default();
    let mut rest = args;

    if rest.first().map(String::as_str) == Some("--lock") {
        let Some(path) = rest.get(1) else {
            eprintln!("--lock needs a path");
            process::exit(1);
        };
        lock = ResourceLock::new(path);
        rest = &rest[2..];
    }
    if rest.first().map(String::as_str) == Some("--") {
        rest = &rest[1..];
    }
    let Some((program, command_args)) = rest.split_first() else {
        eprintln!("Missing command to run under the lock");
        process::exit(1);
    };

    let guard = lock.acquire().unwrap_or_else(|e| {
        eprintln!("Error acquiring {}: {}", lock.path().display(), e);
        process::exit(1);
    });
    let status = Command::new(program).args(command_args).status();
    drop(guard);

    match status {
        Ok(status) => process::exit(status.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("Error running {}: {}", program, e);
            process::exit(127);
        }
    }
}

fn print_example_config() {
    let mut island = IslandSearchConfig::new("runs/island");
    island.sampling.max_samples = Some(1000);
    island.random_seed = Some(42);
    let mut hill_climb = HillClimbConfig::new("runs/hill_climb");
    hill_climb.sampling.max_samples = Some(200);

    println!("Example island search configuration:");
    println!(
        "{}",
        serde_json::to_string_pretty(&island).unwrap_or_default()
    );
    println!();
    println!("Example hill climb configuration:");
    println!(
        "{}",
        serde_json::to_string_pretty(&hill_climb).unwrap_or_default()
    );
}
