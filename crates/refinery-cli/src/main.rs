//! Refinery - ensemble solver CLI
//!
//! The `refinery` command runs refinement experts against a problem file.
//!
//! ## Commands
//!
//! - `solve`: run the expert ensemble and rank the answers
//! - `exec`: execute one candidate program against a problem
//! - `check`: verify the sandbox interpreter and show the effective config

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tracing::{info, warn, Level};

use refinery_core::reporting::write_summary_md;
use refinery_core::sandbox::{is_interpreter_available, is_isolation_available};
use refinery_core::{
    extract_transform, render_summary_md, run_experts, vote, write_report_json, Candidate,
    Expert, FeedbackRecord, HttpBackend, IsolationMode, ProblemSpec, ProcessSandbox, RefineryConfig, Sandbox,
    ScoredCandidate, SolveReport, METRICS,
};

#[derive(Parser)]
#[command(name = "refinery")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ensemble refinement solver for grid transformation problems", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured expert on a problem and print the ranked answers
    Solve {
        /// Problem file (JSON with `train` and `test`)
        #[arg(short, long)]
        problem: PathBuf,

        /// Configuration file (TOML)
        #[arg(short, long, env = "REFINERY_CONFIG")]
        config: Option<PathBuf>,

        /// Write the JSON report here; a markdown summary lands next to it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Execute one candidate program against a problem's examples
    Exec {
        #[arg(short, long)]
        problem: PathBuf,

        /// File containing a `def transform(grid)` definition
        #[arg(long)]
        candidate: PathBuf,

        #[arg(short, long, env = "REFINERY_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Check the sandbox interpreter and print the effective configuration
    Check {
        #[arg(short, long, env = "REFINERY_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    refinery_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Solve {
            problem,
            config,
            output,
        } => cmd_solve(&problem, config.as_deref(), output.as_deref()).await,
        Commands::Exec {
            problem,
            candidate,
            config,
        } => cmd_exec(&problem, &candidate, config.as_deref()).await,
        Commands::Check { config } => cmd_check(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<RefineryConfig> {
    RefineryConfig::load_or_default(path).context("Failed to load configuration")
}

fn load_problem(path: &Path) -> Result<ProblemSpec> {
    ProblemSpec::load(path).with_context(|| format!("Failed to load problem {:?}", path))
}

async fn cmd_solve(problem_path: &Path, config: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let problem = Arc::new(load_problem(problem_path)?);

    if !is_interpreter_available(&config.sandbox) {
        warn!(
            interpreter = %config.sandbox.interpreter,
            "sandbox interpreter not found; every execution will fail"
        );
    }
    if config.sandbox.isolation == IsolationMode::Required && !is_isolation_available(&config.sandbox) {
        warn!("namespace confinement unavailable; every execution will be refused (set sandbox.isolation = \"best_effort\" to run unconfined)");
    }
    let sandbox: Arc<dyn Sandbox> = Arc::new(ProcessSandbox::new(config.sandbox.clone()));

    let mut experts = Vec::with_capacity(config.experts.len());
    for expert in &config.experts {
        let backend = HttpBackend::new(&expert.name, config.backend.clone())
            .with_context(|| format!("Failed to build backend for expert {}", expert.name))?;
        experts.push(Expert::new(expert.clone(), Arc::new(backend)));
    }

    info!(
        problem = %problem.id(),
        experts = experts.len(),
        train = problem.train().len(),
        test = problem.test_inputs().len(),
        "solving"
    );

    let ensemble = run_experts(
        Arc::clone(&problem),
        experts,
        sandbox,
        &config.refinement,
        &config.orchestrator,
    )
    .await;
    let consensus = vote(&ensemble.experts, &config.voting);
    let report = SolveReport::build(&problem, &ensemble, &consensus)?;
    METRICS.flush();

    match output {
        Some(path) => {
            write_report_json(path, &report)?;
            let summary_path = path.with_extension("md");
            write_summary_md(&summary_path, &report)?;
            println!("✓ Report written to {}", path.display());
            println!("  Summary: {}", summary_path.display());
        }
        None => print!("{}", render_summary_md(&report)),
    }

    if !report.confident {
        println!("⚠ No candidate passed every training example; answers are best effort");
    }
    Ok(())
}

async fn cmd_exec(problem_path: &Path, candidate_path: &Path, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let problem = load_problem(problem_path)?;
    let text = std::fs::read_to_string(candidate_path)
        .with_context(|| format!("Failed to read candidate {:?}", candidate_path))?;
    let source = extract_transform(&text).unwrap_or(text);

    let sandbox = ProcessSandbox::new(config.sandbox.clone());
    let candidate = Candidate::new("cli", 1, source);

    let train_runs = problem
        .train()
        .iter()
        .map(|ex| sandbox.execute(&candidate.source, &ex.input));
    let results = join_all(train_runs).await;
    let test_runs = problem
        .test_inputs()
        .iter()
        .map(|input| sandbox.execute(&candidate.source, input));
    let predictions = join_all(test_runs).await;

    let scored = ScoredCandidate::score(candidate, results, problem.train());
    let feedback = FeedbackRecord::from_pool(std::slice::from_ref(&scored), problem.train());

    print!("{}", feedback.render());
    for (i, prediction) in predictions.iter().enumerate() {
        match prediction.grid() {
            Some(grid) => println!("Test {}:\n{}", i + 1, grid),
            None => println!(
                "Test {}: {}",
                i + 1,
                prediction.failure_message().unwrap_or_default()
            ),
        }
    }

    if scored.is_passer() {
        println!("✓ Passes all {} training examples", problem.train().len());
    } else {
        println!("✗ Training score {:.3}", scored.aggregate());
    }
    Ok(())
}

fn cmd_check(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;

    if is_interpreter_available(&config.sandbox) {
        println!("✓ Sandbox interpreter: {}", config.sandbox.interpreter);
    } else {
        println!("✗ Sandbox interpreter not found: {}", config.sandbox.interpreter);
    }
    match (is_isolation_available(&config.sandbox), config.sandbox.isolation) {
        (true, _) => println!("✓ Namespace confinement available"),
        (false, IsolationMode::Required) => {
            println!("✗ Namespace confinement unavailable; executions will be refused")
        }
        (false, _) => println!("⚠ Namespace confinement unavailable; resource limits only"),
    }
    if config.backend.api_key.is_none() {
        println!("⚠ REFINERY_API_KEY is not set");
    }

    let rendered =
        serde_json::to_string_pretty(&config).context("Failed to serialize configuration")?;
    println!("{rendered}");
    Ok(())
}
