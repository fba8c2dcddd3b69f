//! Adaptive tuning command-line front end.
//!
//! Runs the tuning pipeline by hand or through the same scheduler entry point
//! the game uses.
//!
//! # Usage
//!
//! ```bash
//! # Report what would change, write nothing
//! cargo run -p tuning_cli -- analyze --logs logs/
//!
//! # Analyse and write game_tuning.json
//! cargo run -p tuning_cli -- apply --min-sessions 8
//!
//! # What the game does at startup
//! cargo run -p tuning_cli -- auto --min-sessions 10 --silent
//!
//! # Remove the config (and the scheduler counter)
//! cargo run -p tuning_cli -- reset --state
//! ```
//!
//! Reports go to stdout, logs to stderr. `RUST_LOG` overrides the log level.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tuning_core::{
    analyze, apply,
    pipeline::timestamp_now,
    scheduler::DEFAULT_MIN_NEW_SESSIONS,
    store::{DEFAULT_CONFIG_FILE, DEFAULT_STATE_FILE},
    HistoryAnalysis, RuleSet, TelemetrySource, TuningScheduler, TuningStore,
};

#[derive(Parser)]
#[command(name = "tuner")]
#[command(about = "Adaptive difficulty tuning from gameplay telemetry")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory of *.jsonl telemetry files
    #[arg(long, global = true, default_value = "logs")]
    logs: PathBuf,

    /// Tuning config document
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Scheduler state file
    #[arg(long = "state-file", global = true, default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// RON file overriding the default rule set
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect issues and report proposed adjustments without writing
    Analyze {
        /// Minimum sessions for a segment to be analysed
        #[arg(long)]
        min_sessions: Option<u32>,

        /// Write the markdown report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the config document that apply would write
        #[arg(long)]
        json: bool,
    },

    /// Analyse and write the tuning config
    Apply {
        /// Minimum sessions for a segment to be analysed
        #[arg(long)]
        min_sessions: Option<u32>,
    },

    /// Delete the tuning config
    Reset {
        /// Also delete the scheduler state
        #[arg(long)]
        state: bool,

        /// Ignored; accepted so the same flags work for analyze, apply and reset
        #[arg(long)]
        min_sessions: Option<u32>,
    },

    /// Run the scheduler: tune only if enough new sessions exist
    Auto {
        /// New sessions required since the last run
        #[arg(long, default_value_t = DEFAULT_MIN_NEW_SESSIONS)]
        min_sessions: u64,

        /// Suppress the summary
        #[arg(long)]
        silent: bool,
    },

    /// Show session counts and whether a run is due
    Status {
        /// New sessions required since the last run
        #[arg(long, default_value_t = DEFAULT_MIN_NEW_SESSIONS)]
        min_sessions: u64,
    },

    /// Show tuning history and flag oscillation
    History,
}

fn main() {
    let cli = Cli::parse();

    // Logs to stderr; stdout carries reports
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    let rules = load_rules(cli.rules.as_deref());
    let source = TelemetrySource::Directory(cli.logs.clone());
    let store = TuningStore::new(cli.config.clone(), cli.state_file.clone());

    match cli.command {
        Commands::Analyze {
            min_sessions,
            output,
            json,
        } => cmd_analyze(&source, &store, with_min(rules, min_sessions), output, json),
        Commands::Apply { min_sessions } => {
            cmd_apply(&source, &store, with_min(rules, min_sessions));
        }
        Commands::Reset { state, .. } => cmd_reset(&store, state),
        Commands::Auto {
            min_sessions,
            silent,
        } => cmd_auto(source, store, rules, min_sessions, silent),
        Commands::Status { min_sessions } => cmd_status(source, store, min_sessions),
        Commands::History => cmd_history(&store),
    }
}

fn fatal(message: &str) -> ! {
    tracing::error!("{message}");
    eprintln!("FATAL: {message}");
    std::process::exit(1);
}

fn load_rules(path: Option<&Path>) -> RuleSet {
    match path {
        Some(path) => match RuleSet::load(path) {
            Ok(rules) => {
                tracing::info!(path = %path.display(), "Loaded rules");
                rules
            }
            Err(e) => fatal(&format!("Cannot load rules '{}': {e}", path.display())),
        },
        None => RuleSet::default(),
    }
}

fn with_min(rules: RuleSet, min_sessions: Option<u32>) -> RuleSet {
    match min_sessions {
        Some(n) => rules.with_min_segment_sessions(n),
        None => rules,
    }
}

/// Report only; nothing is written
fn cmd_analyze(
    source: &TelemetrySource,
    store: &TuningStore,
    rules: RuleSet,
    output: Option<PathBuf>,
    json: bool,
) {
    let analysis = analyze(source, &rules);

    if json {
        let config = analysis.to_config(&timestamp_now(), store.read().as_ref());
        match config.to_json() {
            Ok(text) => println!("{text}"),
            Err(e) => fatal(&format!("Cannot serialize config: {e}")),
        }
        return;
    }

    let report = analysis.to_markdown();
    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &report) {
                fatal(&format!("Cannot write report '{}': {e}", path.display()));
            }
            tracing::info!(path = %path.display(), "Report written");
        }
        None => print!("{report}"),
    }
}

fn cmd_apply(source: &TelemetrySource, store: &TuningStore, rules: RuleSet) {
    let analysis = analyze(source, &rules);
    match apply(&analysis, store, &timestamp_now()) {
        Ok(config) => {
            print!("{}", analysis.to_markdown());
            println!(
                "\nWrote {} adjustments from {} sessions to {}",
                config.adjustments.len(),
                config.sessions_analyzed_count,
                store.config_path().display()
            );
        }
        Err(e) => fatal(&format!("Cannot write tuning config: {e}")),
    }
}

fn cmd_reset(store: &TuningStore, with_state: bool) {
    match store.reset(with_state) {
        Ok(report) => {
            if report.config_removed {
                println!("Removed {}", store.config_path().display());
            } else {
                println!("No tuning config at {}", store.config_path().display());
            }
            if report.state_removed {
                println!("Removed {}", store.state_path().display());
            }
        }
        Err(e) => fatal(&format!("Reset failed: {e}")),
    }
}

/// Scheduler entry point; never exits non-zero
fn cmd_auto(
    source: TelemetrySource,
    store: TuningStore,
    rules: RuleSet,
    min_sessions: u64,
    silent: bool,
) {
    let mut scheduler = TuningScheduler::new(source, store).with_rules(rules);
    let outcome = scheduler.run_if_due(min_sessions, silent);
    tracing::debug!(status = %outcome.status, new_sessions = outcome.new_sessions, "Scheduler finished");
    if let Some(summary) = outcome.summary {
        println!("{summary}");
    }
}

fn cmd_status(source: TelemetrySource, store: TuningStore, min_sessions: u64) {
    let analyzed = store.read_state().sessions_analyzed_count;
    let scheduler = TuningScheduler::new(source, store);
    let total = scheduler.count_total_sessions();
    let new = total.saturating_sub(analyzed);

    println!("Sessions total:    {total}");
    println!("Sessions analysed: {analyzed}");
    println!("New sessions:      {new}");
    println!(
        "Run due:           {} (needs {min_sessions})",
        if new >= min_sessions { "yes" } else { "no" }
    );
    match scheduler.store().read() {
        Some(config) => println!(
            "Current config:    {} adjustments, generated {}",
            config.adjustments.len(),
            config.generated_at
        ),
        None => println!("Current config:    none (all multipliers 1.0)"),
    }
}

fn cmd_history(store: &TuningStore) {
    let history = store.read().map(|c| c.history).unwrap_or_default();
    print!("{}", HistoryAnalysis::from_history(&history).to_markdown());
}
