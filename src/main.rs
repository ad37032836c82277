//! Slotwatch - booking slot watcher
//!
//! Command-line entry point: runs the watcher against an open browser and
//! inspects or resets the state it leaves behind.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, Utc};
use slotwatch::classifier::ResponseClassifier;
use slotwatch::config::WatchConfig;
use slotwatch::runtime::{RunOptions, Runner};
use slotwatch::session::{CooldownGate, GateDecision};
use slotwatch::state::PersistedState;
use slotwatch::store::{FileStateStore, StateStore};
use slotwatch::SlotwatchError;

/// Log entries shown by `status`.
const STATUS_LOG_ENTRIES: usize = 5;

#[derive(Parser)]
#[command(name = "slotwatch")]
#[command(version)]
#[command(about = "Watch a booking page for free test slots and claim them", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// State directory holding settings.json and state.json
    #[arg(short, long, global = true, env = "SLOTWATCH_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SLOTWATCH_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to the browser and watch until the session ends
    Run {
        /// Stop the session on SIGINT/SIGTERM instead of keeping it for the next run
        #[arg(long)]
        stop_on_signal: bool,
    },

    /// Show the persisted session
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask a running watcher to stop
    Stop,

    /// Forget the persisted session (counters, countdown and cooldown)
    Reset,

    /// Classify a saved response body
    Classify {
        /// File containing the response body
        file: PathBuf,

        /// Last acceptable period start (defaults to the configured deadline)
        #[arg(long, value_name = "YYYY-MM-DD")]
        deadline: Option<NaiveDate>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Validate settings.json
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            tracing_subscriber::EnvFilter::new("slotwatch=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("slotwatch=info,warn")
        }
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(WatchConfig::default_state_dir);

    if let Err(e) = dispatch(cli.command, &state_dir).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
    Ok(())
}

async fn dispatch(command: Commands, state_dir: &Path) -> slotwatch::Result<()> {
    match command {
        Commands::Run { stop_on_signal } => {
            let config = WatchConfig::load(state_dir)?;
            let runner = Runner::new(
                RunOptions {
                    state_dir: state_dir.to_path_buf(),
                    keep_running_on_signal: !stop_on_signal,
                },
                config,
            );
            let summary = runner.run().await?;
            println!(
                "{} Session finished: {} click(s) this session, {} today{}",
                "OK".green().bold(),
                summary.clicks,
                summary.daily_total,
                if summary.resumed { " (resumed)" } else { "" }
            );
        }

        Commands::Status { json } => show_status(state_dir, json)?,

        Commands::Stop => {
            let path = Runner::request_stop(state_dir)?;
            println!(
                "{} Stop requested ({})",
                "OK".green().bold(),
                path.display()
            );
        }

        Commands::Reset => {
            let store = FileStateStore::new(state_dir);
            if !store.exists() {
                println!("{} No session state to reset", "Info:".blue());
                return Ok(());
            }
            store.clear()?;
            println!("{} Session state cleared", "OK".green().bold());
        }

        Commands::Classify { file, deadline } => {
            let body = std::fs::read_to_string(&file)?;
            let deadline = match deadline {
                Some(date) => date,
                None => WatchConfig::load(state_dir)?
                    .session
                    .search_end(Local::now().date_naive()),
            };
            let classification = ResponseClassifier::new().classify(&body, deadline);
            println!("{}", classification.label().bold());
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let mut config = WatchConfig::load(state_dir)?;
                if config.account.password.is_some() {
                    config.account.password = Some("********".to_string());
                }
                println!("{}", serde_json::to_string_pretty(&config)?);
            }

            ConfigAction::Validate => {
                let settings_path = WatchConfig::settings_path(state_dir);
                if !settings_path.exists() {
                    println!(
                        "{} settings.json not found (using defaults)",
                        "Info:".blue()
                    );
                }
                let config = WatchConfig::load(state_dir)?;
                let problems = config.validate();
                if problems.is_empty() {
                    println!("{} settings.json is valid", "OK".green());
                } else {
                    for problem in &problems {
                        eprintln!("{} {}", "Error:".red(), problem);
                    }
                    return Err(SlotwatchError::invalid_config(
                        "settings.json",
                        format!("{} problem(s) found", problems.len()),
                    ));
                }
            }
        },
    }
    Ok(())
}

fn show_status(state_dir: &Path, json: bool) -> slotwatch::Result<()> {
    let store = FileStateStore::new(state_dir);
    let Some(state) = PersistedState::load(&store)? else {
        if json {
            println!("null");
        } else {
            println!("{} No session recorded in {}", "Info:".blue(), state_dir.display());
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let config = match &state.config {
        Some(saved) => saved.clone(),
        None => WatchConfig::load(state_dir)?.session,
    };
    let session = &state.session;
    let today = Local::now().date_naive();

    println!("{}", "Session".bold());
    println!("   Status: {}", session.status.to_string().cyan());
    println!(
        "   Time left: {}:{:02}",
        session.countdown_remaining_secs / 60,
        session.countdown_remaining_secs % 60
    );
    println!(
        "   Clicks: {} this session, {}/{} today",
        state.counters.session_total,
        state.counters.daily_total_on(today),
        config.max_clicks_per_day
    );
    if state.claim_active {
        println!(
            "   Claim: {} ({} link(s) queued)",
            "in progress".yellow(),
            state.claim_queue.len()
        );
    }

    if !session.status.is_active() {
        match CooldownGate::evaluate(session, &config, Utc::now()) {
            GateDecision::Reject { remaining_minutes } => println!(
                "   Cooldown: {} minute(s) left",
                remaining_minutes.to_string().yellow()
            ),
            _ => println!("   Cooldown: {}", "ready".green()),
        }
    }

    let recent: Vec<_> = state.log.iter().take(STATUS_LOG_ENTRIES).collect();
    if !recent.is_empty() {
        println!("\n{}", "Recent events".bold());
        for entry in recent.iter().rev() {
            println!(
                "   {} [{}] {}",
                entry.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                entry.level,
                entry.message
            );
        }
    }
    Ok(())
}
