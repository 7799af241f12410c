#![warn(clippy::pedantic, rust_2018_idioms)]

mod config;
mod ledger;
mod monitor;
mod providers;
mod race;
mod read_dir;
mod recommend;
mod reconcile;
mod registry;
mod results;
mod schedule;
mod time;
mod util;
mod watcher;

use crate::config::Config;
use crate::monitor::MonitoringOrchestrator;
use crate::providers::Collaborators;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "pitwall")]
#[command(about = "Race-weekend betting monitor: odds, predictions, recommendations and settlement", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/pitwall.toml, then the user config dir)
    #[arg(short, long, global = true, env = "PITWALL_CONFIG")]
    config: Option<PathBuf>,
    /// Root of all persisted state
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the data directories and load the season schedule
    Setup,
    /// Run one monitoring cycle now
    Check,
    /// Run monitoring cycles until interrupted
    Start,
    /// Print the next race, due actions and state files as JSON
    Status,
    /// Process every waiting results file, whatever the clock says
    Evaluate,
    /// Print the ledger summary and per-race capital curve
    Ledger,
    /// Forget which results files were processed
    ClearRegistry,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    config.resolve_data_dir(cli.data_dir);
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let now = Utc::now();
    let collaborators = Collaborators::from_config(&config)?;
    let mut orchestrator = MonitoringOrchestrator::new(config, collaborators, now)?;

    match cli.command {
        Command::Setup => {
            let races = orchestrator.setup(now)?;
            println!("loaded {} races for {}", races, orchestrator.schedule().season());
        }
        Command::Check => {
            let report = orchestrator.run_cycle(now);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Start => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            ctrlc::set_handler(move || {
                info!("interrupt received, stopping after the current cycle");
                handler_stop.store(true, Ordering::SeqCst);
            })
            .context("unable to install the interrupt handler")?;
            orchestrator.run(&stop);
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&orchestrator.status(now))?);
        }
        Command::Evaluate => {
            let report = orchestrator.evaluate(now)?;
            for processed in &report.processed {
                println!(
                    "{}: {} ({} settled, {:+.2})",
                    processed.file_name, processed.race, processed.settled, processed.race_profit
                );
            }
            for (file, err) in &report.failed {
                println!("{}: failed: {}", file, err);
            }
            println!("processed {}/{}", report.processed.len(), report.candidates);
        }
        Command::Ledger => {
            let ledger = orchestrator.reconciler().ledger();
            println!("starting capital: {:.2}", ledger.starting_capital());
            println!("{}", ledger.summary());
            for race in ledger.race_summaries() {
                println!(
                    "{}-R{:02} {:<28} bets {:>2}  wins {:>2}  {:>+9.2}  capital {:>9.2}",
                    race.season, race.round, race.race, race.bets, race.wins, race.race_profit, race.capital
                );
            }
        }
        Command::ClearRegistry => {
            let registry = orchestrator.reconciler_mut().registry_mut();
            let cleared = registry.len();
            registry.clear()?;
            println!("cleared {} processed file(s)", cleared);
        }
    }
    Ok(())
}
