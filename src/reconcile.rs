use crate::config::{BettingConfig, Config};
use crate::ledger::{ProfitLedger, SettledBet};
use crate::race::Race;
use crate::read_dir::Entry;
use crate::recommend::load_recommendations;
use crate::registry::ProcessedRaceRegistry;
use crate::results::read_results;
use crate::watcher::{identify_race, IdentifiedRace, ResultFileWatcher};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub file_name: String,
    pub race: String,
    pub scheduled: bool,
    pub settled: usize,
    /// `BET` rows for the race with no classified finish in the file.
    pub unmatched: usize,
    pub race_profit: f64,
    pub archived_to: PathBuf,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub candidates: usize,
    pub processed: Vec<ProcessReport>,
    pub failed: Vec<(String, String)>,
}

/// Settles `BET` recommendations against results files dropped into the watch directory.
///
/// Each file goes through the same ordered steps: validate, identify the race, settle, append to
/// the ledger, rewrite the capital curve, archive, register. A failure stops the sequence and the
/// file stays where it is; every step before it is safe to repeat on the next scan.
#[derive(Debug)]
pub struct RaceOutcomeReconciler {
    watcher: ResultFileWatcher,
    registry: ProcessedRaceRegistry,
    ledger: ProfitLedger,
    recommendations: PathBuf,
    capital_curve: PathBuf,
    archive: PathBuf,
    betting: BettingConfig,
}

impl RaceOutcomeReconciler {
    pub fn from_config(config: &Config) -> Result<RaceOutcomeReconciler> {
        let paths = config.paths();
        Ok(RaceOutcomeReconciler {
            watcher: ResultFileWatcher::from_config(config)?,
            registry: ProcessedRaceRegistry::load(&paths.registry),
            ledger: ProfitLedger::load(&paths.ledger, config.betting.starting_capital)?,
            recommendations: paths.recommendations,
            capital_curve: paths.capital_curve,
            archive: paths.archive,
            betting: config.betting.clone(),
        })
    }

    pub fn ledger(&self) -> &ProfitLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &ProcessedRaceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProcessedRaceRegistry {
        &mut self.registry
    }

    /// Processes every eligible file currently in the watch directory. Per-file failures are
    /// collected, never fatal.
    #[instrument(name = "RaceOutcomeReconciler::run_single_check", skip_all)]
    pub fn run_single_check(&mut self, schedule: &[Race], now: DateTime<Utc>) -> Result<ScanReport> {
        let candidates = self.watcher.scan(&self.registry, SystemTime::from(now))?;
        let mut report = ScanReport {
            candidates: candidates.len(),
            ..ScanReport::default()
        };
        for entry in &candidates {
            match self.process(entry, schedule, now) {
                Ok(processed) => report.processed.push(processed),
                Err(err) => {
                    error!(file = %entry.file_name, "unable to process results: {:#}", err);
                    report.failed.push((entry.file_name.clone(), format!("{:#}", err)));
                }
            }
        }
        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            total = report.candidates,
            "results check finished"
        );
        Ok(report)
    }

    #[instrument(name = "RaceOutcomeReconciler::process", skip(self, entry, schedule, now), fields(file = %entry.file_name))]
    pub fn process(
        &mut self,
        entry: &Entry,
        schedule: &[Race],
        now: DateTime<Utc>,
    ) -> Result<ProcessReport> {
        let results = read_results(&entry.path)
            .with_context(|| format!("{} failed validation", entry.file_name))?;
        let race = identify_race(&entry.file_name, &results, schedule, now);
        info!(race = %race.name, source = ?race.source, rows = results.rows.len(), "identified race");

        let positions: FxHashMap<&str, u32> = results
            .rows
            .iter()
            .filter_map(|row| row.position.map(|p| (row.driver.as_str(), p)))
            .collect();
        let (settled, unmatched) = self.settle(&race, &positions, now)?;

        if !settled.is_empty() {
            self.ledger.append(&settled)?;
            self.ledger.write_capital_curve(&self.capital_curve)?;
        }
        let archived_to = archive(&entry.path, &self.archive, &race.name, &entry.file_name, now)?;
        self.registry.record(&entry.file_name)?;

        let race_profit: f64 = settled.iter().map(|b| b.profit_loss).sum();
        info!(
            race = %race.name,
            settled = settled.len(),
            unmatched,
            race_profit,
            "race processed"
        );
        Ok(ProcessReport {
            file_name: entry.file_name.clone(),
            race: race.name,
            scheduled: race.id.is_some(),
            settled: settled.len(),
            unmatched,
            race_profit,
            archived_to,
        })
    }

    fn settle(
        &self,
        race: &IdentifiedRace,
        positions: &FxHashMap<&str, u32>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<SettledBet>, usize)> {
        let id = match race.id {
            Some(id) => id,
            None => {
                warn!(race = %race.name, "race is not on the schedule, nothing to settle");
                return Ok((Vec::new(), 0));
            }
        };
        let bets: Vec<_> = load_recommendations(&self.recommendations)?
            .into_iter()
            .filter(|r| r.race_id() == id && r.is_bet())
            .collect();
        if bets.is_empty() {
            warn!(race = %id, "no bets were recommended for this race");
        }
        let mut settled = Vec::new();
        let mut unmatched = 0;
        for bet in &bets {
            match positions.get(bet.driver.as_str()) {
                Some(&position) => settled.push(SettledBet::settle(
                    bet,
                    position,
                    self.betting.success_threshold,
                    self.betting.bet_amount,
                    now,
                )),
                None => unmatched += 1,
            }
        }
        Ok((settled, unmatched))
    }
}

fn archive(
    path: &Path,
    archive_dir: &Path,
    race_name: &str,
    file_name: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    fs::create_dir_all(archive_dir)
        .with_context(|| format!("unable to create {}", archive_dir.display()))?;
    let dest = archive_dir.join(format!(
        "{}_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        race_name.replace(' ', "_"),
        file_name
    ));
    if fs::rename(path, &dest).is_err() {
        // rename cannot cross filesystems
        fs::copy(path, &dest)
            .with_context(|| format!("unable to archive {} to {}", path.display(), dest.display()))?;
        fs::remove_file(path).with_context(|| format!("unable to remove {}", path.display()))?;
    }
    Ok(dest)
}
