use crate::race::RaceId;
use crate::recommend::BettingRecommendation;
use crate::util::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SettledBet {
    pub season: i32,
    pub round: u32,
    pub race: String,
    pub driver: String,
    pub odds: f64,
    pub predicted_probability: f64,
    pub expected_value: f64,
    pub actual_position: u32,
    pub stake: f64,
    pub outcome: Outcome,
    pub profit_loss: f64,
    pub success_threshold: u32,
    pub settled_at: DateTime<Utc>,
}

impl SettledBet {
    /// A finish at or inside `success_threshold` wins `odds * stake - stake`; anything else loses
    /// the stake.
    pub fn settle(
        recommendation: &BettingRecommendation,
        actual_position: u32,
        success_threshold: u32,
        stake: f64,
        settled_at: DateTime<Utc>,
    ) -> SettledBet {
        let (outcome, profit_loss) = if actual_position <= success_threshold {
            (Outcome::Win, recommendation.odds * stake - stake)
        } else {
            (Outcome::Loss, -stake)
        };
        SettledBet {
            season: recommendation.season,
            round: recommendation.round,
            race: recommendation.race.clone(),
            driver: recommendation.driver.clone(),
            odds: recommendation.odds,
            predicted_probability: recommendation.probability,
            expected_value: recommendation.expected_value,
            actual_position,
            stake,
            outcome,
            profit_loss,
            success_threshold,
            settled_at,
        }
    }

    pub fn race_id(&self) -> RaceId {
        RaceId {
            season: self.season,
            round: self.round,
        }
    }

    fn key(&self) -> (RaceId, &str) {
        (self.race_id(), self.driver.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaceSummary {
    pub season: i32,
    pub round: u32,
    pub race: String,
    pub bets: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub race_profit: f64,
    pub cumulative_profit: f64,
    pub capital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub bets: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub roi: f64,
    pub final_capital: f64,
}

impl fmt::Display for LedgerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bets: {}, wins: {}, win rate: {:.1}%, profit: {:.2}, roi: {:.1}%, capital: {:.2}",
            self.bets,
            self.wins,
            self.win_rate * 100.0,
            self.total_profit,
            self.roi * 100.0,
            self.final_capital
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendReport {
    pub added: usize,
    pub replaced: usize,
}

/// Every settled bet, at most one per (race, driver). Rows keep the position where their key was
/// first seen; a later row for the same key replaces the earlier one's contents.
#[derive(Debug)]
pub struct ProfitLedger {
    path: PathBuf,
    starting_capital: f64,
    entries: Vec<SettledBet>,
}

impl ProfitLedger {
    pub fn load<P: AsRef<Path>>(path: P, starting_capital: f64) -> Result<ProfitLedger> {
        let path = path.as_ref().to_path_buf();
        let mut entries = Vec::new();
        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)
                .with_context(|| format!("unable to open {}", path.display()))?;
            for row in reader.deserialize() {
                entries.push(row.with_context(|| format!("bad ledger row in {}", path.display()))?);
            }
        }
        debug!(path = %path.display(), len = entries.len(), "loaded ledger");
        Ok(ProfitLedger {
            path,
            starting_capital,
            entries,
        })
    }

    pub fn entries(&self) -> &[SettledBet] {
        &self.entries
    }

    pub fn starting_capital(&self) -> f64 {
        self.starting_capital
    }

    fn merged(&self, new: &[SettledBet]) -> (Vec<SettledBet>, AppendReport) {
        let mut merged = self.entries.clone();
        let mut index: FxHashMap<(RaceId, String), usize> = merged
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.race_id(), e.driver.clone()), i))
            .collect();
        let mut report = AppendReport::default();
        for entry in new {
            let (race, driver) = entry.key();
            match index.get(&(race, driver.to_string())) {
                Some(&i) => {
                    merged[i] = entry.clone();
                    report.replaced += 1;
                }
                None => {
                    index.insert((race, driver.to_string()), merged.len());
                    merged.push(entry.clone());
                    report.added += 1;
                }
            }
        }
        (merged, report)
    }

    /// Merges `new` into the ledger and rewrites the file in one atomic step. Nothing changes, on
    /// disk or in memory, if the write fails.
    pub fn append(&mut self, new: &[SettledBet]) -> Result<AppendReport> {
        let (merged, report) = self.merged(new);
        write_atomic(&self.path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            for entry in &merged {
                writer.serialize(entry)?;
            }
            writer.flush()?;
            Ok(())
        })
        .with_context(|| format!("unable to write {}", self.path.display()))?;
        self.entries = merged;
        info!(
            added = report.added,
            replaced = report.replaced,
            len = self.entries.len(),
            "ledger updated"
        );
        Ok(report)
    }

    /// Per-race totals in first-seen race order, with the running capital after each race.
    pub fn race_summaries(&self) -> Vec<RaceSummary> {
        let mut order: Vec<RaceId> = Vec::new();
        let mut by_race: FxHashMap<RaceId, RaceSummary> = FxHashMap::default();
        for entry in &self.entries {
            let summary = by_race.entry(entry.race_id()).or_insert_with(|| {
                order.push(entry.race_id());
                RaceSummary {
                    season: entry.season,
                    round: entry.round,
                    race: entry.race.clone(),
                    bets: 0,
                    wins: 0,
                    win_rate: 0.0,
                    race_profit: 0.0,
                    cumulative_profit: 0.0,
                    capital: 0.0,
                }
            });
            summary.bets += 1;
            if entry.outcome == Outcome::Win {
                summary.wins += 1;
            }
            summary.race_profit += entry.profit_loss;
        }

        let mut cumulative = 0.0;
        order
            .iter()
            .filter_map(|id| by_race.remove(id))
            .map(|mut summary| {
                cumulative += summary.race_profit;
                summary.win_rate = ratio(summary.wins, summary.bets);
                summary.cumulative_profit = cumulative;
                summary.capital = self.starting_capital + cumulative;
                summary
            })
            .collect()
    }

    /// Capital after each settled race; unsettled races are absent.
    pub fn cumulative_capital(&self) -> Vec<(RaceId, f64)> {
        self.race_summaries()
            .into_iter()
            .map(|s| (RaceId { season: s.season, round: s.round }, s.capital))
            .collect()
    }

    pub fn summary(&self) -> LedgerSummary {
        let bets = self.entries.len();
        let wins = self
            .entries
            .iter()
            .filter(|e| e.outcome == Outcome::Win)
            .count();
        let total_profit: f64 = self.entries.iter().map(|e| e.profit_loss).sum();
        let staked: f64 = self.entries.iter().map(|e| e.stake).sum();
        LedgerSummary {
            bets,
            wins,
            win_rate: ratio(wins, bets),
            total_profit,
            roi: if staked > 0.0 { total_profit / staked } else { 0.0 },
            final_capital: self.starting_capital + total_profit,
        }
    }

    pub fn write_capital_curve(&self, path: &Path) -> Result<()> {
        let summaries = self.race_summaries();
        write_atomic(path, |w| {
            let mut writer = csv::Writer::from_writer(w);
            for summary in &summaries {
                writer.serialize(summary)?;
            }
            writer.flush()?;
            Ok(())
        })
        .with_context(|| format!("unable to write {}", path.display()))
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}
