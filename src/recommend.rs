use crate::config::BettingConfig;
use crate::race::{Race, RaceId};
use crate::util::{hours_between, write_atomic, write_json_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Prediction {
    pub driver: String,
    pub position: Option<u32>,
    /// Probability of the settled event (a finish inside the success threshold), in `[0, 1]`.
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OddsQuote {
    pub driver: String,
    /// Decimal odds.
    pub odds: f64,
    pub bookmaker: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Provider output tagged with the race it was fetched for.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Snapshot<T> {
    pub race: RaceId,
    pub race_name: String,
    pub fetched_at: DateTime<Utc>,
    pub rows: Vec<T>,
}

impl<T: Serialize + DeserializeOwned> Snapshot<T> {
    pub fn new(race: &Race, fetched_at: DateTime<Utc>, rows: Vec<T>) -> Snapshot<T> {
        Snapshot {
            race: race.id,
            race_name: race.name.clone(),
            fetched_at,
            rows,
        }
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub fn load(path: &Path) -> Result<Option<Snapshot<T>>> {
        if !path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        let snapshot = serde_json::from_reader(reader)
            .with_context(|| format!("unable to parse {}", path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        hours_between(self.fetched_at, now)
    }

    pub fn is_fresh_for(&self, race: RaceId, now: DateTime<Utc>, max_age_hours: f64) -> bool {
        self.race == race && self.age_hours(now) < max_age_hours
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetFlag {
    Bet,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BettingRecommendation {
    pub season: i32,
    pub round: u32,
    pub race: String,
    pub driver: String,
    pub predicted_position: Option<u32>,
    pub probability: f64,
    pub odds: f64,
    pub bookmaker: String,
    pub expected_value: f64,
    pub recommendation: BetFlag,
    pub stake: f64,
    pub potential_profit: f64,
    pub created_at: DateTime<Utc>,
}

impl BettingRecommendation {
    pub fn race_id(&self) -> RaceId {
        RaceId {
            season: self.season,
            round: self.round,
        }
    }

    pub fn is_bet(&self) -> bool {
        self.recommendation == BetFlag::Bet
    }
}

/// Expected value per unit stake of a back bet at decimal `odds` that wins with `probability`.
pub fn expected_value(probability: f64, odds: f64) -> f64 {
    probability * (odds - 1.0) - (1.0 - probability)
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("{driver}: probability {probability} outside [0, 1]")]
    Probability { driver: String, probability: f64 },
    #[error("{driver}: odds {odds} must be greater than 1")]
    Odds { driver: String, odds: f64 },
    #[error("{driver}: more than one prediction")]
    Duplicate { driver: String },
}

#[derive(Debug, Default)]
pub struct Generated {
    pub rows: Vec<BettingRecommendation>,
    pub errors: Vec<RowError>,
    pub total: usize,
}

impl Generated {
    pub fn bets(&self) -> impl Iterator<Item = &BettingRecommendation> {
        self.rows.iter().filter(|r| r.is_bet())
    }
}

/// Highest price per driver across bookmakers. Quotes that cannot be a price are row errors.
fn best_odds(odds: &[OddsQuote], errors: &mut Vec<RowError>) -> FxHashMap<String, OddsQuote> {
    let mut best: FxHashMap<String, OddsQuote> = FxHashMap::default();
    for quote in odds {
        if !(quote.odds > 1.0) || !quote.odds.is_finite() {
            errors.push(RowError::Odds {
                driver: quote.driver.clone(),
                odds: quote.odds,
            });
            continue;
        }
        match best.get(&quote.driver) {
            Some(current) if current.odds >= quote.odds => {}
            _ => {
                best.insert(quote.driver.clone(), quote.clone());
            }
        }
    }
    best
}

fn check_prediction(prediction: &Prediction, seen: &mut FxHashSet<String>) -> Result<(), RowError> {
    if !(0.0..=1.0).contains(&prediction.probability) {
        return Err(RowError::Probability {
            driver: prediction.driver.clone(),
            probability: prediction.probability,
        });
    }
    if !seen.insert(prediction.driver.clone()) {
        return Err(RowError::Duplicate {
            driver: prediction.driver.clone(),
        });
    }
    Ok(())
}

/// Joins predictions with the best available odds per driver. Rows with EV at or above the
/// threshold are candidates; the `max_bets_per_race` highest-EV candidates are flagged `BET`.
pub fn generate(
    race: &Race,
    predictions: &[Prediction],
    odds: &[OddsQuote],
    betting: &BettingConfig,
    now: DateTime<Utc>,
) -> Generated {
    let mut generated = Generated {
        total: predictions.len() + odds.len(),
        ..Generated::default()
    };
    let best = best_odds(odds, &mut generated.errors);
    let mut seen = FxHashSet::default();

    for prediction in predictions {
        if let Err(err) = check_prediction(prediction, &mut seen) {
            generated.errors.push(err);
            continue;
        }
        let quote = match best.get(&prediction.driver) {
            Some(quote) => quote,
            None => continue,
        };
        let ev = expected_value(prediction.probability, quote.odds);
        generated.rows.push(BettingRecommendation {
            season: race.id.season,
            round: race.id.round,
            race: race.name.clone(),
            driver: prediction.driver.clone(),
            predicted_position: prediction.position,
            probability: prediction.probability,
            odds: quote.odds,
            bookmaker: quote.bookmaker.clone(),
            expected_value: ev,
            recommendation: BetFlag::Skip,
            stake: betting.bet_amount,
            potential_profit: betting.bet_amount * (quote.odds - 1.0),
            created_at: now,
        });
    }

    generated.rows.sort_by(|a, b| {
        b.expected_value
            .partial_cmp(&a.expected_value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.driver.cmp(&b.driver))
    });
    for row in generated
        .rows
        .iter_mut()
        .filter(|r| r.expected_value >= betting.min_expected_value)
        .take(betting.max_bets_per_race)
    {
        row.recommendation = BetFlag::Bet;
    }

    for err in &generated.errors {
        warn!(race = %race.id, "skipping row: {}", err);
    }
    info!(
        race = %race.id,
        rows = generated.rows.len(),
        bets = generated.bets().count(),
        failed = generated.errors.len(),
        total = generated.total,
        "generated recommendations"
    );
    generated
}

/// The persisted recommendation table, one CSV holding every race's rows.
pub fn load_recommendations(path: &Path) -> Result<Vec<BettingRecommendation>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("unable to open {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("bad recommendation row in {}", path.display()))?);
    }
    Ok(rows)
}

/// Replaces `race`'s rows in the table, leaving other races untouched.
pub fn replace_recommendations(
    path: &Path,
    race: RaceId,
    rows: &[BettingRecommendation],
) -> Result<()> {
    let existing = load_recommendations(path)?;
    write_atomic(path, |w| {
        let mut writer = csv::Writer::from_writer(w);
        for row in existing.iter().filter(|r| r.race_id() != race).chain(rows) {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// When a race's recommendations were last generated. Written even when the run produced no rows.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GenerationMarker {
    pub race: RaceId,
    pub generated_at: DateTime<Utc>,
    pub rows: usize,
}

impl GenerationMarker {
    /// The stored marker, if the last generation was for `race`.
    pub fn load_for(path: &Path, race: RaceId) -> Result<Option<GenerationMarker>> {
        if !path.exists() {
            return Ok(None);
        }
        let marker: GenerationMarker = serde_json::from_reader(BufReader::new(File::open(path)?))
            .with_context(|| format!("unable to parse {}", path.display()))?;
        Ok(Some(marker).filter(|m| m.race == race))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}
