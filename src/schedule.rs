use crate::providers::{http_client, ProviderError};
use crate::race::{Race, RaceId};
use crate::util::{hours_between, write_json_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub trait ScheduleProvider {
    fn events(&self, season: i32) -> Result<Vec<Race>, ProviderError>;
}

#[derive(Debug, Deserialize, Serialize)]
struct StoredSchedule {
    season: i32,
    fetched_at: DateTime<Utc>,
    races: Vec<Race>,
}

/// The season's race list, replaced wholesale on refresh and persisted for restarts.
#[derive(Debug)]
pub struct ScheduleStore {
    path: PathBuf,
    season: i32,
    races: Vec<Race>,
    fetched_at: Option<DateTime<Utc>>,
}

impl ScheduleStore {
    /// A stored schedule for another season is ignored, as is a missing or unreadable one.
    pub fn load<P: AsRef<Path>>(path: P, season: i32) -> ScheduleStore {
        let path = path.as_ref().to_path_buf();
        let mut store = ScheduleStore {
            path,
            season,
            races: Vec::new(),
            fetched_at: None,
        };
        if !store.path.exists() {
            return store;
        }
        match read(&store.path) {
            Ok(stored) if stored.season == season => {
                store.races = stored.races;
                store.fetched_at = Some(stored.fetched_at);
            }
            Ok(stored) => {
                info!(stored = stored.season, season, "stored schedule is for another season");
            }
            Err(err) => {
                warn!(path = %store.path.display(), error = %err, "unreadable schedule");
            }
        }
        store
    }

    pub fn season(&self) -> i32 {
        self.season
    }

    pub fn races(&self) -> &[Race] {
        &self.races
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    /// The race with the earliest start strictly after `now`; ties go to list order.
    pub fn next_race(&self, now: DateTime<Utc>) -> Option<&Race> {
        self.races
            .iter()
            .filter(|race| race.start_time > now)
            .fold(None, |best: Option<&Race>, race| match best {
                Some(b) if b.start_time <= race.start_time => Some(b),
                _ => Some(race),
            })
    }

    /// The most recent race that has started at `now`.
    pub fn last_started(&self, now: DateTime<Utc>) -> Option<&Race> {
        self.races
            .iter()
            .filter(|race| race.start_time <= now)
            .max_by_key(|race| race.start_time)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age_hours: f64) -> bool {
        match self.fetched_at {
            Some(fetched_at) => self.races.is_empty() || hours_between(fetched_at, now) > max_age_hours,
            None => true,
        }
    }

    /// Replaces the race list from `provider`. On any provider failure, or an empty answer, the
    /// previous list is kept and the error returned.
    #[instrument(name = "ScheduleStore::refresh", skip(self, provider), fields(season = self.season))]
    pub fn refresh(&mut self, provider: &dyn ScheduleProvider, now: DateTime<Utc>) -> Result<usize> {
        let mut races = provider
            .events(self.season)
            .with_context(|| format!("unable to fetch the {} schedule", self.season))?;
        if races.is_empty() {
            anyhow::bail!("schedule provider returned no races for {}", self.season);
        }
        races.sort_by_key(|race| race.id.round);
        let stored = StoredSchedule {
            season: self.season,
            fetched_at: now,
            races,
        };
        write_json_atomic(&self.path, &stored)
            .with_context(|| format!("unable to write {}", self.path.display()))?;
        self.races = stored.races;
        self.fetched_at = Some(now);
        info!(races = self.races.len(), "schedule refreshed");
        Ok(self.races.len())
    }
}

fn read(path: &Path) -> Result<StoredSchedule> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Ergast-compatible season endpoint (`<base>/<season>.json`).
#[derive(Debug)]
pub struct ErgastSchedule {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl ErgastSchedule {
    pub fn new(base_url: &str, timeout: Duration) -> Result<ErgastSchedule, ProviderError> {
        Ok(ErgastSchedule {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErgastResponse {
    #[serde(rename = "MRData")]
    mr_data: ErgastData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErgastData {
    race_table: ErgastRaceTable,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErgastRaceTable {
    races: Vec<ErgastRace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErgastRace {
    season: String,
    round: String,
    race_name: String,
    #[serde(rename = "Circuit")]
    circuit: ErgastCircuit,
    date: String,
    time: Option<String>,
    #[serde(rename = "Qualifying")]
    qualifying: Option<ErgastSession>,
}

#[derive(Debug, Deserialize)]
struct ErgastCircuit {
    #[serde(rename = "Location")]
    location: ErgastLocation,
}

#[derive(Debug, Deserialize)]
struct ErgastLocation {
    locality: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct ErgastSession {
    date: String,
    time: Option<String>,
}

fn session_time(date: &str, time: Option<&str>) -> Result<DateTime<Utc>, ProviderError> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| ProviderError::Parse(format!("date {:?}: {}", date, e)))?;
    let time = match time {
        Some(t) => NaiveTime::parse_from_str(t.trim_end_matches('Z'), "%H:%M:%S")
            .map_err(|e| ProviderError::Parse(format!("time {:?}: {}", t, e)))?,
        None => NaiveTime::MIN,
    };
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ProviderError> {
    value
        .parse()
        .map_err(|_| ProviderError::Parse(format!("{} {:?}", field, value)))
}

impl ErgastRace {
    fn into_race(self) -> Result<Race, ProviderError> {
        Ok(Race {
            id: RaceId {
                season: parse_num("season", &self.season)?,
                round: parse_num("round", &self.round)?,
            },
            start_time: session_time(&self.date, self.time.as_deref())?,
            qualifying_time: match &self.qualifying {
                Some(q) => Some(session_time(&q.date, q.time.as_deref())?),
                None => None,
            },
            name: self.race_name,
            country: self.circuit.location.country,
            location: self.circuit.location.locality,
        })
    }
}

impl ScheduleProvider for ErgastSchedule {
    fn events(&self, season: i32) -> Result<Vec<Race>, ProviderError> {
        let url = format!("{}/{}.json", self.base_url, season);
        let response: ErgastResponse = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .json()?;
        parse_ergast(response)
    }
}

fn parse_ergast(response: ErgastResponse) -> Result<Vec<Race>, ProviderError> {
    response
        .mr_data
        .race_table
        .races
        .into_iter()
        .map(ErgastRace::into_race)
        .collect()
}

/// Static 2025 calendar for running without network access.
#[derive(Debug, Default)]
pub struct BuiltinSchedule;

const BUILTIN_2025: &[(u32, &str, &str, &str, &str, &str)] = &[
    (1, "Australian Grand Prix", "Australia", "Melbourne", "2025-03-16T04:00:00Z", "2025-03-15T05:00:00Z"),
    (2, "Chinese Grand Prix", "China", "Shanghai", "2025-03-23T07:00:00Z", "2025-03-22T07:00:00Z"),
    (3, "Japanese Grand Prix", "Japan", "Suzuka", "2025-04-06T05:00:00Z", "2025-04-05T06:00:00Z"),
    (4, "Bahrain Grand Prix", "Bahrain", "Sakhir", "2025-04-13T15:00:00Z", "2025-04-12T16:00:00Z"),
    (5, "Saudi Arabian Grand Prix", "Saudi Arabia", "Jeddah", "2025-04-20T17:00:00Z", "2025-04-19T17:00:00Z"),
    (6, "Miami Grand Prix", "United States", "Miami", "2025-05-04T20:00:00Z", "2025-05-03T20:00:00Z"),
];

impl ScheduleProvider for BuiltinSchedule {
    fn events(&self, season: i32) -> Result<Vec<Race>, ProviderError> {
        if season != 2025 {
            return Err(ProviderError::Unavailable(format!(
                "no built-in schedule for {}",
                season
            )));
        }
        BUILTIN_2025
            .iter()
            .map(|&(round, name, country, location, start, quali)| -> Result<Race, ProviderError> {
                let parse = |s: &str| {
                    DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| ProviderError::Parse(format!("{:?}: {}", s, e)))
                };
                Ok(Race {
                    id: RaceId { season, round },
                    name: name.to_string(),
                    country: country.to_string(),
                    location: location.to_string(),
                    start_time: parse(start)?,
                    qualifying_time: Some(parse(quali)?),
                })
            })
            .collect()
    }
}
