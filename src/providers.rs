use crate::config::{Config, OddsSource, ScheduleSource};
use crate::race::Race;
use crate::recommend::{OddsQuote, Prediction};
use crate::schedule::{BuiltinSchedule, ErgastSchedule, ScheduleProvider};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unable to read {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("unable to parse response: {0}")]
    Parse(String),
    #[error("{0}")]
    Unavailable(String),
}

pub fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, ProviderError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pitwall/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub trait PredictionsProvider {
    fn generate(&self, race: &Race) -> Result<Vec<Prediction>, ProviderError>;
}

pub trait OddsProvider {
    fn fetch(&self, race: &Race) -> Result<Vec<OddsQuote>, ProviderError>;
}

/// Delivery is best effort: implementations log failures and never return them.
pub trait Notifier {
    fn notify(&self, message: &str);
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, ProviderError> {
    if !path.exists() {
        return Err(ProviderError::Unavailable(format!(
            "{} does not exist",
            path.display()
        )));
    }
    let csv_err = |source| ProviderError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(csv_err)
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Reads the table the external model writes before each race.
#[derive(Debug)]
pub struct CsvPredictions {
    path: PathBuf,
}

impl CsvPredictions {
    pub fn new(path: PathBuf) -> CsvPredictions {
        CsvPredictions { path }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionRow {
    #[serde(alias = "Driver")]
    driver: String,
    #[serde(
        default,
        alias = "Position",
        alias = "predicted_position",
        alias = "Predicted_Position"
    )]
    position: Option<u32>,
    #[serde(alias = "Probability", alias = "top3_probability", alias = "Top3_Probability")]
    probability: f64,
}

impl PredictionsProvider for CsvPredictions {
    fn generate(&self, race: &Race) -> Result<Vec<Prediction>, ProviderError> {
        let rows: Vec<PredictionRow> = read_csv(&self.path)?;
        debug!(race = %race.id, rows = rows.len(), path = %self.path.display(), "read predictions");
        Ok(rows
            .into_iter()
            .map(|row| Prediction {
                driver: row.driver,
                position: row.position,
                probability: row.probability,
            })
            .collect())
    }
}

/// Reads the drop file an external odds scraper keeps current.
#[derive(Debug)]
pub struct CsvOdds {
    path: PathBuf,
}

impl CsvOdds {
    pub fn new(path: PathBuf) -> CsvOdds {
        CsvOdds { path }
    }
}

#[derive(Debug, Deserialize)]
struct OddsRow {
    #[serde(alias = "Driver")]
    driver: String,
    #[serde(alias = "Odds")]
    odds: f64,
    #[serde(default, alias = "Bookmaker")]
    bookmaker: Option<String>,
}

impl OddsProvider for CsvOdds {
    fn fetch(&self, race: &Race) -> Result<Vec<OddsQuote>, ProviderError> {
        let rows: Vec<OddsRow> = read_csv(&self.path)?;
        debug!(race = %race.id, rows = rows.len(), path = %self.path.display(), "read odds");
        Ok(rows
            .into_iter()
            .map(|row| OddsQuote {
                driver: row.driver,
                odds: row.odds,
                bookmaker: row.bookmaker.unwrap_or_else(|| "unknown".to_string()),
                timestamp: None,
            })
            .collect())
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Outright winner prices from the-odds-api.
#[derive(Debug)]
pub struct OddsApi {
    url: String,
    key: Option<String>,
    regions: String,
    client: reqwest::blocking::Client,
}

// events further than this from the scheduled start belong to another race
const EVENT_MATCH_HOURS: i64 = 48;

#[derive(Debug, Deserialize)]
struct ApiEvent {
    commence_time: DateTime<Utc>,
    #[serde(default)]
    bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
struct ApiBookmaker {
    title: String,
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
struct ApiMarket {
    #[serde(default)]
    outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
struct ApiOutcome {
    name: String,
    price: f64,
}

impl OddsApi {
    pub fn new(
        url: &str,
        key: Option<String>,
        regions: &str,
        timeout: Duration,
    ) -> Result<OddsApi, ProviderError> {
        Ok(OddsApi {
            url: url.to_string(),
            key,
            regions: regions.to_string(),
            client: http_client(timeout)?,
        })
    }
}

fn quotes_for(race: &Race, events: Vec<ApiEvent>) -> Result<Vec<OddsQuote>, ProviderError> {
    let event = events
        .into_iter()
        .filter(|e| (e.commence_time - race.start_time).num_hours().abs() <= EVENT_MATCH_HOURS)
        .min_by_key(|e| (e.commence_time - race.start_time).num_seconds().abs())
        .ok_or_else(|| ProviderError::Unavailable(format!("no market listed for {}", race.name)))?;
    let mut quotes = Vec::new();
    for bookmaker in event.bookmakers {
        for market in bookmaker.markets {
            for outcome in market.outcomes {
                quotes.push(OddsQuote {
                    driver: outcome.name,
                    odds: outcome.price,
                    bookmaker: bookmaker.title.clone(),
                    timestamp: bookmaker.last_update,
                });
            }
        }
    }
    Ok(quotes)
}

impl OddsProvider for OddsApi {
    fn fetch(&self, race: &Race) -> Result<Vec<OddsQuote>, ProviderError> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("odds_api_key is not set".to_string()))?;
        let events: Vec<ApiEvent> = self
            .client
            .get(&self.url)
            .query(&[
                ("apiKey", key),
                ("regions", self.regions.as_str()),
                ("markets", "outrights"),
                ("oddsFormat", "decimal"),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        let quotes = quotes_for(race, events)?;
        info!(race = %race.id, quotes = quotes.len(), "fetched odds");
        Ok(quotes)
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "pitwall::notify", "{}", message);
    }
}

#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<WebhookNotifier, ProviderError> {
        Ok(WebhookNotifier {
            url: url.to_string(),
            client: http_client(timeout)?,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) {
        let payload = serde_json::json!({
            "text": format!("pitwall: {}", message),
            "timestamp": Utc::now().to_rfc3339(),
        });
        let sent = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status);
        match sent {
            Ok(_) => debug!(url = %self.url, "sent notification"),
            Err(err) => warn!(url = %self.url, error = %err, "unable to send notification"),
        }
    }
}

/// The external systems a monitor talks to, chosen from configuration.
pub struct Collaborators {
    pub schedule: Box<dyn ScheduleProvider>,
    pub odds: Box<dyn OddsProvider>,
    pub predictions: Box<dyn PredictionsProvider>,
    pub notifiers: Vec<Box<dyn Notifier>>,
}

impl Collaborators {
    pub fn from_config(config: &Config) -> Result<Collaborators> {
        let providers = &config.providers;
        let paths = config.paths();
        let timeout = Duration::from_secs(providers.timeout_secs);

        let schedule: Box<dyn ScheduleProvider> = match providers.schedule {
            ScheduleSource::Ergast => Box::new(ErgastSchedule::new(&providers.ergast_url, timeout)?),
            ScheduleSource::Builtin => Box::new(BuiltinSchedule),
        };
        let odds: Box<dyn OddsProvider> = match providers.odds {
            OddsSource::Csv => Box::new(CsvOdds::new(paths.odds_csv)),
            OddsSource::OddsApi => Box::new(OddsApi::new(
                &providers.odds_api_url,
                providers.odds_api_key.clone(),
                &providers.odds_api_regions,
                timeout,
            )?),
        };
        let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
        if config.notify.enabled {
            notifiers.push(Box::new(LogNotifier));
            if let Some(url) = &config.notify.webhook {
                notifiers.push(Box::new(WebhookNotifier::new(url, timeout)?));
            }
        }
        Ok(Collaborators {
            schedule,
            odds,
            predictions: Box::new(CsvPredictions::new(paths.predictions_csv)),
            notifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        quotes_for, ApiEvent, CsvOdds, CsvPredictions, Notifier, OddsProvider,
        PredictionsProvider, ProviderError, WebhookNotifier,
    };
    use crate::race::tests::race;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn bahrain() -> crate::race::Race {
        race(4, "Bahrain Grand Prix", "Bahrain", "Sakhir", Utc.ymd(2025, 4, 13).and_hms(15, 0, 0))
    }

    #[test]
    fn test_csv_odds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odds_latest.csv");
        std::fs::write(&path, "driver,odds,bookmaker\nVER,2.5,Stake\nNOR, 4.0 ,Bet365\nLEC,6.0,\n").unwrap();
        let quotes = CsvOdds::new(path).fetch(&bahrain()).unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[1].driver, "NOR");
        assert!((quotes[1].odds - 4.0).abs() < f64::EPSILON);
        assert_eq!(quotes[2].bookmaker, "unknown");
    }

    #[test]
    fn test_csv_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CsvOdds::new(dir.path().join("nope.csv")).fetch(&bahrain());
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn test_csv_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("next_race_predictions.csv");
        std::fs::write(
            &path,
            "Driver,Predicted_Position,Top3_Probability\nVER,1,0.71\nHAM,,0.2\n",
        )
        .unwrap();
        let predictions = CsvPredictions::new(path).generate(&bahrain()).unwrap();
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].position, Some(1));
        assert_eq!(predictions[1].position, None);
        assert!((predictions[1].probability - 0.2).abs() < f64::EPSILON);

        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "driver,position,probability\nVER,1,high\n").unwrap();
        assert!(matches!(
            CsvPredictions::new(bad).generate(&bahrain()),
            Err(ProviderError::Csv { .. })
        ));
    }

    #[test]
    fn test_odds_api_picks_matching_event() {
        let body = r#"[
            {"id": "a", "sport_key": "motorsport_formula_one", "commence_time": "2025-04-06T05:00:00Z",
             "bookmakers": [{"key": "x", "title": "Early", "markets": [{"key": "outrights",
                "outcomes": [{"name": "Max Verstappen", "price": 3.0}]}]}]},
            {"id": "b", "sport_key": "motorsport_formula_one", "commence_time": "2025-04-13T15:00:00Z",
             "bookmakers": [
                {"key": "p", "title": "Pinnacle", "last_update": "2025-04-12T10:00:00Z",
                 "markets": [{"key": "outrights", "outcomes": [
                    {"name": "Oscar Piastri", "price": 3.2}, {"name": "Lando Norris", "price": 3.6}]}]},
                {"key": "u", "title": "Unibet", "markets": [{"key": "outrights", "outcomes": [
                    {"name": "Oscar Piastri", "price": 3.4}]}]}
             ]}
        ]"#;
        let events: Vec<ApiEvent> = serde_json::from_str(body).unwrap();
        let quotes = quotes_for(&bahrain(), events).unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].bookmaker, "Pinnacle");
        assert_eq!(quotes[0].timestamp, Some(Utc.ymd(2025, 4, 12).and_hms(10, 0, 0)));
        assert_eq!(quotes[2].bookmaker, "Unibet");

        let events: Vec<ApiEvent> = serde_json::from_str(
            r#"[{"commence_time": "2025-06-01T13:00:00Z", "bookmakers": []}]"#,
        )
        .unwrap();
        assert!(matches!(
            quotes_for(&bahrain(), events),
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_webhook_failure_is_swallowed() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(200)).unwrap();
        notifier.notify("race processed");
    }
}
