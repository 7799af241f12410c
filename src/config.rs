use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/pitwall.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub watch: WatchConfig,
    pub timing: TimingConfig,
    pub betting: BettingConfig,
    pub providers: ProviderConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Relative paths are resolved against `data_dir`.
    pub directory: PathBuf,
    pub archive_directory: PathBuf,
    pub file_patterns: Vec<String>,
    pub min_file_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub odds_fetch_hours_before_race: Vec<f64>,
    pub prediction_hours_before_race: f64,
    pub result_window_hours: f64,
    pub tolerance_hours: f64,
    pub check_interval_hours: u32,
    pub poll_interval_minutes: u32,
    pub schedule_max_age_hours: f64,
    pub freshness_hours: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BettingConfig {
    pub bet_amount: f64,
    pub starting_capital: f64,
    pub success_threshold: u32,
    pub min_expected_value: f64,
    pub max_bets_per_race: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSource {
    Ergast,
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsSource {
    Csv,
    OddsApi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Defaults to the current year.
    pub season: Option<i32>,
    pub schedule: ScheduleSource,
    pub ergast_url: String,
    pub odds: OddsSource,
    pub odds_csv: PathBuf,
    pub odds_api_url: String,
    pub odds_api_key: Option<String>,
    pub odds_api_regions: String,
    pub predictions_csv: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub webhook: Option<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            data_dir: PathBuf::from("data"),
            watch: WatchConfig::default(),
            timing: TimingConfig::default(),
            betting: BettingConfig::default(),
            providers: ProviderConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> WatchConfig {
        WatchConfig {
            directory: PathBuf::from("incoming_results"),
            archive_directory: PathBuf::from("archive"),
            file_patterns: vec![
                "*results*.csv".to_string(),
                "*race_results*.csv".to_string(),
                "*actual*.csv".to_string(),
            ],
            min_file_age_secs: 30,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> TimingConfig {
        TimingConfig {
            odds_fetch_hours_before_race: vec![72.0, 48.0, 24.0, 12.0, 6.0, 2.0],
            prediction_hours_before_race: 24.0,
            result_window_hours: 4.0,
            tolerance_hours: 1.0,
            check_interval_hours: 6,
            poll_interval_minutes: 30,
            schedule_max_age_hours: 24.0,
            freshness_hours: 48.0,
        }
    }
}

impl Default for BettingConfig {
    fn default() -> BettingConfig {
        BettingConfig {
            bet_amount: 10.0,
            starting_capital: 1000.0,
            success_threshold: 3,
            min_expected_value: 0.05,
            max_bets_per_race: 8,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> ProviderConfig {
        ProviderConfig {
            season: None,
            schedule: ScheduleSource::Ergast,
            ergast_url: "https://api.jolpi.ca/ergast/f1".to_string(),
            odds: OddsSource::Csv,
            odds_csv: PathBuf::from("incoming_odds/odds_latest.csv"),
            odds_api_url: "https://api.the-odds-api.com/v4/sports/motorsport_formula_one/odds/"
                .to_string(),
            odds_api_key: None,
            odds_api_regions: "eu".to_string(),
            predictions_csv: PathBuf::from("model/next_race_predictions.csv"),
            timeout_secs: 20,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> NotifyConfig {
        NotifyConfig {
            enabled: true,
            webhook: None,
        }
    }
}

/// Where every piece of persisted state lives, all resolved against `data_dir`.
#[derive(Debug, Clone)]
pub struct Paths {
    pub schedule: PathBuf,
    pub odds: PathBuf,
    pub predictions: PathBuf,
    pub recommendations: PathBuf,
    pub recommendations_marker: PathBuf,
    pub ledger: PathBuf,
    pub capital_curve: PathBuf,
    pub registry: PathBuf,
    pub watch: PathBuf,
    pub archive: PathBuf,
    pub odds_csv: PathBuf,
    pub predictions_csv: PathBuf,
}

impl Config {
    /// Layers the optional TOML file and `PITWALL_`-prefixed environment variables (`__` separates
    /// nesting, e.g. `PITWALL_BETTING__BET_AMOUNT=5`) over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PITWALL_").split("__"))
            .extract()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// An explicit directory wins. Otherwise a relative `data_dir` that does not exist yet moves
    /// to the user data directory.
    pub fn resolve_data_dir(&mut self, explicit: Option<PathBuf>) {
        if let Some(dir) = explicit {
            self.data_dir = dir;
        } else if self.data_dir.is_relative() && !self.data_dir.exists() {
            if let Some(user) = dirs::data_dir() {
                self.data_dir = user.join(env!("CARGO_PKG_NAME"));
            }
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn paths(&self) -> Paths {
        let live = self.data_dir.join("live");
        let processed = self.data_dir.join("processed");
        Paths {
            schedule: live.join("race_schedule.json"),
            odds: live.join("current_odds.json"),
            predictions: live.join("next_race_predictions.json"),
            recommendations: live.join("betting_recommendations.csv"),
            recommendations_marker: live.join("recommendations_generated.json"),
            ledger: processed.join("bet_simulation_log.csv"),
            capital_curve: processed.join("capital_curve.csv"),
            registry: processed.join("processed_races.json"),
            watch: self.resolve(&self.watch.directory),
            archive: self.resolve(&self.watch.archive_directory),
            odds_csv: self.resolve(&self.providers.odds_csv),
            predictions_csv: self.resolve(&self.providers.predictions_csv),
        }
    }
}

/// `config/pitwall.toml` in the working directory if present, else the user config dir.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_PATH);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("pitwall.toml"))
        .unwrap_or(local)
}

#[cfg(test)]
mod tests {
    use super::{Config, OddsSource, ScheduleSource};
    use assert_approx_eq::assert_approx_eq;
    use std::path::PathBuf;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timing.odds_fetch_hours_before_race.len(), 6);
        assert_eq!(config.betting.success_threshold, 3);
        assert_eq!(config.betting.max_bets_per_race, 8);
        assert_approx_eq!(config.timing.freshness_hours, 48.0);
        assert_eq!(config.providers.schedule, ScheduleSource::Ergast);
    }

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pitwall.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/srv/pitwall"

[betting]
bet_amount = 25.0
max_bets_per_race = 3

[watch]
directory = "/tmp/incoming"

[providers]
odds = "odds_api"
schedule = "builtin"
"#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_approx_eq!(config.betting.bet_amount, 25.0);
        assert_eq!(config.betting.max_bets_per_race, 3);
        assert_approx_eq!(config.betting.starting_capital, 1000.0);
        assert_eq!(config.providers.odds, OddsSource::OddsApi);
        assert_eq!(config.providers.schedule, ScheduleSource::Builtin);

        let paths = config.paths();
        assert_eq!(paths.watch, PathBuf::from("/tmp/incoming"));
        assert_eq!(paths.archive, PathBuf::from("/srv/pitwall/archive"));
        assert_eq!(
            paths.ledger,
            PathBuf::from("/srv/pitwall/processed/bet_simulation_log.csv")
        );
    }

    #[test]
    fn test_resolve_data_dir() {
        let mut config = Config::default();
        config.resolve_data_dir(Some(PathBuf::from("/var/lib/pitwall")));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/pitwall"));

        let dir = tempfile::tempdir().unwrap();
        config.data_dir = dir.path().to_path_buf();
        config.resolve_data_dir(None);
        assert_eq!(config.data_dir, dir.path());
    }
}
