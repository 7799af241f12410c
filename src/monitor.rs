use crate::config::{Config, Paths};
use crate::providers::Collaborators;
use crate::race::Race;
use crate::reconcile::{RaceOutcomeReconciler, ScanReport};
use crate::recommend::{
    self, load_recommendations, replace_recommendations, GenerationMarker, OddsQuote, Prediction,
    Snapshot,
};
use crate::schedule::ScheduleStore;
use crate::time::{Cadence, ClockPolicy, DueActions};
use crate::util::{hours, hours_between};
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CycleAction {
    FetchedOdds,
    GeneratedPredictions,
    UpdatedRecommendations,
    ProcessedResults(usize),
    SettledRace {
        race: String,
        bets: usize,
        profit: f64,
    },
    RefreshedSchedule,
}

impl fmt::Display for CycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleAction::FetchedOdds => write!(f, "fetched odds"),
            CycleAction::GeneratedPredictions => write!(f, "generated predictions"),
            CycleAction::UpdatedRecommendations => write!(f, "updated betting recommendations"),
            CycleAction::ProcessedResults(n) => write!(f, "processed {} result file(s)", n),
            CycleAction::SettledRace { race, bets, profit } => {
                write!(f, "settled {} bet(s) on {} ({:+.2})", bets, race, profit)
            }
            CycleAction::RefreshedSchedule => write!(f, "updated race schedule"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub race: Option<String>,
    pub due: DueActions,
    pub actions: Vec<CycleAction>,
    pub failures: Vec<String>,
}

impl CycleReport {
    fn new(at: DateTime<Utc>) -> CycleReport {
        CycleReport {
            at,
            race: None,
            due: DueActions::default(),
            actions: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn record_scan(&mut self, scan: &ScanReport) {
        if !scan.processed.is_empty() {
            self.actions.push(CycleAction::ProcessedResults(scan.processed.len()));
        }
        for processed in scan.processed.iter().filter(|p| p.settled > 0) {
            self.actions.push(CycleAction::SettledRace {
                race: processed.race.clone(),
                bets: processed.settled,
                profit: processed.race_profit,
            });
        }
        for (file, err) in &scan.failed {
            self.failures.push(format!("{}: {}", file, err));
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.actions.is_empty() && self.failures.is_empty()
    }

    fn fail(&mut self, what: &str, err: &anyhow::Error) {
        warn!("{} failed: {:#}", what, err);
        self.failures.push(format!("{}: {:#}", what, err));
    }

    pub fn message(&self) -> String {
        let mut message = String::new();
        if !self.actions.is_empty() {
            let actions: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
            message.push_str(&format!("Completed: {}", actions.join(", ")));
            if let Some(race) = &self.race {
                message.push_str(&format!(" for {}", race));
            }
        }
        if !self.failures.is_empty() {
            if !message.is_empty() {
                message.push_str("; ");
            }
            message.push_str(&format!("Failed: {}", self.failures.join("; ")));
        }
        message
    }
}

/// Drives the whole pipeline from the clock: one cycle looks at the schedule, decides what is due,
/// and runs it. Nothing is carried between cycles except what is persisted on disk.
pub struct MonitoringOrchestrator {
    config: Config,
    paths: Paths,
    policy: ClockPolicy,
    cadence: Cadence,
    schedule: ScheduleStore,
    reconciler: RaceOutcomeReconciler,
    collaborators: Collaborators,
}

impl MonitoringOrchestrator {
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        now: DateTime<Utc>,
    ) -> Result<MonitoringOrchestrator> {
        let paths = config.paths();
        let season = season_at(&config, now);
        Ok(MonitoringOrchestrator {
            policy: ClockPolicy::from_config(&config.timing),
            cadence: Cadence::from_config(&config.timing),
            schedule: ScheduleStore::load(&paths.schedule, season),
            reconciler: RaceOutcomeReconciler::from_config(&config)?,
            collaborators,
            paths,
            config,
        })
    }

    pub fn schedule(&self) -> &ScheduleStore {
        &self.schedule
    }

    pub fn reconciler(&self) -> &RaceOutcomeReconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut RaceOutcomeReconciler {
        &mut self.reconciler
    }

    /// Creates the data, watch and archive directories and loads the season's schedule.
    pub fn setup(&mut self, now: DateTime<Utc>) -> Result<usize> {
        for dir in &[
            self.config.data_dir.join("live"),
            self.config.data_dir.join("processed"),
            self.paths.watch.clone(),
            self.paths.archive.clone(),
        ] {
            fs::create_dir_all(dir).with_context(|| format!("unable to create {}", dir.display()))?;
        }
        self.refresh_schedule(now)
    }

    pub fn refresh_schedule(&mut self, now: DateTime<Utc>) -> Result<usize> {
        self.schedule.refresh(self.collaborators.schedule.as_ref(), now)
    }

    /// One reconciliation pass over the watch directory, regardless of the clock. Settled races
    /// and failures are sent to the notifiers.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> Result<ScanReport> {
        let scan = self.reconciler.run_single_check(self.schedule.races(), now)?;
        let mut report = CycleReport::new(now);
        report.record_scan(&scan);
        if !report.is_quiet() {
            self.notify(&report.message());
        }
        Ok(scan)
    }

    /// What is due at `now`: odds and predictions for the next race, results for the race that
    /// started most recently.
    pub fn due_actions(&self, now: DateTime<Utc>) -> DueActions {
        let mut due = self
            .schedule
            .next_race(now)
            .map(|race| self.policy.due(race.start_time, now))
            .unwrap_or_default();
        due.process_results = self
            .schedule
            .last_started(now)
            .map_or(false, |race| self.policy.results_due(race.start_time, now));
        due
    }

    /// Reloads the store for the new season once the calendar year moves on, unless a season is
    /// configured. The next staleness check refreshes it.
    fn roll_season(&mut self, now: DateTime<Utc>) {
        let season = season_at(&self.config, now);
        if season != self.schedule.season() {
            info!(from = self.schedule.season(), to = season, "season changed");
            self.schedule = ScheduleStore::load(&self.paths.schedule, season);
        }
    }

    fn notify(&self, message: &str) {
        for notifier in &self.collaborators.notifiers {
            notifier.notify(message);
        }
    }

    #[instrument(name = "MonitoringOrchestrator::run_cycle", skip(self))]
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::new(now);
        self.roll_season(now);
        if self
            .schedule
            .is_stale(now, self.config.timing.schedule_max_age_hours)
        {
            match self.refresh_schedule(now) {
                Ok(_) => report.actions.push(CycleAction::RefreshedSchedule),
                Err(err) => report.fail("schedule refresh", &err),
            }
        }

        let next = self.schedule.next_race(now).cloned();
        if let Some(race) = &next {
            info!(race = %race.name, start = %race.start_time, "next race");
            report.race = Some(race.name.clone());
        } else {
            info!("no upcoming race on the schedule");
        }
        report.due = self.due_actions(now);
        if !report.due.any() {
            debug!("nothing is due");
        }

        if let Some(race) = &next {
            if report.due.fetch_odds {
                match self.fetch_odds(race, now) {
                    Ok(()) => report.actions.push(CycleAction::FetchedOdds),
                    Err(err) => report.fail("odds fetch", &err),
                }
            }
            if report.due.generate_predictions {
                match self.generate_predictions(race, now) {
                    Ok(()) => report.actions.push(CycleAction::GeneratedPredictions),
                    Err(err) => report.fail("predictions", &err),
                }
            }
            match self.update_recommendations(race, now) {
                Ok(true) => report.actions.push(CycleAction::UpdatedRecommendations),
                Ok(false) => {}
                Err(err) => report.fail("recommendations", &err),
            }
        }

        if report.due.process_results {
            match self
                .reconciler
                .run_single_check(self.schedule.races(), now)
            {
                Ok(scan) => report.record_scan(&scan),
                Err(err) => report.fail("results check", &err),
            }
        }

        if report.is_quiet() {
            info!("no actions needed this cycle");
        } else {
            let message = report.message();
            info!("{}", message);
            self.notify(&message);
        }
        report
    }

    fn fetch_odds(&self, race: &Race, now: DateTime<Utc>) -> Result<()> {
        let quotes = self.collaborators.odds.fetch(race)?;
        if quotes.is_empty() {
            anyhow::bail!("no odds listed for {}", race.name);
        }
        Snapshot::new(race, now, quotes).save(&self.paths.odds)
    }

    fn generate_predictions(&self, race: &Race, now: DateTime<Utc>) -> Result<()> {
        let predictions = self.collaborators.predictions.generate(race)?;
        if predictions.is_empty() {
            anyhow::bail!("no predictions for {}", race.name);
        }
        Snapshot::new(race, now, predictions).save(&self.paths.predictions)
    }

    /// Regenerates the race's recommendations when both snapshots are fresh for it and at least
    /// one is newer than the last generation. `Ok(true)` only when rows were produced.
    fn update_recommendations(&self, race: &Race, now: DateTime<Utc>) -> Result<bool> {
        let fresh = self.config.timing.freshness_hours;
        let odds = match Snapshot::<OddsQuote>::load(&self.paths.odds)? {
            Some(odds) if odds.is_fresh_for(race.id, now, fresh) => odds,
            _ => return Ok(false),
        };
        let predictions = match Snapshot::<Prediction>::load(&self.paths.predictions)? {
            Some(predictions) if predictions.is_fresh_for(race.id, now, fresh) => predictions,
            _ => return Ok(false),
        };
        let marker = GenerationMarker::load_for(&self.paths.recommendations_marker, race.id)?;
        let generated_at = match marker {
            Some(marker) => Some(marker.generated_at),
            None => load_recommendations(&self.paths.recommendations)?
                .iter()
                .filter(|row| row.race_id() == race.id)
                .map(|row| row.created_at)
                .max(),
        };
        let inputs_at = odds.fetched_at.max(predictions.fetched_at);
        if generated_at.map_or(false, |at| at >= inputs_at) {
            debug!(race = %race.id, "recommendations are up to date");
            return Ok(false);
        }
        let generated = recommend::generate(
            race,
            &predictions.rows,
            &odds.rows,
            &self.config.betting,
            now,
        );
        replace_recommendations(&self.paths.recommendations, race.id, &generated.rows)?;
        GenerationMarker {
            race: race.id,
            generated_at: now,
            rows: generated.rows.len(),
        }
        .save(&self.paths.recommendations_marker)?;
        if generated.rows.is_empty() {
            warn!(race = %race.id, "no driver appears in both the odds and the predictions");
        }
        Ok(!generated.rows.is_empty())
    }

    /// Runs cycles until `stop` is set. The flag is looked at between cycles only.
    pub fn run(&mut self, stop: &AtomicBool) {
        let started = Utc::now();
        info!(
            poll_minutes = self.cadence.poll.num_minutes(),
            check_hours = self.cadence.check.num_hours(),
            "monitoring started"
        );
        loop {
            let now = Utc::now();
            self.run_cycle(now);
            let next = self.cadence.next_after(started, now);
            debug!(next = %next, "waiting for the next cycle");
            while !stop.load(Ordering::SeqCst) && Utc::now() < next {
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
            if stop.load(Ordering::SeqCst) {
                info!("monitoring stopped");
                return;
            }
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> Value {
        let next = self.schedule.next_race(now);
        let files = [
            ("schedule", &self.paths.schedule),
            ("odds", &self.paths.odds),
            ("predictions", &self.paths.predictions),
            ("recommendations", &self.paths.recommendations),
            ("recommendations_marker", &self.paths.recommendations_marker),
            ("ledger", &self.paths.ledger),
            ("capital_curve", &self.paths.capital_curve),
            ("registry", &self.paths.registry),
        ]
        .iter()
        .map(|(name, path)| ((*name).to_string(), file_status(path, now)))
        .collect::<serde_json::Map<String, Value>>();

        json!({
            "now": now,
            "season": self.schedule.season(),
            "next_race": next.map(|race| json!({
                "id": race.id.to_string(),
                "name": race.name,
                "start_time": race.start_time,
                "hours_until": hours_between(now, race.start_time),
            })),
            "due": self.due_actions(now),
            "schedule": {
                "races": self.schedule.races().len(),
                "fetched_at": self.schedule.fetched_at(),
                "stale": self.schedule.is_stale(now, self.config.timing.schedule_max_age_hours),
            },
            "processed_files": self.reconciler.registry().len(),
            "ledger": self.reconciler.ledger().summary(),
            "capital_curve": self
                .reconciler
                .ledger()
                .cumulative_capital()
                .into_iter()
                .map(|(id, capital)| json!({ "race": id.to_string(), "capital": capital }))
                .collect::<Vec<Value>>(),
            "files": files,
        })
    }
}

/// The configured season, or the calendar year of `now`.
fn season_at(config: &Config, now: DateTime<Utc>) -> i32 {
    config.providers.season.unwrap_or_else(|| now.year())
}

fn file_status(path: &Path, now: DateTime<Utc>) -> Value {
    match fs::metadata(path) {
        Ok(meta) => {
            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::from(now).duration_since(m).ok())
                .and_then(|age| chrono::Duration::from_std(age).ok())
                .map(hours);
            json!({ "exists": true, "size": meta.len(), "age_hours": age })
        }
        Err(_) => json!({ "exists": false }),
    }
}

#[cfg(test)]
mod tests {
    use super::{CycleAction, MonitoringOrchestrator};
    use crate::config::Config;
    use crate::providers::{Collaborators, Notifier, OddsProvider, PredictionsProvider, ProviderError};
    use crate::race::tests::{race, season};
    use crate::race::Race;
    use crate::recommend::{load_recommendations, BetFlag, OddsQuote, Prediction};
    use crate::schedule::tests::FixedSchedule;
    use crate::schedule::ScheduleProvider;
    use assert_approx_eq::assert_approx_eq;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    struct StaticOdds {
        quotes: Vec<OddsQuote>,
        fail: bool,
    }

    impl OddsProvider for StaticOdds {
        fn fetch(&self, _race: &Race) -> Result<Vec<OddsQuote>, ProviderError> {
            if self.fail {
                return Err(ProviderError::Unavailable("odds feed down".to_string()));
            }
            Ok(self.quotes.clone())
        }
    }

    fn quote(driver: &str, odds: f64) -> OddsQuote {
        OddsQuote {
            driver: driver.to_string(),
            odds,
            bookmaker: "Stake".to_string(),
            timestamp: None,
        }
    }

    struct StaticPredictions;

    impl PredictionsProvider for StaticPredictions {
        fn generate(&self, _race: &Race) -> Result<Vec<Prediction>, ProviderError> {
            Ok(vec![
                Prediction {
                    driver: "VER".to_string(),
                    position: Some(1),
                    probability: 0.6,
                },
                Prediction {
                    driver: "HAM".to_string(),
                    position: Some(6),
                    probability: 0.1,
                },
            ])
        }
    }

    /// One race per season, so a year change is visible in what the store holds.
    struct SeasonalSchedule;

    impl ScheduleProvider for SeasonalSchedule {
        fn events(&self, season: i32) -> Result<Vec<Race>, ProviderError> {
            let (name, start) = match season {
                2025 => ("Abu Dhabi Grand Prix", Utc.ymd(2025, 12, 7).and_hms(13, 0, 0)),
                2026 => ("Australian Grand Prix", Utc.ymd(2026, 3, 8).and_hms(4, 0, 0)),
                _ => return Err(ProviderError::Unavailable(format!("no {} season", season))),
            };
            let mut race = race(1, name, "X", "X", start);
            race.id.season = season;
            Ok(vec![race])
        }
    }

    #[derive(Default, Clone)]
    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl Notifier for Recorder {
        fn notify(&self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    fn bahrain_start() -> DateTime<Utc> {
        Utc.ymd(2025, 4, 13).and_hms(15, 0, 0)
    }

    fn build(
        season: Option<i32>,
        schedule: Box<dyn ScheduleProvider>,
        odds: StaticOdds,
        now: DateTime<Utc>,
    ) -> (TempDir, MonitoringOrchestrator, Recorder) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.watch.min_file_age_secs = 0;
        config.providers.season = season;
        let recorder = Recorder::default();
        let collaborators = Collaborators {
            schedule,
            odds: Box::new(odds),
            predictions: Box::new(StaticPredictions),
            notifiers: vec![Box::new(recorder.clone())],
        };
        let mut orchestrator = MonitoringOrchestrator::new(config, collaborators, now).unwrap();
        orchestrator.setup(now).unwrap();
        (dir, orchestrator, recorder)
    }

    fn orchestrator(odds_fail: bool) -> (TempDir, MonitoringOrchestrator, Recorder) {
        let odds = StaticOdds {
            quotes: vec![quote("VER", 2.5), quote("HAM", 3.0)],
            fail: odds_fail,
        };
        build(
            Some(2025),
            Box::new(FixedSchedule::new(season())),
            odds,
            bahrain_start() - Duration::hours(24),
        )
    }

    fn drop_bahrain_results(orchestrator: &MonitoringOrchestrator, body: &str) {
        std::fs::write(orchestrator.paths.watch.join("bahrain_results.csv"), body).unwrap();
    }

    #[test]
    fn test_cycle_before_race() {
        let (_dir, mut orchestrator, recorder) = orchestrator(false);
        let now = bahrain_start() - Duration::hours(24);
        let report = orchestrator.run_cycle(now);
        assert_eq!(report.race.as_deref(), Some("Bahrain Grand Prix"));
        assert_eq!(
            report.actions,
            vec![
                CycleAction::FetchedOdds,
                CycleAction::GeneratedPredictions,
                CycleAction::UpdatedRecommendations
            ]
        );
        assert_eq!(recorder.0.borrow().len(), 1);
        assert!(recorder.0.borrow()[0].contains("for Bahrain Grand Prix"));

        let rows = load_recommendations(&orchestrator.paths.recommendations).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].driver, "VER");
        assert_eq!(rows[0].recommendation, BetFlag::Bet);
        assert_eq!(rows[1].recommendation, BetFlag::Skip);

        // nothing due and nothing new four hours later
        let report = orchestrator.run_cycle(now + Duration::hours(4));
        assert!(report.is_quiet());
        assert_eq!(recorder.0.borrow().len(), 1);
    }

    #[test]
    fn test_no_common_drivers_stays_quiet() {
        let odds = StaticOdds {
            quotes: vec![quote("Max Verstappen", 2.5)],
            fail: false,
        };
        let now = bahrain_start() - Duration::hours(24);
        let (_dir, mut orchestrator, recorder) =
            build(Some(2025), Box::new(FixedSchedule::new(season())), odds, now);

        let report = orchestrator.run_cycle(now);
        assert_eq!(
            report.actions,
            vec![CycleAction::FetchedOdds, CycleAction::GeneratedPredictions]
        );
        assert!(load_recommendations(&orchestrator.paths.recommendations)
            .unwrap()
            .is_empty());

        assert!(orchestrator.run_cycle(bahrain_start() - Duration::hours(20)).is_quiet());
        assert!(orchestrator.run_cycle(bahrain_start() - Duration::hours(19)).is_quiet());
        assert_eq!(recorder.0.borrow().len(), 1);
    }

    #[test]
    fn test_provider_failure_is_soft() {
        let (_dir, mut orchestrator, recorder) = orchestrator(true);
        let report = orchestrator.run_cycle(bahrain_start() - Duration::hours(24));
        assert_eq!(report.actions, vec![CycleAction::GeneratedPredictions]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("odds feed down"));
        assert_eq!(recorder.0.borrow().len(), 1);
        assert!(recorder.0.borrow()[0].contains("Failed: odds fetch"));
    }

    #[test]
    fn test_cycle_processes_results_after_start() {
        let (_dir, mut orchestrator, recorder) = orchestrator(false);
        orchestrator.run_cycle(bahrain_start() - Duration::hours(24));
        drop_bahrain_results(&orchestrator, "Driver,Actual_Position\nVER,2\nHAM,1\n");

        let report = orchestrator.run_cycle(bahrain_start() + Duration::hours(2));
        assert_eq!(report.race.as_deref(), Some("Miami Grand Prix"));
        assert!(report.due.process_results);
        assert!(report.actions.contains(&CycleAction::ProcessedResults(1)));
        assert!(report.actions.contains(&CycleAction::RefreshedSchedule));
        assert_eq!(recorder.0.borrow().len(), 2);
        assert!(recorder.0.borrow()[1].contains("settled 1 bet(s) on Bahrain Grand Prix (+15.00)"));

        let ledger = orchestrator.reconciler().ledger();
        assert_eq!(ledger.entries().len(), 1);
        assert_approx_eq!(ledger.summary().total_profit, 15.0);
    }

    #[test]
    fn test_evaluate_notifies() {
        let (_dir, mut orchestrator, recorder) = orchestrator(false);
        orchestrator.run_cycle(bahrain_start() - Duration::hours(24));
        drop_bahrain_results(&orchestrator, "Driver,Actual_Position\nVER,5\n");

        let scan = orchestrator.evaluate(bahrain_start() + Duration::days(2)).unwrap();
        assert_eq!(scan.processed.len(), 1);
        assert_eq!(recorder.0.borrow().len(), 2);
        assert!(recorder.0.borrow()[1].contains("settled 1 bet(s) on Bahrain Grand Prix (-10.00)"));

        // an empty pass sends nothing
        orchestrator.evaluate(bahrain_start() + Duration::days(2)).unwrap();
        assert_eq!(recorder.0.borrow().len(), 2);
    }

    #[test]
    fn test_results_window_closes() {
        let (_dir, mut orchestrator, _recorder) = orchestrator(false);
        drop_bahrain_results(&orchestrator, "Driver,Actual_Position\nVER,2\n");
        let report = orchestrator.run_cycle(bahrain_start() + Duration::hours(5));
        assert!(!report.due.process_results);
        assert!(orchestrator.reconciler().registry().is_empty());
    }

    #[test]
    fn test_season_rollover() {
        let now = Utc.ymd(2025, 12, 1).and_hms(12, 0, 0);
        let odds = StaticOdds {
            quotes: Vec::new(),
            fail: false,
        };
        let (_dir, mut orchestrator, _recorder) = build(None, Box::new(SeasonalSchedule), odds, now);
        assert_eq!(orchestrator.schedule().season(), 2025);
        assert_eq!(
            orchestrator.schedule().next_race(now).map(|r| r.name.as_str()),
            Some("Abu Dhabi Grand Prix")
        );

        let report = orchestrator.run_cycle(Utc.ymd(2026, 3, 1).and_hms(12, 0, 0));
        assert_eq!(orchestrator.schedule().season(), 2026);
        assert!(report.actions.contains(&CycleAction::RefreshedSchedule));
        assert_eq!(report.race.as_deref(), Some("Australian Grand Prix"));
    }

    #[test]
    fn test_status() {
        let (_dir, orchestrator, _recorder) = orchestrator(false);
        let now = bahrain_start() - Duration::hours(24);
        let status = orchestrator.status(now);
        assert_eq!(status["next_race"]["name"], "Bahrain Grand Prix");
        assert_eq!(status["next_race"]["hours_until"], 24.0);
        assert_eq!(status["due"]["fetch_odds"], true);
        assert_eq!(status["due"]["process_results"], false);
        assert_eq!(status["files"]["schedule"]["exists"], true);
        assert_eq!(status["files"]["ledger"]["exists"], false);
        assert_eq!(status["schedule"]["races"], 4);
    }

    #[test]
    fn test_status_inside_results_window() {
        let (_dir, orchestrator, _recorder) = orchestrator(false);
        let status = orchestrator.status(bahrain_start() + Duration::hours(1));
        assert_eq!(status["next_race"]["name"], "Miami Grand Prix");
        assert_eq!(status["due"]["process_results"], true);
        assert_eq!(status["due"]["fetch_odds"], false);
    }

    #[test]
    fn test_run_stops_between_cycles() {
        let (_dir, mut orchestrator, _recorder) = orchestrator(false);
        let stop = AtomicBool::new(true);
        orchestrator.run(&stop);
    }
}
