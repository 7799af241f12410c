use crate::config::TimingConfig;
use crate::util::hours_between;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DueActions {
    pub fetch_odds: bool,
    pub generate_predictions: bool,
    pub process_results: bool,
}

impl DueActions {
    pub fn any(self) -> bool {
        self.fetch_odds || self.generate_predictions || self.process_results
    }
}

/// Maps (race start, now) onto the actions that are due. Stateless; the actions themselves are
/// expected to tolerate being triggered more than once inside a window.
#[derive(Debug, Clone)]
pub struct ClockPolicy {
    pub odds_offsets: Vec<f64>,
    pub prediction_offset: f64,
    pub result_window: f64,
    pub tolerance: f64,
}

impl ClockPolicy {
    pub fn from_config(config: &TimingConfig) -> ClockPolicy {
        ClockPolicy {
            odds_offsets: config.odds_fetch_hours_before_race.clone(),
            prediction_offset: config.prediction_hours_before_race,
            result_window: config.result_window_hours,
            tolerance: config.tolerance_hours,
        }
    }

    // [offset - tolerance, offset + tolerance) hours before the start
    fn near(&self, hours_until: f64, offset: f64) -> bool {
        let delta = hours_until - offset;
        -self.tolerance <= delta && delta < self.tolerance
    }

    pub fn odds_due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let hours_until = hours_between(now, start);
        self.odds_offsets.iter().any(|&o| self.near(hours_until, o))
    }

    pub fn predictions_due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.near(hours_between(now, start), self.prediction_offset)
    }

    pub fn results_due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let hours_since = hours_between(start, now);
        (0.0..=self.result_window).contains(&hours_since)
    }

    pub fn due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> DueActions {
        DueActions {
            fetch_odds: self.odds_due(start, now),
            generate_predictions: self.predictions_due(start, now),
            process_results: self.results_due(start, now),
        }
    }
}

/// Cycle cadence: a fine poll interval layered over a coarse check interval. The loop sleeps until
/// whichever tick comes first.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub poll: Duration,
    pub check: Duration,
}

impl Cadence {
    pub fn from_config(config: &TimingConfig) -> Cadence {
        Cadence {
            poll: Duration::minutes(i64::from(config.poll_interval_minutes)),
            check: Duration::hours(i64::from(config.check_interval_hours)),
        }
    }

    pub fn next_after(&self, started: DateTime<Utc>, last: DateTime<Utc>) -> DateTime<Utc> {
        [self.poll, self.check]
            .iter()
            .filter(|interval| **interval > Duration::zero())
            .map(|interval| next_tick(started, last, *interval))
            .min()
            .unwrap_or(last + Duration::minutes(30))
    }
}

fn next_tick(started: DateTime<Utc>, last: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let elapsed = (last - started).num_seconds().max(0);
    let step = interval.num_seconds();
    started + Duration::seconds((elapsed / step + 1) * step)
}
