use crate::config::Config;
use crate::race::{keyword_in, resolve_keyword, resolve_name, Race, RaceId};
use crate::read_dir::{read_dir, Entry};
use crate::registry::ProcessedRaceRegistry;
use crate::results::ResultFile;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::Pattern;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    Keyword,
    Column,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedRace {
    /// `None` when the name could not be tied to a scheduled race.
    pub id: Option<RaceId>,
    pub name: String,
    pub source: NameSource,
}

#[derive(Debug)]
pub struct ResultFileWatcher {
    dir: PathBuf,
    patterns: Vec<Pattern>,
    min_file_age: Duration,
}

impl ResultFileWatcher {
    pub fn new<S: AsRef<str>>(
        dir: PathBuf,
        patterns: &[S],
        min_file_age: Duration,
    ) -> Result<ResultFileWatcher> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::new(p.as_ref()).with_context(|| format!("bad pattern {:?}", p.as_ref())))
            .collect::<Result<Vec<_>>>()?;
        Ok(ResultFileWatcher {
            dir,
            patterns,
            min_file_age,
        })
    }

    pub fn from_config(config: &Config) -> Result<ResultFileWatcher> {
        ResultFileWatcher::new(
            config.paths().watch,
            config.watch.file_patterns.as_slice(),
            Duration::from_secs(config.watch.min_file_age_secs),
        )
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(file_name))
    }

    /// Files that match a pattern, are not yet registered, and are at least `min_file_age` old.
    /// The order of the result carries no meaning.
    pub fn scan(&self, registry: &ProcessedRaceRegistry, now: SystemTime) -> Result<Vec<Entry>> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("unable to create {}", self.dir.display()))?;
            info!(dir = %self.dir.display(), "created watch directory");
            return Ok(Vec::new());
        }
        let entries = read_dir(&self.dir)
            .with_context(|| format!("unable to list {}", self.dir.display()))?;
        let mut candidates = Vec::new();
        for entry in entries {
            if !self.matches(&entry.file_name) {
                continue;
            }
            if registry.contains(&entry.file_name) {
                trace!(file = %entry.file_name, "already processed");
                continue;
            }
            let age = entry.age(now);
            if age < self.min_file_age {
                debug!(file = %entry.file_name, age_secs = age.as_secs(), "too fresh, may still be written");
                continue;
            }
            debug!(file = %entry.file_name, bytes = entry.len, "candidate results file");
            candidates.push(entry);
        }
        Ok(candidates)
    }
}

fn title(keyword: &str) -> String {
    keyword
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Names the race a results file belongs to: a keyword in the file name first, then a race name
/// column holding one distinct value, then a synthetic name stamped with `now`.
pub fn identify_race(
    file_name: &str,
    results: &ResultFile,
    schedule: &[Race],
    now: DateTime<Utc>,
) -> IdentifiedRace {
    if let Some(keyword) = keyword_in(file_name) {
        return match resolve_keyword(schedule, keyword, now) {
            Some(race) => IdentifiedRace {
                id: Some(race.id),
                name: race.name.clone(),
                source: NameSource::Keyword,
            },
            None => IdentifiedRace {
                id: None,
                name: format!("{} GP", title(keyword)),
                source: NameSource::Keyword,
            },
        };
    }
    if let Some(name) = results.single_race_name() {
        let race = resolve_name(schedule, name, now);
        return IdentifiedRace {
            id: race.map(|r| r.id),
            name: race.map_or_else(|| name.to_string(), |r| r.name.clone()),
            source: NameSource::Column,
        };
    }
    IdentifiedRace {
        id: None,
        name: format!("Race_{}", now.format("%Y%m%d_%H%M")),
        source: NameSource::Synthetic,
    }
}

#[cfg(test)]
mod tests {
    use super::{identify_race, title, NameSource, ResultFileWatcher};
    use crate::race::tests::season;
    use crate::read_dir::read_dir;
    use crate::registry::ProcessedRaceRegistry;
    use crate::results::ResultFile;
    use chrono::{TimeZone, Utc};
    use maplit::btreeset;
    use std::time::{Duration, SystemTime};

    fn watcher(dir: &std::path::Path) -> ResultFileWatcher {
        ResultFileWatcher::new(
            dir.to_path_buf(),
            &["*results*.csv", "*actual*.csv"][..],
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_scan_filters_by_age() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bahrain_results.csv"), "x").unwrap();
        let modified = read_dir(dir.path()).unwrap().iter().next().unwrap().modified;
        let registry = ProcessedRaceRegistry::load(dir.path().join("registry.json"));
        let watcher = watcher(dir.path());

        let young = watcher
            .scan(&registry, modified + Duration::from_secs(10))
            .unwrap();
        assert!(young.is_empty());
        let old = watcher
            .scan(&registry, modified + Duration::from_secs(60))
            .unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].file_name, "bahrain_results.csv");
    }

    #[test]
    fn test_scan_age_mixed() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        for (name, age) in &[("old_results.csv", 60), ("new_results.csv", 10)] {
            let path = dir.path().join(name);
            std::fs::write(&path, "x").unwrap();
            let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            file.set_modified(now - Duration::from_secs(*age)).unwrap();
        }
        let registry = ProcessedRaceRegistry::load(dir.path().join("registry.json"));
        let found: Vec<_> = watcher(dir.path())
            .scan(&registry, now)
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(found, vec!["old_results.csv".to_string()]);
    }

    #[test]
    fn test_scan_filters_patterns_and_registry() {
        let dir = tempfile::tempdir().unwrap();
        for name in &["bahrain_results.csv", "miami_actual.csv", "notes.txt", "odds.csv"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let mut registry = ProcessedRaceRegistry::load(dir.path().join("registry.json"));
        registry.record("bahrain_results.csv").unwrap();

        let far_future = SystemTime::now() + Duration::from_secs(3600);
        let found: std::collections::BTreeSet<_> = watcher(dir.path())
            .scan(&registry, far_future)
            .unwrap()
            .into_iter()
            .map(|e| e.file_name)
            .collect();
        assert_eq!(found, btreeset! {"miami_actual.csv".to_string()});
    }

    #[test]
    fn test_scan_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("incoming_results");
        let registry = ProcessedRaceRegistry::load(dir.path().join("registry.json"));
        let found = watcher(&watch)
            .scan(&registry, SystemTime::now())
            .unwrap();
        assert!(found.is_empty());
        assert!(watch.is_dir());
    }

    #[test]
    fn test_identify_prefers_keyword() {
        let schedule = season();
        let now = Utc.ymd(2025, 4, 13).and_hms(19, 0, 0);
        let mut results = ResultFile::default();
        results.race_names.insert("Miami Grand Prix".to_string());

        let race = identify_race("bahrain_results.csv", &results, &schedule, now);
        assert_eq!(race.source, NameSource::Keyword);
        assert_eq!(race.id.unwrap().round, 4);
        assert_eq!(race.name, "Bahrain Grand Prix");

        let race = identify_race("race_results.csv", &results, &schedule, now);
        assert_eq!(race.source, NameSource::Column);
        assert_eq!(race.id.unwrap().round, 6);
    }

    #[test]
    fn test_identify_unscheduled_keyword() {
        let schedule = season();
        let now = Utc.ymd(2025, 4, 13).and_hms(19, 0, 0);
        let race = identify_race("abu_dhabi_results.csv", &ResultFile::default(), &schedule, now);
        assert_eq!(race.id, None);
        assert_eq!(race.name, "Abu Dhabi GP");
    }

    #[test]
    fn test_identify_fallbacks() {
        let schedule = season();
        let now = Utc.ymd(2025, 4, 13).and_hms(19, 5, 0);

        let mut ambiguous = ResultFile::default();
        ambiguous.race_names = btreeset! {"A".to_string(), "B".to_string()};
        let race = identify_race("race_results.csv", &ambiguous, &schedule, now);
        assert_eq!(race.source, NameSource::Synthetic);
        assert_eq!(race.name, "Race_20250413_1905");
        assert_eq!(race.id, None);

        let mut unknown = ResultFile::default();
        unknown.race_names.insert("Gotham City Grand Prix".to_string());
        let race = identify_race("race_results.csv", &unknown, &schedule, now);
        assert_eq!(race.source, NameSource::Column);
        assert_eq!(race.name, "Gotham City Grand Prix");
        assert_eq!(race.id, None);
    }

    #[test]
    fn test_title() {
        assert_eq!(title("abu_dhabi"), "Abu Dhabi");
        assert_eq!(title("monaco"), "Monaco");
    }
}
