use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable race identity, assigned when the schedule is published and carried by every record
/// derived from it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct RaceId {
    pub season: i32,
    pub round: u32,
}

impl fmt::Display for RaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-R{:02}", self.season, self.round)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Race {
    pub id: RaceId,
    pub name: String,
    pub country: String,
    pub location: String,
    pub start_time: DateTime<Utc>,
    pub qualifying_time: Option<DateTime<Utc>>,
}

/// Filename keywords, each with the schedule terms it stands for.
pub const RACE_KEYWORDS: &[(&str, &[&str])] = &[
    ("bahrain", &["bahrain", "sakhir"]),
    ("saudi", &["saudi", "jeddah"]),
    ("australia", &["australia", "melbourne"]),
    ("japan", &["japan", "suzuka"]),
    ("china", &["china", "chinese", "shanghai"]),
    ("miami", &["miami"]),
    ("imola", &["imola", "emilia"]),
    ("spain", &["spain", "spanish", "barcelona"]),
    ("monaco", &["monaco"]),
    ("canada", &["canada", "canadian", "montreal", "montréal"]),
    ("austria", &["austria", "spielberg"]),
    ("britain", &["britain", "british", "silverstone"]),
    ("hungary", &["hungary", "hungarian", "budapest"]),
    ("belgium", &["belgium", "belgian", "francorchamps"]),
    ("netherlands", &["netherlands", "dutch", "zandvoort"]),
    ("italy", &["italy", "italian", "monza"]),
    ("azerbaijan", &["azerbaijan", "baku"]),
    ("singapore", &["singapore"]),
    ("las_vegas", &["las vegas"]),
    ("usa", &["united states grand prix", "austin"]),
    ("mexico", &["mexico"]),
    ("brazil", &["brazil", "são paulo", "sao paulo"]),
    ("qatar", &["qatar", "lusail"]),
    ("abu_dhabi", &["abu dhabi", "yas"]),
];

impl Race {
    fn haystack(&self) -> String {
        format!("{} {} {}", self.name, self.country, self.location).to_lowercase()
    }

    pub fn matches_term(&self, term: &str) -> bool {
        self.haystack().contains(&term.to_lowercase())
    }
}

/// Returns the first keyword from [`RACE_KEYWORDS`] found in `file_name`.
pub fn keyword_in(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase().replace(|c: char| c == '-' || c == ' ', "_");
    RACE_KEYWORDS
        .iter()
        .map(|(keyword, _)| *keyword)
        .find(|keyword| lower.contains(keyword))
}

/// Picks the scheduled race a keyword refers to. When several races match, the latest one that has
/// already started is preferred, otherwise the first in list order.
pub fn resolve_keyword<'a>(
    races: &'a [Race],
    keyword: &str,
    now: DateTime<Utc>,
) -> Option<&'a Race> {
    let terms = RACE_KEYWORDS
        .iter()
        .find(|(k, _)| *k == keyword)
        .map_or_else(|| vec![keyword.replace('_', " ")], |(_, t)| {
            t.iter().map(|s| (*s).to_string()).collect()
        });
    let matching: Vec<&Race> = races
        .iter()
        .filter(|race| terms.iter().any(|term| race.matches_term(term)))
        .collect();
    matching
        .iter()
        .filter(|race| race.start_time <= now)
        .max_by_key(|race| race.start_time)
        .or_else(|| matching.first())
        .copied()
}

/// Resolves a free-text race name: exact (case-insensitive) name first, then keyword lookup.
pub fn resolve_name<'a>(races: &'a [Race], name: &str, now: DateTime<Utc>) -> Option<&'a Race> {
    let wanted = name.trim().to_lowercase();
    races
        .iter()
        .find(|race| race.name.to_lowercase() == wanted)
        .or_else(|| keyword_in(&wanted).and_then(|k| resolve_keyword(races, k, now)))
}
