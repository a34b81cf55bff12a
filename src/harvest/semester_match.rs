//! Classification and fuzzy matching of remote semester options.
//!
//! The catalog lists semesters by display name only ("Sommersemester 2024",
//! "Wintersemester 2024/25"). Operators refer to them by all kinds of short
//! forms, so resolution runs over normalized alias keys.

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}|\d{2}").expect("year regex"));

/// Semester half-year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Summer,
    Winter,
}

/// A remote semester option classified from its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteSemester {
    pub display_name: String,
    pub short_name: String,
    pub season: Season,
    /// Calendar year the semester starts in.
    pub year: i32,
}

impl RemoteSemester {
    /// Classifies a display name into season, starting year and short name.
    /// Returns `None` when neither season keyword is recognizable.
    pub fn classify(display_name: &str) -> Option<Self> {
        let lower = display_name.to_lowercase();
        let season = if lower.contains("sommer") || lower.starts_with("ss") {
            Season::Summer
        } else if lower.contains("winter") || lower.starts_with("ws") {
            Season::Winter
        } else {
            return None;
        };

        let year = YEAR_RE.find(display_name).map(|m| m.as_str())?;
        let year: i32 = year.parse().ok()?;
        let year = if year < 100 { 2000 + year } else { year };

        let prefix = match season {
            Season::Summer => "SS",
            Season::Winter => "WS",
        };
        Some(RemoteSemester {
            display_name: display_name.to_string(),
            short_name: format!("{prefix}{:02}", year % 100),
            season,
            year,
        })
    }

    /// Default date window: summer Apr 1 - Sep 30, winter Oct 1 - Mar 31 of
    /// the following year.
    pub fn date_window(&self) -> (NaiveDate, NaiveDate) {
        match self.season {
            Season::Summer => (
                NaiveDate::from_ymd_opt(self.year, 4, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(self.year, 9, 30).expect("valid date"),
            ),
            Season::Winter => (
                NaiveDate::from_ymd_opt(self.year, 10, 1).expect("valid date"),
                NaiveDate::from_ymd_opt(self.year + 1, 3, 31).expect("valid date"),
            ),
        }
    }

    /// All normalized keys this semester answers to.
    fn alias_keys(&self) -> Vec<String> {
        let prefix = match self.season {
            Season::Summer => "ss",
            Season::Winter => "ws",
        };
        let yy = self.year % 100;
        let mut keys = vec![
            normalize(&self.display_name),
            normalize(&self.short_name),
            format!("{prefix}{yy:02}"),
            format!("{prefix}{}", self.year),
        ];
        if self.season == Season::Winter {
            // Range forms: WS24/25, WS2024/25, WS2024/2025
            let next = (self.year + 1) % 100;
            keys.push(format!("{prefix}{yy:02}{next:02}"));
            keys.push(format!("{prefix}{}{next:02}", self.year));
            keys.push(format!("{prefix}{}{}", self.year, self.year + 1));
        }
        keys
    }
}

/// Normalized lookup key: lowercase with spaces and `-`, `/`, `_` stripped.
pub fn normalize(identifier: &str) -> String {
    identifier
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '/' | '_'))
        .collect()
}

/// Resolves free-form semester identifiers against the fetched options.
pub struct SemesterMatcher {
    options: Vec<RemoteSemester>,
    keys: HashMap<String, usize>,
}

impl SemesterMatcher {
    pub fn new(options: Vec<RemoteSemester>) -> Self {
        let mut keys = HashMap::new();
        for (index, option) in options.iter().enumerate() {
            for key in option.alias_keys() {
                keys.entry(key).or_insert(index);
            }
        }
        Self { options, keys }
    }

    /// Resolves one identifier; `None` means it matches no remote option.
    pub fn resolve(&self, identifier: &str) -> Option<&RemoteSemester> {
        self.keys
            .get(&normalize(identifier))
            .map(|&index| &self.options[index])
    }

    pub fn options(&self) -> &[RemoteSemester] {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_summer() {
        let semester = RemoteSemester::classify("Sommersemester 2024").unwrap();
        assert_eq!(semester.season, Season::Summer);
        assert_eq!(semester.year, 2024);
        assert_eq!(semester.short_name, "SS24");

        let (start, end) = semester.date_window();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 9, 30).unwrap());
    }

    #[test]
    fn test_classify_winter_spans_year_boundary() {
        let semester = RemoteSemester::classify("Wintersemester 2024/25").unwrap();
        assert_eq!(semester.season, Season::Winter);
        assert_eq!(semester.year, 2024);
        assert_eq!(semester.short_name, "WS24");

        let (start, end) = semester.date_window();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
    }

    #[test]
    fn test_classify_rejects_unknown() {
        assert_eq!(RemoteSemester::classify("Ferienkurs 2024"), None);
        assert_eq!(RemoteSemester::classify("Sommersemester"), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("WS 24/25"), "ws2425");
        assert_eq!(normalize("Sommer-Semester_2024"), "sommersemester2024");
    }

    fn matcher() -> SemesterMatcher {
        SemesterMatcher::new(vec![
            RemoteSemester::classify("Sommersemester 2024").unwrap(),
            RemoteSemester::classify("Wintersemester 2024/25").unwrap(),
        ])
    }

    #[test]
    fn test_resolve_summer_variants() {
        let matcher = matcher();
        for id in ["SS24", "ss 24", "SS2024", "Sommersemester 2024", "sommersemester2024"] {
            let resolved = matcher.resolve(id);
            assert_eq!(
                resolved.map(|s| s.short_name.as_str()),
                Some("SS24"),
                "identifier {id:?}"
            );
        }
    }

    #[test]
    fn test_resolve_winter_variants() {
        let matcher = matcher();
        for id in [
            "WS24",
            "WS2024",
            "WS24/25",
            "WS 24-25",
            "ws2425",
            "WS2024/25",
            "WS2024/2025",
            "Wintersemester 2024/25",
        ] {
            let resolved = matcher.resolve(id);
            assert_eq!(
                resolved.map(|s| s.short_name.as_str()),
                Some("WS24"),
                "identifier {id:?}"
            );
        }
    }

    #[test]
    fn test_resolve_unknown_is_none() {
        assert!(matcher().resolve("SS99").is_none());
        assert!(matcher().resolve("").is_none());
    }
}
