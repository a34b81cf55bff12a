//! Lecturer identity extraction from raw schedule cells.
//!
//! A cell may contain any mix of academic titles, the name, an email address
//! in angle brackets or parentheses, and multi-lecturer lists separated by
//! `;`, `/` or `|`. The parser pulls out title and email and bounds the name
//! to the column widths of the lecturers table.

use regex::Regex;
use std::sync::LazyLock;

/// Maximum stored name length.
pub const MAX_NAME_LEN: usize = 200;
/// Maximum stored title length.
pub const MAX_TITLE_LEN: usize = 50;
/// Maximum stored email length.
pub const MAX_EMAIL_LEN: usize = 150;

/// Placeholder for rows without a readable lecturer name.
pub const UNKNOWN_LECTURER: &str = "N.N.";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").expect("email regex")
});

/// Title tokens that the short-token rule does not cover.
const KNOWN_TITLES: &[&str] = &[
    "prof.",
    "dr.",
    "dipl.-ing.",
    "dipl.-inf.",
    "dipl.-math.",
    "dipl.-geol.",
    "jun.-prof.",
    "priv.-doz.",
    "habil.",
    "pd",
    "msc",
    "m.sc.",
    "bsc",
    "b.sc.",
    "mag.",
];

/// Parsed lecturer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LecturerIdentity {
    pub name: String,
    pub title: Option<String>,
    pub email: Option<String>,
    /// The input needed repair beyond plain title/email extraction.
    pub modified: bool,
    /// The name was cut down to fit the column.
    pub truncated: bool,
}

/// Whether a token is an academic title.
///
/// Known multi-part titles are matched from a list; everything else falls to
/// the short-token rule: up to 6 characters of letters ending in a dot
/// (`Ing.`, `rer.`, `nat.`).
fn is_title_token(token: &str) -> bool {
    let lower = token.to_lowercase();
    if KNOWN_TITLES.contains(&lower.as_str()) {
        return true;
    }
    token.chars().count() <= 6
        && token.ends_with('.')
        && token
            .strip_suffix('.')
            .is_some_and(|stem| !stem.is_empty() && stem.chars().all(|c| c.is_alphabetic()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn strip_decoration(s: &str) -> &str {
    s.trim_matches(|c: char| c == '-' || c == ';' || c == ',' || c.is_whitespace())
}

/// Parses a raw lecturer cell into `{name, title?, email?}`.
///
/// Blank input (or input that is nothing but titles and emails) resolves to
/// the `"N.N."` placeholder.
pub fn parse_lecturer(raw: &str) -> LecturerIdentity {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    // Email: first match wins; the surrounding <>/() decoration goes with it.
    let mut email = None;
    let mut remainder = collapsed.clone();
    if let Some(m) = EMAIL_RE.find(&collapsed) {
        let mut start = m.start();
        let mut end = m.end();
        while start > 0 && matches!(collapsed.as_bytes()[start - 1], b'<' | b'(') {
            start -= 1;
        }
        while end < collapsed.len() && matches!(collapsed.as_bytes()[end], b'>' | b')') {
            end += 1;
        }
        email = Some(truncate_chars(&m.as_str().to_lowercase(), MAX_EMAIL_LEN));
        remainder = format!("{}{}", &collapsed[..start], &collapsed[end..]);
    }

    // Leading run of title tokens.
    let tokens: Vec<&str> = remainder.split_whitespace().collect();
    let title_len = tokens.iter().take_while(|t| is_title_token(t)).count();
    let title = if title_len > 0 {
        Some(truncate_chars(&tokens[..title_len].join(" "), MAX_TITLE_LEN))
    } else {
        None
    };
    let core = tokens[title_len..].join(" ");

    let mut name = strip_decoration(&core).to_string();
    let mut truncated = false;

    if name.chars().count() > MAX_NAME_LEN {
        let first_segment = name
            .split(|c| c == ';' || c == '/' || c == '|')
            .next()
            .filter(|first| first.len() < name.len())
            .map(|first| strip_decoration(first).to_string());
        if let Some(first) = first_segment {
            name = first;
            truncated = true;
        }
    }
    if name.chars().count() > MAX_NAME_LEN {
        name = truncate_chars(&name, MAX_NAME_LEN);
        truncated = true;
    }

    let modified = collapsed != raw || name != core;

    if name.is_empty() {
        name = UNKNOWN_LECTURER.to_string();
    }

    LecturerIdentity {
        name,
        title,
        email,
        modified,
        truncated,
    }
}
