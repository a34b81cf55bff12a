//! Repair of mixed UTF-8 / ISO-8859-1 query parameters.
//!
//! The legacy catalog emits links whose query values are sometimes UTF-8 and
//! sometimes ISO-8859-1 encoded (`stdg=BG%D6K`), occasionally with
//! double-encoded UTF-8 umlauts on top. Both decodings are attempted and the
//! one without replacement characters wins.

use std::borrow::Cow;
use tracing::warn;

/// Replacement character produced by lossy UTF-8 decoding.
const REPLACEMENT: char = '\u{FFFD}';

/// Double-encoded UTF-8 artifacts and the umlaut they stand for.
const DOUBLE_UTF8_TABLE: &[(&str, &str)] = &[
    ("\u{00C3}\u{201E}", "Ä"), // Ã„
    ("\u{00C3}\u{2013}", "Ö"), // Ã–
    ("\u{00C3}\u{0153}", "Ü"), // Ãœ
    ("\u{00C3}\u{00A4}", "ä"), // Ã¤
    ("\u{00C3}\u{00B6}", "ö"), // Ã¶
    ("\u{00C3}\u{00BC}", "ü"), // Ã¼
    ("\u{00C3}\u{0178}", "ß"), // ÃŸ
];

/// Counts German umlaut characters, used to rank decoding attempts.
fn umlaut_count(s: &str) -> usize {
    s.chars().filter(|c| "ÄÖÜäöüß".contains(*c)).count()
}

/// Undoes double-encoded UTF-8 umlauts and, if replacement characters remain
/// in an otherwise-ASCII string, tries reinterpreting the current bytes as
/// ISO-8859-1. The reinterpretation is kept only when it yields more umlauts
/// without introducing a new replacement character.
pub fn repair_umlauts(input: &str) -> String {
    let mut repaired = Cow::Borrowed(input);
    for (artifact, umlaut) in DOUBLE_UTF8_TABLE {
        if repaired.contains(artifact) {
            repaired = Cow::Owned(repaired.replace(artifact, umlaut));
        }
    }

    if repaired.contains(REPLACEMENT)
        && repaired
            .chars()
            .all(|c| c.is_ascii() || c == REPLACEMENT)
    {
        let reinterpreted = encoding_rs::mem::decode_latin1(repaired.as_bytes());
        if !reinterpreted.contains(REPLACEMENT)
            && umlaut_count(&reinterpreted) > umlaut_count(&repaired)
        {
            return reinterpreted.into_owned();
        }
    }

    repaired.into_owned()
}

/// Percent-decodes a raw query value and repairs its character encoding.
///
/// The value must be the still-encoded substring of the href; decoding it
/// through a URL library first would destroy the ISO-8859-1 byte patterns.
///
/// Strategy:
/// 1. decode the bytes as UTF-8 (lossy) and repair umlauts; if no replacement
///    character remains, that result wins;
/// 2. otherwise decode the bytes as ISO-8859-1 and repair; prefer it when it
///    is replacement-free and has at least as many umlauts as the UTF-8
///    attempt;
/// 3. otherwise fall back to the UTF-8 result.
pub fn decode_query_value(raw: &str, fix_legacy: bool) -> String {
    let bytes = urlencoding::decode_binary(raw.as_bytes());

    let utf8 = repair_umlauts(&String::from_utf8_lossy(&bytes));
    if !fix_legacy || !utf8.contains(REPLACEMENT) {
        return utf8;
    }

    let latin1 = repair_umlauts(&encoding_rs::mem::decode_latin1(&bytes));
    if !latin1.contains(REPLACEMENT) && umlaut_count(&latin1) >= umlaut_count(&utf8) {
        warn!(raw, decoded = %latin1, "query value decoded as ISO-8859-1");
        return latin1;
    }

    utf8
}

/// Extracts the still-encoded value of a query parameter from an href.
pub fn raw_query_param<'a>(href: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = href.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_umlaut_is_repaired() {
        // "BGÖK" with ISO-8859-1 Ö (0xD6)
        let decoded = decode_query_value("BG%D6K", true);
        assert_eq!(decoded, "BGÖK");
        assert!(!decoded.contains(REPLACEMENT));
    }

    #[test]
    fn test_utf8_umlaut_passes_through() {
        // "BGÖK" with UTF-8 Ö (0xC3 0x96)
        assert_eq!(decode_query_value("BG%C3%96K", true), "BGÖK");
    }

    #[test]
    fn test_double_encoded_utf8_is_repaired() {
        // "Ü" double-encoded: Ü -> C3 9C -> Ã œ -> C3 83 C5 93
        assert_eq!(decode_query_value("%C3%83%C5%93bung", true), "Übung");
    }

    #[test]
    fn test_plain_ascii_is_untouched() {
        assert_eq!(decode_query_value("BAI", true), "BAI");
    }

    #[test]
    fn test_fix_legacy_disabled_keeps_lossy_utf8() {
        let decoded = decode_query_value("BG%D6K", false);
        assert!(decoded.contains(REPLACEMENT));
    }

    #[test]
    fn test_repair_umlauts_table() {
        assert_eq!(repair_umlauts("Ã„Ã–ÃœÃ¤Ã¶Ã¼ÃŸ"), "ÄÖÜäöüß");
    }

    #[test]
    fn test_no_replacement_for_all_umlauts_in_either_encoding() {
        // ü ö ä ß in UTF-8 and in Latin-1 percent encoding
        for raw in [
            "%C3%BC", "%C3%B6", "%C3%A4", "%C3%9F", // UTF-8
            "%FC", "%F6", "%E4", "%DF", // Latin-1
        ] {
            let decoded = decode_query_value(raw, true);
            assert!(
                !decoded.contains(REPLACEMENT),
                "replacement char for {raw:?}: {decoded:?}"
            );
        }
    }

    #[test]
    fn test_raw_query_param() {
        let href = "stgvrz.html?stdg=BG%D6K&stdg1=Geo%F6kologie";
        assert_eq!(raw_query_param(href, "stdg"), Some("BG%D6K"));
        assert_eq!(raw_query_param(href, "stdg1"), Some("Geo%F6kologie"));
        assert_eq!(raw_query_param(href, "satz"), None);
        assert_eq!(raw_query_param("stgvrz.html", "stdg"), None);
    }
}
