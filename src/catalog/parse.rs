//! Pure HTML parsing for the legacy catalog pages.
//!
//! All functions take the page body as a string and return plain data; no
//! network or database access happens here. The pages are 1990s-era table
//! soup, so location is driven by header text and link patterns rather than
//! ids or classes.

use crate::catalog::encoding::{decode_query_value, raw_query_param};
use crate::data::models::DayOfWeek;
use chrono::NaiveTime;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::warn;

static OPTION_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("option").unwrap());
static TABLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td, th").unwrap());
static LINK_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static FACULTY_HEADER_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b > u").unwrap());
static SEMESTER_SELECT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"select[name="sem_wahl"]"#).unwrap());
static FACH_SELECT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"select[name="semest"]"#).unwrap());

/// One entry of the `sem_wahl` dropdown on `index.html`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemesterOption {
    pub display_name: String,
    pub selected: bool,
}

/// One entry of the `semest` dropdown on `stgvrz.html`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FachSemesterOption {
    pub label: String,
    /// The option is not currently selected, so its table must be POSTed for.
    pub post_required: bool,
}

/// One study program link from `verz.html`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyProgramOption {
    pub code: String,
    pub display_name: String,
    pub faculty: Option<String>,
    pub href: String,
}

/// One parsed data row of a `stgvrz.html` schedule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub course_type: String,
    pub title: String,
    pub lecturer: String,
    pub day: DayOfWeek,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room: String,
    pub week_pattern: String,
    pub info_id: String,
    pub category: Option<String>,
    pub group: Option<String>,
}

/// Result of walking a schedule table: the usable rows plus the number of
/// rows dropped for parse reasons (blank title, unknown day, bad time).
#[derive(Debug, Default)]
pub struct ScheduleTable {
    pub rows: Vec<ScheduleRow>,
    pub skipped: usize,
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

/// Reads the semester options from `index.html`.
pub fn parse_semester_options(html: &str) -> Vec<SemesterOption> {
    let document = Html::parse_document(html);
    let Some(select) = document.select(&SEMESTER_SELECT_SEL).next() else {
        return Vec::new();
    };

    select
        .select(&OPTION_SEL)
        .filter_map(|option| {
            let display_name = cell_text(option);
            if display_name.is_empty() {
                return None;
            }
            Some(SemesterOption {
                display_name,
                selected: option.value().attr("selected").is_some(),
            })
        })
        .collect()
}

/// The semester the server reports as currently selected, if any.
pub fn selected_semester(html: &str) -> Option<String> {
    parse_semester_options(html)
        .into_iter()
        .find(|option| option.selected)
        .map(|option| option.display_name)
}

/// Reads the fach-semester options from a `stgvrz.html` page.
///
/// The `"Auswahl..."` placeholder entry is dropped; every other option is
/// returned with a flag telling whether selecting it requires a POST.
pub fn parse_fach_semester_options(html: &str) -> Vec<FachSemesterOption> {
    let document = Html::parse_document(html);
    let Some(select) = document.select(&FACH_SELECT_SEL).next() else {
        return Vec::new();
    };

    select
        .select(&OPTION_SEL)
        .filter_map(|option| {
            let label = cell_text(option);
            if label.is_empty() || label.eq_ignore_ascii_case("Auswahl...") {
                return None;
            }
            Some(FachSemesterOption {
                post_required: option.value().attr("selected").is_none(),
                label,
            })
        })
        .collect()
}

/// Reads the study program list from `verz.html`.
///
/// The page holds a single table whose rows are either faculty headers
/// (`<b><u>...</u></b>`) or rows containing a link into `stgvrz.html`. The
/// program code and display name come from the link's `stdg`/`stdg1` query
/// parameters, repaired for legacy encoding.
pub fn parse_study_programs(html: &str, fix_legacy: bool) -> Vec<StudyProgramOption> {
    let document = Html::parse_document(html);

    let Some(table) = document.select(&TABLE_SEL).find(|table| {
        table
            .select(&LINK_SEL)
            .any(|a| a.value().attr("href").is_some_and(is_program_href))
    }) else {
        return Vec::new();
    };

    let mut programs = Vec::new();
    let mut faculty: Option<String> = None;

    for row in table.select(&ROW_SEL) {
        if row.select(&FACULTY_HEADER_SEL).next().is_some() {
            let label = cell_text(row);
            faculty = (!label.is_empty()).then_some(label);
            continue;
        }

        let Some(link) = row
            .select(&LINK_SEL)
            .find(|a| a.value().attr("href").is_some_and(is_program_href))
        else {
            continue;
        };
        let href = link.value().attr("href").unwrap_or_default().to_string();

        let code = raw_query_param(&href, "stdg")
            .map(|raw| decode_query_value(raw, fix_legacy))
            .unwrap_or_default();
        let display_name = raw_query_param(&href, "stdg1")
            .map(|raw| decode_query_value(raw, fix_legacy))
            .unwrap_or_else(|| cell_text(link));

        if code.is_empty() {
            warn!(href, "program link without stdg parameter, skipping");
            continue;
        }

        programs.push(StudyProgramOption {
            code,
            display_name,
            faculty: faculty.clone(),
            href,
        });
    }

    programs
}

fn is_program_href(href: &str) -> bool {
    href.starts_with("stgvrz.html")
}

/// Walks the schedule table of a `stgvrz.html` page.
///
/// The table is located by its header row containing both "Titel" and
/// "Zeit". Category rows (`colspan=9`) and group rows (`colspan=8`) update
/// the running context attached to subsequent data rows. Rows that cannot be
/// parsed are counted, not errors.
pub fn parse_schedule_rows(html: &str, fix_legacy: bool) -> ScheduleTable {
    let document = Html::parse_document(html);

    let Some(table) = document.select(&TABLE_SEL).find(|table| {
        table.select(&ROW_SEL).next().is_some_and(is_schedule_header)
    }) else {
        return ScheduleTable::default();
    };

    let mut result = ScheduleTable::default();
    let mut category: Option<String> = None;
    let mut group: Option<String> = None;

    for row in table.select(&ROW_SEL).skip(1) {
        let cells: Vec<ElementRef<'_>> = row.select(&CELL_SEL).collect();

        if cells.len() == 1 {
            let colspan = cells[0].value().attr("colspan");
            let text = cell_text(cells[0]);
            match colspan {
                Some("9") => {
                    category = (!text.is_empty()).then_some(text);
                    group = None;
                }
                Some("8") => group = (!text.is_empty()).then_some(text),
                _ => {}
            }
            continue;
        }

        if cells.len() < 8 {
            continue;
        }

        let title = cell_text(cells[1]);
        if title.is_empty() {
            result.skipped += 1;
            continue;
        }

        let day_label = cell_text(cells[3]);
        let Some(day) = DayOfWeek::from_german(&day_label) else {
            warn!(title, day = day_label, "unknown day label, dropping row");
            result.skipped += 1;
            continue;
        };

        let time_label = cell_text(cells[4]);
        let Some((start_time, end_time)) = parse_time_range(&time_label) else {
            warn!(title, time = time_label, "unparseable time range, dropping row");
            result.skipped += 1;
            continue;
        };

        let info_id = cells
            .get(7)
            .and_then(|cell| cell.select(&LINK_SEL).next())
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| raw_query_param(href, "satz"))
            .map(|raw| decode_query_value(raw, fix_legacy))
            .unwrap_or_default();

        result.rows.push(ScheduleRow {
            course_type: cell_text(cells[0]),
            title,
            lecturer: cell_text(cells[2]),
            day,
            start_time,
            end_time,
            room: cell_text(cells[5]),
            week_pattern: cell_text(cells[6]),
            info_id,
            category: category.clone(),
            group: group.clone(),
        });
    }

    result
}

fn is_schedule_header(row: ElementRef<'_>) -> bool {
    let mut has_titel = false;
    let mut has_zeit = false;
    for cell in row.select(&CELL_SEL) {
        let text = cell_text(cell).to_lowercase();
        has_titel |= text.contains("titel");
        has_zeit |= text.contains("zeit");
    }
    has_titel && has_zeit
}

/// Parses `"H:mm-H:mm"` (spaces tolerated) into a start/end pair.
///
/// Returns `None` unless both halves parse and the start lies strictly
/// before the end.
pub fn parse_time_range(label: &str) -> Option<(NaiveTime, NaiveTime)> {
    let compact: String = label.chars().filter(|c| !c.is_whitespace()).collect();
    let (start, end) = compact.split_once('-')?;
    let start = parse_time(start)?;
    let end = parse_time(end)?;
    (start < end).then_some((start, end))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let (hour, minute) = s.split_once(':')?;
    NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_HTML: &str = r#"
        <html><body><form method="post" action="index.html">
        <select name="sem_wahl">
          <option>Wintersemester 2023/24</option>
          <option selected>Sommersemester 2024</option>
        </select>
        </form></body></html>"#;

    #[test]
    fn test_parse_semester_options() {
        let options = parse_semester_options(INDEX_HTML);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].display_name, "Wintersemester 2023/24");
        assert!(!options[0].selected);
        assert_eq!(options[1].display_name, "Sommersemester 2024");
        assert!(options[1].selected);
    }

    #[test]
    fn test_selected_semester() {
        assert_eq!(
            selected_semester(INDEX_HTML).as_deref(),
            Some("Sommersemester 2024")
        );
        assert_eq!(selected_semester("<html></html>"), None);
    }

    #[test]
    fn test_parse_fach_semester_options() {
        let html = r#"
            <select name="semest">
              <option>Auswahl...</option>
              <option selected>4.Semester</option>
              <option>6.Semester</option>
            </select>"#;
        let options = parse_fach_semester_options(html);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].label, "4.Semester");
        assert!(!options[0].post_required);
        assert_eq!(options[1].label, "6.Semester");
        assert!(options[1].post_required);
    }

    #[test]
    fn test_parse_study_programs_with_faculty_headers() {
        let html = r#"
            <table>
              <tr><td colspan="2"><b><u>Fakultät 1</u></b></td></tr>
              <tr><td><a href="stgvrz.html?stdg=BAI&stdg1=Angewandte%20Informatik%20(Bachelor)">BAI</a></td></tr>
              <tr><td colspan="2"><b><u>Fakultät 3</u></b></td></tr>
              <tr><td><a href="stgvrz.html?stdg=BG%D6K&stdg1=Geo%F6kologie%20(Bachelor)">BGÖK</a></td></tr>
            </table>"#;
        let programs = parse_study_programs(html, true);
        assert_eq!(programs.len(), 2);

        assert_eq!(programs[0].code, "BAI");
        assert_eq!(programs[0].display_name, "Angewandte Informatik (Bachelor)");
        assert_eq!(programs[0].faculty.as_deref(), Some("Fakultät 1"));

        assert_eq!(programs[1].code, "BGÖK");
        assert_eq!(programs[1].display_name, "Geoökologie (Bachelor)");
        assert_eq!(programs[1].faculty.as_deref(), Some("Fakultät 3"));
    }

    fn schedule_html(rows: &str) -> String {
        format!(
            r#"<table>
              <tr><td>Art</td><td>Titel der Veranstaltung</td><td>Dozent</td><td>Tag</td>
                  <td>Zeit</td><td>Raum</td><td>Woche</td><td>Info</td></tr>
              {rows}
            </table>"#
        )
    }

    #[test]
    fn test_parse_schedule_rows_basic() {
        let html = schedule_html(
            r#"<tr><td colspan="9">Pflichtmodule</td></tr>
               <tr><td colspan="8">Gruppe 1</td></tr>
               <tr><td>V</td><td>Algorithmen</td><td>Prof. Meier</td><td>Di</td>
                   <td>10:00-11:30</td><td>MIB/1001</td><td>wöchentlich</td>
                   <td><a href="detail.html?satz=42">i</a></td></tr>"#,
        );
        let table = parse_schedule_rows(&html, true);
        assert_eq!(table.skipped, 0);
        assert_eq!(table.rows.len(), 1);

        let row = &table.rows[0];
        assert_eq!(row.course_type, "V");
        assert_eq!(row.title, "Algorithmen");
        assert_eq!(row.lecturer, "Prof. Meier");
        assert_eq!(row.day, DayOfWeek::Tuesday);
        assert_eq!(row.start_time, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(row.end_time, NaiveTime::from_hms_opt(11, 30, 0).unwrap());
        assert_eq!(row.room, "MIB/1001");
        assert_eq!(row.week_pattern, "wöchentlich");
        assert_eq!(row.info_id, "42");
        assert_eq!(row.category.as_deref(), Some("Pflichtmodule"));
        assert_eq!(row.group.as_deref(), Some("Gruppe 1"));
    }

    #[test]
    fn test_category_reset_clears_group() {
        let html = schedule_html(
            r#"<tr><td colspan="9">Block A</td></tr>
               <tr><td colspan="8">Gruppe 1</td></tr>
               <tr><td colspan="9">Block B</td></tr>
               <tr><td>V</td><td>Mathematik</td><td>N.N.</td><td>Mo</td>
                   <td>8:00-9:30</td><td>AUD/1</td><td></td><td></td></tr>"#,
        );
        let table = parse_schedule_rows(&html, true);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].category.as_deref(), Some("Block B"));
        assert_eq!(table.rows[0].group, None);
    }

    #[test]
    fn test_rows_with_parse_problems_are_skipped() {
        let html = schedule_html(
            r#"<tr><td>V</td><td></td><td>X</td><td>Di</td><td>10:00-11:30</td><td>R</td><td></td><td></td></tr>
               <tr><td>V</td><td>Unbekannter Tag</td><td>X</td><td>??</td><td>10:00-11:30</td><td>R</td><td></td><td></td></tr>
               <tr><td>V</td><td>Kaputte Zeit</td><td>X</td><td>Di</td><td>zehn</td><td>R</td><td></td><td></td></tr>
               <tr><td>V</td><td>Gültig</td><td>X</td><td>Di</td><td>10:00-11:30</td><td>R</td><td></td><td></td></tr>"#,
        );
        let table = parse_schedule_rows(&html, true);
        assert_eq!(table.skipped, 3);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].title, "Gültig");
    }

    #[test]
    fn test_no_matching_table_yields_empty() {
        let table = parse_schedule_rows("<table><tr><td>foo</td></tr></table>", true);
        assert!(table.rows.is_empty());
        assert_eq!(table.skipped, 0);
    }

    #[test]
    fn test_parse_time_range() {
        let range = parse_time_range("10:00 - 11:30").unwrap();
        assert_eq!(range.0, NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        assert_eq!(range.1, NaiveTime::from_hms_opt(11, 30, 0).unwrap());

        // single-digit hours
        assert!(parse_time_range("7:30-9:00").is_some());
        // start must lie before end
        assert!(parse_time_range("11:30-10:00").is_none());
        assert!(parse_time_range("10:00-10:00").is_none());
        // garbage
        assert!(parse_time_range("zehn").is_none());
        assert!(parse_time_range("10:00").is_none());
        assert!(parse_time_range("25:00-26:00").is_none());
    }
}
