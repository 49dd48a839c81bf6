//! Index selection for a requested time window.
//!
//! Index names embed their day as `YYYY.MM.DD` (e.g. `logstash-2024.01.31`).
//! Names are assumed to be zero padded so plain string order and
//! chronological order coincide.

use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;

use crate::{Error, Result};

/// Separator between year, month and day in index names.
pub const INDEX_DATE_SEPARATOR: char = '.';

/// Separator between year, month and day in operator supplied timestamps.
pub const TIMESTAMP_DATE_SEPARATOR: char = '-';

/// Inclusive date window used to pick indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    /// First day to include (None = derived from the newest index).
    pub after: Option<NaiveDate>,
    /// Last day to include (None = today).
    pub before: Option<NaiveDate>,
}

/// Extract the first `YYYY<sep>MM<sep>DD` date embedded in `input`.
pub fn extract_ymd_date(input: &str, separator: char) -> Result<NaiveDate> {
    let sep = regex::escape(&separator.to_string());
    let date_regex = Regex::new(&format!(r"(\d{{4}}){sep}(\d{{2}}){sep}(\d{{2}})"))?;

    let caps = date_regex
        .captures(input)
        .ok_or_else(|| Error::Config(format!("Failed to extract date from '{}'", input)))?;

    let year: i32 = caps[1].parse().map_err(|_| invalid_date(input))?;
    let month: u32 = caps[2].parse().map_err(|_| invalid_date(input))?;
    let day: u32 = caps[3].parse().map_err(|_| invalid_date(input))?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid_date(input))
}

fn invalid_date(input: &str) -> Error {
    Error::Config(format!("Invalid date in '{}'", input))
}

/// Find the lexicographically greatest index name matching `pattern`.
pub fn find_last_partition<'a>(available: &'a [String], pattern: &Regex) -> Option<&'a str> {
    available
        .iter()
        .filter(|name| pattern.is_match(name))
        .map(String::as_str)
        .max()
}

/// Select the indices to search.
///
/// Without a window only the newest matching index is returned. With a window,
/// every matching index dated within `[after, before]` is returned in input
/// order. An empty result means nothing matched.
pub fn select_partitions(
    available: &[String],
    pattern: &Regex,
    window: Option<&DateWindow>,
    today: NaiveDate,
) -> Result<Vec<String>> {
    let Some(window) = window else {
        return Ok(find_last_partition(available, pattern)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default());
    };

    let before = window.before.unwrap_or(today);
    let after = match window.after {
        Some(after) => after,
        None => match find_last_partition(available, pattern) {
            Some(last) => extract_ymd_date(last, INDEX_DATE_SEPARATOR)?.min(before),
            None => return Ok(Vec::new()),
        },
    };
    debug!(%after, %before, "selecting indices by date");

    let mut selected = Vec::new();
    for name in available.iter().filter(|name| pattern.is_match(name)) {
        let date = extract_ymd_date(name, INDEX_DATE_SEPARATOR)?;
        if date >= after && date <= before {
            selected.push(name.clone());
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn logs_pattern() -> Regex {
        Regex::new(r"logs\.\d{4}\.\d{2}\.\d{2}").unwrap()
    }

    #[test]
    fn test_extract_index_date() {
        assert_eq!(extract_ymd_date("logstash-2016.11.10", '.').unwrap(), date(2016, 11, 10));
    }

    #[test]
    fn test_extract_timestamp_date() {
        assert_eq!(
            extract_ymd_date("2016-11-10T10:01:23.200", '-').unwrap(),
            date(2016, 11, 10)
        );
    }

    #[test]
    fn test_extract_date_missing() {
        assert!(matches!(extract_ymd_date("logstash-current", '.'), Err(Error::Config(_))));
    }

    #[test]
    fn test_extract_date_out_of_range() {
        assert!(matches!(extract_ymd_date("logs.2024.13.40", '.'), Err(Error::Config(_))));
    }

    #[test]
    fn test_no_window_picks_greatest_match() {
        let available = names(&["logs.2024.01.02", "other.2025.01.01", "logs.2024.01.03", "logs.2024.01.01"]);
        let today = date(2030, 1, 1);
        let selected = select_partitions(&available, &logs_pattern(), None, today).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.03"]);
    }

    #[test]
    fn test_no_window_no_match_is_empty() {
        let available = names(&["other.2025.01.01"]);
        let selected = select_partitions(&available, &logs_pattern(), None, date(2030, 1, 1)).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_greatest_uses_string_order() {
        // Unpadded names sort as strings, not as dates.
        let available = names(&["app-9", "app-10"]);
        let pattern = Regex::new("app-").unwrap();
        assert_eq!(find_last_partition(&available, &pattern), Some("app-9"));
    }

    #[test]
    fn test_window_selects_inclusive_range() {
        let available = names(&["logs.2024.01.01", "logs.2024.01.02", "logs.2024.01.03"]);
        let window = DateWindow {
            after: Some(date(2024, 1, 2)),
            before: Some(date(2024, 1, 3)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.02", "logs.2024.01.03"]);
    }

    #[test]
    fn test_window_keeps_input_order() {
        let available = names(&["logs.2024.01.03", "logs.2024.01.01", "logs.2024.01.02"]);
        let window = DateWindow {
            after: Some(date(2024, 1, 1)),
            before: Some(date(2024, 1, 3)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.03", "logs.2024.01.01", "logs.2024.01.02"]);
    }

    #[test]
    fn test_window_before_defaults_to_today() {
        let available = names(&["logs.2024.01.01", "logs.2024.01.02", "logs.2024.01.03"]);
        let window = DateWindow {
            after: Some(date(2024, 1, 2)),
            before: None,
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2024, 1, 2)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.02"]);
    }

    #[test]
    fn test_only_before_uses_newest_index_date() {
        let available = names(&["logs.2024.01.01", "logs.2024.01.02", "logs.2024.01.03"]);
        let window = DateWindow {
            after: None,
            before: Some(date(2024, 1, 5)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.03"]);
    }

    #[test]
    fn test_only_before_earlier_than_newest_index() {
        let available = names(&["logs.2024.01.01", "logs.2024.01.02", "logs.2024.01.03"]);
        let window = DateWindow {
            after: None,
            before: Some(date(2024, 1, 2)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.02"]);
    }

    #[test]
    fn test_window_ignores_non_matching_names() {
        let available = names(&[".kibana", "logs.2024.01.02"]);
        let window = DateWindow {
            after: Some(date(2024, 1, 1)),
            before: Some(date(2024, 1, 31)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected, vec!["logs.2024.01.02"]);
    }

    #[test]
    fn test_window_every_result_in_range() {
        let available: Vec<String> = (1..=28).map(|d| format!("logs.2024.02.{:02}", d)).collect();
        let window = DateWindow {
            after: Some(date(2024, 2, 10)),
            before: Some(date(2024, 2, 20)),
        };
        let selected =
            select_partitions(&available, &logs_pattern(), Some(&window), date(2030, 1, 1)).unwrap();
        assert_eq!(selected.len(), 11);
        for name in &selected {
            let d = extract_ymd_date(name, '.').unwrap();
            assert!(d >= date(2024, 2, 10) && d <= date(2024, 2, 20));
        }
    }
}
