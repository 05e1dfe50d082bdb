//! Field extraction from pasted rating-tool exports using regex patterns.
//!
//! Pure functions, no async. The export is a known line layout: a label on
//! one line and its value on the next. Headers come first, then numbered
//! result blocks (`1.`, `2.`, ...).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::schema::{LabeledValue, ParsedTask, RatingResult, TaskHeaders};

/// Field labels that show up as values when a field was left blank in the
/// export, because the next label slides into the value slot.
const GARBAGE_HEADERS: &[&str] = &[
    "Category",
    "Type",
    "Street Number",
    "Unit/Apt",
    "Street Name",
    "Sub-Locality",
    "Locality",
    "Region/State",
    "Postal Code",
    "Country",
    "Address does not exist",
    "Language/Script issue",
    "Other Issue",
    "Name Issue",
    "Category Issue",
    "User intent issue",
    "Distance/Prominence issue",
];

/// Prefixes that mark a metadata value as another label rather than data.
const GARBAGE_META_PREFIXES: &[&str] = &[
    "Result name",
    "Business/POI",
    "Relevance",
    "Type",
    "Category",
    "Status",
    "Distance to User",
    "Distance to Viewport",
    "Lat, Lng",
];

/// A second line starting with one of these is a label, not a subtitle.
const SYSTEM_KEYWORDS: &[&str] = &[
    "Category",
    "Type",
    "Status",
    "Distance",
    "Relevance",
    "Lat, Lng",
    "Result name",
];

const META_KEYS: &[&str] = &[
    "Category",
    "Type",
    "Distance to User",
    "Distance to Viewport",
    "Lat, Lng",
];

static PARSER: LazyLock<TaskParser> = LazyLock::new(TaskParser::new);

/// Parse an export with the shared, pre-compiled parser.
pub fn process_text(text: &str) -> ParsedTask {
    PARSER.process_text(text)
}

/// Normalize a rating value; label leftovers collapse to `-`.
pub fn clean_value(val: &str) -> String {
    let trimmed = val.trim();
    if trimmed.is_empty() {
        return "-".to_string();
    }
    if trimmed.eq_ignore_ascii_case("n/a") {
        return "n/a".to_string();
    }
    if GARBAGE_HEADERS.contains(&trimmed) {
        return "-".to_string();
    }
    trimmed.to_string()
}

/// Whether a metadata value is real data and not a neighbouring label.
pub fn is_valid_meta(val: &str) -> bool {
    if val.is_empty() {
        return false;
    }
    !GARBAGE_META_PREFIXES.iter().any(|p| val.starts_with(p))
}

/// Compile `LABEL\s*\n(.+)`: the first non-blank line after a label.
fn label_pattern(label: &str, case_insensitive: bool) -> Regex {
    let flags = if case_insensitive { "(?i)" } else { "" };
    // Labels are fixed literals, so the pattern is always valid.
    Regex::new(&format!(r"{}{}\s*\n(.+)", flags, regex::escape(label)))
        .expect("label pattern must compile")
}

/// Pre-compiled patterns ready for matching.
pub struct TaskParser {
    task_id: Regex,
    task_type: Regex,
    viewport_age: Regex,
    locale: Regex,
    lat_lng: Regex,
    query_spaced: Regex,
    query: Regex,
    result_marker: Regex,
    meta: Vec<(&'static str, Regex)>,
    relevance: Regex,
    name_accuracy: Regex,
    address_accuracy: Regex,
    pin_accuracy: Regex,
}

impl Default for TaskParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskParser {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("static pattern must compile");

        let parser = Self {
            task_id: label_pattern("Task ID", false),
            task_type: label_pattern("Task Type", false),
            viewport_age: label_pattern("Viewport Age", false),
            locale: label_pattern("Locale", false),
            lat_lng: label_pattern("Lat, Lng", false),
            query_spaced: compile(r"Query\s*\n\s*\n(.+)"),
            query: label_pattern("Query", false),
            result_marker: compile(r"\n(\d+)\.\s*\n"),
            meta: META_KEYS
                .iter()
                .map(|k| (*k, label_pattern(k, false)))
                .collect(),
            relevance: label_pattern("Relevance", false),
            name_accuracy: label_pattern("Name Accuracy", true),
            address_accuracy: label_pattern("Address Accuracy", true),
            pin_accuracy: compile(r"(?i)(?:Pin Accuracy|Pin/Zip Accuracy)\s*\n(.+)"),
        };
        debug!("Compiled {} metadata patterns", parser.meta.len());
        parser
    }

    /// Extract headers and every numbered result from a pasted export.
    pub fn process_text(&self, text: &str) -> ParsedTask {
        let header = |re: &Regex| first_capture(re, text).unwrap_or_else(|| "Unknown".to_string());

        let query = first_capture(&self.query_spaced, text)
            .or_else(|| first_capture(&self.query, text))
            .unwrap_or_else(|| "Unknown Query".to_string());

        let headers = TaskHeaders {
            task_id: header(&self.task_id),
            task_type: header(&self.task_type),
            viewport_age: header(&self.viewport_age),
            locale: header(&self.locale),
            lat_lng: header(&self.lat_lng),
            query: query.clone(),
        };

        let results: Vec<RatingResult> = self
            .split_results(text)
            .into_iter()
            .map(|(num, content)| self.parse_result(num, content))
            .collect();

        debug!(
            "Parsed task '{}' with {} results",
            headers.task_id,
            results.len()
        );

        ParsedTask {
            task_id: headers.task_id.clone(),
            query,
            headers,
            results,
        }
    }

    /// Split the text on `\n<n>.\n` markers into (number, block) pairs.
    fn split_results<'t>(&self, text: &'t str) -> Vec<(&'t str, &'t str)> {
        let markers: Vec<(&str, usize, usize)> = self
            .result_marker
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let num = cap.get(1)?;
                Some((num.as_str(), whole.start(), whole.end()))
            })
            .collect();

        markers
            .iter()
            .enumerate()
            .map(|(i, &(num, _, body_start))| {
                let body_end = markers.get(i + 1).map(|m| m.1).unwrap_or(text.len());
                (num, text[body_start..body_end].trim())
            })
            .collect()
    }

    fn parse_result(&self, num: &str, content: &str) -> RatingResult {
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());
        let title = lines.next().unwrap_or_default().to_string();
        let subtitle = lines
            .next()
            .filter(|candidate| !SYSTEM_KEYWORDS.iter().any(|k| candidate.starts_with(k)))
            .unwrap_or_default()
            .to_string();

        let mut meta: Vec<LabeledValue> = Vec::new();
        for (label, re) in &self.meta {
            if let Some(value) = first_capture(re, content) {
                if is_valid_meta(&value) && !meta.iter().any(|m| m.value == value) {
                    meta.push(LabeledValue::new(*label, value));
                }
            }
        }

        let cleaned = |re: &Regex| {
            first_capture(re, content)
                .map(|v| clean_value(&v))
                .unwrap_or_else(|| "-".to_string())
        };

        let ratings = vec![
            LabeledValue::new(
                "Relevance",
                first_capture(&self.relevance, content).unwrap_or_else(|| "Not Rated".to_string()),
            ),
            LabeledValue::new("Name Acc", cleaned(&self.name_accuracy)),
            LabeledValue::new("Address Acc", cleaned(&self.address_accuracy)),
            LabeledValue::new("Pin Acc", cleaned(&self.pin_accuracy)),
        ];

        RatingResult {
            num: num.to_string(),
            title,
            subtitle,
            meta,
            ratings,
            upvotes: 0,
            downvotes: 0,
            voters: BTreeMap::new(),
            notes: BTreeMap::new(),
        }
    }
}

/// First capture group of the first match, trimmed.
fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPORT: &str = "Task ID
abc123
Task Type
Business/POI
Viewport Age
Fresh
Locale
en_US
Lat, Lng
40.7306, -73.9866
Query

pizza near me

1.
Joe's Pizza
7 Carmine St, New York
Category
Pizza restaurant
Type
Business/POI
Distance to User
0.4 mi
Distance to Viewport
0.4 mi
Relevance
Excellent
Name Accuracy
Correct
Address Accuracy
Category Issue
Pin Accuracy
n/a

2.
Prince St Pizza
Category
Pizza restaurant
Relevance
Good
";

    #[test]
    fn test_headers() {
        let parsed = process_text(EXPORT);
        assert_eq!(parsed.task_id, "abc123");
        assert_eq!(parsed.query, "pizza near me");
        assert_eq!(parsed.headers.task_type, "Business/POI");
        assert_eq!(parsed.headers.viewport_age, "Fresh");
        assert_eq!(parsed.headers.locale, "en_US");
        assert_eq!(parsed.headers.lat_lng, "40.7306, -73.9866");
        assert_eq!(parsed.headers.query, "pizza near me");
    }

    #[test]
    fn test_missing_headers_default() {
        let parsed = process_text("nothing useful here");
        assert_eq!(parsed.task_id, "Unknown");
        assert_eq!(parsed.query, "Unknown Query");
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn test_query_without_blank_line() {
        let parsed = process_text("Query\ncoffee\n");
        assert_eq!(parsed.query, "coffee");
    }

    #[test]
    fn test_results_split_and_titles() {
        let parsed = process_text(EXPORT);
        assert_eq!(parsed.results.len(), 2);

        let first = &parsed.results[0];
        assert_eq!(first.num, "1");
        assert_eq!(first.title, "Joe's Pizza");
        assert_eq!(first.subtitle, "7 Carmine St, New York");

        // Second line is a label, so there is no subtitle.
        let second = &parsed.results[1];
        assert_eq!(second.num, "2");
        assert_eq!(second.title, "Prince St Pizza");
        assert_eq!(second.subtitle, "");
    }

    #[test]
    fn test_meta_filters_labels_and_dedupes() {
        let parsed = process_text(EXPORT);
        let meta = &parsed.results[0].meta;
        assert_eq!(
            meta,
            &vec![
                LabeledValue::new("Category", "Pizza restaurant"),
                LabeledValue::new("Distance to User", "0.4 mi"),
            ]
        );
    }

    #[test]
    fn test_fixed_rating_schema() {
        let parsed = process_text(EXPORT);
        let ratings = &parsed.results[0].ratings;
        let labels: Vec<&str> = ratings.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Relevance", "Name Acc", "Address Acc", "Pin Acc"]);
        assert_eq!(ratings[0].value, "Excellent");
        assert_eq!(ratings[1].value, "Correct");
        assert_eq!(ratings[2].value, "-");
        assert_eq!(ratings[3].value, "n/a");

        let sparse = &parsed.results[1].ratings;
        assert_eq!(sparse[0].value, "Good");
        assert_eq!(sparse[1].value, "-");
        assert_eq!(sparse[3].value, "-");
    }

    #[test]
    fn test_unrated_and_pin_zip_variant() {
        let text = "Query\nx\n\n1.\nSomewhere\npin/zip accuracy\nWrong\n";
        let parsed = process_text(text);
        let ratings = &parsed.results[0].ratings;
        assert_eq!(ratings[0].value, "Not Rated");
        assert_eq!(ratings[3].value, "Wrong");
    }

    #[test]
    fn test_new_results_have_no_votes() {
        let parsed = process_text(EXPORT);
        for r in &parsed.results {
            assert_eq!((r.upvotes, r.downvotes), (0, 0));
            assert!(r.voters.is_empty());
            assert!(r.notes.is_empty());
        }
    }

    #[test]
    fn test_clean_value() {
        assert_eq!(clean_value(""), "-");
        assert_eq!(clean_value("  N/A "), "n/a");
        assert_eq!(clean_value("Postal Code"), "-");
        assert_eq!(clean_value(" Correct "), "Correct");
    }

    #[test]
    fn test_is_valid_meta() {
        assert!(!is_valid_meta(""));
        assert!(!is_valid_meta("Relevance"));
        assert!(!is_valid_meta("Distance to Viewport"));
        assert!(is_valid_meta("Pizza restaurant"));
    }
}
