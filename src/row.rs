use std::{collections::BTreeMap, fmt::Display};

use chrono::{DateTime, Timelike};
use serde::{Serialize, Serializer};

/// Value of the `uptime_ms` column that marks a row as a custom event.
pub static CUSTOM_EVENT_MARKER: &'static str = "CUSTOM_EVENT";
/// Custom events reuse these two columns for their tag and payload.
pub static CATEGORY_COLUMN: &'static str = "heap_used_mb";
pub static PAYLOAD_COLUMN: &'static str = "native_heap_mb";

/// One line of a log file, before classification.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRow {
    pub timestamp: i64,
    pub source_file: String,
    pub fields: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogRow {
    PerformanceSample(PerformanceSample),
    CustomEvent(CustomEvent),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub timestamp: i64,
    pub uptime_ms: Option<f64>,
    pub heap_used_mb: Option<f64>,
    pub heap_max_mb: Option<f64>,
    pub native_heap_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub gc_count: Option<f64>,
    pub thread_count: Option<f64>,
    pub memory_class_mb: Option<f64>,
    pub large_memory_class_mb: Option<f64>,
    pub available_memory_mb: Option<f64>,
    pub total_memory_mb: Option<f64>,
    pub source_file: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomEvent {
    pub timestamp: i64,
    pub category: Category,
    pub payload: String,
    pub source_file: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    ActivityLifecycle,
    SearchPerformance,
    PerformanceSnapshot,
    ScrollAction,
    SearchDetailed,
    UiInteraction,
    StartupPhase,
    Other(String),
}

impl Category {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "ACTIVITY_LIFECYCLE" => Self::ActivityLifecycle,
            "SEARCH_PERFORMANCE" => Self::SearchPerformance,
            "PERFORMANCE_SNAPSHOT" => Self::PerformanceSnapshot,
            "SCROLL_ACTION" => Self::ScrollAction,
            "SEARCH_DETAILED" => Self::SearchDetailed,
            "UI_INTERACTION" => Self::UiInteraction,
            "STARTUP_PHASE" => Self::StartupPhase,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ActivityLifecycle => "ACTIVITY_LIFECYCLE",
            Self::SearchPerformance => "SEARCH_PERFORMANCE",
            Self::PerformanceSnapshot => "PERFORMANCE_SNAPSHOT",
            Self::ScrollAction => "SCROLL_ACTION",
            Self::SearchDetailed => "SEARCH_DETAILED",
            Self::UiInteraction => "UI_INTERACTION",
            Self::StartupPhase => "STARTUP_PHASE",
            Self::Other(tag) => tag,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl RawRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(|value| &**value)
    }
}

/// Converts a text field to a number. Anything that is not a finite number is
/// treated as missing rather than as an error.
pub fn coerce(text: Option<&str>) -> Option<f64> {
    text?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn classify(row: RawRow) -> LogRow {
    if row.get("uptime_ms").map(str::trim) == Some(CUSTOM_EVENT_MARKER) {
        return LogRow::CustomEvent(CustomEvent {
            timestamp: row.timestamp,
            category: Category::parse(row.get(CATEGORY_COLUMN).unwrap_or_default().trim()),
            payload: row.get(PAYLOAD_COLUMN).unwrap_or_default().to_owned(),
            source_file: row.source_file,
        });
    }

    let number = |column: &str| coerce(row.get(column));
    LogRow::PerformanceSample(PerformanceSample {
        timestamp: row.timestamp,
        uptime_ms: number("uptime_ms"),
        heap_used_mb: number("heap_used_mb"),
        heap_max_mb: number("heap_max_mb"),
        native_heap_mb: number("native_heap_mb"),
        cpu_usage_percent: number("cpu_usage_percent"),
        gc_count: number("gc_count"),
        thread_count: number("thread_count"),
        memory_class_mb: number("memory_class_mb"),
        large_memory_class_mb: number("large_memory_class_mb"),
        available_memory_mb: number("available_memory_mb"),
        total_memory_mb: number("total_memory_mb"),
        source_file: row.source_file,
    })
}

/// Splits rows into samples and events, keeping the input order of each.
pub fn partition(
    rows: impl IntoIterator<Item = RawRow>,
) -> (Vec<PerformanceSample>, Vec<CustomEvent>) {
    let mut samples = vec![];
    let mut events = vec![];
    for row in rows {
        match classify(row) {
            LogRow::PerformanceSample(sample) => samples.push(sample),
            LogRow::CustomEvent(event) => events.push(event),
        }
    }

    (samples, events)
}

impl PerformanceSample {
    /// Hour of day (UTC) of the sample.
    pub fn hour(&self) -> Option<u32> {
        DateTime::from_timestamp_millis(self.timestamp).map(|t| t.hour())
    }
}

#[cfg(test)]
pub fn raw_row(timestamp: i64, fields: &[(&str, &str)]) -> RawRow {
    RawRow {
        timestamp,
        source_file: "performance_test.csv".to_owned(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[test]
fn test_classify_is_total_and_disjoint() {
    let rows = vec![
        raw_row(1, &[("uptime_ms", "100"), ("heap_used_mb", "12.5")]),
        raw_row(
            2,
            &[
                ("uptime_ms", "CUSTOM_EVENT"),
                ("heap_used_mb", "SCROLL_ACTION"),
                ("native_heap_mb", "direction:up"),
            ],
        ),
        raw_row(3, &[("uptime_ms", "garbage")]),
        raw_row(4, &[]),
    ];
    let (samples, events) = partition(rows);
    assert_eq!(samples.len(), 3);
    assert_eq!(events.len(), 1);
    assert_eq!(
        samples.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
        [1, 3, 4]
    );
    assert_eq!(events[0].category, Category::ScrollAction);
    assert_eq!(events[0].payload, "direction:up");
}

#[test]
fn test_classify_keeps_unknown_category_verbatim() {
    let row = raw_row(
        5,
        &[
            ("uptime_ms", "CUSTOM_EVENT"),
            ("heap_used_mb", "MEMORY_EVENT"),
            ("native_heap_mb", "event:GC"),
        ],
    );
    let LogRow::CustomEvent(event) = classify(row) else {
        panic!("Expected a custom event");
    };
    assert_eq!(event.category, Category::Other("MEMORY_EVENT".to_owned()));
    assert_eq!(event.category.to_string(), "MEMORY_EVENT");
}

#[test]
fn test_coercion_failure_is_missing() {
    let row = raw_row(
        1,
        &[
            ("uptime_ms", "100"),
            ("heap_used_mb", "12.5"),
            ("cpu_usage_percent", "n/a"),
            ("thread_count", " 17 "),
            ("native_heap_mb", "nan"),
        ],
    );
    let LogRow::PerformanceSample(sample) = classify(row) else {
        panic!("Expected a performance sample");
    };
    assert_eq!(sample.heap_used_mb, Some(12.5));
    assert_eq!(sample.cpu_usage_percent, None);
    assert_eq!(sample.thread_count, Some(17.0));
    assert_eq!(sample.native_heap_mb, None);
    assert_eq!(sample.total_memory_mb, None);
}

#[test]
fn test_coercion_is_idempotent() {
    for text in ["0", "12.5", "-3.25", "1e3", "0.1", "123456.789"] {
        let once = coerce(Some(text));
        let twice = coerce(once.map(|v| v.to_string()).as_deref());
        assert_eq!(once, twice, "{text}");
    }
}

#[test]
fn test_hour_of_day() {
    let sample = PerformanceSample {
        // 2024-01-01T13:30:00Z
        timestamp: 1_704_115_800_000,
        ..Default::default()
    };
    assert_eq!(sample.hour(), Some(13));
}
