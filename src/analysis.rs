use std::fmt::Display;

use chrono::{DateTime, Utc};
use jane_eyre::eyre;
use serde::Serialize;
use tracing::info;

use crate::{
    aggregate::{aggregate, AggregateSummary},
    config::{Config, Thresholds},
    row::{partition, RawRow},
    series::ChartSeries,
    summary::Analysis,
    trend::{analyze, sorted, TrendReport},
};

/// There was nothing to analyse. This is the only fatal input condition.
#[derive(Debug)]
pub struct MissingInput {
    pub rows: usize,
}

impl Display for MissingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.rows == 0 {
            write!(f, "No log rows to analyse")
        } else {
            write!(
                f,
                "No performance samples among {} log rows to analyse",
                self.rows
            )
        }
    }
}

impl std::error::Error for MissingInput {}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub sample_count: usize,
    pub event_count: usize,
    pub time_range: TimeRange,
    pub heap: HeapOverview,
    pub mean_cpu_percent: Option<f64>,
    pub mean_thread_count: Option<f64>,
    pub recommendations: Recommendations,
    pub trend: TrendReport,
    pub events: AggregateSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeapOverview {
    pub mean_mb: Option<f64>,
    pub max_mb: Option<f64>,
    pub min_mb: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Recommendations {
    pub high_heap: bool,
    pub high_cpu: bool,
    pub many_threads: bool,
}

pub struct Assembled {
    pub result: AnalysisResult,
    pub series: ChartSeries,
}

/// Runs the whole analysis over one batch of rows.
#[tracing::instrument(level = "error", skip_all, fields(rows = rows.len()))]
pub fn assemble(rows: Vec<RawRow>, config: &Config) -> eyre::Result<Assembled> {
    let row_count = rows.len();
    let (samples, events) = partition(rows);
    if samples.is_empty() {
        return Err(MissingInput { rows: row_count }.into());
    }
    info!(
        samples = samples.len(),
        events = events.len(),
        "Analysing"
    );

    let samples = sorted(&samples);
    let trend = analyze(&samples, &config.thresholds);
    let summary = aggregate(&events, &config.thresholds);
    let series = ChartSeries::build(&samples, &events, &config.charts);

    let analysis = Analysis { samples: &samples };
    let heap = HeapOverview {
        mean_mb: trend.heap.as_ref().map(|s| s.mean),
        max_mb: trend.heap.as_ref().map(|s| s.max),
        min_mb: trend.heap.as_ref().map(|s| s.min),
    };
    let mean_cpu_percent = analysis.mean(|s| s.cpu_usage_percent);
    let mean_thread_count = analysis.mean(|s| s.thread_count);
    let recommendations = Recommendations::new(
        &config.thresholds,
        heap.max_mb,
        mean_cpu_percent,
        trend.threads.as_ref().map(|s| s.max),
    );

    let result = AnalysisResult {
        sample_count: samples.len(),
        event_count: events.len(),
        time_range: TimeRange {
            start_ms: samples.first().map_or(0, |s| s.timestamp),
            end_ms: samples.last().map_or(0, |s| s.timestamp),
        },
        heap,
        mean_cpu_percent,
        mean_thread_count,
        recommendations,
        trend,
        events: summary,
    };

    Ok(Assembled { result, series })
}

impl Recommendations {
    fn new(
        thresholds: &Thresholds,
        max_heap_mb: Option<f64>,
        mean_cpu_percent: Option<f64>,
        max_threads: Option<f64>,
    ) -> Self {
        let above = |value: Option<f64>, limit: f64| value.is_some_and(|value| value > limit);
        Self {
            high_heap: above(max_heap_mb, thresholds.heap_warning_mb),
            high_cpu: above(mean_cpu_percent, thresholds.mean_cpu_warning_percent),
            many_threads: above(max_threads, thresholds.thread_warning_count),
        }
    }

    pub fn any(&self) -> bool {
        self.high_heap || self.high_cpu || self.many_threads
    }
}

impl TimeRange {
    pub fn fmt_ms(timestamp: i64) -> String {
        DateTime::<Utc>::from_timestamp_millis(timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| format!("{timestamp}ms"))
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ~ {}",
            Self::fmt_ms(self.start_ms),
            Self::fmt_ms(self.end_ms)
        )
    }
}

#[cfg(test)]
use crate::row::raw_row;

#[cfg(test)]
fn sample_row(timestamp: i64, heap: &str, cpu: &str, threads: &str) -> RawRow {
    raw_row(
        timestamp,
        &[
            ("uptime_ms", "1000"),
            ("heap_used_mb", heap),
            ("heap_max_mb", "256.0"),
            ("native_heap_mb", "8.0"),
            ("cpu_usage_percent", cpu),
            ("thread_count", threads),
            ("available_memory_mb", "1024.0"),
        ],
    )
}

#[cfg(test)]
fn event_row(timestamp: i64, category: &str, payload: &str) -> RawRow {
    raw_row(
        timestamp,
        &[
            ("uptime_ms", "CUSTOM_EVENT"),
            ("heap_used_mb", category),
            ("native_heap_mb", payload),
        ],
    )
}

#[test]
fn test_empty_input_is_missing_input() {
    let error = assemble(vec![], &Config::default())
        .err()
        .expect("empty input must fail");
    let missing = error
        .downcast_ref::<MissingInput>()
        .expect("error is MissingInput");
    assert_eq!(missing.rows, 0);
}

#[test]
fn test_events_without_samples_is_missing_input() {
    let rows = vec![event_row(1, "SCROLL_ACTION", "direction:up,velocity:1.0")];
    let error = assemble(rows, &Config::default())
        .err()
        .expect("event-only input must fail");
    assert!(error.downcast_ref::<MissingInput>().is_some());
}

#[test]
fn test_assemble() -> eyre::Result<()> {
    let rows = vec![
        sample_row(3000, "120.0", "60.0", "25"),
        sample_row(1000, "40.0", "50.0", "12"),
        event_row(1500, "SCROLL_ACTION", "direction:up,velocity:5.0"),
        event_row(1600, "SCROLL_ACTION", "direction:up,velocity:7.0"),
        sample_row(2000, "55.0", "bad", "14"),
    ];
    let Assembled { result, series } = assemble(rows, &Config::default())?;
    assert_eq!(result.sample_count, 3);
    assert_eq!(result.event_count, 2);
    assert_eq!(
        result.time_range,
        TimeRange {
            start_ms: 1000,
            end_ms: 3000
        }
    );
    assert_eq!(result.heap.max_mb, Some(120.0));
    assert_eq!(result.heap.min_mb, Some(40.0));
    assert_eq!(result.mean_cpu_percent, Some(55.0));
    assert_eq!(result.mean_thread_count, Some(17.0));
    assert_eq!(
        result.recommendations,
        Recommendations {
            high_heap: true,
            high_cpu: true,
            many_threads: true,
        }
    );
    assert_eq!(result.trend.memory_spikes.len(), 2);
    assert!(result.events.scroll.is_some());
    assert!(result.events.ui.is_none());
    assert_eq!(series.heap_used.first(), Some(&(1000, 40.0)));
    Ok(())
}

#[test]
fn test_quiet_run_has_no_recommendations() -> eyre::Result<()> {
    let rows = (0..5)
        .map(|i| sample_row(i * 1000, "30.0", "10.0", "8"))
        .collect();
    let Assembled { result, .. } = assemble(rows, &Config::default())?;
    assert!(!result.recommendations.any());
    assert!(result.trend.memory_spikes.is_empty());
    Ok(())
}

#[test]
fn test_time_range_display() {
    let range = TimeRange {
        start_ms: 1_704_067_200_000,
        end_ms: 1_704_067_201_500,
    };
    assert_eq!(
        range.to_string(),
        "2024-01-01 00:00:00.000 ~ 2024-01-01 00:00:01.500"
    );
}
