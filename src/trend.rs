use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    config::Thresholds,
    row::PerformanceSample,
    summary::{mean, moving_average, stdev, Analysis, Summary},
};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrendReport {
    pub heap: Option<Summary<f64>>,
    pub native_heap: Option<Summary<f64>>,
    pub cpu: Option<Summary<f64>>,
    pub threads: Option<Summary<f64>>,
    /// `None` when there are too few heap values for a single moving-average window.
    pub memory_trend: Option<MemoryTrend>,
    pub high_cpu: HighCpu,
    pub memory_spikes: Vec<Spike>,
    pub cpu_spikes: Vec<Spike>,
    pub hourly: Vec<HourlyUsage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Growing,
    Unstable,
    Stable,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HighCpu {
    pub threshold_percent: f64,
    pub count: usize,
    pub percentage: f64,
}

/// A jump between two adjacent samples, reported at the later one.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Spike {
    pub timestamp: i64,
    pub delta: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HourlyUsage {
    pub hour: u32,
    pub mean_cpu_percent: Option<f64>,
    pub mean_heap_mb: Option<f64>,
}

/// Samples sorted by timestamp. The sort is stable, so samples with equal
/// timestamps keep their input order.
pub fn sorted(samples: &[PerformanceSample]) -> Vec<PerformanceSample> {
    let mut result = samples.to_vec();
    result.sort_by_key(|s| s.timestamp);
    result
}

pub fn analyze(samples: &[PerformanceSample], thresholds: &Thresholds) -> TrendReport {
    let samples = sorted(samples);
    let analysis = Analysis { samples: &samples };
    let heap = samples.iter().map(|s| s.heap_used_mb).collect::<Vec<_>>();
    let cpu = samples.iter().map(|s| s.cpu_usage_percent).collect::<Vec<_>>();

    let high_cpu_count = cpu
        .iter()
        .flatten()
        .filter(|&&x| x > thresholds.high_cpu_percent)
        .count();

    TrendReport {
        heap: analysis.summary(|s| s.heap_used_mb).ok(),
        native_heap: analysis.summary(|s| s.native_heap_mb).ok(),
        cpu: analysis.summary(|s| s.cpu_usage_percent).ok(),
        threads: analysis.summary(|s| s.thread_count).ok(),
        memory_trend: classify_memory_trend(&heap, thresholds),
        high_cpu: HighCpu {
            threshold_percent: thresholds.high_cpu_percent,
            count: high_cpu_count,
            percentage: if samples.is_empty() {
                0.0
            } else {
                high_cpu_count as f64 / samples.len() as f64 * 100.0
            },
        },
        memory_spikes: spikes(&samples, &heap, thresholds.memory_spike_mb),
        cpu_spikes: spikes(&samples, &cpu, thresholds.cpu_spike_percent),
        hourly: hourly(&samples),
    }
}

pub fn classify_memory_trend(heap: &[Option<f64>], thresholds: &Thresholds) -> Option<MemoryTrend> {
    let averages = moving_average(heap, thresholds.moving_average_window);
    let trend = averages.iter().flatten().cloned().collect::<Vec<_>>();
    let first = *trend.first()?;

    // Growth compares against the final window, which is undefined if it has a gap.
    if let Some(Some(last)) = averages.last() {
        if *last > first * thresholds.growth_ratio {
            return Some(MemoryTrend::Growing);
        }
    }
    // NaN (a single window) never compares greater, so that case is stable.
    if stdev(&trend) > mean(&trend)? * thresholds.instability_ratio {
        return Some(MemoryTrend::Unstable);
    }

    Some(MemoryTrend::Stable)
}

/// Adjacent-pair differences whose magnitude exceeds `threshold`. A pair with
/// a missing value on either side has no difference.
pub fn spikes(samples: &[PerformanceSample], values: &[Option<f64>], threshold: f64) -> Vec<Spike> {
    values
        .windows(2)
        .zip(samples.iter().skip(1))
        .filter_map(|(pair, later)| {
            let delta = pair[1]? - pair[0]?;
            (delta.abs() > threshold).then_some(Spike {
                timestamp: later.timestamp,
                delta,
            })
        })
        .collect()
}

fn hourly(samples: &[PerformanceSample]) -> Vec<HourlyUsage> {
    let mut by_hour: BTreeMap<u32, Vec<&PerformanceSample>> = BTreeMap::default();
    for sample in samples {
        if let Some(hour) = sample.hour() {
            by_hour.entry(hour).or_default().push(sample);
        }
    }

    by_hour
        .into_iter()
        .map(|(hour, samples)| {
            let cpu = samples
                .iter()
                .filter_map(|s| s.cpu_usage_percent)
                .collect::<Vec<_>>();
            let heap = samples
                .iter()
                .filter_map(|s| s.heap_used_mb)
                .collect::<Vec<_>>();
            HourlyUsage {
                hour,
                mean_cpu_percent: mean(&cpu),
                mean_heap_mb: mean(&heap),
            }
        })
        .collect()
}

#[cfg(test)]
fn sample(timestamp: i64, heap: f64, cpu: f64) -> PerformanceSample {
    PerformanceSample {
        timestamp,
        heap_used_mb: Some(heap),
        cpu_usage_percent: Some(cpu),
        thread_count: Some(10.0),
        source_file: "performance_test.csv".to_owned(),
        ..Default::default()
    }
}

#[test]
fn test_single_memory_spike() {
    let samples = [sample(1000, 10.0, 5.0), sample(2000, 25.0, 5.0), sample(3000, 24.0, 5.0)];
    let report = analyze(&samples, &Thresholds::default());
    assert_eq!(
        report.memory_spikes,
        [Spike {
            timestamp: 2000,
            delta: 15.0
        }]
    );
    assert!(report.cpu_spikes.is_empty());
}

#[test]
fn test_spikes_use_sorted_order_and_skip_missing() {
    let mut gap = sample(2500, 0.0, 90.0);
    gap.heap_used_mb = None;
    let samples = [
        sample(3000, 40.0, 10.0),
        sample(1000, 10.0, 10.0),
        gap,
        sample(2000, 12.0, 50.0),
    ];
    let report = analyze(&samples, &Thresholds::default());
    // Sorted heap: 10, 12, -, 40. The gap hides the jump to 40.
    assert!(report.memory_spikes.is_empty());
    // Sorted CPU: 10, 50, 90, 10.
    assert_eq!(
        report.cpu_spikes,
        [
            Spike {
                timestamp: 2000,
                delta: 40.0
            },
            Spike {
                timestamp: 2500,
                delta: 40.0
            },
            Spike {
                timestamp: 3000,
                delta: -80.0
            },
        ]
    );
    assert_eq!(report.high_cpu.count, 1);
    assert_eq!(report.high_cpu.percentage, 25.0);
}

#[test]
fn test_memory_trend_classification() {
    let thresholds = Thresholds {
        moving_average_window: 2,
        ..Default::default()
    };
    let series = |xs: &[f64]| xs.iter().map(|&x| Some(x)).collect::<Vec<_>>();

    assert_eq!(
        classify_memory_trend(&series(&[10.0, 10.0, 20.0, 30.0]), &thresholds),
        Some(MemoryTrend::Growing)
    );
    assert_eq!(
        classify_memory_trend(&series(&[10.0, 10.0, 50.0, 50.0, 10.0, 10.0]), &thresholds),
        Some(MemoryTrend::Unstable)
    );
    assert_eq!(
        classify_memory_trend(&series(&[20.0, 21.0, 20.0, 21.0, 20.0]), &thresholds),
        Some(MemoryTrend::Stable)
    );
    assert_eq!(classify_memory_trend(&series(&[20.0]), &thresholds), None);
}

#[test]
fn test_memory_trend_needs_a_defined_final_window_to_grow() {
    let thresholds = Thresholds {
        moving_average_window: 2,
        ..Default::default()
    };
    let heap = [Some(10.0), Some(10.0), Some(30.0), Some(30.0), None];
    assert_eq!(
        classify_memory_trend(&heap, &thresholds),
        Some(MemoryTrend::Unstable)
    );
    assert_eq!(
        classify_memory_trend(&heap[..4], &thresholds),
        Some(MemoryTrend::Growing)
    );
}

#[test]
fn test_trend_ignores_order_of_equal_timestamps() {
    let thresholds = Thresholds {
        moving_average_window: 3,
        ..Default::default()
    };
    let mut samples = (0..12)
        .map(|i| sample(i / 2 * 1000, 20.0 + i as f64, 5.0))
        .collect::<Vec<_>>();
    let before = analyze(&samples, &thresholds).memory_trend;
    samples.reverse();
    let after = analyze(&samples, &thresholds).memory_trend;
    assert_eq!(before, after);
    assert_eq!(before, Some(MemoryTrend::Growing));
}

#[test]
fn test_hourly_breakdown() {
    // 2024-01-01T00:00:00Z
    let midnight = 1_704_067_200_000;
    let hour = 3_600_000;
    let samples = [
        sample(midnight + 2 * hour, 30.0, 20.0),
        sample(midnight + 2 * hour + 60_000, 50.0, 40.0),
        sample(midnight, 10.0, 10.0),
    ];
    let report = analyze(&samples, &Thresholds::default());
    assert_eq!(
        report.hourly,
        [
            HourlyUsage {
                hour: 0,
                mean_cpu_percent: Some(10.0),
                mean_heap_mb: Some(10.0),
            },
            HourlyUsage {
                hour: 2,
                mean_cpu_percent: Some(30.0),
                mean_heap_mb: Some(40.0),
            },
        ]
    );
}

#[test]
fn test_metric_summaries() {
    let samples = [sample(1, 10.0, 20.0), sample(2, 30.0, 40.0)];
    let report = analyze(&samples, &Thresholds::default());
    let heap = report.heap.expect("heap values present");
    assert_eq!((heap.min, heap.max, heap.mean), (10.0, 30.0, 20.0));
    assert_eq!(report.native_heap, None);
    assert_eq!(report.threads.map(|t| t.mean), Some(10.0));
}
