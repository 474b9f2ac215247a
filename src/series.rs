use serde::Serialize;

use crate::{
    config::ChartConfig,
    decode::{decode, DecodedEvent},
    row::{Category, CustomEvent, PerformanceSample},
};

/// Everything the charts need, already sorted by time. Points with a
/// missing value are left out of the series for that metric.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub heap_used: Vec<(i64, f64)>,
    pub heap_max: Vec<(i64, f64)>,
    pub native_heap: Vec<(i64, f64)>,
    pub available_memory: Vec<(i64, f64)>,
    pub cpu: Vec<(i64, f64)>,
    pub threads: Vec<(i64, f64)>,
    /// (heap used MB, CPU %) for samples that have both.
    pub heap_vs_cpu: Vec<(f64, f64)>,
    pub cpu_histogram: Vec<Bin>,
    pub ui_response_histogram: Vec<Bin>,
    /// Event timestamps per category, in order of each category's first event.
    pub markers: Vec<(Category, Vec<i64>)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

impl ChartSeries {
    /// `samples` must already be sorted by timestamp.
    pub fn build(
        samples: &[PerformanceSample],
        events: &[CustomEvent],
        charts: &ChartConfig,
    ) -> Self {
        let series = |getter: fn(&PerformanceSample) -> Option<f64>| {
            samples
                .iter()
                .filter_map(|s| getter(s).map(|value| (s.timestamp, value)))
                .collect::<Vec<_>>()
        };

        let mut markers: Vec<(Category, Vec<i64>)> = vec![];
        let mut events = events.to_vec();
        events.sort_by_key(|e| e.timestamp);
        for event in &events {
            match markers.iter_mut().find(|(c, _)| c == &event.category) {
                Some((_, timestamps)) => timestamps.push(event.timestamp),
                None => markers.push((event.category.clone(), vec![event.timestamp])),
            }
        }

        let cpu = series(|s| s.cpu_usage_percent);
        let response_times = events
            .iter()
            .filter_map(|e| match decode(e) {
                Some(DecodedEvent::UiInteraction {
                    response_time_ms, ..
                }) => Some(response_time_ms as f64),
                _ => None,
            })
            .collect::<Vec<_>>();

        Self {
            heap_used: series(|s| s.heap_used_mb),
            heap_max: series(|s| s.heap_max_mb),
            native_heap: series(|s| s.native_heap_mb),
            available_memory: series(|s| s.available_memory_mb),
            threads: series(|s| s.thread_count),
            heap_vs_cpu: samples
                .iter()
                .filter_map(|s| s.heap_used_mb.zip(s.cpu_usage_percent))
                .collect(),
            cpu_histogram: histogram(
                cpu.iter().map(|&(_, value)| value),
                charts.cpu_histogram_bins,
            ),
            ui_response_histogram: histogram(response_times, charts.ui_histogram_bins),
            cpu,
            markers,
        }
    }

    pub fn markers(&self, category: &Category) -> &[i64] {
        self.markers
            .iter()
            .find(|(c, _)| c == category)
            .map_or(&[][..], |(_, timestamps)| timestamps.as_slice())
    }

    /// Earliest sample timestamp, the origin of the time axis.
    pub fn origin(&self) -> Option<i64> {
        [&self.heap_used, &self.cpu, &self.threads]
            .into_iter()
            .filter_map(|series| series.first().map(|&(t, _)| t))
            .min()
    }
}

/// Equal-width bins over the observed range. A range of zero width gets a
/// single bin.
pub fn histogram(values: impl IntoIterator<Item = f64>, bins: usize) -> Vec<Bin> {
    let values = values.into_iter().collect::<Vec<_>>();
    let (Some(min), Some(max)) = (
        values.iter().cloned().min_by(|p, q| p.total_cmp(q)),
        values.iter().cloned().max_by(|p, q| p.total_cmp(q)),
    ) else {
        return vec![];
    };
    if bins == 0 {
        return vec![];
    }
    if max == min {
        return vec![Bin {
            lower: min,
            upper: max,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut result = (0..bins)
        .map(|i| Bin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect::<Vec<_>>();
    for value in values {
        let index = (((value - min) / width) as usize).min(bins - 1);
        result[index].count += 1;
    }

    result
}

#[test]
fn test_histogram() {
    let bins = histogram([0.0, 1.0, 2.0, 9.9, 10.0], 5);
    assert_eq!(
        bins.iter().map(|b| b.count).collect::<Vec<_>>(),
        [2, 1, 0, 0, 2]
    );
    assert_eq!(bins[0].lower, 0.0);
    assert_eq!(bins[4].upper, 10.0);

    assert_eq!(histogram([3.0, 3.0], 30).len(), 1);
    assert!(histogram([], 30).is_empty());
}

#[test]
fn test_build_series() {
    use crate::decode::custom_event;

    let samples = [
        PerformanceSample {
            timestamp: 10,
            heap_used_mb: Some(20.0),
            cpu_usage_percent: Some(5.0),
            ..Default::default()
        },
        PerformanceSample {
            timestamp: 20,
            heap_used_mb: Some(22.0),
            ..Default::default()
        },
    ];
    let events = [
        custom_event(15, "SCROLL_ACTION", "direction:up,velocity:1.0"),
        custom_event(12, "UI_INTERACTION", "type:CLICK,response_time:30ms"),
        custom_event(18, "SCROLL_ACTION", "direction:down,velocity:1.0"),
    ];
    let series = ChartSeries::build(&samples, &events, &ChartConfig::default());
    assert_eq!(series.heap_used, [(10, 20.0), (20, 22.0)]);
    assert_eq!(series.cpu, [(10, 5.0)]);
    assert_eq!(series.heap_vs_cpu, [(20.0, 5.0)]);
    assert_eq!(series.markers(&Category::ScrollAction), [15, 18]);
    assert!(series.markers(&Category::SearchDetailed).is_empty());
    assert_eq!(series.markers[0].0, Category::UiInteraction);
    assert_eq!(series.ui_response_histogram.len(), 1);
    assert_eq!(series.origin(), Some(10));
}
