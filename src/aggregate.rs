use serde::Serialize;
use tracing::debug;

use crate::{
    config::Thresholds,
    decode::{decode, DecodedEvent, Snapshot},
    row::{Category, CustomEvent},
    summary::mean,
};

/// Per-category summaries of the custom events. A category without any
/// decoded event is `None`, and is left out when serialised.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateSummary {
    #[serde(rename = "ACTIVITY_LIFECYCLE", skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Vec<LabelCount>>,
    #[serde(rename = "SEARCH_PERFORMANCE", skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchSummary>,
    #[serde(rename = "SCROLL_ACTION", skip_serializing_if = "Option::is_none")]
    pub scroll: Option<Vec<ScrollSummary>>,
    #[serde(rename = "SEARCH_DETAILED", skip_serializing_if = "Option::is_none")]
    pub search_phases: Option<Vec<LabelCount>>,
    #[serde(rename = "UI_INTERACTION", skip_serializing_if = "Option::is_none")]
    pub ui: Option<Vec<TimingSummary>>,
    #[serde(rename = "STARTUP_PHASE", skip_serializing_if = "Option::is_none")]
    pub startup: Option<Vec<TimingSummary>>,
    #[serde(rename = "PERFORMANCE_SNAPSHOT", skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<Vec<SnapshotSummary>>,
    /// Events whose category has no dedicated summary, counted by tag.
    #[serde(rename = "OTHER", skip_serializing_if = "Option::is_none")]
    pub other: Option<Vec<LabelCount>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchSummary {
    pub count: usize,
    pub mean_ms: f64,
    pub max_ms: i64,
    pub slow: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScrollSummary {
    pub direction: String,
    pub count: usize,
    pub mean_velocity: f64,
}

/// UI interactions grouped by type, or startup phases grouped by phase.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimingSummary {
    pub name: String,
    pub count: usize,
    pub mean_ms: f64,
    pub max_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SnapshotSummary {
    pub context: String,
    pub count: usize,
    pub mean_memory_mb: f64,
    /// Only computed for contexts with at least two snapshots.
    pub delta: Option<DeltaSummary>,
    /// Snapshots whose `memory_delta` was absent or unparsable and counted as 0.
    pub defaulted_deltas: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeltaSummary {
    pub mean_mb: f64,
    pub max_mb: f64,
    pub notable: bool,
    pub large_increase: bool,
}

/// Values grouped by key, in order of each key's first occurrence.
struct Groups<V>(Vec<(String, Vec<V>)>);

impl<V> Default for Groups<V> {
    fn default() -> Self {
        Self(vec![])
    }
}

impl<V> Groups<V> {
    fn push(&mut self, key: &str, value: V) {
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value),
            None => self.0.push((key.to_owned(), vec![value])),
        }
    }

    /// `None` if there are no groups, so empty categories disappear.
    fn summarise<T>(self, f: impl FnMut((String, Vec<V>)) -> T) -> Option<Vec<T>> {
        (!self.0.is_empty()).then(|| self.0.into_iter().map(f).collect())
    }
}

fn count((label, values): (String, Vec<()>)) -> LabelCount {
    LabelCount {
        label,
        count: values.len(),
    }
}

fn timing((name, times): (String, Vec<i64>)) -> TimingSummary {
    TimingSummary {
        count: times.len(),
        mean_ms: times.iter().sum::<i64>() as f64 / times.len() as f64,
        max_ms: times.iter().copied().max().unwrap_or_default(),
        name,
    }
}

pub fn aggregate(events: &[CustomEvent], thresholds: &Thresholds) -> AggregateSummary {
    let mut lifecycle = Groups::default();
    let mut durations = vec![];
    let mut scroll = Groups::<f64>::default();
    let mut search_phases = Groups::default();
    let mut ui = Groups::default();
    let mut startup = Groups::default();
    let mut snapshots = Groups::<Snapshot>::default();
    let mut other = Groups::default();

    let mut dropped = 0usize;
    for event in events {
        let Some(decoded) = decode(event) else {
            dropped += 1;
            continue;
        };
        match decoded {
            DecodedEvent::ActivityLifecycle { label } => lifecycle.push(&label, ()),
            DecodedEvent::SearchPerformance { duration_ms } => durations.push(duration_ms),
            DecodedEvent::ScrollAction {
                direction,
                velocity,
            } => scroll.push(&direction, velocity),
            DecodedEvent::SearchDetailed { phase } => search_phases.push(&phase, ()),
            DecodedEvent::UiInteraction {
                kind,
                response_time_ms,
            } => ui.push(&kind, response_time_ms),
            DecodedEvent::StartupPhase { phase, time_ms } => startup.push(&phase, time_ms),
            DecodedEvent::PerformanceSnapshot(snapshot) => {
                snapshots.push(&snapshot.context.clone(), snapshot)
            }
            DecodedEvent::Other { category } => other.push(&category, ()),
        }
    }
    if dropped > 0 {
        debug!("Dropped {dropped} of {} custom events that did not decode", events.len());
    }

    let search = (!durations.is_empty()).then(|| {
        let mean_ms = durations.iter().sum::<i64>() as f64 / durations.len() as f64;
        SearchSummary {
            count: durations.len(),
            mean_ms,
            max_ms: durations.iter().copied().max().unwrap_or_default(),
            slow: mean_ms > thresholds.slow_search_ms,
        }
    });

    AggregateSummary {
        lifecycle: lifecycle.summarise(count),
        search,
        scroll: scroll.summarise(|(direction, velocities)| ScrollSummary {
            direction,
            count: velocities.len(),
            mean_velocity: mean(&velocities).unwrap_or_default(),
        }),
        search_phases: search_phases.summarise(count),
        ui: ui.summarise(timing),
        startup: startup.summarise(timing),
        snapshots: snapshots.summarise(|(context, snapshots)| {
            summarise_snapshots(context, &snapshots, thresholds)
        }),
        other: other.summarise(count),
    }
}

fn summarise_snapshots(
    context: String,
    snapshots: &[Snapshot],
    thresholds: &Thresholds,
) -> SnapshotSummary {
    let memory = snapshots.iter().map(|s| s.memory_mb).collect::<Vec<_>>();
    let deltas = snapshots.iter().map(|s| s.memory_delta).collect::<Vec<_>>();
    let delta = (snapshots.len() >= 2).then(|| {
        let mean_mb = mean(&deltas).unwrap_or_default();
        let max_mb = deltas.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        DeltaSummary {
            mean_mb,
            max_mb,
            notable: mean_mb.abs() > thresholds.notable_mean_delta_mb
                || max_mb.abs() > thresholds.notable_max_delta_mb,
            large_increase: max_mb > thresholds.large_increase_mb,
        }
    });

    SnapshotSummary {
        count: snapshots.len(),
        mean_memory_mb: mean(&memory).unwrap_or_default(),
        delta,
        defaulted_deltas: snapshots
            .iter()
            .filter(|s| s.defaulted.contains(&"memory_delta"))
            .count(),
        context,
    }
}

impl AggregateSummary {
    pub fn contains(&self, category: &Category) -> bool {
        match category {
            Category::ActivityLifecycle => self.lifecycle.is_some(),
            Category::SearchPerformance => self.search.is_some(),
            Category::PerformanceSnapshot => self.snapshots.is_some(),
            Category::ScrollAction => self.scroll.is_some(),
            Category::SearchDetailed => self.search_phases.is_some(),
            Category::UiInteraction => self.ui.is_some(),
            Category::StartupPhase => self.startup.is_some(),
            Category::Other(tag) => self
                .other
                .iter()
                .flatten()
                .any(|entry| &entry.label == tag),
        }
    }
}

#[cfg(test)]
use crate::decode::custom_event;

#[test]
fn test_scroll_mean_velocity() {
    let events = [
        custom_event(1, "SCROLL_ACTION", "direction:up,velocity:5.0"),
        custom_event(2, "SCROLL_ACTION", "direction:up,velocity:7.0"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    assert_eq!(
        summary.scroll,
        Some(vec![ScrollSummary {
            direction: "up".to_owned(),
            count: 2,
            mean_velocity: 6.0,
        }])
    );
}

#[test]
fn test_empty_categories_are_omitted() -> jane_eyre::eyre::Result<()> {
    let events = [
        custom_event(1, "SEARCH_DETAILED", "query_length:3,phase:SEARCH_START,results:0"),
        custom_event(2, "ACTIVITY_LIFECYCLE", "MainActivity:onCreate"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    assert!(!summary.contains(&Category::UiInteraction));
    assert!(summary.ui.is_none());
    assert!(summary.contains(&Category::SearchDetailed));

    let json = serde_json::to_value(&summary)?;
    assert!(json.get("UI_INTERACTION").is_none());
    assert!(json.get("SEARCH_DETAILED").is_some());
    Ok(())
}

#[test]
fn test_groups_keep_first_occurrence_order() {
    let events = [
        custom_event(1, "SEARCH_DETAILED", "phase:SEARCH_TYPING"),
        custom_event(2, "SEARCH_DETAILED", "phase:SEARCH_START"),
        custom_event(3, "SEARCH_DETAILED", "phase:SEARCH_TYPING"),
        custom_event(4, "SEARCH_DETAILED", "phase:SEARCH_COMPLETE"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    let phases = summary.search_phases.unwrap_or_default();
    assert_eq!(
        phases
            .iter()
            .map(|p| (&*p.label, p.count))
            .collect::<Vec<_>>(),
        [("SEARCH_TYPING", 2), ("SEARCH_START", 1), ("SEARCH_COMPLETE", 1)]
    );
}

#[test]
fn test_search_performance_skips_undecodable_durations() {
    let events = [
        custom_event(1, "SEARCH_PERFORMANCE", "query:a,duration:80ms,results:2"),
        custom_event(2, "SEARCH_PERFORMANCE", "query:b,duration:160ms,results:9"),
        custom_event(3, "SEARCH_PERFORMANCE", "query:c,duration:abc"),
        custom_event(4, "SEARCH_PERFORMANCE", "query:d"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    let search = summary.search.expect("two durations decode");
    assert_eq!(search.count, 2);
    assert!(search.count <= events.len());
    assert_eq!(search.mean_ms, 120.0);
    assert_eq!(search.max_ms, 160);
    assert!(search.slow);

    let lenient = Thresholds {
        slow_search_ms: 150.0,
        ..Default::default()
    };
    assert_eq!(aggregate(&events, &lenient).search.map(|s| s.slow), Some(false));
}

#[test]
fn test_ui_interaction_timings() {
    let events = [
        custom_event(1, "UI_INTERACTION", "type:CLICK,target:a,response_time:10ms"),
        custom_event(2, "UI_INTERACTION", "type:SWIPE,target:b,response_time:50ms"),
        custom_event(3, "UI_INTERACTION", "type:CLICK,target:c,response_time:30ms"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    assert_eq!(
        summary.ui,
        Some(vec![
            TimingSummary {
                name: "CLICK".to_owned(),
                count: 2,
                mean_ms: 20.0,
                max_ms: 30,
            },
            TimingSummary {
                name: "SWIPE".to_owned(),
                count: 1,
                mean_ms: 50.0,
                max_ms: 50,
            },
        ])
    );
}

#[test]
fn test_snapshot_flags() {
    let snapshot = |t, context: &str, delta: &str| {
        custom_event(
            t,
            "PERFORMANCE_SNAPSHOT",
            &format!("context:{context},memory_mb:30.0,memory_delta:{delta},threads:12,action:IDLE"),
        )
    };
    let events = [
        snapshot(1, "UI_RESPONSE", "0.5"),
        snapshot(2, "SEARCH_START", "2.0"),
        snapshot(3, "UI_RESPONSE", "-0.5"),
        snapshot(4, "SEARCH_START", "12.0"),
        snapshot(5, "STARTUP_onCreate", "40.0"),
        snapshot(6, "UI_RESPONSE", "oops"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    let snapshots = summary.snapshots.expect("snapshots decode");
    assert_eq!(
        snapshots.iter().map(|s| &*s.context).collect::<Vec<_>>(),
        ["UI_RESPONSE", "SEARCH_START", "STARTUP_onCreate"]
    );

    let ui = &snapshots[0];
    assert_eq!(ui.count, 3);
    assert_eq!(ui.defaulted_deltas, 1);
    let delta = ui.delta.as_ref().expect("three snapshots");
    assert!(!delta.notable);
    assert!(!delta.large_increase);

    let search = snapshots[1].delta.as_ref().expect("two snapshots");
    assert_eq!(search.mean_mb, 7.0);
    assert_eq!(search.max_mb, 12.0);
    assert!(search.notable);
    assert!(search.large_increase);

    // A single snapshot has no delta statistics.
    assert_eq!(snapshots[2].count, 1);
    assert_eq!(snapshots[2].delta, None);
}

#[test]
fn test_other_categories_are_counted() {
    let events = [
        custom_event(1, "MEMORY_EVENT", "event:GC,change:-512KB"),
        custom_event(2, "APP_STATE_CHANGE", "new_state:BACKGROUND,transition_time:5ms"),
        custom_event(3, "MEMORY_EVENT", "event:ALLOC,change:128KB"),
        custom_event(4, "STARTUP_PHASE", "phase:INIT,time:120ms"),
    ];
    let summary = aggregate(&events, &Thresholds::default());
    assert!(summary.contains(&Category::Other("MEMORY_EVENT".to_owned())));
    assert!(!summary.contains(&Category::Other("ACTION_PATTERN".to_owned())));
    assert_eq!(
        summary.other,
        Some(vec![
            LabelCount {
                label: "MEMORY_EVENT".to_owned(),
                count: 2
            },
            LabelCount {
                label: "APP_STATE_CHANGE".to_owned(),
                count: 1
            },
        ])
    );
    assert_eq!(
        summary.startup.map(|s| s[0].max_ms),
        Some(120)
    );
}
