//! Decoding of custom event payloads.
//!
//! Payloads are comma-separated `key:value` pairs, except for the legacy
//! `SEARCH_PERFORMANCE` and `ACTIVITY_LIFECYCLE` events. Decoding is lenient
//! per pair and strict per payload: a value that does not coerce falls back to
//! its default, and a pair with no key is skipped, but a payload with damaged
//! encoding drops the whole event.

use std::{collections::BTreeMap, fmt::Display};

use serde::Serialize;
use tracing::trace;

use crate::row::{Category, CustomEvent};

pub static UNKNOWN: &'static str = "UNKNOWN";

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    ActivityLifecycle { label: String },
    SearchPerformance { duration_ms: i64 },
    ScrollAction { direction: String, velocity: f64 },
    SearchDetailed { phase: String },
    UiInteraction { kind: String, response_time_ms: i64 },
    StartupPhase { phase: String, time_ms: i64 },
    PerformanceSnapshot(Snapshot),
    Other { category: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub context: String,
    pub memory_mb: f64,
    pub memory_delta: f64,
    pub threads: i64,
    pub action: String,
    /// Numeric fields that were absent or unparsable and hold their default.
    pub defaulted: Vec<&'static str>,
}

/// A field value together with whether it actually came from the payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Lenient<T> {
    pub value: T,
    pub ok: bool,
}

/// The `key:value` pairs of a payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Fields(BTreeMap<String, String>);

/// The payload text itself is damaged. Odd pairs are skipped, not fatal.
#[derive(Clone, Debug, PartialEq)]
pub enum MalformedPayload {
    Encoding,
}

impl Display for MalformedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding => write!(f, "payload contains replacement or control characters"),
        }
    }
}

impl std::error::Error for MalformedPayload {}

impl Fields {
    pub fn parse(payload: &str) -> Result<Self, MalformedPayload> {
        if payload.chars().any(|c| {
            c == char::REPLACEMENT_CHARACTER || (c.is_control() && !c.is_whitespace())
        }) {
            return Err(MalformedPayload::Encoding);
        }

        let mut result = BTreeMap::default();
        for piece in payload.split(",") {
            let Some((key, value)) = piece.split_once(":") else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                trace!(?piece, "Skipping pair with an empty key");
                continue;
            }
            result.insert(key.to_owned(), value.trim().to_owned());
        }

        Ok(Self(result))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|value| &**value)
    }

    pub fn string(&self, key: &str) -> Lenient<String> {
        match self.get(key) {
            Some(value) => Lenient {
                value: value.to_owned(),
                ok: true,
            },
            None => Lenient {
                value: UNKNOWN.to_owned(),
                ok: false,
            },
        }
    }

    pub fn float(&self, key: &str) -> Lenient<f64> {
        match self.get(key).and_then(|v| v.parse::<f64>().ok()) {
            Some(value) if value.is_finite() => Lenient { value, ok: true },
            _ => Lenient {
                value: 0.0,
                ok: false,
            },
        }
    }

    pub fn integer(&self, key: &str) -> Lenient<i64> {
        match self.get(key).and_then(parse_integer) {
            Some(value) => Lenient { value, ok: true },
            None => Lenient { value: 0, ok: false },
        }
    }

    /// Like [Fields::integer], for values written with an `ms` unit suffix.
    pub fn millis(&self, key: &str) -> Lenient<i64> {
        match self.get(key).and_then(|v| parse_integer(strip_ms(v))) {
            Some(value) => Lenient { value, ok: true },
            None => Lenient { value: 0, ok: false },
        }
    }
}

fn strip_ms(value: &str) -> &str {
    value.strip_suffix("ms").unwrap_or(value).trim()
}

/// Parses an integer, also accepting integral float text like `12.0`.
fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(value) = text.parse::<i64>() {
        return Some(value);
    }
    let value = text.parse::<f64>().ok()?;
    (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
        .then_some(value as i64)
}

/// Extracts the duration from a `SEARCH_PERFORMANCE` payload such as
/// `query:abc,duration:123ms,results:4`.
pub fn legacy_duration(payload: &str) -> Option<i64> {
    let (_, rest) = payload.split_once("duration:")?;
    let duration = match rest.find("ms") {
        Some(end) => &rest[..end],
        None => rest,
    };

    duration.trim().parse().ok()
}

pub fn decode(event: &CustomEvent) -> Option<DecodedEvent> {
    let result = match &event.category {
        Category::SearchPerformance => legacy_duration(&event.payload)
            .map(|duration_ms| DecodedEvent::SearchPerformance { duration_ms }),
        Category::ActivityLifecycle => {
            let label = event.payload.trim();
            (!label.is_empty()).then(|| DecodedEvent::ActivityLifecycle {
                label: label.to_owned(),
            })
        }
        Category::Other(category) => Some(DecodedEvent::Other {
            category: category.clone(),
        }),
        category => match Fields::parse(&event.payload) {
            Ok(fields) => Some(decode_fields(category, &fields)),
            Err(error) => {
                trace!(timestamp = event.timestamp, %category, "Dropping event: {error}");
                return None;
            }
        },
    };
    if result.is_none() {
        trace!(timestamp = event.timestamp, category = %event.category, payload = ?event.payload, "Event did not decode");
    }

    result
}

fn decode_fields(category: &Category, fields: &Fields) -> DecodedEvent {
    match category {
        Category::ScrollAction => DecodedEvent::ScrollAction {
            direction: fields.string("direction").value,
            velocity: fields.float("velocity").value,
        },
        Category::SearchDetailed => DecodedEvent::SearchDetailed {
            phase: fields.string("phase").value,
        },
        Category::UiInteraction => DecodedEvent::UiInteraction {
            kind: fields.string("type").value,
            response_time_ms: fields.millis("response_time").value,
        },
        Category::StartupPhase => DecodedEvent::StartupPhase {
            phase: fields.string("phase").value,
            time_ms: fields.millis("time").value,
        },
        Category::PerformanceSnapshot => {
            let mut defaulted = vec![];
            let mut track = |name: &'static str, ok: bool| {
                if !ok {
                    defaulted.push(name);
                }
            };
            let memory_mb = fields.float("memory_mb");
            track("memory_mb", memory_mb.ok);
            let memory_delta = fields.float("memory_delta");
            track("memory_delta", memory_delta.ok);
            let threads = fields.integer("threads");
            track("threads", threads.ok);

            DecodedEvent::PerformanceSnapshot(Snapshot {
                context: fields.string("context").value,
                memory_mb: memory_mb.value,
                memory_delta: memory_delta.value,
                threads: threads.value,
                action: fields.string("action").value,
                defaulted,
            })
        }
        Category::SearchPerformance | Category::ActivityLifecycle | Category::Other(_) => {
            unreachable!("Guaranteed by decode()")
        }
    }
}

#[cfg(test)]
pub fn custom_event(timestamp: i64, category: &str, payload: &str) -> CustomEvent {
    CustomEvent {
        timestamp,
        category: Category::parse(category),
        payload: payload.to_owned(),
        source_file: "performance_test.csv".to_owned(),
    }
}

#[test]
fn test_legacy_duration() {
    assert_eq!(legacy_duration("duration:123ms"), Some(123));
    assert_eq!(legacy_duration("query:kiss,duration:45ms,results:3"), Some(45));
    assert_eq!(legacy_duration("duration:abc"), None);
    assert_eq!(legacy_duration("query:kiss,results:3"), None);
    assert_eq!(legacy_duration(""), None);

    let event = custom_event(1, "SEARCH_PERFORMANCE", "duration:abc");
    assert_eq!(decode(&event), None);
    let event = custom_event(1, "SEARCH_PERFORMANCE", "duration:123ms");
    assert_eq!(
        decode(&event),
        Some(DecodedEvent::SearchPerformance { duration_ms: 123 })
    );
}

#[test]
fn test_fields_parse() -> Result<(), MalformedPayload> {
    let fields = Fields::parse("direction:up,noise, velocity : 5.5 ,url:http://x")?;
    assert_eq!(fields.get("direction"), Some("up"));
    assert_eq!(fields.get("velocity"), Some("5.5"));
    assert_eq!(fields.get("url"), Some("http://x"));
    assert_eq!(fields.get("noise"), None);

    let fields = Fields::parse("direction:up,:5,\tvelocity:\t2.0")?;
    assert_eq!(fields.get("direction"), Some("up"));
    assert_eq!(fields.get(""), None);
    assert_eq!(fields.get("velocity"), Some("2.0"));
    assert_eq!(
        Fields::parse("direction:up\u{0}"),
        Err(MalformedPayload::Encoding)
    );
    assert_eq!(
        Fields::parse("direction:\u{FFFD}"),
        Err(MalformedPayload::Encoding)
    );
    Ok(())
}

#[test]
fn test_lenient_accessors() -> Result<(), MalformedPayload> {
    let fields = Fields::parse("a:1.5,b:xyz,c:12.0,d:40ms,e:4.5ms")?;
    assert_eq!(fields.float("a"), Lenient { value: 1.5, ok: true });
    assert_eq!(fields.float("b"), Lenient { value: 0.0, ok: false });
    assert_eq!(fields.integer("c"), Lenient { value: 12, ok: true });
    assert_eq!(fields.millis("d"), Lenient { value: 40, ok: true });
    assert_eq!(fields.millis("e"), Lenient { value: 0, ok: false });
    assert_eq!(
        fields.string("missing"),
        Lenient {
            value: "UNKNOWN".to_owned(),
            ok: false
        }
    );
    Ok(())
}

#[test]
fn test_decode_ui_interaction_strips_unit() {
    let event = custom_event(
        1,
        "UI_INTERACTION",
        "type:CLICK,target:search_bar,response_time:42ms",
    );
    assert_eq!(
        decode(&event),
        Some(DecodedEvent::UiInteraction {
            kind: "CLICK".to_owned(),
            response_time_ms: 42,
        })
    );
}

#[test]
fn test_decode_snapshot_reports_defaults() {
    let event = custom_event(
        1,
        "PERFORMANCE_SNAPSHOT",
        "context:SCROLL_PERFORMANCE,memory_mb:20.5,memory_delta:abc,action:IDLE",
    );
    let Some(DecodedEvent::PerformanceSnapshot(snapshot)) = decode(&event) else {
        panic!("Expected a snapshot");
    };
    assert_eq!(snapshot.context, "SCROLL_PERFORMANCE");
    assert_eq!(snapshot.memory_mb, 20.5);
    assert_eq!(snapshot.memory_delta, 0.0);
    assert_eq!(snapshot.threads, 0);
    assert_eq!(snapshot.action, "IDLE");
    assert_eq!(snapshot.defaulted, ["memory_delta", "threads"]);
}

#[test]
fn test_malformed_payload_drops_only_that_event() {
    let events = [
        custom_event(1, "SCROLL_ACTION", "direction:up,velocity:5.0"),
        custom_event(2, "SCROLL_ACTION", "direction:\u{FFFD}\u{FFFD},velocity:1.0"),
        custom_event(3, "SCROLL_ACTION", "direction:down,velocity:fast"),
    ];
    let decoded = events.iter().filter_map(decode).collect::<Vec<_>>();
    assert_eq!(
        decoded,
        [
            DecodedEvent::ScrollAction {
                direction: "up".to_owned(),
                velocity: 5.0
            },
            DecodedEvent::ScrollAction {
                direction: "down".to_owned(),
                velocity: 0.0
            },
        ]
    );
}

#[test]
fn test_stray_pairs_and_tabs_keep_the_event() {
    let scroll = custom_event(1, "SCROLL_ACTION", "direction:up,velocity:5.0,:x");
    assert_eq!(
        decode(&scroll),
        Some(DecodedEvent::ScrollAction {
            direction: "up".to_owned(),
            velocity: 5.0
        })
    );
    let ui = custom_event(
        2,
        "UI_INTERACTION",
        "type:CLICK,\ttarget:x,response_time:42ms",
    );
    assert_eq!(
        decode(&ui),
        Some(DecodedEvent::UiInteraction {
            kind: "CLICK".to_owned(),
            response_time_ms: 42,
        })
    );
}

#[test]
fn test_decode_lifecycle_keeps_whole_payload() {
    let event = custom_event(1, "ACTIVITY_LIFECYCLE", "MainActivity:onResume");
    assert_eq!(
        decode(&event),
        Some(DecodedEvent::ActivityLifecycle {
            label: "MainActivity:onResume".to_owned()
        })
    );
    assert_eq!(decode(&custom_event(1, "ACTIVITY_LIFECYCLE", " ")), None);
}
