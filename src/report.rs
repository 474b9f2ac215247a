use std::{
    fmt::Write as _,
    fs::{create_dir_all, File},
    io::Write,
    path::Path,
};

use dataurl::DataUrl;
use jane_eyre::eyre::{self, Context};
use rand::Rng;
use tracing::info;

use crate::{
    analysis::{AnalysisResult, Assembled, TimeRange},
    config::{ChartConfig, Config, Theme, Thresholds},
    row::Category,
    series::{Bin, ChartSeries},
    summary::Summary,
    trend::{MemoryTrend, Spike},
};

pub static REPORT_FILE_NAME: &'static str = "profile_report.html";
pub static JSON_FILE_NAME: &'static str = "summary.json";
/// Event categories drawn on the action timeline, bottom to top.
static TIMELINE_CATEGORIES: &'static [Category] = &[
    Category::ScrollAction,
    Category::SearchDetailed,
    Category::UiInteraction,
    Category::StartupPhase,
];

/// Categories with a dedicated summary, in report order.
static SUMMARY_CATEGORIES: &'static [Category] = &[
    Category::ActivityLifecycle,
    Category::SearchPerformance,
    Category::PerformanceSnapshot,
    Category::ScrollAction,
    Category::SearchDetailed,
    Category::UiInteraction,
    Category::StartupPhase,
];

pub struct Chart {
    pub name: &'static str,
    pub title: &'static str,
    pub svg: String,
}

macro_rules! render_chart {
    ($theme:expr, $labels:expr, $data:expr) => {{
        let frame = poloto::frame_build().data($data).build_and_label($labels);
        match $theme {
            Theme::Light => frame
                .append_to(poloto::header().light_theme())
                .render_string()?,
            Theme::Dark => frame
                .append_to(poloto::header().dark_theme())
                .render_string()?,
        }
    }};
}

/// Renders every chart the data allows. Charts whose series are empty are
/// left out.
pub fn render_charts(series: &ChartSeries, charts: &ChartConfig) -> eyre::Result<Vec<Chart>> {
    let Some(origin) = series.origin() else {
        return Ok(vec![]);
    };
    let minutes = |timestamp: i64| (timestamp - origin) as f64 / 60_000.0;
    let over_time = |points: &[(i64, f64)]| {
        points
            .iter()
            .map(|&(t, value)| (minutes(t), value))
            .collect::<Vec<_>>()
    };
    let bars = |bins: &[Bin]| {
        bins.iter()
            .map(|bin| (bin.lower, bin.count as f64))
            .collect::<Vec<_>>()
    };
    let mut result = vec![];

    if !series.heap_used.is_empty() {
        let svg = render_chart!(
            charts.theme,
            ("Memory usage over time", "minutes", "MB"),
            poloto::plots!(
                poloto::build::plot("heap").line(over_time(&series.heap_used)),
                poloto::build::plot("native heap").line(over_time(&series.native_heap)),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "memory_over_time",
            title: "Memory usage over time",
            svg,
        });

        let svg = render_chart!(
            charts.theme,
            ("Detailed memory", "minutes", "MB"),
            poloto::plots!(
                poloto::build::plot("heap used").line(over_time(&series.heap_used)),
                poloto::build::plot("heap max").line(over_time(&series.heap_max)),
                poloto::build::plot("available system memory")
                    .line(over_time(&series.available_memory)),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "memory_detail",
            title: "Detailed memory",
            svg,
        });

        // One scatter per event category, each on its own level so the
        // categories stay apart, with jitter so coincident events stay visible.
        let mut rng = rand::thread_rng();
        let levels = TIMELINE_CATEGORIES
            .iter()
            .enumerate()
            .map(|(i, category)| {
                let points = series
                    .markers(category)
                    .iter()
                    .map(|&t| {
                        (
                            minutes(t),
                            10f64 * (i + 1) as f64
                                + (rng.gen::<f64>() - 0.5f64) * charts.marker_jitter,
                        )
                    })
                    .collect::<Vec<_>>();
                (category.to_string(), points)
            })
            .collect::<Vec<_>>();
        let levels = levels
            .into_iter()
            .map(|(name, points)| poloto::build::plot(name).scatter(points));
        let svg = render_chart!(
            charts.theme,
            ("Memory usage and user actions", "minutes", "MB"),
            poloto::plots!(
                poloto::build::plot("heap".to_owned()).line(over_time(&series.heap_used)),
                levels,
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "action_timeline",
            title: "Memory usage and user actions",
            svg,
        });
    }

    if !series.cpu_histogram.is_empty() {
        let svg = render_chart!(
            charts.theme,
            ("CPU usage distribution", "CPU %", "samples"),
            poloto::plots!(
                poloto::build::plot("cpu").histogram(bars(&series.cpu_histogram)),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "cpu_histogram",
            title: "CPU usage distribution",
            svg,
        });
    }

    if !series.threads.is_empty() {
        let svg = render_chart!(
            charts.theme,
            ("Thread count over time", "minutes", "threads"),
            poloto::plots!(
                poloto::build::plot("threads").line(over_time(&series.threads)),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "threads_over_time",
            title: "Thread count over time",
            svg,
        });
    }

    if !series.cpu.is_empty() {
        let mut rng = rand::thread_rng();
        let searches = series
            .markers(&Category::SearchDetailed)
            .iter()
            .map(|&t| {
                (
                    minutes(t),
                    5f64 + (rng.gen::<f64>() - 0.5f64) * charts.marker_jitter,
                )
            })
            .collect::<Vec<_>>();
        let svg = render_chart!(
            charts.theme,
            ("CPU usage and search activity", "minutes", "CPU %"),
            poloto::plots!(
                poloto::build::plot("cpu").line(over_time(&series.cpu)),
                poloto::build::plot(Category::SearchDetailed.to_string()).scatter(searches),
                poloto::build::markers([0f64], [0f64, 100f64])
            )
        );
        result.push(Chart {
            name: "cpu_timeline",
            title: "CPU usage and search activity",
            svg,
        });
    }

    if !series.heap_vs_cpu.is_empty() {
        let svg = render_chart!(
            charts.theme,
            ("Heap usage vs CPU usage", "heap MB", "CPU %"),
            poloto::plots!(
                poloto::build::plot("samples").scatter(series.heap_vs_cpu.clone()),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "memory_vs_cpu",
            title: "Heap usage vs CPU usage",
            svg,
        });
    }

    if !series.ui_response_histogram.is_empty() {
        let svg = render_chart!(
            charts.theme,
            ("UI response time distribution", "ms", "interactions"),
            poloto::plots!(
                poloto::build::plot("response time")
                    .histogram(bars(&series.ui_response_histogram)),
                poloto::build::markers([0f64], [0f64])
            )
        );
        result.push(Chart {
            name: "ui_response_times",
            title: "UI response time distribution",
            svg,
        });
    }

    Ok(result)
}

fn fmt_option(value: Option<f64>, decimals: usize, unit: &str) -> String {
    match value {
        Some(value) => format!("{value:.decimals$}{unit}"),
        None => "n/a".to_owned(),
    }
}

fn fmt_summary(summary: &Option<Summary<f64>>) -> String {
    match summary {
        Some(summary) => summary.to_string(),
        None => "no values".to_owned(),
    }
}

fn fmt_trend(trend: Option<MemoryTrend>) -> &'static str {
    match trend {
        Some(MemoryTrend::Growing) => "growing steadily (possible leak)",
        Some(MemoryTrend::Unstable) => "unstable",
        Some(MemoryTrend::Stable) => "stable",
        None => "not enough samples for a trend",
    }
}

fn spike_lines(spikes: &[Spike], unit: &str, limit: usize) -> Vec<String> {
    spikes
        .iter()
        .take(limit)
        .map(|spike| {
            format!(
                "{}: {:+.1}{unit}",
                TimeRange::fmt_ms(spike.timestamp),
                spike.delta
            )
        })
        .collect()
}

fn recommendation_lines(result: &AnalysisResult) -> Vec<&'static str> {
    let mut lines = vec![];
    if result.recommendations.high_heap {
        lines.push("Heap usage is high. Consider memory optimisation.");
    }
    if result.recommendations.high_cpu {
        lines.push("Mean CPU usage is high. Consider algorithmic optimisation.");
    }
    if result.recommendations.many_threads {
        lines.push("Thread count is high. Review thread pool management.");
    }
    lines
}

/// Terminal summary. Spike lists are cut to `spike_display_limit`.
pub fn render_text(result: &AnalysisResult, thresholds: &Thresholds) -> eyre::Result<String> {
    let mut out = String::default();
    let trend = &result.trend;
    let limit = thresholds.spike_display_limit;

    writeln!(
        out,
        "Data: {} performance samples, {} custom events",
        result.sample_count, result.event_count
    )?;
    writeln!(out, "Period: {}", result.time_range)?;
    let observed = SUMMARY_CATEGORIES
        .iter()
        .filter(|category| result.events.contains(category))
        .map(Category::as_str)
        .collect::<Vec<_>>();
    if !observed.is_empty() {
        writeln!(out, "Event categories: {}", observed.join(", "))?;
    }

    writeln!(out, "\nMemory")?;
    writeln!(out, "  heap MB: {}", fmt_summary(&trend.heap))?;
    writeln!(out, "  native heap MB: {}", fmt_summary(&trend.native_heap))?;
    writeln!(out, "  trend: {}", fmt_trend(trend.memory_trend))?;

    writeln!(out, "\nCPU")?;
    writeln!(out, "  CPU %: {}", fmt_summary(&trend.cpu))?;
    writeln!(
        out,
        "  above {}%: {} samples ({:.1}%)",
        trend.high_cpu.threshold_percent, trend.high_cpu.count, trend.high_cpu.percentage
    )?;
    writeln!(out, "  threads: {}", fmt_summary(&trend.threads))?;

    writeln!(out, "\nBy hour (UTC)")?;
    for hour in &trend.hourly {
        writeln!(
            out,
            "  {:02}h: CPU {}, heap {}",
            hour.hour,
            fmt_option(hour.mean_cpu_percent, 1, "%"),
            fmt_option(hour.mean_heap_mb, 1, "MB"),
        )?;
    }

    for (label, spikes, unit) in [
        ("Memory spikes", &trend.memory_spikes, "MB"),
        ("CPU spikes", &trend.cpu_spikes, "%"),
    ] {
        if spikes.is_empty() {
            continue;
        }
        writeln!(out, "\n{label}: {}", spikes.len())?;
        for line in spike_lines(spikes, unit, limit) {
            writeln!(out, "  {line}")?;
        }
    }

    let events = &result.events;
    if let Some(lifecycle) = &events.lifecycle {
        writeln!(out, "\nActivity lifecycle")?;
        for entry in lifecycle {
            writeln!(out, "  {}: {}", entry.label, entry.count)?;
        }
    }
    if let Some(search) = &events.search {
        writeln!(out, "\nSearch performance")?;
        writeln!(
            out,
            "  {} searches, mean {:.2}ms, max {}ms{}",
            search.count,
            search.mean_ms,
            search.max_ms,
            if search.slow { " (slow)" } else { "" }
        )?;
    }
    if let Some(scroll) = &events.scroll {
        writeln!(out, "\nScrolling")?;
        for entry in scroll {
            writeln!(
                out,
                "  {}: {} scrolls, mean velocity {:.2}",
                entry.direction, entry.count, entry.mean_velocity
            )?;
        }
    }
    if let Some(phases) = &events.search_phases {
        writeln!(out, "\nSearch phases")?;
        for entry in phases {
            writeln!(out, "  {}: {}", entry.label, entry.count)?;
        }
    }
    for (label, timings) in [
        ("UI interactions", &events.ui),
        ("Startup phases", &events.startup),
    ] {
        let Some(timings) = timings else {
            continue;
        };
        writeln!(out, "\n{label}")?;
        for entry in timings {
            writeln!(
                out,
                "  {}: mean {:.2}ms, max {}ms ({} times)",
                entry.name, entry.mean_ms, entry.max_ms, entry.count
            )?;
        }
    }
    if let Some(snapshots) = &events.snapshots {
        let notable = snapshots
            .iter()
            .filter_map(|s| Some((s, s.delta.as_ref()?)))
            .filter(|(_, delta)| delta.notable)
            .collect::<Vec<_>>();
        if !notable.is_empty() {
            writeln!(out, "\nPerformance snapshots by context")?;
        }
        for (snapshot, delta) in notable {
            writeln!(
                out,
                "  {}: mean memory change {:.2}MB, max {:.2}MB",
                snapshot.context, delta.mean_mb, delta.max_mb
            )?;
            if delta.large_increase {
                writeln!(out, "    large memory increase ({:.2}MB)", delta.max_mb)?;
            }
        }
    }
    if let Some(other) = &events.other {
        writeln!(out, "\nOther events")?;
        for entry in other {
            writeln!(out, "  {}: {}", entry.label, entry.count)?;
        }
    }

    let recommendations = recommendation_lines(result);
    if !recommendations.is_empty() {
        writeln!(out, "\nRecommendations")?;
        for line in recommendations {
            writeln!(out, "  {line}")?;
        }
    }

    Ok(out)
}

pub fn render_html(
    result: &AnalysisResult,
    charts: &[Chart],
    thresholds: &Thresholds,
) -> eyre::Result<String> {
    let mut out = String::default();
    writeln!(
        out,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Profile performance report</title>
<style>
body {{ font-family: sans-serif; margin: 40px; }}
.header {{ background: #f0f0f0; padding: 20px; border-radius: 5px; }}
.metric {{ background: #f9f9f9; padding: 10px; margin: 5px 0; border-left: 4px solid #007acc; }}
.warning {{ border-left-color: #ff6b35; }}
.success {{ border-left-color: #28a745; }}
img {{ max-width: 100%; margin: 10px 0; }}
</style>
</head>
<body>"#
    )?;

    writeln!(out, "<div class=header>")?;
    writeln!(out, "<h1>Profile performance report</h1>")?;
    writeln!(
        out,
        "<p>Period: {}</p>",
        escape_html_for_inner_html(&result.time_range.to_string())
    )?;
    writeln!(
        out,
        "<p>Data points: {} samples, {} custom events</p>",
        result.sample_count, result.event_count
    )?;
    writeln!(out, "</div>")?;

    writeln!(out, "<h2>Summary</h2>")?;
    for (label, value) in [
        ("Mean heap usage", fmt_option(result.heap.mean_mb, 2, " MB")),
        ("Max heap usage", fmt_option(result.heap.max_mb, 2, " MB")),
        ("Mean CPU usage", fmt_option(result.mean_cpu_percent, 2, "%")),
        ("Mean thread count", fmt_option(result.mean_thread_count, 1, "")),
        (
            "Memory trend",
            fmt_trend(result.trend.memory_trend).to_owned(),
        ),
    ] {
        writeln!(
            out,
            "<div class=metric><strong>{label}:</strong> {}</div>",
            escape_html_for_inner_html(&value)
        )?;
    }

    let limit = thresholds.spike_display_limit;
    for (label, spikes, unit) in [
        ("Memory spikes", &result.trend.memory_spikes, "MB"),
        ("CPU spikes", &result.trend.cpu_spikes, "%"),
    ] {
        if spikes.is_empty() {
            continue;
        }
        writeln!(out, "<h3>{label} ({})</h3>\n<ul>", spikes.len())?;
        for line in spike_lines(spikes, unit, limit) {
            writeln!(out, "<li>{}", escape_html_for_inner_html(&line))?;
        }
        writeln!(out, "</ul>")?;
    }

    writeln!(out, "<h2>Charts</h2>")?;
    for chart in charts {
        let mut data_url = DataUrl::new();
        data_url.set_media_type(Some("image/svg+xml".to_owned()));
        data_url.set_data(chart.svg.as_bytes());
        writeln!(
            out,
            "<img src='{}' alt='{}'>",
            escape_html_for_attribute(&data_url.to_string()),
            escape_html_for_attribute(chart.title),
        )?;
    }

    writeln!(out, "<h2>Recommendations</h2>")?;
    for line in recommendation_lines(result) {
        writeln!(out, "<div class='metric warning'>{line}</div>")?;
    }
    if !result.recommendations.any() {
        writeln!(
            out,
            "<div class='metric success'>No thresholds were exceeded.</div>"
        )?;
    }

    writeln!(out, "</body>\n</html>")?;

    Ok(out)
}

/// Writes the HTML report, the JSON summary and each chart as SVG.
#[tracing::instrument(level = "error", skip(assembled, config))]
pub fn write_report(out_dir: &Path, assembled: &Assembled, config: &Config) -> eyre::Result<()> {
    create_dir_all(out_dir)
        .wrap_err_with(|| format!("Failed to create {}", out_dir.display()))?;

    let charts = render_charts(&assembled.series, &config.charts)?;
    for chart in &charts {
        let path = out_dir.join(format!("{}.svg", chart.name));
        File::create(&path)?.write_all(chart.svg.as_bytes())?;
        info!(?path, "Wrote chart");
    }

    let path = out_dir.join(JSON_FILE_NAME);
    File::create(&path)?.write_all(serde_json::to_string_pretty(&assembled.result)?.as_bytes())?;
    info!(?path, "Wrote summary");

    let path = out_dir.join(REPORT_FILE_NAME);
    let html = render_html(&assembled.result, &charts, &config.thresholds)?;
    File::create(&path)?.write_all(html.as_bytes())?;
    info!(?path, "Wrote report");

    Ok(())
}

fn escape_html_for_inner_html(text: &str) -> String {
    text.replace("&", "&amp;").replace("<", "&lt;")
}

fn escape_html_for_attribute(text: &str) -> String {
    text.replace("&", "&amp;")
        .replace("'", "&apos;")
        .replace(r#"""#, "&quot;")
}

#[cfg(test)]
fn assembled() -> eyre::Result<Assembled> {
    use crate::{analysis::assemble, row::raw_row};

    let mut rows = (0..12)
        .map(|i| {
            raw_row(
                1_704_067_200_000 + i * 60_000,
                &[
                    ("uptime_ms", "1"),
                    ("heap_used_mb", &format!("{}", 20 + i * 15)),
                    ("heap_max_mb", "256"),
                    ("native_heap_mb", "9.5"),
                    ("cpu_usage_percent", if i == 6 { "95" } else { "12" }),
                    ("thread_count", "14"),
                    ("available_memory_mb", "900"),
                ],
            )
        })
        .collect::<Vec<_>>();
    for (i, (category, payload)) in [
        ("SCROLL_ACTION", "direction:up,velocity:3.0"),
        ("UI_INTERACTION", "type:CLICK,target:<b>,response_time:25ms"),
        ("ACTIVITY_LIFECYCLE", "MainActivity:onResume"),
    ]
    .into_iter()
    .enumerate()
    {
        rows.push(raw_row(
            1_704_067_230_000 + i as i64 * 60_000,
            &[
                ("uptime_ms", "CUSTOM_EVENT"),
                ("heap_used_mb", category),
                ("native_heap_mb", payload),
            ],
        ));
    }

    assemble(rows, &Config::default())
}

#[test]
fn test_render_text_truncates_spikes() -> eyre::Result<()> {
    let assembled = assembled()?;
    let thresholds = Thresholds {
        spike_display_limit: 1,
        ..Default::default()
    };
    assert_eq!(assembled.result.trend.cpu_spikes.len(), 2);
    let text = render_text(&assembled.result, &thresholds)?;
    assert!(text.contains("CPU spikes: 2"));
    assert!(text.contains("+83.0%"));
    assert!(!text.contains("-83.0%"));
    assert!(text.contains("trend: growing"));
    assert!(text.contains("MainActivity:onResume: 1"));
    assert!(text.contains("Event categories: ACTIVITY_LIFECYCLE, SCROLL_ACTION, UI_INTERACTION\n"));
    Ok(())
}

#[test]
fn test_render_html() -> eyre::Result<()> {
    let assembled = assembled()?;
    let charts = vec![Chart {
        name: "test",
        title: "Test 'chart'",
        svg: "<svg></svg>".to_owned(),
    }];
    let html = render_html(&assembled.result, &charts, &Thresholds::default())?;
    assert!(html.contains("data:image/svg+xml"));
    assert!(html.contains("alt='Test &apos;chart&apos;'"));
    assert!(html.contains("Mean thread count:</strong> 14.0"));
    assert!(html.contains("Heap usage is high"));
    Ok(())
}

#[test]
fn test_write_report() -> eyre::Result<()> {
    let assembled = assembled()?;
    let dir = tempfile::tempdir()?;
    let out_dir = dir.path().join("profile_analysis");
    write_report(&out_dir, &assembled, &Config::default())?;

    let html = std::fs::read_to_string(out_dir.join(REPORT_FILE_NAME))?;
    assert!(html.contains("<img src='data:image/svg+xml"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join(JSON_FILE_NAME))?)?;
    assert_eq!(json["sample_count"], 12);
    assert!(json["events"].get("UI_INTERACTION").is_some());
    assert!(json["events"].get("SEARCH_PERFORMANCE").is_none());
    for name in [
        "memory_over_time",
        "memory_detail",
        "action_timeline",
        "cpu_histogram",
        "threads_over_time",
        "cpu_timeline",
        "memory_vs_cpu",
        "ui_response_times",
    ] {
        assert!(out_dir.join(format!("{name}.svg")).exists(), "{name}");
    }
    Ok(())
}

#[test]
fn test_cpu_timeline_marks_searches() -> eyre::Result<()> {
    let series = ChartSeries {
        cpu: vec![(0, 10.0), (60_000, 40.0)],
        markers: vec![(Category::SearchDetailed, vec![30_000])],
        ..Default::default()
    };
    let charts = render_charts(&series, &ChartConfig::default())?;
    assert_eq!(
        charts.iter().map(|c| c.name).collect::<Vec<_>>(),
        ["cpu_timeline"]
    );
    assert!(charts[0].svg.contains("SEARCH_DETAILED"));
    Ok(())
}
