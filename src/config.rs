use std::{fs::File, io::Read, path::Path};

use jane_eyre::eyre::{self, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

pub static CONFIG_FILE_NAME: &'static str = "analysis.toml";

/// Contents of `analysis.toml`. Every key is optional.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub thresholds: Thresholds,
    pub charts: ChartConfig,
}

/// Policy constants for flagging. The defaults are the values the analyser has
/// always used; none of them has a documented derivation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub slow_search_ms: f64,
    pub notable_mean_delta_mb: f64,
    pub notable_max_delta_mb: f64,
    pub large_increase_mb: f64,

    pub moving_average_window: usize,
    pub growth_ratio: f64,
    pub instability_ratio: f64,
    pub high_cpu_percent: f64,
    pub memory_spike_mb: f64,
    pub cpu_spike_percent: f64,

    pub heap_warning_mb: f64,
    pub mean_cpu_warning_percent: f64,
    pub thread_warning_count: f64,

    /// Presentation only: how many spikes the text and HTML reports list.
    pub spike_display_limit: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChartConfig {
    pub theme: Theme,
    pub cpu_histogram_bins: usize,
    pub ui_histogram_bins: usize,
    /// Vertical jitter applied to event markers on the action timeline, in MB.
    pub marker_jitter: f64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            slow_search_ms: 100.0,
            notable_mean_delta_mb: 1.0,
            notable_max_delta_mb: 5.0,
            large_increase_mb: 10.0,
            moving_average_window: 10,
            growth_ratio: 1.2,
            instability_ratio: 0.3,
            high_cpu_percent: 70.0,
            memory_spike_mb: 10.0,
            cpu_spike_percent: 30.0,
            heap_warning_mb: 100.0,
            mean_cpu_warning_percent: 50.0,
            thread_warning_count: 20.0,
            spike_display_limit: 5,
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            cpu_histogram_bins: 30,
            ui_histogram_bins: 20,
            marker_jitter: 2.0,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let mut result = String::default();
        File::open(path)
            .wrap_err_with(|| format!("Failed to open {}", path.display()))?
            .read_to_string(&mut result)?;
        let result: Config = toml::from_str(&result)
            .wrap_err_with(|| format!("Failed to parse {}", path.display()))?;

        Ok(result)
    }

    /// Loads `analysis.toml` from `dir` if it exists, otherwise the defaults.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if !std::fs::exists(&path)? {
            return Ok(Self::default());
        }
        info!(?path, "Loading config");

        Self::load(path)
    }
}

#[test]
fn test_partial_config_keeps_defaults() -> eyre::Result<()> {
    let config: Config = toml::from_str(
        r#"
        [thresholds]
        slow_search_ms = 250.0
        moving_average_window = 3

        [charts]
        theme = "dark"
        "#,
    )?;
    assert_eq!(config.thresholds.slow_search_ms, 250.0);
    assert_eq!(config.thresholds.moving_average_window, 3);
    assert_eq!(config.thresholds.large_increase_mb, 10.0);
    assert_eq!(config.charts.theme, Theme::Dark);
    assert_eq!(config.charts.cpu_histogram_bins, 30);
    Ok(())
}

#[test]
fn test_unknown_key_is_rejected() {
    let result = toml::from_str::<Config>("[thresholds]\nslow_search = 1.0\n");
    assert!(result.is_err());
}

#[test]
fn test_missing_config_file_gives_defaults() -> eyre::Result<()> {
    let dir = tempfile::tempdir()?;
    assert_eq!(Config::load_from_dir(dir.path())?, Config::default());
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[thresholds]\nhigh_cpu_percent = 90.0\n",
    )?;
    assert_eq!(
        Config::load_from_dir(dir.path())?.thresholds.high_cpu_percent,
        90.0
    );
    Ok(())
}
