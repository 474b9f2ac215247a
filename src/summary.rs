use std::fmt::Display;

use jane_eyre::eyre::{self, OptionExt};
use serde::Serialize;

pub struct Analysis<'samples, SampleType> {
    pub samples: &'samples [SampleType],
}

/// Descriptive statistics over the present values of one metric.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary<T> {
    pub n: usize,
    pub mean: T,
    /// Sample standard deviation (n - 1); NaN when n = 1.
    pub stdev: T,
    pub min: T,
    pub max: T,
    pub p90: T,
}

impl<SampleType> Analysis<'_, SampleType> {
    /// Summarises the values `getter` returns, skipping missing ones.
    pub fn summary<T: Into<Option<f64>>>(
        &self,
        mut getter: impl FnMut(&SampleType) -> T,
    ) -> eyre::Result<Summary<f64>> {
        let xs = self
            .samples
            .iter()
            .filter_map(|x| getter(x).into())
            .collect::<Vec<f64>>();
        summarise(&xs)
    }

    pub fn mean<T: Into<Option<f64>>>(
        &self,
        mut getter: impl FnMut(&SampleType) -> T,
    ) -> Option<f64> {
        let xs = self
            .samples
            .iter()
            .filter_map(|x| getter(x).into())
            .collect::<Vec<f64>>();
        mean(&xs)
    }
}

pub fn summarise(xs: &[f64]) -> eyre::Result<Summary<f64>> {
    let mean = mean(xs).ok_or_eyre("No values")?;
    let min = xs
        .iter()
        .cloned()
        .min_by(|p, q| p.total_cmp(q))
        .ok_or_eyre("No minimum")?;
    let max = xs
        .iter()
        .cloned()
        .max_by(|p, q| p.total_cmp(q))
        .ok_or_eyre("No maximum")?;

    Ok(Summary {
        n: xs.len(),
        mean,
        stdev: stdev(xs),
        min,
        max,
        p90: percentile(xs, 0.9).ok_or_eyre("No percentile")?,
    })
}

pub fn mean(xs: &[f64]) -> Option<f64> {
    (!xs.is_empty()).then(|| xs.iter().sum::<f64>() / (xs.len() as f64))
}

pub fn stdev(xs: &[f64]) -> f64 {
    let Some(mean) = mean(xs) else {
        return f64::NAN;
    };
    if xs.len() < 2 {
        return f64::NAN;
    }

    (xs.iter().map(|x| (x - mean).powf(2.0)).sum::<f64>() / ((xs.len() - 1) as f64)).sqrt()
}

/// Quantile with linear interpolation between closest ranks.
pub fn percentile(xs: &[f64], q: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|p, q| p.total_cmp(q));
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64))
}

/// Trailing moving average. The first `window - 1` points are undefined, and
/// so is any window that contains a missing value.
pub fn moving_average(xs: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; xs.len()];
    }

    (0..xs.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let values = xs[i + 1 - window..=i]
                .iter()
                .cloned()
                .collect::<Option<Vec<f64>>>()?;
            mean(&values)
        })
        .collect()
}

fn decimal_places(x: f64) -> usize {
    let x = x.abs();
    if x >= 1000.0 {
        0
    } else if x >= 100.0 {
        1
    } else {
        2
    }
}

impl Display for Summary<f64> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={}, μ={:.*}, s={:.*}, min={:.*}, max={:.*}, p90={:.*}",
            self.n,
            decimal_places(self.mean),
            self.mean,
            decimal_places(self.stdev),
            self.stdev,
            decimal_places(self.min),
            self.min,
            decimal_places(self.max),
            self.max,
            decimal_places(self.p90),
            self.p90,
        )
    }
}

#[test]
fn test_summary_skips_missing_values() -> eyre::Result<()> {
    let samples = [Some(2.0), None, Some(4.0), Some(4.0), Some(4.0), Some(5.0), Some(5.0), Some(7.0), Some(9.0)];
    let analysis = Analysis { samples: &samples };
    let summary = analysis.summary(|x| *x)?;
    assert_eq!(summary.n, 8);
    assert_eq!(summary.mean, 5.0);
    assert_eq!(summary.min, 2.0);
    assert_eq!(summary.max, 9.0);
    // Sample standard deviation: sqrt(32 / 7).
    assert!((summary.stdev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    Ok(())
}

#[test]
fn test_summary_of_nothing_is_an_error() {
    let samples: [Option<f64>; 2] = [None, None];
    assert!(Analysis { samples: &samples }.summary(|x| *x).is_err());
}

#[test]
fn test_percentile_interpolates() {
    let xs = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
    assert!((percentile(&xs, 0.9).unwrap() - 9.1).abs() < 1e-12);
    assert_eq!(percentile(&[3.0, 1.0, 2.0], 0.5), Some(2.0));
    assert_eq!(percentile(&[42.0], 0.9), Some(42.0));
    assert_eq!(percentile(&[], 0.9), None);
}

#[test]
fn test_moving_average() {
    let xs = [Some(1.0), Some(2.0), Some(3.0), None, Some(5.0), Some(6.0), Some(7.0)];
    assert_eq!(
        moving_average(&xs, 3),
        [None, None, Some(2.0), None, None, None, Some(6.0)]
    );
    assert_eq!(moving_average(&xs[..2], 3), [None, None]);
}

#[test]
fn test_display() -> eyre::Result<()> {
    let summary = summarise(&[10.0, 20.0])?;
    assert_eq!(
        summary.to_string(),
        "n=2, μ=15.00, s=7.07, min=10.00, max=20.00, p90=19.00"
    );
    Ok(())
}
