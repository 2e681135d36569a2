use std::collections::BTreeMap;

use crate::record::FindingRecord;
use crate::stats::{Bin, histogram, linear_regression};

const DATE_BUCKET_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub label: String,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScatterSeries {
    pub points: Vec<(f64, f64)>,
    /// Regression line as its two end points over the observed x range.
    pub regression: Option<[(f64, f64); 2]>,
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimelineSeries {
    pub labels: Vec<String>,
    pub points: Vec<(f64, f64)>,
    pub y_max: f64,
}

/// All chart inputs for one set of filtered records. Rebuilt as a whole on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSet {
    pub findings_histogram: Vec<Bar>,
    pub magnitude_buckets: Vec<Bar>,
    pub lines_vs_findings: ScatterSeries,
    pub severities: Vec<Bar>,
    pub timeline: TimelineSeries,
}

impl ChartSet {
    pub fn build<'a>(records: impl IntoIterator<Item = &'a FindingRecord>, bins: usize) -> Self {
        let records: Vec<&FindingRecord> = records.into_iter().collect();

        let findings: Vec<f64> = records.iter().map(|r| r.findings() as f64).collect();
        let ratios: Vec<f64> = records.iter().map(|r| r.findings_per_line()).collect();
        let lines: Vec<f64> = records.iter().map(|r| r.line_count() as f64).collect();

        ChartSet {
            findings_histogram: bars_from_bins(&histogram(&findings, bins), 0),
            magnitude_buckets: bars_from_bins(&histogram(&ratios, bins), 3),
            lines_vs_findings: scatter(&lines, &findings),
            severities: severity_bars(&records),
            timeline: timeline(&records),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.findings_histogram.is_empty()
    }
}

// Enough decimals that neighbouring lower edges print differently.
fn label_precision(bins: &[Bin], min_precision: usize) -> usize {
    let width = bins.first().map(|b| b.upper - b.lower).unwrap_or(0.0);
    if width > 0.0 && width < 1.0 {
        min_precision.max((-width.log10()).ceil() as usize)
    } else {
        min_precision
    }
}

fn bars_from_bins(bins: &[Bin], min_precision: usize) -> Vec<Bar> {
    let precision = label_precision(bins, min_precision);
    bins.iter()
        .map(|b| Bar {
            label: format!("{:.precision$}", b.lower),
            value: b.count,
        })
        .collect()
}

fn scatter(xs: &[f64], ys: &[f64]) -> ScatterSeries {
    if xs.is_empty() {
        return ScatterSeries::default();
    }
    let x_min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let y_max = ys.iter().copied().fold(0.0, f64::max);

    let regression = linear_regression(xs, ys).map(|(slope, intercept)| {
        [
            (x_min, slope * x_min + intercept),
            (x_max, slope * x_max + intercept),
        ]
    });

    ScatterSeries {
        points: xs.iter().copied().zip(ys.iter().copied()).collect(),
        regression,
        x_bounds: [x_min.min(0.0), x_max.max(1.0)],
        y_bounds: [0.0, y_max.max(1.0)],
    }
}

fn severity_bars(records: &[&FindingRecord]) -> Vec<Bar> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for r in records {
        for (severity, count) in r.severities() {
            *counts.entry(severity.as_str()).or_insert(0) += count;
        }
    }
    let mut bars: Vec<Bar> = counts
        .into_iter()
        .map(|(label, value)| Bar {
            label: label.to_string(),
            value,
        })
        .collect();
    // by count, then by name for stable output
    bars.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    bars
}

fn timeline(records: &[&FindingRecord]) -> TimelineSeries {
    let mut buckets: BTreeMap<&str, u64> = BTreeMap::new();
    for r in records {
        if let Some(version) = r.version() {
            let day = version.get(..DATE_BUCKET_LEN).unwrap_or(version);
            *buckets.entry(day).or_insert(0) += r.findings();
        }
    }
    let y_max = buckets.values().copied().max().unwrap_or(0) as f64;
    let (labels, points): (Vec<String>, Vec<(f64, f64)>) = buckets
        .into_iter()
        .enumerate()
        .map(|(idx, (day, total))| (day.to_string(), (idx as f64, total as f64)))
        .unzip();
    TimelineSeries {
        labels,
        points,
        y_max: y_max.max(1.0),
    }
}
