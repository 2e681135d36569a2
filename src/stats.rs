use std::fmt;

use crate::record::FindingRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub total_findings: u64,
    pub avg_line_count: f64,
    pub findings_per_line: f64,
    pub total_count: usize,
}

pub fn compute_stats<'a>(records: impl IntoIterator<Item = &'a FindingRecord>) -> Stats {
    let mut total_findings = 0;
    let mut total_lines = 0;
    let mut total_count = 0;
    for r in records {
        total_findings += r.findings();
        total_lines += r.line_count();
        total_count += 1;
    }

    Stats {
        total_findings,
        avg_line_count: if total_count == 0 {
            0.0
        } else {
            total_lines as f64 / total_count as f64
        },
        findings_per_line: if total_lines == 0 {
            0.0
        } else {
            total_findings as f64 / total_lines as f64
        },
        total_count,
    }
}

/// Pearson correlation coefficient. Returns 0 for empty, mismatched or constant input.
pub fn compute_correlation(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || xs.len() != ys.len() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut x_var = 0.0;
    let mut y_var = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - x_mean;
        let dy = y - y_mean;
        covariance += dx * dy;
        x_var += dx * dx;
        y_var += dy * dy;
    }

    let denominator = (x_var * y_var).sqrt();
    if denominator == 0.0 || !denominator.is_finite() {
        return 0.0;
    }
    (covariance / denominator).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    None,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpretation {
    pub strength: Strength,
    pub direction: Option<Direction>,
}

pub fn interpret_correlation(r: f64) -> Interpretation {
    let magnitude = r.abs();
    let strength = if magnitude < 0.1 {
        Strength::None
    } else if magnitude < 0.3 {
        Strength::Weak
    } else if magnitude < 0.5 {
        Strength::Moderate
    } else if magnitude < 0.7 {
        Strength::Strong
    } else {
        Strength::VeryStrong
    };
    let direction = match strength {
        Strength::None => None,
        _ if r < 0.0 => Some(Direction::Negative),
        _ => Some(Direction::Positive),
    };
    Interpretation {
        strength,
        direction,
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strength = match self.strength {
            Strength::None => return write!(f, "no correlation"),
            Strength::Weak => "weak",
            Strength::Moderate => "moderate",
            Strength::Strong => "strong",
            Strength::VeryStrong => "very strong",
        };
        let direction = match self.direction {
            Some(Direction::Negative) => "negative",
            _ => "positive",
        };
        write!(f, "{strength} {direction}")
    }
}

/// Correlation of the size metrics with the number of findings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Correlations {
    pub lines_findings: f64,
    pub jobs_findings: f64,
    pub steps_findings: f64,
}

pub fn compute_correlations<'a>(records: impl IntoIterator<Item = &'a FindingRecord>) -> Correlations {
    let mut lines = Vec::new();
    let mut jobs = Vec::new();
    let mut steps = Vec::new();
    let mut findings = Vec::new();
    for r in records {
        lines.push(r.line_count() as f64);
        jobs.push(r.jobs() as f64);
        steps.push(r.steps_per_job());
        findings.push(r.findings() as f64);
    }
    Correlations {
        lines_findings: compute_correlation(&lines, &findings),
        jobs_findings: compute_correlation(&jobs, &findings),
        steps_findings: compute_correlation(&steps, &findings),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Equal width histogram over the observed value range.
pub fn histogram(values: &[f64], bins: usize) -> Vec<Bin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / bins as f64;

    let mut result: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            lower: min + width * i as f64,
            upper: min + width * (i + 1) as f64,
            count: 0,
        })
        .collect();

    for &v in values {
        let idx = if width > 0.0 {
            // the maximum lands exactly on the upper edge of the last bin
            (((v - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        result[idx].count += 1;
    }
    result
}

/// Least squares fit `y = slope * x + intercept`.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    if xs.is_empty() || xs.len() != ys.len() {
        return None;
    }
    let n = xs.len() as f64;
    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;

    let numerator: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if denominator == 0.0 {
        return None;
    }
    let slope = numerator / denominator;
    Some((slope, y_mean - slope * x_mean))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordMetrics, UNKNOWN_SEVERITY};
    use std::collections::BTreeMap;

    fn record(line_count: u64, findings: u64) -> FindingRecord {
        let mut severities = BTreeMap::new();
        if findings > 0 {
            severities.insert(UNKNOWN_SEVERITY.to_string(), findings);
        }
        FindingRecord::new(
            "o",
            "r",
            "w",
            "w.json",
            None,
            RecordMetrics {
                line_count,
                jobs: 1,
                steps_per_job: 1.0,
            },
            severities,
        )
    }

    #[test]
    fn empty_stats_are_zero() {
        let stats = compute_stats(&Vec::<FindingRecord>::new());
        assert_eq!(stats, Stats::default());
    }

    #[test]
    fn stats_over_records() {
        let records = vec![record(100, 2), record(50, 4), record(0, 0)];
        let stats = compute_stats(&records);
        assert_eq!(stats.total_findings, 6);
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.avg_line_count, 50.0);
        assert_eq!(stats.findings_per_line, 0.04);
    }

    #[test]
    fn stats_without_lines_do_not_divide_by_zero() {
        let records = vec![record(0, 3)];
        let stats = compute_stats(&records);
        assert_eq!(stats.total_findings, 3);
        assert_eq!(stats.findings_per_line, 0.0);
    }

    #[test]
    fn correlation_of_proportional_vectors() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [2.0, 4.0, 6.0, 8.0];
        assert!((compute_correlation(&xs, &xs) - 1.0).abs() < 1e-12);
        assert!((compute_correlation(&xs, &ys) - 1.0).abs() < 1e-12);
        let inverse = [-2.0, -4.0, -6.0, -8.0];
        assert!((compute_correlation(&xs, &inverse) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_degenerate_inputs() {
        assert_eq!(compute_correlation(&[], &[]), 0.0);
        assert_eq!(compute_correlation(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(compute_correlation(&[3.0, 3.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn correlation_stays_in_range() {
        let xs = [0.3, 7.1, 2.2, 9.9, 4.4, 1.0];
        let ys = [5.0, 1.0, 8.5, 2.0, 0.1, 3.3];
        let r = compute_correlation(&xs, &ys);
        assert!((-1.0..=1.0).contains(&r));
        assert!(r < 0.0);
    }

    #[test]
    fn interpretation_bands() {
        assert_eq!(interpret_correlation(0.05).strength, Strength::None);
        assert_eq!(interpret_correlation(0.05).direction, None);
        assert_eq!(interpret_correlation(0.1).strength, Strength::Weak);
        assert_eq!(interpret_correlation(-0.29).strength, Strength::Weak);
        assert_eq!(interpret_correlation(0.3).strength, Strength::Moderate);
        assert_eq!(interpret_correlation(0.5).strength, Strength::Strong);
        assert_eq!(interpret_correlation(0.7).strength, Strength::VeryStrong);
        assert_eq!(interpret_correlation(-1.0).direction, Some(Direction::Negative));
        assert_eq!(interpret_correlation(-0.6).to_string(), "strong negative");
        assert_eq!(interpret_correlation(0.0).to_string(), "no correlation");
    }

    #[test]
    fn correlations_per_metric() {
        let records = vec![record(10, 1), record(20, 2), record(30, 3)];
        let c = compute_correlations(&records);
        assert!((c.lines_findings - 1.0).abs() < 1e-12);
        // jobs and steps are constant
        assert_eq!(c.jobs_findings, 0.0);
        assert_eq!(c.steps_findings, 0.0);
    }

    #[test]
    fn histogram_clamps_maximum_into_last_bin() {
        let bins = histogram(&[0.0, 1.0, 2.0, 5.0, 10.0], 5);
        assert_eq!(bins.len(), 5);
        assert_eq!(bins[0].lower, 0.0);
        assert_eq!(bins[4].upper, 10.0);
        let counts: Vec<u64> = bins.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1, 0, 1]);
    }

    #[test]
    fn histogram_of_equal_values() {
        let bins = histogram(&[3.0, 3.0, 3.0], 4);
        assert_eq!(bins.len(), 4);
        assert_eq!(bins[0].count, 3);
        assert!(bins[1..].iter().all(|b| b.count == 0));
        assert!(histogram(&[], 4).is_empty());
        assert!(histogram(&[1.0], 0).is_empty());
    }

    #[test]
    fn regression_line() {
        let (slope, intercept) = linear_regression(&[1.0, 2.0, 3.0], &[3.0, 5.0, 7.0]).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);
        assert_eq!(linear_regression(&[2.0, 2.0], &[1.0, 5.0]), None);
        assert_eq!(linear_regression(&[], &[]), None);
    }
}
