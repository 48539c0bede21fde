//! Distribution statistics over price-per-acre values.

use serde::{Deserialize, Serialize};

/// Summary statistics for one group of values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: usize,
    pub median: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

impl Distribution {
    /// Compute statistics for `values` (any order). `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self::from_sorted(&sorted)
    }

    /// Compute statistics for an ascending slice. `None` when empty.
    pub fn from_sorted(sorted: &[f64]) -> Option<Self> {
        Some(Self {
            count: sorted.len(),
            median: median(sorted)?,
            mean: mean(sorted)?,
            min: *sorted.first()?,
            max: *sorted.last()?,
            q1: percentile(sorted, 25.0)?,
            q3: percentile(sorted, 75.0)?,
        })
    }
}

/// Median of an ascending slice: the middle value, or the mean of the two
/// middle values for an even count.
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    if n % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Percentile `p` (0–100) of an ascending slice by linear interpolation
/// between closest ranks: `index = p/100 × (n−1)`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let index = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
    let lo = index.floor() as usize;
    let hi = index.ceil() as usize;
    let frac = index - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[100.0, 200.0, 300.0]), Some(200.0));
        assert_eq!(median(&[100.0, 200.0]), Some(150.0));
        assert_eq!(median(&[7.0]), Some(7.0));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_percentile_interpolation() {
        let v = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&v, 25.0), Some(17.5));
        assert_eq!(percentile(&v, 75.0), Some(32.5));
        assert_eq!(percentile(&v, 0.0), Some(10.0));
        assert_eq!(percentile(&v, 100.0), Some(40.0));
        assert_eq!(percentile(&[5.0], 25.0), Some(5.0));
    }

    #[test]
    fn test_distribution_sorts_input() {
        let d = Distribution::from_values(&[40.0, 10.0, 30.0, 20.0]).unwrap();
        assert_eq!(d.count, 4);
        assert_eq!(d.min, 10.0);
        assert_eq!(d.max, 40.0);
        assert_eq!(d.median, 25.0);
        assert_eq!(d.mean, 25.0);
        assert_eq!(d.q1, 17.5);
        assert_eq!(d.q3, 32.5);
    }

    #[test]
    fn test_distribution_empty() {
        assert!(Distribution::from_values(&[]).is_none());
    }
}
