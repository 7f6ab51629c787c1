//! Running-mean accumulator.

use crate::error::{MetricsError, MetricsResult};

/// Running sum and count of recorded values.
///
/// A reset is modeled by replacing the accumulator with a fresh one; there is
/// no in-place clear.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of all recorded values.
    ///
    /// # Errors
    /// Returns `MetricsError::EmptyAggregate` when nothing has been recorded.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> MetricsResult<f64> {
        if self.count == 0 {
            return Err(MetricsError::EmptyAggregate);
        }
        Ok(self.sum / self.count as f64)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fold another accumulator into this one (per-worker merge).
    pub fn merge(&mut self, other: &Self) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_recorded_values() {
        let mut acc = RunningMean::new();
        for v in [0.5, 0.25, 1.0, -0.75] {
            acc.record(v);
        }
        assert_eq!(acc.count(), 4);
        assert!((acc.mean().unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_mean_fails() {
        let acc = RunningMean::new();
        assert!(acc.is_empty());
        assert!(matches!(acc.mean(), Err(MetricsError::EmptyAggregate)));
    }

    #[test]
    fn test_single_value() {
        let mut acc = RunningMean::new();
        acc.record(0.8);
        assert!((acc.mean().unwrap() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_combines_counts() {
        let mut a = RunningMean::new();
        a.record(1.0);
        a.record(2.0);
        let mut b = RunningMean::new();
        b.record(6.0);

        a.merge(&b);
        assert_eq!(a.count(), 3);
        assert!((a.sum() - 9.0).abs() < f64::EPSILON);
        assert!((a.mean().unwrap() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut a = RunningMean::new();
        a.record(4.0);
        a.merge(&RunningMean::new());
        assert_eq!(a.count(), 1);
    }
}
