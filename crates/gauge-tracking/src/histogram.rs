//! Fixed-bin histogram summaries for distribution logging.

use gauge_core::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BINS: usize = 64;

/// Equal-width histogram. `bins` holds the `counts.len() + 1` bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Bin the finite entries of `values` between their min and max.
    ///
    /// When every value is equal the range is widened by 0.5 on each side.
    /// The last bin is closed on the right.
    ///
    /// # Errors
    /// `MetricsError::EmptyAggregate` if `values` has no finite entry or
    /// `num_bins` is zero.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_values(values: &[f64], num_bins: usize) -> MetricsResult<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() || num_bins == 0 {
            return Err(MetricsError::EmptyAggregate);
        }

        let (mut lo, mut hi) = finite
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }

        // bin in halved units when the span itself overflows
        let scale = if (hi - lo).is_finite() { 1.0 } else { 2.0 };
        let (lo_scaled, hi_scaled) = (lo / scale, hi / scale);
        let width = (hi_scaled - lo_scaled) / num_bins as f64;
        let bins = (0..=num_bins)
            .map(|i| if i == num_bins { hi } else { ((lo_scaled + width * i as f64) * scale).min(hi) })
            .collect();

        let mut counts = vec![0_u64; num_bins];
        for v in finite {
            let slot = (((v / scale - lo_scaled) / width) as usize).min(num_bins - 1);
            counts[slot] += 1;
        }

        Ok(Self { bins, counts })
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}
