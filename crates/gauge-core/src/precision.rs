//! Numeric format specs for progress lines.
//!
//! Accepts the brace form used by training scripts, e.g. `{:.5f}` (fixed) or
//! `{:.3e}` (scientific). Scientific output uses a signed, two-digit minimum
//! exponent (`1.234e-05`).

use crate::error::MetricsError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Largest digit count accepted in a spec.
pub const MAX_DIGITS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Fixed(usize),
    Scientific(usize),
}

impl Default for Precision {
    fn default() -> Self {
        Self::Fixed(5)
    }
}

impl Precision {
    /// Digit counts above [`MAX_DIGITS`] are clamped.
    pub fn format(self, value: f64) -> String {
        match self {
            Self::Fixed(digits) => {
                let digits = digits.min(MAX_DIGITS);
                format!("{value:.digits$}")
            }
            Self::Scientific(digits) => {
                let digits = digits.min(MAX_DIGITS);
                let raw = format!("{value:.digits$e}");
                match raw.split_once('e') {
                    Some((mantissa, exponent)) => {
                        let (sign, magnitude) = match exponent.strip_prefix('-') {
                            Some(rest) => ('-', rest),
                            None => ('+', exponent),
                        };
                        format!("{mantissa}e{sign}{magnitude:0>2}")
                    }
                    // inf / NaN carry no exponent
                    None => raw,
                }
            }
        }
    }
}

impl FromStr for Precision {
    type Err = MetricsError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || MetricsError::InvalidPrecision(spec.to_string());

        let body = spec
            .trim()
            .strip_prefix("{:.")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(invalid)?;

        let kind = body.chars().last().ok_or_else(invalid)?;
        let digits: usize = body[..body.len() - kind.len_utf8()].parse().map_err(|_| invalid())?;
        if digits > MAX_DIGITS {
            return Err(invalid());
        }

        match kind {
            'f' => Ok(Self::Fixed(digits)),
            'e' => Ok(Self::Scientific(digits)),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => write!(f, "{{:.{d}f}}"),
            Self::Scientific(d) => write!(f, "{{:.{d}e}}"),
        }
    }
}

impl Serialize for Precision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Precision {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed() {
        assert_eq!("{:.5f}".parse::<Precision>().unwrap(), Precision::Fixed(5));
        assert_eq!("{:.2f}".parse::<Precision>().unwrap(), Precision::Fixed(2));
        assert_eq!(" {:.0f} ".parse::<Precision>().unwrap(), Precision::Fixed(0));
    }

    #[test]
    fn test_parse_scientific() {
        assert_eq!("{:.3e}".parse::<Precision>().unwrap(), Precision::Scientific(3));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for spec in ["", "{}", "{:5f}", "{:.f}", "{:.5x}", "%.5f", "{:.5f"] {
            assert!(
                matches!(spec.parse::<Precision>(), Err(MetricsError::InvalidPrecision(_))),
                "spec {spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_oversized_digits() {
        assert_eq!("{:.64f}".parse::<Precision>().unwrap(), Precision::Fixed(MAX_DIGITS));
        for spec in ["{:.65f}", "{:.70000f}", "{:.70000e}"] {
            assert!(matches!(spec.parse::<Precision>(), Err(MetricsError::InvalidPrecision(_))));
        }
    }

    #[test]
    fn test_format_clamps_constructed_digits() {
        assert_eq!(Precision::Fixed(70_000).format(0.5), Precision::Fixed(MAX_DIGITS).format(0.5));
        assert_eq!(Precision::Scientific(70_000).format(0.5), Precision::Scientific(MAX_DIGITS).format(0.5));
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(Precision::Fixed(5).format(0.25), "0.25000");
        assert_eq!(Precision::Fixed(2).format(0.4), "0.40");
        assert_eq!(Precision::Fixed(0).format(2.0), "2");
    }

    #[test]
    fn test_format_scientific_pads_exponent() {
        assert_eq!(Precision::Scientific(2).format(0.000_123), "1.23e-04");
        assert_eq!(Precision::Scientific(1).format(1500.0), "1.5e+03");
    }

    #[test]
    fn test_display_round_trips_spec_text() {
        assert_eq!(Precision::Fixed(4).to_string(), "{:.4f}");
        assert_eq!(Precision::Scientific(2).to_string(), "{:.2e}");
    }

    #[test]
    fn test_serde_uses_spec_text() {
        let json = serde_json::to_string(&Precision::Fixed(3)).unwrap();
        assert_eq!(json, "\"{:.3f}\"");
        let back: Precision = serde_json::from_str("\"{:.1e}\"").unwrap();
        assert_eq!(back, Precision::Scientific(1));
    }
}
