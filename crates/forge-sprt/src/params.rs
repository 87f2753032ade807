//! Test parameters and derived boundaries

use serde::{Deserialize, Serialize};

use crate::SprtError;

/// Error rates and hypotheses of one sequential test.
///
/// `alpha` bounds the false-reject rate, `beta` the false-accept rate,
/// `p0`/`p1` are the failure rates of the null and alternative hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SprtParams {
    /// Type I error rate
    pub alpha: f64,
    /// Type II error rate
    pub beta: f64,
    /// Failure rate under H0
    pub p0: f64,
    /// Failure rate under H1
    pub p1: f64,
}

impl Default for SprtParams {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            beta: 0.1,
            p0: 0.01,
            p1: 0.2,
        }
    }
}

impl SprtParams {
    /// Create validated parameters
    ///
    /// # Errors
    /// Returns [`SprtError::InvalidParameter`] when a rate is outside `(0, 1)`,
    /// when `p0 >= p1`, or when `alpha + beta >= 1`.
    pub fn new(alpha: f64, beta: f64, p0: f64, p1: f64) -> Result<Self, SprtError> {
        let params = Self {
            alpha,
            beta,
            p0,
            p1,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameter ranges
    ///
    /// # Errors
    /// See [`SprtParams::new`].
    pub fn validate(&self) -> Result<(), SprtError> {
        for (name, value) in [
            ("alpha", self.alpha),
            ("beta", self.beta),
            ("p0", self.p0),
            ("p1", self.p1),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(SprtError::parameter(name, value, "must lie in (0, 1)"));
            }
        }
        if self.p0 >= self.p1 {
            return Err(SprtError::parameter("p1", self.p1, "must exceed p0"));
        }
        if self.alpha + self.beta >= 1.0 {
            return Err(SprtError::parameter(
                "beta",
                self.beta,
                "alpha + beta must be below 1",
            ));
        }
        Ok(())
    }

    /// `ln(A)` with `A = (1 - beta) / alpha`; at or above it H0 is rejected
    #[inline]
    #[must_use]
    pub fn upper_bound(&self) -> f64 {
        ((1.0 - self.beta) / self.alpha).ln()
    }

    /// `ln(B)` with `B = beta / (1 - alpha)`; at or below it H0 is accepted
    #[inline]
    #[must_use]
    pub fn lower_bound(&self) -> f64 {
        (self.beta / (1.0 - self.alpha)).ln()
    }

    /// LLR increment for a passing trial (always negative)
    #[inline]
    #[must_use]
    pub fn pass_step(&self) -> f64 {
        ((1.0 - self.p1) / (1.0 - self.p0)).ln()
    }

    /// LLR increment for a failing trial (always positive)
    #[inline]
    #[must_use]
    pub fn fail_step(&self) -> f64 {
        (self.p1 / self.p0).ln()
    }

    /// Number of consecutive passes needed to reach Accept from zero
    #[must_use]
    pub fn trials_to_accept(&self) -> usize {
        steps_to_cross(self.lower_bound(), self.pass_step())
    }

    /// Number of consecutive failures needed to reach Reject from zero
    #[must_use]
    pub fn trials_to_reject(&self) -> usize {
        steps_to_cross(self.upper_bound(), self.fail_step())
    }
}

/// Smallest `n` such that adding `step` to zero `n` times reaches `bound`.
///
/// Accumulates exactly like the validator so float rounding cannot disagree
/// with the running sum. Returns `usize::MAX` when the bound is unreachable.
fn steps_to_cross(bound: f64, step: f64) -> usize {
    let ratio = bound / step;
    if !ratio.is_finite() || ratio < 0.0 {
        return usize::MAX;
    }
    let mut sum = 0.0;
    let mut n = 0;
    loop {
        n += 1;
        sum += step;
        if (step < 0.0 && sum <= bound) || (step > 0.0 && sum >= bound) {
            return n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let p = SprtParams::default();
        assert!((p.alpha - 0.05).abs() < f64::EPSILON);
        assert!((p.beta - 0.1).abs() < f64::EPSILON);
        assert!((p.p0 - 0.01).abs() < f64::EPSILON);
        assert!((p.p1 - 0.2).abs() < f64::EPSILON);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn default_boundaries() {
        let p = SprtParams::default();
        assert!((p.upper_bound() - 18.0_f64.ln()).abs() < 1e-12);
        assert!((p.lower_bound() - (0.1_f64 / 0.95).ln()).abs() < 1e-12);
        assert_eq!(p.trials_to_accept(), 11);
        assert_eq!(p.trials_to_reject(), 1);
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(SprtParams::new(0.0, 0.1, 0.01, 0.2).is_err());
        assert!(SprtParams::new(0.05, 1.0, 0.01, 0.2).is_err());
        assert!(SprtParams::new(0.05, 0.1, 0.3, 0.2).is_err());
        assert!(SprtParams::new(0.6, 0.5, 0.01, 0.2).is_err());
        assert!(SprtParams::new(0.05, 0.1, f64::NAN, 0.2).is_err());
    }

    #[test]
    fn deny_unknown_fields() {
        let parsed: Result<SprtParams, _> =
            serde_json::from_str(r#"{"alpha":0.05,"beta":0.1,"p0":0.01,"p1":0.2,"gamma":1}"#);
        assert!(parsed.is_err());
    }
}
