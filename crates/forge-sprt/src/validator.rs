//! Running log-likelihood ratio and the decision rule

use serde::{Deserialize, Serialize};

use crate::{SprtError, SprtParams};

/// Outcome of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trial {
    /// Observation `0`
    Pass,
    /// Observation `1`
    Fail,
}

impl Trial {
    /// Decode an observation array (`0` = pass, `1` = fail)
    ///
    /// # Errors
    /// Returns [`SprtError::InvalidObservation`] for any other value.
    pub fn from_observations(observations: &[i64]) -> Result<Vec<Self>, SprtError> {
        observations
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                Self::try_from(value).map_err(|()| SprtError::InvalidObservation { index, value })
            })
            .collect()
    }
}

impl TryFrom<i64> for Trial {
    type Error = ();

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pass),
            1 => Ok(Self::Fail),
            _ => Err(()),
        }
    }
}

/// Decision of the test at the current evidence level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// H0 holds: the change is sound
    Accept,
    /// H1 holds: the change is flaky or regressive
    Reject,
    /// Not enough evidence either way
    Continue,
}

impl Decision {
    /// Whether the test reached a boundary
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Continue)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::Continue => "CONTINUE",
        };
        write!(f, "{name}")
    }
}

/// Summary of a finished evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Decision on the final LLR
    pub decision: Decision,
    /// Final log-likelihood ratio
    pub llr: f64,
    /// Trials evaluated
    pub samples: usize,
    /// Failing trials among them
    pub failures: usize,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (LLR {:.4}, {} failures in {} trials)",
            self.decision, self.llr, self.failures, self.samples
        )
    }
}

/// Streaming SPRT state
#[derive(Debug, Clone)]
pub struct SequentialValidator {
    params: SprtParams,
    upper: f64,
    lower: f64,
    pass_step: f64,
    fail_step: f64,
    llr: f64,
    samples: usize,
    failures: usize,
}

impl SequentialValidator {
    /// Create a validator at zero evidence
    #[must_use]
    pub fn new(params: SprtParams) -> Self {
        Self {
            params,
            upper: params.upper_bound(),
            lower: params.lower_bound(),
            pass_step: params.pass_step(),
            fail_step: params.fail_step(),
            llr: 0.0,
            samples: 0,
            failures: 0,
        }
    }

    /// Parameters in use
    #[inline]
    #[must_use]
    pub fn params(&self) -> &SprtParams {
        &self.params
    }

    /// Current log-likelihood ratio
    #[inline]
    #[must_use]
    pub fn llr(&self) -> f64 {
        self.llr
    }

    /// Trials recorded so far
    #[inline]
    #[must_use]
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Add one trial and return the running decision
    pub fn record(&mut self, trial: Trial) -> Decision {
        match trial {
            Trial::Pass => self.llr += self.pass_step,
            Trial::Fail => {
                self.llr += self.fail_step;
                self.failures += 1;
            }
        }
        self.samples += 1;
        self.status()
    }

    /// Decision at the current LLR
    #[must_use]
    pub fn status(&self) -> Decision {
        if self.llr >= self.upper {
            Decision::Reject
        } else if self.llr <= self.lower {
            Decision::Accept
        } else {
            Decision::Continue
        }
    }

    /// Fold every trial in and decide on the final LLR.
    ///
    /// All trials count, even after a boundary was crossed midway: a late
    /// failure burst can pull an early Accept back to Continue or Reject.
    /// An empty slice yields `Continue`.
    pub fn evaluate(&mut self, trials: &[Trial]) -> Verdict {
        for &trial in trials {
            self.record(trial);
        }
        let verdict = self.verdict();
        tracing::debug!(
            decision = %verdict.decision,
            llr = verdict.llr,
            samples = verdict.samples,
            "sprt evaluation finished"
        );
        verdict
    }

    /// Snapshot of the current state
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        Verdict {
            decision: self.status(),
            llr: self.llr,
            samples: self.samples,
            failures: self.failures,
        }
    }

    /// Clear the evidence, keeping the parameters
    pub fn reset(&mut self) {
        self.llr = 0.0;
        self.samples = 0;
        self.failures = 0;
    }
}

impl Default for SequentialValidator {
    fn default() -> Self {
        Self::new(SprtParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_continue() {
        let mut v = SequentialValidator::default();
        let verdict = v.evaluate(&[]);
        assert_eq!(verdict.decision, Decision::Continue);
        assert_eq!(verdict.samples, 0);
        assert!(verdict.llr.abs() < f64::EPSILON);
    }

    #[test]
    fn eleven_passes_accept() {
        let mut v = SequentialValidator::default();
        for _ in 0..10 {
            assert_eq!(v.record(Trial::Pass), Decision::Continue);
        }
        assert_eq!(v.record(Trial::Pass), Decision::Accept);
    }

    #[test]
    fn single_failure_rejects() {
        let mut v = SequentialValidator::default();
        assert_eq!(v.record(Trial::Fail), Decision::Reject);
    }

    #[test]
    fn twenty_five_passes_accept() {
        let mut v = SequentialValidator::default();
        let verdict = v.evaluate(&[Trial::Pass; 25]);
        assert_eq!(verdict.decision, Decision::Accept);
        assert_eq!(verdict.failures, 0);
    }

    #[test]
    fn late_failure_is_not_accept() {
        // 23 passes then one failure: enough evidence is undone
        let mut trials = vec![Trial::Pass; 23];
        trials.push(Trial::Fail);
        let verdict = SequentialValidator::default().evaluate(&trials);
        assert_ne!(verdict.decision, Decision::Accept);
    }

    #[test]
    fn observations_decode() {
        assert_eq!(
            Trial::from_observations(&[0, 1, 0]).ok(),
            Some(vec![Trial::Pass, Trial::Fail, Trial::Pass])
        );
        assert_eq!(
            Trial::from_observations(&[0, 2]),
            Err(SprtError::InvalidObservation { index: 1, value: 2 })
        );
    }

    #[test]
    fn reset_clears_evidence() {
        let mut v = SequentialValidator::default();
        v.record(Trial::Fail);
        v.reset();
        assert_eq!(v.samples(), 0);
        assert_eq!(v.status(), Decision::Continue);
    }
}
