//! Pipeline phases and their transition table

use serde::{Deserialize, Serialize};

use crate::error::ForgeError;

/// Phase of one mutation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Resolving the target and taking the guard lease
    Orienting,
    /// Waiting on the code generator
    Generating,
    /// Writing generated code under a backup
    Applying,
    /// Building the blinded interface
    ExtractingInterface,
    /// Generating and running adversarial tests
    AdversarialVerify,
    /// Sequential test over the observed trials
    StatisticalDecision,
    /// Restoring the backup after a rejection
    RollingBack,
    /// Change kept (terminal)
    Committed,
    /// Every attempt failed (terminal)
    Exhausted,
    /// Stopped by an error, a lock or cancellation (terminal)
    Aborted,
}

impl Phase {
    /// Whether the pipeline has ended
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Exhausted | Self::Aborted)
    }

    /// Snake-case name, as serialized
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orienting => "orienting",
            Self::Generating => "generating",
            Self::Applying => "applying",
            Self::ExtractingInterface => "extracting_interface",
            Self::AdversarialVerify => "adversarial_verify",
            Self::StatisticalDecision => "statistical_decision",
            Self::RollingBack => "rolling_back",
            Self::Committed => "committed",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a phase transition.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), ForgeError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(ForgeError::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: Phase) -> Vec<Phase> {
    use Phase::*;
    match from {
        Orienting => vec![Generating, Aborted],
        // a failed generation moves straight on to the next attempt
        Generating => vec![Applying, Generating, Exhausted, Aborted],
        Applying => vec![ExtractingInterface, RollingBack, Aborted],
        ExtractingInterface => vec![AdversarialVerify, RollingBack, Aborted],
        AdversarialVerify => vec![StatisticalDecision, RollingBack, Aborted],
        StatisticalDecision => vec![Committed, RollingBack, Aborted],
        RollingBack => vec![Generating, Exhausted, Aborted],
        Committed => vec![],
        Exhausted => vec![],
        Aborted => vec![],
    }
}

fn allowed(from: Phase, to: Phase) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Phase::Orienting,
            Phase::Generating,
            Phase::Applying,
            Phase::ExtractingInterface,
            Phase::AdversarialVerify,
            Phase::StatisticalDecision,
            Phase::Committed,
        ];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
    }

    #[test]
    fn retry_loop_is_legal() {
        validate_transition(Phase::StatisticalDecision, Phase::RollingBack).unwrap();
        validate_transition(Phase::RollingBack, Phase::Generating).unwrap();
        validate_transition(Phase::RollingBack, Phase::Exhausted).unwrap();
    }

    #[test]
    fn terminal_phases_are_sinks() {
        for phase in [Phase::Committed, Phase::Exhausted, Phase::Aborted] {
            assert!(phase.is_terminal());
            assert!(allowed_transitions(phase).is_empty());
        }
    }

    #[test]
    fn cannot_commit_without_a_decision() {
        let err = validate_transition(Phase::AdversarialVerify, Phase::Committed).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::IllegalTransition {
                from: Phase::AdversarialVerify,
                to: Phase::Committed
            }
        ));
        assert!(validate_transition(Phase::Orienting, Phase::Applying).is_err());
    }
}
