//! Error types for the sequential validator

/// SPRT construction and input errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SprtError {
    /// A parameter is outside its admissible range
    #[error("invalid SPRT parameter {name}={value}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
        /// What the value violates
        reason: &'static str,
    },

    /// An observation is not 0 (pass) or 1 (fail)
    #[error("observation #{index} has value {value}, expected 0 or 1")]
    InvalidObservation {
        /// Position in the observation array
        index: usize,
        /// Offending value
        value: i64,
    },
}

impl SprtError {
    #[inline]
    pub(crate) fn parameter(name: &'static str, value: f64, reason: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            reason,
        }
    }
}
