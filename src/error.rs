//! Central error handling for the acceleration-structure core
//!
//! Provides a unified AccelError enum with the allocation / submission /
//! precondition categorisation used by every stage.

use std::fmt;

/// Coarse failure category reported upward by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Buffer, pipeline or fence creation failed.
    Allocation,
    /// The device rejected or lost work during submission or completion.
    Submission,
    /// The caller asked for something that must be rejected before dispatch.
    Precondition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Allocation => "Allocation",
            ErrorKind::Submission => "Submission",
            ErrorKind::Precondition => "Precondition",
        };
        f.write_str(name)
    }
}

/// Centralized error type for scheduler and build operations
#[derive(thiserror::Error, Debug)]
pub enum AccelError {
    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Timed out waiting for fence '{label}' to reach {value} (completed {completed})")]
    FenceTimeout {
        label: String,
        value: u64,
        completed: u64,
    },

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("Hazard: {0}")]
    Hazard(String),
}

impl AccelError {
    /// Category of this error in the allocation / submission / precondition taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            AccelError::Allocation(_) => ErrorKind::Allocation,
            AccelError::Submission(_)
            | AccelError::FenceTimeout { .. }
            | AccelError::Readback(_) => ErrorKind::Submission,
            AccelError::Precondition(_) | AccelError::Hazard(_) => ErrorKind::Precondition,
        }
    }

    /// Convenience constructors for common error types
    pub fn allocation<T: ToString>(msg: T) -> Self {
        AccelError::Allocation(msg.to_string())
    }

    pub fn submission<T: ToString>(msg: T) -> Self {
        AccelError::Submission(msg.to_string())
    }

    pub fn precondition<T: ToString>(msg: T) -> Self {
        AccelError::Precondition(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        AccelError::Readback(msg.to_string())
    }

    pub fn hazard<T: ToString>(msg: T) -> Self {
        AccelError::Hazard(msg.to_string())
    }
}

/// Result type alias for scheduler and build operations
pub type AccelResult<T> = Result<T, AccelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_readbacks_count_as_submission_failures() {
        let timeout = AccelError::FenceTimeout {
            label: "slot-0".into(),
            value: 7,
            completed: 6,
        };
        assert_eq!(timeout.kind(), ErrorKind::Submission);
        assert_eq!(AccelError::readback("map failed").kind(), ErrorKind::Submission);
        assert_eq!(AccelError::hazard("raw").kind(), ErrorKind::Precondition);
        assert_eq!(AccelError::allocation("oom").kind(), ErrorKind::Allocation);
    }

    #[test]
    fn messages_carry_category_prefix() {
        let err = AccelError::precondition("zero primitives");
        assert_eq!(err.to_string(), "Precondition violated: zero primitives");
    }
}
