use thiserror::Error;

use crate::model::Position;

/// Every expected business outcome that is not a success.
///
/// Returned to the immediate caller; a failed operation commits nothing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LiveError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("set has no memberships")]
    NoMemberships,
    #[error("no membership at position {0}")]
    InvalidPosition(Position),
    #[error("already at the last item of the set")]
    EndOfSet,
    #[error("already at the first item of the set")]
    StartOfSet,
    #[error("current item has no images")]
    NoImages,
    #[error("image index {index} out of range for {count} images")]
    InvalidIndex { index: u32, count: u32 },
    #[error("reorder list repeats membership {0}")]
    DuplicateIds(String),
    #[error("ownership mismatch: {0}")]
    OwnershipMismatch(String),
    #[error("share token expired")]
    Expired,
    #[error("share token invalid")]
    Invalid,
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LiveError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        LiveError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine code sent to transport clients.
    pub fn code(&self) -> &'static str {
        match self {
            LiveError::NotFound { .. } => "not_found",
            LiveError::NoMemberships => "no_memberships",
            LiveError::InvalidPosition(_) => "invalid_position",
            LiveError::EndOfSet => "end_of_set",
            LiveError::StartOfSet => "start_of_set",
            LiveError::NoImages => "no_images",
            LiveError::InvalidIndex { .. } => "invalid_index",
            LiveError::DuplicateIds(_) => "duplicate_ids",
            LiveError::OwnershipMismatch(_) => "ownership_mismatch",
            LiveError::Expired => "expired",
            LiveError::Invalid => "invalid",
            LiveError::ConstraintViolation(_) => "constraint_violation",
            LiveError::Storage(_) => "storage",
        }
    }
}

pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LiveError::not_found("set", "abc");
        assert_eq!(err.to_string(), "set not found: abc");

        let err = LiveError::InvalidIndex { index: 4, count: 2 };
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            LiveError::not_found("set", 1),
            LiveError::NoMemberships,
            LiveError::InvalidPosition(9),
            LiveError::EndOfSet,
            LiveError::StartOfSet,
            LiveError::NoImages,
            LiveError::InvalidIndex { index: 1, count: 1 },
            LiveError::DuplicateIds("x".into()),
            LiveError::OwnershipMismatch("x".into()),
            LiveError::Expired,
            LiveError::Invalid,
            LiveError::ConstraintViolation("x".into()),
            LiveError::Storage("x".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(LiveError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
