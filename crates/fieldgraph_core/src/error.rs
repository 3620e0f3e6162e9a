//! Error and assignment result types shared by every field operation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FieldError>;

/// Failures raised while constructing, evaluating, assigning or searching fields.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{context}: expected {expected} components, got {actual}")]
    ComponentMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("field {0} is not a square matrix")]
    NotSquareMatrix(String),

    #[error("incompatible shapes: {0}")]
    IncompatibleShapes(String),

    #[error("field {field} is not of type {expected}")]
    WrongSourceType { field: String, expected: &'static str },

    #[error("field {0} belongs to a different field module")]
    DifferentModule(String),

    #[error("field cache has no location")]
    NoLocation,

    #[error("failed to evaluate field {field}: {cause}")]
    SourceEvaluation {
        field: String,
        #[source]
        cause: Box<FieldError>,
    },

    #[error("location unsupported: {0}")]
    LocationUnsupported(String),

    #[error("derivative mismatch: {0}")]
    DerivativeMismatch(String),

    #[error("singular matrix while evaluating {0}")]
    SingularMatrix(String),

    #[error("numeric failure in {field}: {message}")]
    NumericFailure { field: String, message: String },

    #[error("{operation} is not supported by field {field}")]
    NotSupported {
        field: String,
        operation: &'static str,
    },

    #[error("no mesh location found for field {0}")]
    NotFound(String),
}

impl FieldError {
    pub(crate) fn numeric(field: impl Into<String>, message: impl Into<String>) -> Self {
        FieldError::NumericFailure {
            field: field.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_supported(field: impl Into<String>, operation: &'static str) -> Self {
        FieldError::NotSupported {
            field: field.into(),
            operation,
        }
    }

    /// Wraps an error raised while evaluating `field`, unless it already names a field.
    pub(crate) fn in_field(self, field: &str) -> Self {
        match self {
            FieldError::SourceEvaluation { .. } => self,
            cause => FieldError::SourceEvaluation {
                field: field.to_string(),
                cause: Box::new(cause),
            },
        }
    }

    /// The innermost error, skipping `SourceEvaluation` wrappers.
    pub fn root_cause(&self) -> &FieldError {
        match self {
            FieldError::SourceEvaluation { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// Outcome of writing values back through a field (inverse evaluation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentResult {
    /// Every requested component reached the underlying source.
    AllValuesSet,
    /// Some components were written, others were clamped, masked or left unchanged.
    PartialValuesSet,
    /// Nothing was written: inverse unsupported or undefined.
    Fail,
}

impl AssignmentResult {
    pub fn is_success(self) -> bool {
        self != AssignmentResult::Fail
    }

    /// Combines the result of this stage with the result reported by the source it assigned to.
    pub fn then(self, source: AssignmentResult) -> AssignmentResult {
        match source {
            AssignmentResult::AllValuesSet => self,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_skips_evaluation_wrappers() {
        let err = FieldError::SingularMatrix("invert3".into())
            .in_field("invert3")
            .in_field("multiply4");
        assert_eq!(
            err.root_cause(),
            &FieldError::SingularMatrix("invert3".into())
        );
        let message = format!("{err}");
        assert!(message.contains("invert3"), "got {message}");
    }

    #[test]
    fn assignment_results_combine_with_source_result() {
        use AssignmentResult::*;
        assert_eq!(AllValuesSet.then(AllValuesSet), AllValuesSet);
        assert_eq!(PartialValuesSet.then(AllValuesSet), PartialValuesSet);
        assert_eq!(AllValuesSet.then(PartialValuesSet), PartialValuesSet);
        assert_eq!(PartialValuesSet.then(Fail), Fail);
        assert!(!Fail.is_success());
    }
}
