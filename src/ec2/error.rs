//! Error types for the EC2 backend.

use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use thiserror::Error;

use crate::backend::{CallOutcome, Operation};

/// Error code EC2 returns when a dry-run request would have succeeded.
pub const DRY_RUN_CODE: &str = "DryRunOperation";

/// Error codes EC2 returns while a freshly created resource is not yet
/// visible to describe calls. The same codes flag mistyped identifiers, so
/// only waits may read them as "not ready".
const NOT_YET_VISIBLE_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidInstanceID.NotFound",
    "InvalidVolume.NotFound",
];

/// Errors raised by the EC2 backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Ec2BackendError {
    /// Wrapper for failures reported by the SDK or the service.
    #[error("{message}{}", code_suffix(.code.as_deref()))]
    Provider {
        /// Operation that failed.
        operation: Operation,
        /// Service error code, when the service returned one.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
    /// Raised when a successful response lacks a field the workflow needs.
    #[error("{operation} response is missing {field}")]
    MissingField {
        /// Operation whose response was incomplete.
        operation: Operation,
        /// Name of the missing field.
        field: &'static str,
    },
}

fn code_suffix(code: Option<&str>) -> String {
    code.map(|value| format!(" ({value})")).unwrap_or_default()
}

impl Ec2BackendError {
    /// Converts an SDK error raised by `operation`.
    pub(crate) fn from_sdk<E, R>(operation: Operation, err: &SdkError<E, R>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let message = err.message().map_or_else(
            || DisplayErrorContext(err).to_string(),
            str::to_owned,
        );
        Self::Provider {
            operation,
            code: err.code().map(str::to_owned),
            message,
        }
    }

    /// Returns the service error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Provider { code, .. } => code.as_deref(),
            Self::MissingField { .. } => None,
        }
    }

    /// Returns `true` for the "not found" codes EC2 reports while a freshly
    /// created resource propagates.
    #[must_use]
    pub fn is_not_yet_visible(&self) -> bool {
        self.code()
            .is_some_and(|code| NOT_YET_VISIBLE_CODES.contains(&code))
    }
}

/// Maps the result of a mutating call, turning the dry-run success code into
/// [`CallOutcome::Validated`].
pub(crate) fn mutation_outcome<T, E, R>(
    operation: Operation,
    result: Result<T, SdkError<E, R>>,
) -> Result<CallOutcome<T>, Ec2BackendError>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match result {
        Ok(output) => Ok(CallOutcome::Applied(output)),
        Err(err) if err.code() == Some(DRY_RUN_CODE) => Ok(CallOutcome::Validated),
        Err(err) => Err(Ec2BackendError::from_sdk(operation, &err)),
    }
}
