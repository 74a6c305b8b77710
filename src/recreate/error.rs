//! Error types for the recreation workflow.

use thiserror::Error;

use crate::backend::Operation;
use crate::wait::PollError;

/// Coarse classification of a workflow failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The source instance did not satisfy a local precondition.
    Precondition,
    /// The control plane rejected or failed a call.
    ExternalApi,
    /// A bounded wait ran out of attempts.
    WaitExhausted,
}

/// Local precondition failures, raised before the offending step runs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PreconditionError {
    /// The lookup returned no instances at all.
    #[error("no instances found for {requested}")]
    NoInstancesFound {
        /// Identifiers that were requested.
        requested: String,
    },
    /// The root device name matches none of the mapped block devices.
    #[error("no root volume found for instance {instance_id}")]
    MissingRootVolume {
        /// Source instance identifier.
        instance_id: String,
    },
    /// A mapped volume was absent from the volume description.
    #[error("volume {volume_id} of instance {instance_id} was not described")]
    VolumeNotDescribed {
        /// Instance the volume is mapped on.
        instance_id: String,
        /// Missing volume identifier.
        volume_id: String,
    },
    /// An instance disappeared from the control plane's view mid-run.
    #[error("instance {instance_id} not found")]
    InstanceNotFound {
        /// Instance identifier.
        instance_id: String,
    },
}

/// Errors surfaced while recreating an instance.
#[derive(Debug, Error)]
pub enum RecreateError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Raised when a local precondition does not hold.
    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    /// Raised when a control-plane call fails.
    #[error("{operation} failed: {source}")]
    Api {
        /// Call that failed.
        operation: Operation,
        /// Provider-specific error.
        #[source]
        source: BackendError,
    },
    /// Raised when a bounded wait gives up.
    #[error("{resource} did not reach {target} after {attempts} checks")]
    WaitExhausted {
        /// Resource being waited on.
        resource: String,
        /// Expected state.
        target: String,
        /// Number of checks performed.
        attempts: u32,
    },
}

impl<BackendError> RecreateError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    /// Returns the coarse category of the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Api { .. } => ErrorKind::ExternalApi,
            Self::WaitExhausted { .. } => ErrorKind::WaitExhausted,
        }
    }

    /// Converts a polling failure raised while watching the results of
    /// `operation`.
    pub(crate) fn from_poll(err: PollError<BackendError>, operation: Operation) -> Self {
        match err {
            PollError::Fetch { source, .. } => Self::Api { operation, source },
            PollError::Exhausted {
                resource,
                target,
                attempts,
            } => Self::WaitExhausted {
                resource,
                target,
                attempts,
            },
        }
    }
}

/// Returns a mapper that wraps a backend error raised by `operation`.
pub(crate) fn api_error<BackendError>(
    operation: Operation,
) -> impl FnOnce(BackendError) -> RecreateError<BackendError>
where
    BackendError: std::error::Error + 'static,
{
    move |source| RecreateError::Api { operation, source }
}
