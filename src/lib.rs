//! Core library for the Recreator instance replacement tool.
//!
//! The crate exposes a backend abstraction over the compute control plane, an
//! EC2 implementation of it, and the workflow that replaces an instance with a
//! clone launched from its own image (image → launch → stop both → move
//! volumes → start).

pub mod backend;
pub mod config;
pub mod ec2;
pub mod recreate;
pub mod test_support;
pub mod wait;

pub use backend::{
    Backend, BackendFuture, BlockDeviceMapping, CallOutcome, ImageDescriptor, ImageRequest,
    InstanceDescriptor, LaunchRequest, Operation, VolumeDescriptor, VolumeRef,
};
pub use config::{ConfigError, RecreatorConfig};
pub use ec2::{Ec2Backend, Ec2BackendError};
pub use recreate::{
    BatchReport, ErrorKind, ImageNaming, InstanceReport, PreconditionError, RecreateError,
    RecreateOptions, RecreateOrchestrator, RecreateOutcome,
};
pub use wait::{PollError, PollPolicy};
