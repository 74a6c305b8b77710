//! Control-plane calls made by the EC2 backend.
//!
//! Each submodule adds an `impl Ec2Backend` block for one family of calls.
//! Mutating calls forward the dry-run flag and map `DryRunOperation` to
//! [`crate::backend::CallOutcome::Validated`].

mod describe;
mod image;
mod launch;
mod power;
mod volume_attach;
mod volume_detach;
