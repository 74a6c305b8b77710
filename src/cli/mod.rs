//! Command-line interface definitions for the `recreator` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{ArgAction, Parser};

/// Top-level CLI for the `recreator` binary.
#[derive(Debug, Parser)]
#[command(
    name = "recreator",
    version,
    about = "Replace EC2 instances with clones launched from their own images",
    long_about = "Replace EC2 instances with clones launched from their own images.\n\n\
        Each source instance is imaged, a replacement is launched with the \
        source's settings, both are stopped, the source's volumes are moved to \
        the replacement at the same device names, and the replacement is \
        started. The replacement's own volumes are left detached."
)]
pub(crate) struct Cli {
    /// Instances to recreate.
    #[arg(long, value_name = "ID", num_args = 1.., required = true)]
    pub(crate) source_instance_ids: Vec<String>,
    /// Stop once the replacement is running and leave the source untouched.
    #[arg(long)]
    pub(crate) launch_only: bool,
    /// Ask EC2 to validate the first mutating call without applying it.
    ///
    /// Describe calls still run. The workflow stops after the first call EC2
    /// reports as valid, since later steps depend on resources that were not
    /// created.
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Raise log verbosity (-v for debug, -vv for trace). `RUST_LOG` takes
    /// precedence when set.
    #[arg(short, long, action = ArgAction::Count)]
    pub(crate) verbose: u8,
}
