//! Shared fixtures for recreation BDD scenarios.

use std::time::Duration;

use recreator::test_support::ScriptedCloud;
use recreator::{ErrorKind, Operation, PollPolicy, RecreateOptions};
use rstest::fixture;

/// Identifier handed to the first replacement instance.
pub const REPLACEMENT_ID: &str = "i-bbb";

#[derive(Clone, Debug)]
pub struct RecreateContext {
    pub cloud: ScriptedCloud,
    pub options: RecreateOptions,
    pub instance_ids: Vec<String>,
    pub results: Vec<(String, InstanceResult)>,
}

impl RecreateContext {
    pub fn result_for(&self, instance_id: &str) -> Option<&InstanceResult> {
        self.results
            .iter()
            .find(|(id, _)| id == instance_id)
            .map(|(_, result)| result)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceResult {
    Migrated { new_instance_id: String },
    Launched { new_instance_id: String },
    DryRun { operation: Operation },
    Failed { kind: ErrorKind, message: String },
}

#[fixture]
pub fn recreate_context() -> RecreateContext {
    let cloud = ScriptedCloud::new();
    cloud.queue_instance_ids(&[REPLACEMENT_ID]);
    RecreateContext {
        cloud,
        options: RecreateOptions::default(),
        instance_ids: Vec::new(),
        results: Vec::new(),
    }
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(1)).with_max_attempts(10)
}

/// Volume identifiers seeded for `instance_id`, root first.
pub fn seeded_volume_ids(instance_id: &str) -> [String; 2] {
    let suffix = instance_id.trim_start_matches("i-");
    [format!("vol-{suffix}-root"), format!("vol-{suffix}-data")]
}
