//! BDD scenarios for the recreation workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RecreateContext, recreate_context};

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Move the source volumes onto the replacement"
)]
fn scenario_full_migration(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Stop once the replacement is running"
)]
fn scenario_launch_only(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Validate permissions without changing anything"
)]
fn scenario_dry_run(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Reject an instance without a root volume"
)]
fn scenario_missing_root_volume(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Keep going after one instance fails"
)]
fn scenario_batch_isolation(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Surface provider failures"
)]
fn scenario_provider_failure(recreate_context: RecreateContext) {
    drop(recreate_context);
}

#[scenario(
    path = "tests/features/recreate.feature",
    name = "Give up when the image never becomes available"
)]
fn scenario_image_wait_exhausted(recreate_context: RecreateContext) {
    drop(recreate_context);
}
