//! BDD step definitions for the recreation workflow.

use recreator::backend::{AttachedBlockDevice, STATE_RUNNING};
use recreator::test_support::{ScriptedCloudError, SeedDisk};
use recreator::{
    ErrorKind, InstanceDescriptor, Operation, RecreateError, RecreateOrchestrator, RecreateOutcome,
};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{InstanceResult, RecreateContext, fast_policy, seeded_volume_ids};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a running source instance \"{id}\" with a root and a data volume")]
fn source_with_volumes(mut recreate_context: RecreateContext, id: String) -> RecreateContext {
    let [root, data] = seeded_volume_ids(&id);
    recreate_context.cloud.seed_running_instance(
        &id,
        &[
            SeedDisk::new("/dev/sda1", &root, 8, "gp3"),
            SeedDisk::new("/dev/sdf", &data, 100, "io1"),
        ],
    );
    recreate_context.instance_ids.push(id);
    recreate_context
}

#[given("a running source instance \"{id}\" without a root volume")]
fn source_without_root(mut recreate_context: RecreateContext, id: String) -> RecreateContext {
    recreate_context.cloud.add_instance(InstanceDescriptor {
        id: id.clone(),
        state: String::from(STATE_RUNNING),
        instance_type: String::from("t3.micro"),
        root_device_name: Some(String::from("/dev/xvda")),
        block_devices: vec![AttachedBlockDevice {
            device_name: String::from("/dev/sdf"),
            volume_id: String::from("vol-unrelated"),
            status: String::from("attached"),
            delete_on_termination: false,
        }],
        ..InstanceDescriptor::default()
    });
    recreate_context.instance_ids.push(id);
    recreate_context
}

#[given("launch-only mode is enabled")]
fn launch_only_enabled(mut recreate_context: RecreateContext) -> RecreateContext {
    recreate_context.options.launch_only = true;
    recreate_context
}

#[given("dry-run mode is enabled")]
fn dry_run_enabled(mut recreate_context: RecreateContext) -> RecreateContext {
    recreate_context.options.dry_run = true;
    recreate_context
}

#[given("the provider rejects \"{operation}\"")]
fn provider_rejects(
    recreate_context: RecreateContext,
    operation: String,
) -> Result<RecreateContext, StepError> {
    recreate_context.cloud.fail_on(parse_operation(&operation)?);
    Ok(recreate_context)
}

#[given("image creation never completes")]
fn image_creation_stalls(recreate_context: RecreateContext) -> RecreateContext {
    recreate_context.cloud.stall_images();
    recreate_context
}

#[when("I recreate the source instances")]
fn recreate_sources(recreate_context: RecreateContext) -> Result<RecreateContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator =
        RecreateOrchestrator::new(recreate_context.cloud.clone(), recreate_context.options)
            .with_poll_policy(fast_policy());
    let instance_ids = recreate_context.instance_ids.clone();
    let report = runtime
        .block_on(async move { orchestrator.recreate_instances(&instance_ids).await })
        .map_err(|err| StepError::Assertion(format!("instance lookup failed: {err}")))?;

    let results = report
        .reports
        .into_iter()
        .map(|entry| (entry.instance_id, summarise(entry.result)))
        .collect();
    Ok(RecreateContext {
        results,
        ..recreate_context
    })
}

#[then("instance \"{source}\" is recreated as \"{replacement}\"")]
fn recreated_as(
    recreate_context: &RecreateContext,
    source: String,
    replacement: String,
) -> Result<(), StepError> {
    expect_result(
        recreate_context,
        &source,
        &InstanceResult::Migrated {
            new_instance_id: replacement,
        },
    )
}

#[then("instance \"{source}\" is launched as \"{replacement}\"")]
fn launched_as(
    recreate_context: &RecreateContext,
    source: String,
    replacement: String,
) -> Result<(), StepError> {
    expect_result(
        recreate_context,
        &source,
        &InstanceResult::Launched {
            new_instance_id: replacement,
        },
    )
}

#[then("instance \"{source}\" reports a dry run of \"{operation}\"")]
fn reports_dry_run(
    recreate_context: &RecreateContext,
    source: String,
    operation: String,
) -> Result<(), StepError> {
    expect_result(
        recreate_context,
        &source,
        &InstanceResult::DryRun {
            operation: parse_operation(&operation)?,
        },
    )
}

#[then("instance \"{source}\" fails with a \"{kind}\" error")]
fn fails_with(
    recreate_context: &RecreateContext,
    source: String,
    kind: String,
) -> Result<(), StepError> {
    let expected = parse_error_kind(&kind)?;
    match recreate_context.result_for(&source) {
        Some(InstanceResult::Failed {
            kind: actual,
            message,
        }) if *actual == expected && !message.is_empty() => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected:?} failure for {source}, got {other:?}"
        ))),
    }
}

#[then("the volumes of \"{source}\" are attached to \"{target}\"")]
fn volumes_attached_to(
    recreate_context: &RecreateContext,
    source: String,
    target: String,
) -> Result<(), StepError> {
    for volume_id in seeded_volume_ids(&source) {
        let volume = recreate_context
            .cloud
            .volume(&volume_id)
            .ok_or_else(|| StepError::Assertion(format!("{volume_id} is unknown")))?;
        let attached_to: Vec<&str> = volume
            .attachments
            .iter()
            .map(|attachment| attachment.instance_id.as_str())
            .collect();
        if attached_to != [target.as_str()] {
            return Err(StepError::Assertion(format!(
                "{volume_id} should be attached to {target}, found {attached_to:?}"
            )));
        }
    }
    Ok(())
}

#[then("instance \"{id}\" is \"{state}\"")]
fn instance_in_state(
    recreate_context: &RecreateContext,
    id: String,
    state: String,
) -> Result<(), StepError> {
    let instance = recreate_context
        .cloud
        .instance(&id)
        .ok_or_else(|| StepError::Assertion(format!("{id} is unknown")))?;
    if instance.state == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} to be {state}, found {}",
            instance.state
        )))
    }
}

#[then("nothing was changed")]
fn nothing_changed(recreate_context: &RecreateContext) -> Result<(), StepError> {
    let applied: Vec<Operation> = recreate_context
        .cloud
        .mutating_calls()
        .into_iter()
        .filter(|call| call.dry_run != Some(true))
        .map(|call| call.operation)
        .collect();
    if applied.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no applied mutations, got {applied:?}"
        )))
    }
}

fn expect_result(
    recreate_context: &RecreateContext,
    source: &str,
    expected: &InstanceResult,
) -> Result<(), StepError> {
    match recreate_context.result_for(source) {
        Some(actual) if actual == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected:?} for {source}, got {other:?}"
        ))),
    }
}

fn summarise(result: Result<RecreateOutcome, RecreateError<ScriptedCloudError>>) -> InstanceResult {
    match result {
        Ok(RecreateOutcome::Migrated {
            new_instance_id, ..
        }) => InstanceResult::Migrated { new_instance_id },
        Ok(RecreateOutcome::Launched {
            new_instance_id, ..
        }) => InstanceResult::Launched { new_instance_id },
        Ok(RecreateOutcome::DryRun { operation, .. }) => InstanceResult::DryRun { operation },
        Err(err) => InstanceResult::Failed {
            kind: err.kind(),
            message: err.to_string(),
        },
    }
}

fn parse_operation(name: &str) -> Result<Operation, StepError> {
    [
        Operation::CreateImage,
        Operation::RunInstances,
        Operation::StopInstances,
        Operation::StartInstances,
        Operation::AttachVolume,
        Operation::DetachVolume,
    ]
    .into_iter()
    .find(|operation| operation.as_str() == name)
    .ok_or_else(|| StepError::Assertion(format!("unknown operation: {name}")))
}

fn parse_error_kind(kind: &str) -> Result<ErrorKind, StepError> {
    match kind {
        "precondition" => Ok(ErrorKind::Precondition),
        "external-api" => Ok(ErrorKind::ExternalApi),
        "wait-exhausted" => Ok(ErrorKind::WaitExhausted),
        _ => Err(StepError::Assertion(format!("unknown error kind: {kind}"))),
    }
}
