//! Launching the replacement instance.

use aws_sdk_ec2::Client;
use aws_sdk_ec2::operation::run_instances::builders::RunInstancesFluentBuilder;
use aws_sdk_ec2::types::{
    HibernationOptionsRequest, IamInstanceProfileSpecification, InstanceType,
    RunInstancesMonitoringEnabled,
};
use log::debug;

use crate::backend::{CallOutcome, LaunchRequest, Operation};
use crate::ec2::Ec2Backend;
use crate::ec2::convert::{
    block_device_mapping_to_sdk, capacity_reservation_to_sdk, instance_tags_to_sdk,
    ipv6_addresses_to_sdk, placement_to_sdk,
};
use crate::ec2::error::{Ec2BackendError, mutation_outcome};

/// Builds a `RunInstances` call for exactly one instance.
///
/// Optional settings are only sent when the source had them.
pub(in crate::ec2) fn run_instances_request(
    client: &Client,
    request: &LaunchRequest,
    dry_run: bool,
) -> RunInstancesFluentBuilder {
    let mut call = client
        .run_instances()
        .image_id(&request.image_id)
        .instance_type(InstanceType::from(request.instance_type.as_str()))
        .min_count(1)
        .max_count(1)
        .set_key_name(request.key_name.clone())
        .placement(placement_to_sdk(&request.placement))
        .set_subnet_id(request.subnet_id.clone())
        .monitoring(
            RunInstancesMonitoringEnabled::builder()
                .enabled(request.monitoring_enabled)
                .build(),
        )
        .set_user_data(request.user_data.clone())
        .ebs_optimized(request.ebs_optimized)
        .set_block_device_mappings(Some(
            request
                .block_device_mappings
                .iter()
                .map(block_device_mapping_to_sdk)
                .collect(),
        ))
        .dry_run(dry_run);

    if !request.security_group_ids.is_empty() {
        call = call.set_security_group_ids(Some(request.security_group_ids.clone()));
    }
    if !request.ipv6_addresses.is_empty() {
        call = call.set_ipv6_addresses(Some(ipv6_addresses_to_sdk(&request.ipv6_addresses)));
    }
    if let Some(arn) = &request.iam_instance_profile_arn {
        call = call
            .iam_instance_profile(IamInstanceProfileSpecification::builder().arn(arn).build());
    }
    if let Some(reservation) = &request.capacity_reservation {
        call = call.capacity_reservation_specification(capacity_reservation_to_sdk(reservation));
    }
    if request.hibernation_configured {
        call = call
            .hibernation_options(HibernationOptionsRequest::builder().configured(true).build());
    }
    if let Some(tags) = instance_tags_to_sdk(&request.tags) {
        call = call.tag_specifications(tags);
    }
    call
}

impl Ec2Backend {
    pub(in crate::ec2) async fn launch(
        &self,
        request: &LaunchRequest,
        dry_run: bool,
    ) -> Result<CallOutcome<String>, Ec2BackendError> {
        debug!(
            "run-instances {} from {}",
            request.instance_type, request.image_id
        );
        let result = run_instances_request(&self.client, request, dry_run)
            .send()
            .await;
        let CallOutcome::Applied(response) = mutation_outcome(Operation::RunInstances, result)?
        else {
            return Ok(CallOutcome::Validated);
        };
        let instance_id = response
            .instances()
            .first()
            .and_then(|instance| instance.instance_id())
            .ok_or(Ec2BackendError::MissingField {
                operation: Operation::RunInstances,
                field: "Instances[0].InstanceId",
            })?;
        Ok(CallOutcome::Applied(instance_id.to_owned()))
    }
}
