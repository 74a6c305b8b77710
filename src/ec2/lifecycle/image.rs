//! Image creation.

use log::debug;

use crate::backend::{CallOutcome, ImageRequest, Operation};
use crate::ec2::Ec2Backend;
use crate::ec2::convert::block_device_mapping_to_sdk;
use crate::ec2::error::{Ec2BackendError, mutation_outcome};

impl Ec2Backend {
    pub(in crate::ec2) async fn create_image_from(
        &self,
        request: &ImageRequest,
        dry_run: bool,
    ) -> Result<CallOutcome<String>, Ec2BackendError> {
        debug!(
            "create-image {} from {} with {} block devices",
            request.name,
            request.instance_id,
            request.block_device_mappings.len()
        );
        let result = self
            .client
            .create_image()
            .instance_id(&request.instance_id)
            .name(&request.name)
            .description(&request.description)
            .no_reboot(request.no_reboot)
            .set_block_device_mappings(Some(
                request
                    .block_device_mappings
                    .iter()
                    .map(block_device_mapping_to_sdk)
                    .collect(),
            ))
            .dry_run(dry_run)
            .send()
            .await;
        let CallOutcome::Applied(response) = mutation_outcome(Operation::CreateImage, result)?
        else {
            return Ok(CallOutcome::Validated);
        };
        let image_id = response
            .image_id()
            .ok_or(Ec2BackendError::MissingField {
                operation: Operation::CreateImage,
                field: "ImageId",
            })?;
        Ok(CallOutcome::Applied(image_id.to_owned()))
    }
}
