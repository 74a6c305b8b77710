//! Volume attachment.

use crate::backend::{CallOutcome, Operation, VolumeRef};
use crate::ec2::Ec2Backend;
use crate::ec2::error::{Ec2BackendError, mutation_outcome};

impl Ec2Backend {
    pub(in crate::ec2) async fn attach(
        &self,
        volume: &VolumeRef,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<CallOutcome<()>, Ec2BackendError> {
        let result = self
            .client
            .attach_volume()
            .volume_id(&volume.volume_id)
            .instance_id(instance_id)
            .device(&volume.device_name)
            .dry_run(dry_run)
            .send()
            .await;
        Ok(mutation_outcome(Operation::AttachVolume, result)?.map(drop))
    }
}
