//! Volume moves between stopped instances.

use log::info;

use crate::backend::{
    ATTACHMENT_ATTACHED, Backend, Operation, STATE_AVAILABLE, STATE_IN_USE, VolumeRef,
};
use crate::wait::wait_for_status;

use super::error::{PreconditionError, RecreateError, api_error};
use super::{Interrupt, RecreateOrchestrator, applied, visible_or_empty};

impl<B> RecreateOrchestrator<B>
where
    B: Backend,
{
    /// Detaches every attached volume of `instance_id` and waits until all of
    /// them are available. Returns the detached volumes with their device
    /// names, in device order.
    pub(super) async fn detach_volumes(
        &self,
        instance_id: &str,
    ) -> Result<Vec<VolumeRef>, Interrupt<B::Error>> {
        let ids = vec![instance_id.to_owned()];
        let instance = self
            .backend
            .describe_instances(&ids)
            .await
            .map_err(api_error(Operation::DescribeInstances))?
            .into_iter()
            .find(|instance| instance.id == instance_id)
            .ok_or_else(|| PreconditionError::InstanceNotFound {
                instance_id: instance_id.to_owned(),
            })?;

        let volumes: Vec<VolumeRef> = instance
            .block_devices
            .iter()
            .filter(|device| device.status == ATTACHMENT_ATTACHED)
            .map(|device| VolumeRef::new(&device.volume_id, &device.device_name))
            .collect();

        for volume in &volumes {
            info!(
                "detaching volume {} ({}) from instance {instance_id}",
                volume.volume_id, volume.device_name
            );
            let outcome = self
                .backend
                .detach_volume(&volume.volume_id, self.options.dry_run)
                .await
                .map_err(api_error(Operation::DetachVolume))?;
            applied(outcome, Operation::DetachVolume)?;
        }
        self.wait_for_volumes(&volumes, STATE_AVAILABLE).await?;
        Ok(volumes)
    }

    /// Attaches `volumes` to `instance_id` at their recorded device names and
    /// waits until all of them are in use.
    pub(super) async fn attach_volumes(
        &self,
        volumes: &[VolumeRef],
        instance_id: &str,
    ) -> Result<(), Interrupt<B::Error>> {
        for volume in volumes {
            info!(
                "attaching volume {} to instance {instance_id} as {}",
                volume.volume_id, volume.device_name
            );
            let outcome = self
                .backend
                .attach_volume(volume, instance_id, self.options.dry_run)
                .await
                .map_err(api_error(Operation::AttachVolume))?;
            applied(outcome, Operation::AttachVolume)?;
        }
        self.wait_for_volumes(volumes, STATE_IN_USE).await?;
        Ok(())
    }

    /// Waits until every volume in `volumes` reports `target`. A volume that
    /// is missing from the description counts as not ready.
    async fn wait_for_volumes(
        &self,
        volumes: &[VolumeRef],
        target: &str,
    ) -> Result<(), RecreateError<B::Error>> {
        if volumes.is_empty() {
            return Ok(());
        }
        let volume_ids: Vec<String> = volumes
            .iter()
            .map(|volume| volume.volume_id.clone())
            .collect();
        let resource = volume_ids.join(", ");
        let backend = &self.backend;
        let ids = volume_ids.as_slice();
        wait_for_status(&self.poll_policy, &resource, target, move || async move {
            let described = visible_or_empty(backend, backend.describe_volumes(ids).await)?;
            let statuses = if described.len() == ids.len() {
                described.into_iter().map(|volume| volume.state).collect()
            } else {
                Vec::new()
            };
            Ok::<_, B::Error>(statuses)
        })
        .await
        .map_err(|err| RecreateError::from_poll(err, Operation::DescribeVolumes))?;
        info!("volumes {resource} are {target}");
        Ok(())
    }
}
