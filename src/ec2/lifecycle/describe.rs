//! Read-only describe calls.

use aws_sdk_ec2::types::InstanceAttributeName;

use crate::backend::{ImageDescriptor, InstanceDescriptor, Operation, VolumeDescriptor};
use crate::ec2::Ec2Backend;
use crate::ec2::convert::{image_from_sdk, instance_from_sdk, volume_from_sdk};
use crate::ec2::error::Ec2BackendError;

impl Ec2Backend {
    pub(in crate::ec2) async fn fetch_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceDescriptor>, Ec2BackendError> {
        let response = self
            .client
            .describe_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|err| Ec2BackendError::from_sdk(Operation::DescribeInstances, &err))?;
        Ok(response
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .map(instance_from_sdk)
            .collect())
    }

    pub(in crate::ec2) async fn fetch_volumes(
        &self,
        volume_ids: &[String],
    ) -> Result<Vec<VolumeDescriptor>, Ec2BackendError> {
        let response = self
            .client
            .describe_volumes()
            .set_volume_ids(Some(volume_ids.to_vec()))
            .send()
            .await
            .map_err(|err| Ec2BackendError::from_sdk(Operation::DescribeVolumes, &err))?;
        Ok(response.volumes().iter().map(volume_from_sdk).collect())
    }

    pub(in crate::ec2) async fn fetch_images(
        &self,
        image_ids: &[String],
    ) -> Result<Vec<ImageDescriptor>, Ec2BackendError> {
        let response = self
            .client
            .describe_images()
            .set_image_ids(Some(image_ids.to_vec()))
            .send()
            .await
            .map_err(|err| Ec2BackendError::from_sdk(Operation::DescribeImages, &err))?;
        Ok(response.images().iter().map(image_from_sdk).collect())
    }

    pub(in crate::ec2) async fn fetch_user_data(
        &self,
        instance_id: &str,
    ) -> Result<Option<String>, Ec2BackendError> {
        let response = self
            .client
            .describe_instance_attribute()
            .instance_id(instance_id)
            .attribute(InstanceAttributeName::UserData)
            .send()
            .await
            .map_err(|err| {
                Ec2BackendError::from_sdk(Operation::DescribeInstanceAttribute, &err)
            })?;
        Ok(response
            .user_data()
            .and_then(|attribute| attribute.value())
            .filter(|value| !value.is_empty())
            .map(str::to_owned))
    }
}
