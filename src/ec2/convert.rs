//! Conversions between SDK shapes and backend descriptors.

use aws_sdk_ec2::types as ec2;
use aws_sdk_ec2::types::{
    CapacityReservationPreference, CapacityReservationSpecification, CapacityReservationTarget,
    EbsBlockDevice, InstanceIpv6Address, MonitoringState, ResourceType, TagSpecification, Tenancy,
    VolumeType,
};

use crate::backend::{
    AttachedBlockDevice, BlockDeviceMapping, CapacityReservation, ImageDescriptor,
    InstanceDescriptor, NetworkInterfaceDescriptor, Placement, Tag, VolumeAttachment,
    VolumeDescriptor,
};

pub(super) fn instance_from_sdk(instance: &ec2::Instance) -> InstanceDescriptor {
    InstanceDescriptor {
        id: instance.instance_id().unwrap_or_default().to_owned(),
        state: instance
            .state()
            .and_then(ec2::InstanceState::name)
            .map(|name| name.as_str().to_owned())
            .unwrap_or_default(),
        instance_type: instance
            .instance_type()
            .map(|kind| kind.as_str().to_owned())
            .unwrap_or_default(),
        key_name: instance.key_name().map(str::to_owned),
        root_device_name: instance.root_device_name().map(str::to_owned),
        block_devices: instance
            .block_device_mappings()
            .iter()
            .filter_map(block_device_from_sdk)
            .collect(),
        network_interfaces: instance
            .network_interfaces()
            .iter()
            .map(interface_from_sdk)
            .collect(),
        security_group_ids: instance
            .security_groups()
            .iter()
            .filter_map(|group| group.group_id().map(str::to_owned))
            .collect(),
        subnet_id: instance.subnet_id().map(str::to_owned),
        placement: instance
            .placement()
            .map(placement_from_sdk)
            .unwrap_or_default(),
        monitoring_enabled: instance
            .monitoring()
            .and_then(ec2::Monitoring::state)
            .is_none_or(|state| *state != MonitoringState::Disabled),
        user_data: None,
        iam_instance_profile_arn: instance
            .iam_instance_profile()
            .and_then(|profile| profile.arn().map(str::to_owned)),
        ebs_optimized: instance.ebs_optimized().unwrap_or_default(),
        capacity_reservation: instance
            .capacity_reservation_specification()
            .map(capacity_reservation_from_sdk),
        hibernation_configured: instance
            .hibernation_options()
            .and_then(ec2::HibernationOptions::configured)
            .unwrap_or_default(),
        tags: instance
            .tags()
            .iter()
            .filter_map(|tag| Some(Tag::new(tag.key()?, tag.value().unwrap_or_default())))
            .collect(),
    }
}

/// Only EBS-backed devices carry a volume; instance-store entries are skipped.
fn block_device_from_sdk(
    mapping: &ec2::InstanceBlockDeviceMapping,
) -> Option<AttachedBlockDevice> {
    let ebs = mapping.ebs()?;
    Some(AttachedBlockDevice {
        device_name: mapping.device_name()?.to_owned(),
        volume_id: ebs.volume_id()?.to_owned(),
        status: ebs
            .status()
            .map(|status| status.as_str().to_owned())
            .unwrap_or_default(),
        delete_on_termination: ebs.delete_on_termination().unwrap_or_default(),
    })
}

fn interface_from_sdk(interface: &ec2::InstanceNetworkInterface) -> NetworkInterfaceDescriptor {
    let attachment = interface.attachment();
    NetworkInterfaceDescriptor {
        public_ip: interface
            .association()
            .and_then(|association| association.public_ip().map(str::to_owned)),
        delete_on_termination: attachment
            .and_then(ec2::InstanceNetworkInterfaceAttachment::delete_on_termination)
            .unwrap_or_default(),
        description: interface
            .description()
            .filter(|text| !text.is_empty())
            .map(str::to_owned),
        device_index: attachment
            .and_then(ec2::InstanceNetworkInterfaceAttachment::device_index)
            .unwrap_or_default(),
        group_ids: interface
            .groups()
            .iter()
            .filter_map(|group| group.group_id().map(str::to_owned))
            .collect(),
        ipv6_addresses: interface
            .ipv6_addresses()
            .iter()
            .filter_map(|address| address.ipv6_address().map(str::to_owned))
            .collect(),
        subnet_id: interface.subnet_id().map(str::to_owned),
        interface_type: interface.interface_type().map(str::to_owned),
    }
}

fn placement_from_sdk(placement: &ec2::Placement) -> Placement {
    Placement {
        availability_zone: placement.availability_zone().map(str::to_owned),
        group_name: placement
            .group_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned),
        tenancy: placement
            .tenancy()
            .map(|tenancy| tenancy.as_str().to_owned()),
    }
}

fn capacity_reservation_from_sdk(
    spec: &ec2::CapacityReservationSpecificationResponse,
) -> CapacityReservation {
    let target = spec.capacity_reservation_target();
    CapacityReservation {
        preference: spec
            .capacity_reservation_preference()
            .map(|preference| preference.as_str().to_owned()),
        reservation_id: target
            .and_then(|found| found.capacity_reservation_id().map(str::to_owned)),
        resource_group_arn: target.and_then(|found| {
            found
                .capacity_reservation_resource_group_arn()
                .map(str::to_owned)
        }),
    }
}

pub(super) fn volume_from_sdk(volume: &ec2::Volume) -> VolumeDescriptor {
    VolumeDescriptor {
        id: volume.volume_id().unwrap_or_default().to_owned(),
        state: volume
            .state()
            .map(|state| state.as_str().to_owned())
            .unwrap_or_default(),
        size_gib: volume.size().unwrap_or_default(),
        volume_type: volume
            .volume_type()
            .map(|kind| kind.as_str().to_owned())
            .unwrap_or_default(),
        encrypted: volume.encrypted().unwrap_or_default(),
        kms_key_id: volume.kms_key_id().map(str::to_owned),
        iops: volume.iops(),
        attachments: volume
            .attachments()
            .iter()
            .filter_map(|attachment| {
                Some(VolumeAttachment {
                    instance_id: attachment.instance_id()?.to_owned(),
                    device: attachment.device()?.to_owned(),
                    delete_on_termination: attachment.delete_on_termination().unwrap_or_default(),
                })
            })
            .collect(),
    }
}

pub(super) fn image_from_sdk(image: &ec2::Image) -> ImageDescriptor {
    ImageDescriptor {
        id: image.image_id().unwrap_or_default().to_owned(),
        state: image
            .state()
            .map(|state| state.as_str().to_owned())
            .unwrap_or_default(),
    }
}

pub(super) fn block_device_mapping_to_sdk(mapping: &BlockDeviceMapping) -> ec2::BlockDeviceMapping {
    ec2::BlockDeviceMapping::builder()
        .device_name(&mapping.device_name)
        .ebs(
            EbsBlockDevice::builder()
                .volume_size(mapping.volume_size_gib)
                .volume_type(VolumeType::from(mapping.volume_type.as_str()))
                .encrypted(mapping.encrypted)
                .delete_on_termination(mapping.delete_on_termination)
                .set_kms_key_id(mapping.kms_key_id.clone())
                .set_iops(mapping.iops)
                .build(),
        )
        .build()
}

pub(super) fn placement_to_sdk(placement: &Placement) -> ec2::Placement {
    ec2::Placement::builder()
        .set_availability_zone(placement.availability_zone.clone())
        .set_group_name(placement.group_name.clone())
        .set_tenancy(placement.tenancy.as_deref().map(Tenancy::from))
        .build()
}

pub(super) fn capacity_reservation_to_sdk(
    reservation: &CapacityReservation,
) -> CapacityReservationSpecification {
    let target = (reservation.reservation_id.is_some()
        || reservation.resource_group_arn.is_some())
    .then(|| {
        CapacityReservationTarget::builder()
            .set_capacity_reservation_id(reservation.reservation_id.clone())
            .set_capacity_reservation_resource_group_arn(reservation.resource_group_arn.clone())
            .build()
    });
    CapacityReservationSpecification::builder()
        .set_capacity_reservation_preference(
            reservation
                .preference
                .as_deref()
                .map(CapacityReservationPreference::from),
        )
        .set_capacity_reservation_target(target)
        .build()
}

pub(super) fn ipv6_addresses_to_sdk(addresses: &[String]) -> Vec<InstanceIpv6Address> {
    addresses
        .iter()
        .map(|address| InstanceIpv6Address::builder().ipv6_address(address).build())
        .collect()
}

/// Returns `None` for an empty tag set; EC2 rejects tag specifications
/// without tags.
pub(super) fn instance_tags_to_sdk(tags: &[Tag]) -> Option<TagSpecification> {
    if tags.is_empty() {
        return None;
    }
    let builder = tags.iter().fold(
        TagSpecification::builder().resource_type(ResourceType::Instance),
        |builder, tag| {
            builder.tags(
                ec2::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build(),
            )
        },
    );
    Some(builder.build())
}
