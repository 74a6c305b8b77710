//! Pure helpers that turn a source instance into launch parameters.

use uuid::Uuid;

use crate::backend::{
    BlockDeviceMapping, ImageRequest, InstanceDescriptor, LaunchRequest, Tag, VolumeDescriptor,
};

use super::error::PreconditionError;

/// Tag key prefix reserved by the control plane; such tags cannot be set.
const RESERVED_TAG_PREFIX: &str = "aws:";

/// Default prefix for created image names.
pub const DEFAULT_IMAGE_NAME_PREFIX: &str = "recreator-";
/// Default description recorded on created images.
pub const DEFAULT_IMAGE_DESCRIPTION: &str = "From Recreator";

/// Naming applied to images taken from source instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageNaming {
    /// Prefix of the generated image name; a random UUID is appended.
    pub prefix: String,
    /// Description stored on the image.
    pub description: String,
}

impl ImageNaming {
    /// Creates a naming scheme.
    #[must_use]
    pub fn new(prefix: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            description: description.into(),
        }
    }

    /// Builds the image request for `instance_id`. The instance is rebooted
    /// during imaging.
    #[must_use]
    pub fn image_request(
        &self,
        instance_id: &str,
        block_device_mappings: Vec<BlockDeviceMapping>,
    ) -> ImageRequest {
        ImageRequest {
            instance_id: instance_id.to_owned(),
            name: format!("{}{}", self.prefix, Uuid::new_v4()),
            description: self.description.clone(),
            no_reboot: false,
            block_device_mappings,
        }
    }
}

impl Default for ImageNaming {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_NAME_PREFIX, DEFAULT_IMAGE_DESCRIPTION)
    }
}

/// Launch-time description of a network interface rebuilt from the source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkInterfaceSpec {
    /// Whether a public IPv4 address should be associated.
    pub associate_public_ip: bool,
    /// Whether the interface is deleted with the instance.
    pub delete_on_termination: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Position of the interface on the instance.
    pub device_index: i32,
    /// Security groups applied to the interface.
    pub group_ids: Vec<String>,
    /// Number of IPv6 addresses, set only when the source had any.
    pub ipv6_address_count: Option<usize>,
    /// IPv6 addresses carried over from the source.
    pub ipv6_addresses: Vec<String>,
    /// Subnet of the interface.
    pub subnet_id: Option<String>,
    /// Interface type.
    pub interface_type: Option<String>,
}

/// Everything the workflow derives before launching the replacement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LaunchPlan {
    /// Parameters sent to the control plane.
    pub request: LaunchRequest,
    /// Interfaces rebuilt from the source. They are computed for inspection
    /// and logging only and are not part of [`LaunchPlan::request`].
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
}

impl LaunchPlan {
    /// Derives the launch plan for a replacement of `source` booting from
    /// `image_id`.
    #[must_use]
    pub fn for_source(
        source: &InstanceDescriptor,
        image_id: &str,
        block_device_mappings: Vec<BlockDeviceMapping>,
    ) -> Self {
        Self {
            request: launch_request(source, image_id, block_device_mappings),
            network_interfaces: rebuild_network_interfaces(source),
        }
    }
}

/// Builds one mapping per block device of `source`, in device order, from
/// the described `volumes`.
///
/// The device name and delete-on-termination flag come from the volume's
/// attachment to `source`, falling back to the block device entry.
///
/// # Errors
///
/// Returns [`PreconditionError::VolumeNotDescribed`] when a mapped volume is
/// missing from `volumes`.
pub fn block_device_mappings(
    source: &InstanceDescriptor,
    volumes: &[VolumeDescriptor],
) -> Result<Vec<BlockDeviceMapping>, PreconditionError> {
    source
        .block_devices
        .iter()
        .map(|device| {
            let volume = volumes
                .iter()
                .find(|volume| volume.id == device.volume_id)
                .ok_or_else(|| PreconditionError::VolumeNotDescribed {
                    instance_id: source.id.clone(),
                    volume_id: device.volume_id.clone(),
                })?;
            let attachment = volume
                .attachments
                .iter()
                .find(|attachment| attachment.instance_id == source.id);
            let device_name = attachment.map_or(device.device_name.as_str(), |found| {
                found.device.as_str()
            });
            let delete_on_termination = attachment.map_or(device.delete_on_termination, |found| {
                found.delete_on_termination
            });
            Ok(BlockDeviceMapping::from_volume(
                volume,
                device_name,
                delete_on_termination,
            ))
        })
        .collect()
}

/// Rebuilds the launch description of every network interface of `source`.
#[must_use]
pub fn rebuild_network_interfaces(source: &InstanceDescriptor) -> Vec<NetworkInterfaceSpec> {
    source
        .network_interfaces
        .iter()
        .map(|interface| NetworkInterfaceSpec {
            associate_public_ip: interface.public_ip.is_some(),
            delete_on_termination: interface.delete_on_termination,
            description: interface.description.clone(),
            device_index: interface.device_index,
            group_ids: interface.group_ids.clone(),
            ipv6_address_count: (!interface.ipv6_addresses.is_empty())
                .then_some(interface.ipv6_addresses.len()),
            ipv6_addresses: interface.ipv6_addresses.clone(),
            subnet_id: interface.subnet_id.clone(),
            interface_type: interface.interface_type.clone(),
        })
        .collect()
}

/// Builds the launch request for a replacement of `source`.
///
/// IPv6 addresses are taken straight from the primary interface. Tags under
/// the reserved `aws:` prefix are dropped.
#[must_use]
pub fn launch_request(
    source: &InstanceDescriptor,
    image_id: &str,
    block_device_mappings: Vec<BlockDeviceMapping>,
) -> LaunchRequest {
    let ipv6_addresses = source
        .primary_interface()
        .map(|interface| interface.ipv6_addresses.clone())
        .unwrap_or_default();

    LaunchRequest {
        image_id: image_id.to_owned(),
        instance_type: source.instance_type.clone(),
        key_name: source.key_name.clone(),
        placement: source.placement.clone(),
        subnet_id: source.subnet_id.clone(),
        security_group_ids: source.security_group_ids.clone(),
        ipv6_addresses,
        monitoring_enabled: source.monitoring_enabled,
        user_data: source.user_data.clone(),
        iam_instance_profile_arn: source.iam_instance_profile_arn.clone(),
        ebs_optimized: source.ebs_optimized,
        capacity_reservation: source.capacity_reservation.clone(),
        hibernation_configured: source.hibernation_configured,
        tags: copyable_tags(&source.tags),
        block_device_mappings,
    }
}

fn copyable_tags(tags: &[Tag]) -> Vec<Tag> {
    tags.iter()
        .filter(|tag| !tag.key.starts_with(RESERVED_TAG_PREFIX))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        ATTACHMENT_ATTACHED, AttachedBlockDevice, NetworkInterfaceDescriptor, Placement,
        STATE_IN_USE, VolumeAttachment,
    };
    use rstest::{fixture, rstest};

    fn attached(device: &str, volume_id: &str) -> AttachedBlockDevice {
        AttachedBlockDevice {
            device_name: device.to_owned(),
            volume_id: volume_id.to_owned(),
            status: String::from(ATTACHMENT_ATTACHED),
            delete_on_termination: true,
        }
    }

    fn volume(id: &str, device: &str, size_gib: i32, volume_type: &str) -> VolumeDescriptor {
        VolumeDescriptor {
            id: id.to_owned(),
            state: String::from(STATE_IN_USE),
            size_gib,
            volume_type: volume_type.to_owned(),
            encrypted: size_gib > 10,
            kms_key_id: None,
            iops: Some(3000),
            attachments: vec![VolumeAttachment {
                instance_id: String::from("i-aaa"),
                device: device.to_owned(),
                delete_on_termination: device == "/dev/sda1",
            }],
        }
    }

    #[fixture]
    fn source() -> InstanceDescriptor {
        InstanceDescriptor {
            id: String::from("i-aaa"),
            state: String::from("running"),
            instance_type: String::from("t3.micro"),
            key_name: Some(String::from("ops")),
            root_device_name: Some(String::from("/dev/sda1")),
            block_devices: vec![
                attached("/dev/sda1", "vol-1"),
                attached("/dev/sdb", "vol-2"),
                attached("/dev/sdc", "vol-3"),
            ],
            network_interfaces: vec![
                NetworkInterfaceDescriptor {
                    public_ip: Some(String::from("203.0.113.7")),
                    delete_on_termination: true,
                    device_index: 0,
                    group_ids: vec![String::from("sg-1")],
                    ipv6_addresses: vec![String::from("2001:db8::1")],
                    subnet_id: Some(String::from("subnet-1")),
                    interface_type: Some(String::from("interface")),
                    ..NetworkInterfaceDescriptor::default()
                },
                NetworkInterfaceDescriptor {
                    device_index: 1,
                    subnet_id: Some(String::from("subnet-1")),
                    ..NetworkInterfaceDescriptor::default()
                },
            ],
            security_group_ids: vec![String::from("sg-1")],
            subnet_id: Some(String::from("subnet-1")),
            placement: Placement {
                availability_zone: Some(String::from("eu-west-1a")),
                ..Placement::default()
            },
            monitoring_enabled: true,
            tags: vec![
                Tag::new("Name", "web"),
                Tag::new("aws:cloudformation:stack-name", "stack"),
            ],
            ..InstanceDescriptor::default()
        }
    }

    #[rstest]
    fn mappings_have_one_entry_per_attached_volume(source: InstanceDescriptor) {
        let volumes = vec![
            volume("vol-3", "/dev/sdc", 50, "io1"),
            volume("vol-1", "/dev/sda1", 8, "gp3"),
            volume("vol-2", "/dev/sdb", 20, "gp3"),
        ];

        let mappings = block_device_mappings(&source, &volumes)
            .unwrap_or_else(|err| panic!("mappings should build: {err}"));

        assert_eq!(mappings.len(), 3);
        let summary: Vec<_> = mappings
            .iter()
            .map(|m| {
                (
                    m.device_name.as_str(),
                    m.volume_size_gib,
                    m.volume_type.as_str(),
                    m.encrypted,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("/dev/sda1", 8, "gp3", false),
                ("/dev/sdb", 20, "gp3", true),
                ("/dev/sdc", 50, "io1", true),
            ]
        );
        assert!(mappings.first().is_some_and(|m| m.delete_on_termination));
        assert_eq!(mappings.get(2).and_then(|m| m.iops), Some(3000));
        assert_eq!(mappings.get(1).and_then(|m| m.iops), None);
    }

    #[rstest]
    fn missing_volume_description_is_a_precondition_error(source: InstanceDescriptor) {
        let volumes = vec![volume("vol-1", "/dev/sda1", 8, "gp3")];
        let err = block_device_mappings(&source, &volumes).expect_err("vol-2 is missing");
        assert_eq!(
            err,
            PreconditionError::VolumeNotDescribed {
                instance_id: String::from("i-aaa"),
                volume_id: String::from("vol-2"),
            }
        );
    }

    #[rstest]
    fn launch_request_copies_source_attributes(source: InstanceDescriptor) {
        let request = launch_request(&source, "ami-1", Vec::new());

        assert_eq!(request.image_id, "ami-1");
        assert_eq!(request.instance_type, "t3.micro");
        assert_eq!(request.key_name.as_deref(), Some("ops"));
        assert_eq!(request.subnet_id.as_deref(), Some("subnet-1"));
        assert_eq!(request.security_group_ids, vec![String::from("sg-1")]);
        assert_eq!(request.ipv6_addresses, vec![String::from("2001:db8::1")]);
        assert_eq!(
            request.placement.availability_zone.as_deref(),
            Some("eu-west-1a")
        );
        assert!(request.monitoring_enabled);
        assert_eq!(request.tags, vec![Tag::new("Name", "web")]);
    }

    #[rstest]
    fn interfaces_are_rebuilt_but_not_sent(source: InstanceDescriptor) {
        let plan = LaunchPlan::for_source(&source, "ami-1", Vec::new());

        assert_eq!(plan.network_interfaces.len(), 2);
        let primary = plan
            .network_interfaces
            .first()
            .unwrap_or_else(|| panic!("primary interface should be rebuilt"));
        assert!(primary.associate_public_ip);
        assert_eq!(primary.ipv6_address_count, Some(1));
        let secondary = plan
            .network_interfaces
            .get(1)
            .unwrap_or_else(|| panic!("secondary interface should be rebuilt"));
        assert!(!secondary.associate_public_ip);
        assert_eq!(secondary.ipv6_address_count, None);
        assert_eq!(secondary.device_index, 1);
    }

    #[test]
    fn image_names_are_unique_and_prefixed() {
        let naming = ImageNaming::default();
        let first = naming.image_request("i-aaa", Vec::new());
        let second = naming.image_request("i-aaa", Vec::new());

        assert!(first.name.starts_with("recreator-"));
        assert_ne!(first.name, second.name);
        assert_eq!(first.description, "From Recreator");
        assert!(!first.no_reboot);
    }
}
