//! Backend abstraction over the compute control plane.
//!
//! The recreation workflow only ever talks to a [`Backend`]. Descriptors in
//! this module are provider-neutral projections of the control plane's
//! response shapes, so the workflow can run against the EC2 implementation or
//! an in-memory fake without change.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Instance state reported once an instance is booted.
pub const STATE_RUNNING: &str = "running";
/// Instance state reported once an instance is fully stopped.
pub const STATE_STOPPED: &str = "stopped";
/// Image and volume state reported when the resource is ready for use.
pub const STATE_AVAILABLE: &str = "available";
/// Volume state reported while a volume is attached to an instance.
pub const STATE_IN_USE: &str = "in-use";
/// Block device attachment status for a live attachment.
pub const ATTACHMENT_ATTACHED: &str = "attached";

/// Volume type that requires provisioned IOPS to be carried into a mapping.
const PROVISIONED_IOPS_TYPE: &str = "io1";

/// Control-plane operations consumed by the workflow.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// `describe-instances`.
    DescribeInstances,
    /// `describe-volumes`.
    DescribeVolumes,
    /// `describe-images`.
    DescribeImages,
    /// `describe-instance-attribute`, used to read user data.
    DescribeInstanceAttribute,
    /// `create-image`.
    CreateImage,
    /// `run-instances`.
    RunInstances,
    /// `stop-instances`.
    StopInstances,
    /// `start-instances`.
    StartInstances,
    /// `attach-volume`.
    AttachVolume,
    /// `detach-volume`.
    DetachVolume,
}

impl Operation {
    /// Returns the control-plane name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DescribeInstances => "describe-instances",
            Self::DescribeVolumes => "describe-volumes",
            Self::DescribeImages => "describe-images",
            Self::DescribeInstanceAttribute => "describe-instance-attribute",
            Self::CreateImage => "create-image",
            Self::RunInstances => "run-instances",
            Self::StopInstances => "stop-instances",
            Self::StartInstances => "start-instances",
            Self::AttachVolume => "attach-volume",
            Self::DetachVolume => "detach-volume",
        }
    }

    /// Returns `true` when the operation changes remote resources.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::DescribeInstances
                | Self::DescribeVolumes
                | Self::DescribeImages
                | Self::DescribeInstanceAttribute
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a mutating call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CallOutcome<T> {
    /// The control plane applied the change.
    Applied(T),
    /// The call was issued in dry-run mode and the control plane reported
    /// that it would have succeeded.
    Validated,
}

impl<T> CallOutcome<T> {
    /// Maps the applied value, leaving a validated outcome untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallOutcome<U> {
        match self {
            Self::Applied(value) => CallOutcome::Applied(f(value)),
            Self::Validated => CallOutcome::Validated,
        }
    }
}

/// Key/value tag carried by instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Placement of an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Placement {
    /// Availability zone, for example `eu-west-1a`.
    pub availability_zone: Option<String>,
    /// Placement group name.
    pub group_name: Option<String>,
    /// Tenancy (`default`, `dedicated`, `host`).
    pub tenancy: Option<String>,
}

/// Capacity reservation settings of an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapacityReservation {
    /// Reservation preference (`open`, `none`).
    pub preference: Option<String>,
    /// Targeted reservation identifier.
    pub reservation_id: Option<String>,
    /// Targeted reservation resource group ARN.
    pub resource_group_arn: Option<String>,
}

/// A block device currently mapped on an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachedBlockDevice {
    /// Device name as exposed to the instance (for example `/dev/sda1`).
    pub device_name: String,
    /// Identifier of the backing volume.
    pub volume_id: String,
    /// Attachment status (`attaching`, `attached`, `detaching`, `detached`).
    pub status: String,
    /// Whether the volume is deleted with the instance.
    pub delete_on_termination: bool,
}

/// A network interface attached to an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetworkInterfaceDescriptor {
    /// Public IPv4 address associated with the interface, if any.
    pub public_ip: Option<String>,
    /// Whether the interface is deleted with the instance.
    pub delete_on_termination: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// Position of the interface on the instance.
    pub device_index: i32,
    /// Security groups applied to the interface.
    pub group_ids: Vec<String>,
    /// IPv6 addresses assigned to the interface.
    pub ipv6_addresses: Vec<String>,
    /// Subnet the interface lives in.
    pub subnet_id: Option<String>,
    /// Interface type (`interface`, `efa`, ...).
    pub interface_type: Option<String>,
}

/// Read-only snapshot of an instance's remote attributes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceDescriptor {
    /// Instance identifier.
    pub id: String,
    /// Lifecycle state name (`pending`, `running`, `stopped`, ...).
    pub state: String,
    /// Instance type, for example `t3.micro`.
    pub instance_type: String,
    /// Key pair name.
    pub key_name: Option<String>,
    /// Device name of the root volume.
    pub root_device_name: Option<String>,
    /// Block devices in the order the control plane reports them.
    pub block_devices: Vec<AttachedBlockDevice>,
    /// Network interfaces in the order the control plane reports them.
    pub network_interfaces: Vec<NetworkInterfaceDescriptor>,
    /// Security groups applied to the instance.
    pub security_group_ids: Vec<String>,
    /// Subnet of the primary interface.
    pub subnet_id: Option<String>,
    /// Placement of the instance.
    pub placement: Placement,
    /// Whether detailed monitoring is enabled.
    pub monitoring_enabled: bool,
    /// Base64 encoded user data. Instance descriptions do not carry it; see
    /// [`Backend::describe_user_data`].
    pub user_data: Option<String>,
    /// ARN of the IAM instance profile.
    pub iam_instance_profile_arn: Option<String>,
    /// Whether the instance is EBS optimised.
    pub ebs_optimized: bool,
    /// Capacity reservation settings.
    pub capacity_reservation: Option<CapacityReservation>,
    /// Whether hibernation is configured.
    pub hibernation_configured: bool,
    /// Instance tags.
    pub tags: Vec<Tag>,
}

impl InstanceDescriptor {
    /// Returns the volume backing the root device, if the root device name
    /// matches one of the mapped block devices.
    #[must_use]
    pub fn root_volume_id(&self) -> Option<&str> {
        let root = self.root_device_name.as_deref()?;
        self.block_devices
            .iter()
            .find(|device| device.device_name == root)
            .map(|device| device.volume_id.as_str())
    }

    /// Returns the primary (first) network interface.
    #[must_use]
    pub fn primary_interface(&self) -> Option<&NetworkInterfaceDescriptor> {
        self.network_interfaces.first()
    }
}

/// An attachment of a volume to an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeAttachment {
    /// Instance the volume is attached to.
    pub instance_id: String,
    /// Device name used for the attachment.
    pub device: String,
    /// Whether the volume is deleted with the instance.
    pub delete_on_termination: bool,
}

/// Snapshot of a block storage volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VolumeDescriptor {
    /// Volume identifier.
    pub id: String,
    /// Volume state (`creating`, `available`, `in-use`, ...).
    pub state: String,
    /// Size in GiB.
    pub size_gib: i32,
    /// Volume type, for example `gp3`.
    pub volume_type: String,
    /// Whether the volume is encrypted.
    pub encrypted: bool,
    /// KMS key used for encryption.
    pub kms_key_id: Option<String>,
    /// Provisioned IOPS.
    pub iops: Option<i32>,
    /// Current attachments.
    pub attachments: Vec<VolumeAttachment>,
}

/// Snapshot of a machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageDescriptor {
    /// Image identifier.
    pub id: String,
    /// Image state (`pending`, `available`, `failed`, ...).
    pub state: String,
}

/// Launch-time description of one block device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDeviceMapping {
    /// Device name the volume is exposed as.
    pub device_name: String,
    /// Size in GiB.
    pub volume_size_gib: i32,
    /// Volume type.
    pub volume_type: String,
    /// Whether the volume is encrypted.
    pub encrypted: bool,
    /// Whether the volume is deleted with the instance.
    pub delete_on_termination: bool,
    /// KMS key used for encryption.
    pub kms_key_id: Option<String>,
    /// Provisioned IOPS, only set for `io1` volumes.
    pub iops: Option<i32>,
}

impl BlockDeviceMapping {
    /// Builds a mapping for `volume` exposed at `device_name`.
    ///
    /// IOPS are only carried for provisioned-IOPS (`io1`) volumes.
    #[must_use]
    pub fn from_volume(
        volume: &VolumeDescriptor,
        device_name: impl Into<String>,
        delete_on_termination: bool,
    ) -> Self {
        let iops = if volume.volume_type == PROVISIONED_IOPS_TYPE {
            volume.iops
        } else {
            None
        };
        Self {
            device_name: device_name.into(),
            volume_size_gib: volume.size_gib,
            volume_type: volume.volume_type.clone(),
            encrypted: volume.encrypted,
            delete_on_termination,
            kms_key_id: volume.kms_key_id.clone(),
            iops,
        }
    }
}

/// Parameters for creating an image from an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRequest {
    /// Instance the image is taken from.
    pub instance_id: String,
    /// Unique image name.
    pub name: String,
    /// Image description.
    pub description: String,
    /// When `false` the instance is rebooted for a consistent snapshot.
    pub no_reboot: bool,
    /// Block device layout recorded in the image.
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

/// Parameters for launching a single instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LaunchRequest {
    /// Image to boot from.
    pub image_id: String,
    /// Instance type.
    pub instance_type: String,
    /// Key pair name.
    pub key_name: Option<String>,
    /// Placement.
    pub placement: Placement,
    /// Subnet for the primary interface.
    pub subnet_id: Option<String>,
    /// Security groups for the primary interface.
    pub security_group_ids: Vec<String>,
    /// IPv6 addresses requested for the primary interface.
    pub ipv6_addresses: Vec<String>,
    /// Whether detailed monitoring is enabled.
    pub monitoring_enabled: bool,
    /// Base64 encoded user data.
    pub user_data: Option<String>,
    /// ARN of the IAM instance profile.
    pub iam_instance_profile_arn: Option<String>,
    /// Whether the instance is EBS optimised.
    pub ebs_optimized: bool,
    /// Capacity reservation settings.
    pub capacity_reservation: Option<CapacityReservation>,
    /// Whether hibernation is configured.
    pub hibernation_configured: bool,
    /// Tags applied to the instance at launch.
    pub tags: Vec<Tag>,
    /// Block device layout.
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

/// A volume detached from an instance, remembered with its device slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRef {
    /// Volume identifier.
    pub volume_id: String,
    /// Device name the volume was attached at.
    pub device_name: String,
}

impl VolumeRef {
    /// Creates a volume reference.
    #[must_use]
    pub fn new(volume_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            device_name: device_name.into(),
        }
    }
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Control-plane operations needed to recreate an instance.
///
/// Mutating operations take a `dry_run` flag; when it is set the call must
/// only be validated remotely and report [`CallOutcome::Validated`].
pub trait Backend {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Describes the given instances.
    fn describe_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<InstanceDescriptor>, Self::Error>;

    /// Describes the given volumes.
    fn describe_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, Self::Error>;

    /// Describes the given images.
    fn describe_images<'a>(
        &'a self,
        image_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<ImageDescriptor>, Self::Error>;

    /// Returns the base64 encoded user data of an instance, if any.
    fn describe_user_data<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<String>, Self::Error>;

    /// Returns `true` when `err` only means that a resource created moments
    /// ago is not visible to describe calls yet.
    ///
    /// Waits read such errors as "not ready". Every other caller surfaces
    /// them, so a mistyped identifier still fails the lookup.
    fn is_not_yet_visible(&self, _err: &Self::Error) -> bool {
        false
    }

    /// Creates an image and returns its identifier.
    fn create_image<'a>(
        &'a self,
        request: &'a ImageRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error>;

    /// Launches exactly one instance and returns its identifier.
    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error>;

    /// Requests a stop of the given instances.
    fn stop_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error>;

    /// Requests a start of the given instances.
    fn start_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error>;

    /// Attaches `volume` to `instance_id` at its recorded device name.
    fn attach_volume<'a>(
        &'a self,
        volume: &'a VolumeRef,
        instance_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error>;

    /// Detaches a volume from whichever instance holds it.
    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error>;
}
