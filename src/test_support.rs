//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::backend::{
    ATTACHMENT_ATTACHED, AttachedBlockDevice, Backend, BackendFuture, CallOutcome,
    ImageDescriptor, ImageRequest, InstanceDescriptor, LaunchRequest, Operation, STATE_AVAILABLE,
    STATE_IN_USE, STATE_RUNNING, STATE_STOPPED, VolumeAttachment, VolumeDescriptor, VolumeRef,
};

const STATE_PENDING: &str = "pending";
const STATE_STOPPING: &str = "stopping";

/// A call received by [`ScriptedCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudCall {
    /// Operation invoked.
    pub operation: Operation,
    /// Dry-run flag for mutating calls; `None` for describe calls.
    pub dry_run: Option<bool>,
    /// Resource identifiers the call targeted.
    pub targets: Vec<String>,
}

/// Errors returned by [`ScriptedCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedCloudError {
    /// The operation was scripted to fail.
    #[error("scripted {operation} failure")]
    Rejected {
        /// Operation that was rejected.
        operation: Operation,
    },
    /// A describe named an instance that is hidden from describe calls.
    #[error("instance {instance_id} is not visible yet")]
    NotYetVisible {
        /// Hidden instance.
        instance_id: String,
    },
}

/// A disk to seed on an instance with [`ScriptedCloud::seed_running_instance`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SeedDisk {
    /// Device name on the instance.
    pub device_name: String,
    /// Volume identifier.
    pub volume_id: String,
    /// Size in GiB.
    pub size_gib: i32,
    /// Volume type.
    pub volume_type: String,
}

impl SeedDisk {
    /// Creates a disk description.
    #[must_use]
    pub fn new(
        device_name: impl Into<String>,
        volume_id: impl Into<String>,
        size_gib: i32,
        volume_type: impl Into<String>,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            volume_id: volume_id.into(),
            size_gib,
            volume_type: volume_type.into(),
        }
    }
}

/// Current state plus the state reported after the next describe.
#[derive(Clone, Debug)]
struct Tracked<T> {
    resource: T,
    settles_to: Option<String>,
}

impl<T> Tracked<T> {
    const fn settled(resource: T) -> Self {
        Self {
            resource,
            settles_to: None,
        }
    }
}

/// Resources whose lifecycle state the simulation advances.
trait Stateful: Clone {
    fn state_mut(&mut self) -> &mut String;
}

impl Stateful for InstanceDescriptor {
    fn state_mut(&mut self) -> &mut String {
        &mut self.state
    }
}

impl Stateful for VolumeDescriptor {
    fn state_mut(&mut self) -> &mut String {
        &mut self.state
    }
}

impl Stateful for ImageDescriptor {
    fn state_mut(&mut self) -> &mut String {
        &mut self.state
    }
}

/// Snapshots the requested resources, then advances any pending transition
/// when `settle` is set. Unknown identifiers are skipped.
fn describe_tracked<T: Stateful>(
    tracked: &mut BTreeMap<String, Tracked<T>>,
    ids: &[String],
    settle: bool,
) -> Vec<T> {
    let mut described = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(entry) = tracked.get_mut(id) else {
            continue;
        };
        described.push(entry.resource.clone());
        if settle && let Some(next) = entry.settles_to.take() {
            *entry.resource.state_mut() = next;
        }
    }
    described
}

#[derive(Debug, Default)]
struct CloudState {
    instance_order: Vec<String>,
    instances: BTreeMap<String, Tracked<InstanceDescriptor>>,
    volumes: BTreeMap<String, Tracked<VolumeDescriptor>>,
    images: BTreeMap<String, Tracked<ImageDescriptor>>,
    calls: Vec<CloudCall>,
    failing: HashSet<Operation>,
    images_stall: bool,
    hidden_instances: BTreeSet<String>,
    hide_launches: bool,
    queued_instance_ids: VecDeque<String>,
    image_requests: Vec<ImageRequest>,
    launch_requests: Vec<LaunchRequest>,
    next_id: u32,
}

impl CloudState {
    fn record(
        &mut self,
        operation: Operation,
        dry_run: Option<bool>,
        targets: Vec<String>,
    ) -> Result<(), ScriptedCloudError> {
        self.calls.push(CloudCall {
            operation,
            dry_run,
            targets,
        });
        if self.failing.contains(&operation) {
            return Err(ScriptedCloudError::Rejected { operation });
        }
        Ok(())
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id = self.next_id.saturating_add(1);
        format!("{prefix}-{:04}", self.next_id)
    }

    fn insert_instance(&mut self, instance: Tracked<InstanceDescriptor>) {
        if !self.instances.contains_key(&instance.resource.id) {
            self.instance_order.push(instance.resource.id.clone());
        }
        self.instances
            .insert(instance.resource.id.clone(), instance);
    }

    fn describe_instances(
        &mut self,
        ids: &[String],
    ) -> Result<Vec<InstanceDescriptor>, ScriptedCloudError> {
        let hidden = ids
            .iter()
            .find(|id| self.hidden_instances.contains(*id))
            .cloned();
        if let Some(instance_id) = hidden {
            self.hidden_instances.remove(&instance_id);
            return Err(ScriptedCloudError::NotYetVisible { instance_id });
        }
        let mut described = describe_tracked(&mut self.instances, ids, true);
        described.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(described)
    }

    fn describe_volumes(&mut self, ids: &[String]) -> Vec<VolumeDescriptor> {
        describe_tracked(&mut self.volumes, ids, true)
    }

    fn describe_images(&mut self, ids: &[String]) -> Vec<ImageDescriptor> {
        let settle = !self.images_stall;
        describe_tracked(&mut self.images, ids, settle)
    }

    fn create_image(&mut self, request: &ImageRequest) -> String {
        self.image_requests.push(request.clone());
        let id = self.fresh_id("ami");
        self.images.insert(
            id.clone(),
            Tracked {
                resource: ImageDescriptor {
                    id: id.clone(),
                    state: String::from(STATE_PENDING),
                },
                settles_to: Some(String::from(STATE_AVAILABLE)),
            },
        );
        id
    }

    fn run_instance(&mut self, request: &LaunchRequest) -> String {
        self.launch_requests.push(request.clone());
        let id = self
            .queued_instance_ids
            .pop_front()
            .unwrap_or_else(|| self.fresh_id("i"));
        if self.hide_launches {
            self.hidden_instances.insert(id.clone());
        }
        let mut block_devices = Vec::with_capacity(request.block_device_mappings.len());
        for mapping in &request.block_device_mappings {
            let volume_id = self.fresh_id("vol");
            self.volumes.insert(
                volume_id.clone(),
                Tracked::settled(VolumeDescriptor {
                    id: volume_id.clone(),
                    state: String::from(STATE_IN_USE),
                    size_gib: mapping.volume_size_gib,
                    volume_type: mapping.volume_type.clone(),
                    encrypted: mapping.encrypted,
                    kms_key_id: mapping.kms_key_id.clone(),
                    iops: mapping.iops,
                    attachments: vec![VolumeAttachment {
                        instance_id: id.clone(),
                        device: mapping.device_name.clone(),
                        delete_on_termination: mapping.delete_on_termination,
                    }],
                }),
            );
            block_devices.push(AttachedBlockDevice {
                device_name: mapping.device_name.clone(),
                volume_id,
                status: String::from(ATTACHMENT_ATTACHED),
                delete_on_termination: mapping.delete_on_termination,
            });
        }
        let root_device_name = block_devices
            .first()
            .map(|device| device.device_name.clone());
        self.insert_instance(Tracked {
            resource: InstanceDescriptor {
                id: id.clone(),
                state: String::from(STATE_PENDING),
                instance_type: request.instance_type.clone(),
                key_name: request.key_name.clone(),
                root_device_name,
                block_devices,
                security_group_ids: request.security_group_ids.clone(),
                subnet_id: request.subnet_id.clone(),
                placement: request.placement.clone(),
                monitoring_enabled: request.monitoring_enabled,
                tags: request.tags.clone(),
                ..InstanceDescriptor::default()
            },
            settles_to: Some(String::from(STATE_RUNNING)),
        });
        id
    }

    fn transition_instances(&mut self, ids: &[String], shown: &str, settled: &str) {
        for id in ids {
            if let Some(tracked) = self.instances.get_mut(id) {
                tracked.resource.state = shown.to_owned();
                tracked.settles_to = Some(settled.to_owned());
            }
        }
    }

    fn detach_volume(&mut self, volume_id: &str) {
        let Some(tracked) = self.volumes.get_mut(volume_id) else {
            return;
        };
        let attachments = std::mem::take(&mut tracked.resource.attachments);
        tracked.settles_to = Some(String::from(STATE_AVAILABLE));
        for attachment in attachments {
            if let Some(instance) = self.instances.get_mut(&attachment.instance_id) {
                instance
                    .resource
                    .block_devices
                    .retain(|device| device.volume_id != volume_id);
            }
        }
    }

    fn attach_volume(&mut self, volume: &VolumeRef, instance_id: &str) {
        if let Some(tracked) = self.volumes.get_mut(&volume.volume_id) {
            tracked.resource.attachments.push(VolumeAttachment {
                instance_id: instance_id.to_owned(),
                device: volume.device_name.clone(),
                delete_on_termination: false,
            });
            tracked.resource.state = String::from(STATE_AVAILABLE);
            tracked.settles_to = Some(String::from(STATE_IN_USE));
        }
        if let Some(instance) = self.instances.get_mut(instance_id) {
            instance.resource.block_devices.push(AttachedBlockDevice {
                device_name: volume.device_name.clone(),
                volume_id: volume.volume_id.clone(),
                status: String::from(ATTACHMENT_ATTACHED),
                delete_on_termination: false,
            });
        }
    }
}

/// In-memory [`Backend`] that simulates the control plane.
///
/// Every state change is reported once in its transitional state before the
/// next describe shows the settled state, so each wait polls at least twice.
/// Instance descriptions come back sorted by identifier, not in request
/// order. Calls are recorded in order and can be scripted to fail per
/// operation.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCloud {
    state: Arc<std::sync::Mutex<CloudState>>,
}

impl ScriptedCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a running instance backed by `disks`. The first disk is the
    /// root device.
    pub fn seed_running_instance(&self, instance_id: &str, disks: &[SeedDisk]) {
        let instance = InstanceDescriptor {
            id: instance_id.to_owned(),
            state: String::from(STATE_RUNNING),
            instance_type: String::from("t3.micro"),
            root_device_name: disks.first().map(|disk| disk.device_name.clone()),
            block_devices: disks
                .iter()
                .map(|disk| AttachedBlockDevice {
                    device_name: disk.device_name.clone(),
                    volume_id: disk.volume_id.clone(),
                    status: String::from(ATTACHMENT_ATTACHED),
                    delete_on_termination: true,
                })
                .collect(),
            ..InstanceDescriptor::default()
        };
        let volumes = disks.iter().map(|disk| VolumeDescriptor {
            id: disk.volume_id.clone(),
            state: String::from(STATE_IN_USE),
            size_gib: disk.size_gib,
            volume_type: disk.volume_type.clone(),
            encrypted: false,
            kms_key_id: None,
            iops: None,
            attachments: vec![VolumeAttachment {
                instance_id: instance_id.to_owned(),
                device: disk.device_name.clone(),
                delete_on_termination: true,
            }],
        });
        for volume in volumes {
            self.add_volume(volume);
        }
        self.add_instance(instance);
    }

    /// Registers an instance exactly as described.
    pub fn add_instance(&self, instance: InstanceDescriptor) {
        self.state().insert_instance(Tracked::settled(instance));
    }

    /// Registers a volume exactly as described.
    pub fn add_volume(&self, volume: VolumeDescriptor) {
        self.state()
            .volumes
            .insert(volume.id.clone(), Tracked::settled(volume));
    }

    /// Makes every future call of `operation` fail.
    pub fn fail_on(&self, operation: Operation) {
        self.state().failing.insert(operation);
    }

    /// Keeps created images pending forever.
    pub fn stall_images(&self) {
        self.state().images_stall = true;
    }

    /// Makes the next describe naming `instance_id` fail as not visible yet.
    pub fn hide_once(&self, instance_id: &str) {
        self.state()
            .hidden_instances
            .insert(instance_id.to_owned());
    }

    /// Hides every launched instance from the first describe that names it.
    pub fn delay_launch_visibility(&self) {
        self.state().hide_launches = true;
    }

    /// Queues identifiers handed out to launched instances, in order.
    pub fn queue_instance_ids(&self, ids: &[&str]) {
        self.state()
            .queued_instance_ids
            .extend(ids.iter().map(|id| (*id).to_owned()));
    }

    /// Returns every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CloudCall> {
        self.state().calls.clone()
    }

    /// Returns the mutating calls received so far.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<CloudCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.operation.is_mutating())
            .cloned()
            .collect()
    }

    /// Returns the distinct mutating operations received so far, in order of
    /// first use.
    #[must_use]
    pub fn mutating_operations(&self) -> Vec<Operation> {
        let mut seen = Vec::new();
        for call in self.mutating_calls() {
            if !seen.contains(&call.operation) {
                seen.push(call.operation);
            }
        }
        seen
    }

    /// Returns the current view of an instance without settling it.
    #[must_use]
    pub fn instance(&self, instance_id: &str) -> Option<InstanceDescriptor> {
        self.state()
            .instances
            .get(instance_id)
            .map(|tracked| tracked.resource.clone())
    }

    /// Returns the current view of a volume without settling it.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<VolumeDescriptor> {
        self.state()
            .volumes
            .get(volume_id)
            .map(|tracked| tracked.resource.clone())
    }

    /// Returns the identifiers of all known instances in creation order.
    #[must_use]
    pub fn instance_ids(&self) -> Vec<String> {
        self.state().instance_order.clone()
    }

    /// Returns every image request received.
    #[must_use]
    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.state().image_requests.clone()
    }

    /// Returns every launch request received.
    #[must_use]
    pub fn launch_requests(&self) -> Vec<LaunchRequest> {
        self.state().launch_requests.clone()
    }

    fn mutate<T>(
        &self,
        operation: Operation,
        dry_run: bool,
        targets: Vec<String>,
        apply: impl FnOnce(&mut CloudState) -> T,
    ) -> Result<CallOutcome<T>, ScriptedCloudError> {
        let mut state = self.state();
        state.record(operation, Some(dry_run), targets)?;
        if dry_run {
            return Ok(CallOutcome::Validated);
        }
        Ok(CallOutcome::Applied(apply(&mut state)))
    }
}

impl Backend for ScriptedCloud {
    type Error = ScriptedCloudError;

    fn is_not_yet_visible(&self, err: &Self::Error) -> bool {
        matches!(err, ScriptedCloudError::NotYetVisible { .. })
    }

    fn describe_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<InstanceDescriptor>, Self::Error> {
        let result = {
            let mut state = self.state();
            state
                .record(Operation::DescribeInstances, None, instance_ids.to_vec())
                .and_then(|()| state.describe_instances(instance_ids))
        };
        Box::pin(async move { result })
    }

    fn describe_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, Self::Error> {
        let result = {
            let mut state = self.state();
            state
                .record(Operation::DescribeVolumes, None, volume_ids.to_vec())
                .map(|()| state.describe_volumes(volume_ids))
        };
        Box::pin(async move { result })
    }

    fn describe_images<'a>(
        &'a self,
        image_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<ImageDescriptor>, Self::Error> {
        let result = {
            let mut state = self.state();
            state
                .record(Operation::DescribeImages, None, image_ids.to_vec())
                .map(|()| state.describe_images(image_ids))
        };
        Box::pin(async move { result })
    }

    fn describe_user_data<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<String>, Self::Error> {
        let result = {
            let mut state = self.state();
            state
                .record(
                    Operation::DescribeInstanceAttribute,
                    None,
                    vec![instance_id.to_owned()],
                )
                .map(|()| {
                    state
                        .instances
                        .get(instance_id)
                        .and_then(|tracked| tracked.resource.user_data.clone())
                })
        };
        Box::pin(async move { result })
    }

    fn create_image<'a>(
        &'a self,
        request: &'a ImageRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error> {
        let result = self.mutate(
            Operation::CreateImage,
            dry_run,
            vec![request.instance_id.clone()],
            |state| state.create_image(request),
        );
        Box::pin(async move { result })
    }

    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error> {
        let result = self.mutate(
            Operation::RunInstances,
            dry_run,
            vec![request.image_id.clone()],
            |state| state.run_instance(request),
        );
        Box::pin(async move { result })
    }

    fn stop_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        let result = self.mutate(
            Operation::StopInstances,
            dry_run,
            instance_ids.to_vec(),
            |state| state.transition_instances(instance_ids, STATE_STOPPING, STATE_STOPPED),
        );
        Box::pin(async move { result })
    }

    fn start_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        let result = self.mutate(
            Operation::StartInstances,
            dry_run,
            instance_ids.to_vec(),
            |state| state.transition_instances(instance_ids, STATE_PENDING, STATE_RUNNING),
        );
        Box::pin(async move { result })
    }

    fn attach_volume<'a>(
        &'a self,
        volume: &'a VolumeRef,
        instance_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        let result = self.mutate(
            Operation::AttachVolume,
            dry_run,
            vec![volume.volume_id.clone(), instance_id.to_owned()],
            |state| state.attach_volume(volume, instance_id),
        );
        Box::pin(async move { result })
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        let result = self.mutate(
            Operation::DetachVolume,
            dry_run,
            vec![volume_id.to_owned()],
            |state| state.detach_volume(volume_id),
        );
        Box::pin(async move { result })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
