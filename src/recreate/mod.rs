//! Recreates instances by cloning them from an image and moving their
//! volumes across.
//!
//! For each source instance the workflow images the instance, launches a
//! replacement from the image with the source's launch attributes, stops both
//! instances, detaches every volume from both, attaches the source's volumes
//! to the replacement at their original device names, and starts the
//! replacement. The replacement's own volumes are left detached.
//!
//! In dry-run mode every mutating call is validated remotely and the workflow
//! stops at the first one, since later steps depend on resources that were
//! never created.

mod error;
mod plan;
mod volumes;


use log::{debug, info};

use crate::backend::{
    Backend, BlockDeviceMapping, CallOutcome, InstanceDescriptor, Operation, STATE_AVAILABLE,
    STATE_RUNNING, STATE_STOPPED, VolumeRef,
};
use crate::wait::{PollPolicy, wait_for_status};

pub use error::{ErrorKind, PreconditionError, RecreateError};
pub use plan::{
    DEFAULT_IMAGE_DESCRIPTION, DEFAULT_IMAGE_NAME_PREFIX, ImageNaming, LaunchPlan,
    NetworkInterfaceSpec, block_device_mappings, launch_request, rebuild_network_interfaces,
};

use error::api_error;

/// Switches that change how far the workflow goes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecreateOptions {
    /// Validate mutating calls without applying them.
    pub dry_run: bool,
    /// Stop once the replacement is running; leave the source untouched.
    pub launch_only: bool,
}

/// What happened to one source instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecreateOutcome {
    /// Dry-run mode: `operation` was validated and nothing was changed.
    DryRun {
        /// Source instance identifier.
        source_instance_id: String,
        /// First mutating call, which the control plane validated.
        operation: Operation,
    },
    /// Launch-only mode: the replacement runs beside the untouched source.
    Launched {
        /// Source instance identifier.
        source_instance_id: String,
        /// Image taken from the source.
        image_id: String,
        /// Replacement instance identifier.
        new_instance_id: String,
    },
    /// Full run: the source's volumes now back the running replacement.
    Migrated {
        /// Source instance identifier.
        source_instance_id: String,
        /// Image taken from the source.
        image_id: String,
        /// Replacement instance identifier.
        new_instance_id: String,
        /// Volumes moved from the source to the replacement.
        moved_volumes: Vec<VolumeRef>,
        /// Volumes created with the replacement and left detached.
        orphaned_volumes: Vec<VolumeRef>,
    },
}

impl RecreateOutcome {
    /// Returns the source instance identifier.
    #[must_use]
    pub fn source_instance_id(&self) -> &str {
        match self {
            Self::DryRun {
                source_instance_id, ..
            }
            | Self::Launched {
                source_instance_id, ..
            }
            | Self::Migrated {
                source_instance_id, ..
            } => source_instance_id,
        }
    }

    /// Returns the replacement instance identifier, if one was launched.
    #[must_use]
    pub fn new_instance_id(&self) -> Option<&str> {
        match self {
            Self::DryRun { .. } => None,
            Self::Launched {
                new_instance_id, ..
            }
            | Self::Migrated {
                new_instance_id, ..
            } => Some(new_instance_id),
        }
    }
}

/// Result of recreating a single instance within a batch.
#[derive(Debug)]
pub struct InstanceReport<E>
where
    E: std::error::Error + 'static,
{
    /// Source instance identifier.
    pub instance_id: String,
    /// Outcome or the error that stopped this instance.
    pub result: Result<RecreateOutcome, RecreateError<E>>,
}

/// Per-instance results of a batch, in the order the instances were
/// requested.
#[derive(Debug)]
pub struct BatchReport<E>
where
    E: std::error::Error + 'static,
{
    /// One entry per described instance, in request order.
    pub reports: Vec<InstanceReport<E>>,
}

impl<E> BatchReport<E>
where
    E: std::error::Error + 'static,
{
    /// Iterates over the instances that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RecreateError<E>)> {
        self.reports.iter().filter_map(|report| {
            report
                .result
                .as_ref()
                .err()
                .map(|err| (report.instance_id.as_str(), err))
        })
    }

    /// Returns `true` when at least one instance failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Early exits from the step sequence.
enum Interrupt<E>
where
    E: std::error::Error + 'static,
{
    DryRun(Operation),
    Failed(RecreateError<E>),
}

impl<E> From<RecreateError<E>> for Interrupt<E>
where
    E: std::error::Error + 'static,
{
    fn from(err: RecreateError<E>) -> Self {
        Self::Failed(err)
    }
}

impl<E> From<PreconditionError> for Interrupt<E>
where
    E: std::error::Error + 'static,
{
    fn from(err: PreconditionError) -> Self {
        Self::Failed(RecreateError::Precondition(err))
    }
}

/// Unwraps an applied call, or interrupts the sequence after a validated
/// dry run.
fn applied<T, E>(outcome: CallOutcome<T>, operation: Operation) -> Result<T, Interrupt<E>>
where
    E: std::error::Error + 'static,
{
    match outcome {
        CallOutcome::Applied(value) => Ok(value),
        CallOutcome::Validated => Err(Interrupt::DryRun(operation)),
    }
}

/// Reads a describe error that only means "not visible yet" as an empty
/// answer, which waits treat as not ready.
fn visible_or_empty<B, T>(
    backend: &B,
    described: Result<Vec<T>, B::Error>,
) -> Result<Vec<T>, B::Error>
where
    B: Backend,
{
    match described {
        Err(err) if backend.is_not_yet_visible(&err) => {
            debug!("not visible yet: {err}");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Executes the recreation workflow against a backend.
#[derive(Debug)]
pub struct RecreateOrchestrator<B> {
    backend: B,
    options: RecreateOptions,
    poll_policy: PollPolicy,
    image_naming: ImageNaming,
}

impl<B> RecreateOrchestrator<B>
where
    B: Backend,
{
    /// Creates an orchestrator with the default polling policy and image
    /// naming.
    #[must_use]
    pub fn new(backend: B, options: RecreateOptions) -> Self {
        Self {
            backend,
            options,
            poll_policy: PollPolicy::default(),
            image_naming: ImageNaming::default(),
        }
    }

    /// Overrides the polling policy used by every wait.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Overrides the naming of created images.
    #[must_use]
    pub fn with_image_naming(mut self, naming: ImageNaming) -> Self {
        self.image_naming = naming;
        self
    }

    /// Returns the backend driven by this orchestrator.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Describes `instance_ids` and recreates each instance in turn.
    ///
    /// Instances are processed in the order of `instance_ids`, whatever order
    /// the lookup answers in. A failure on one instance is recorded in the
    /// report and the batch moves on to the next instance.
    ///
    /// # Errors
    ///
    /// Returns [`RecreateError::Api`] when the initial lookup fails and
    /// [`PreconditionError::NoInstancesFound`] when it returns nothing.
    pub async fn recreate_instances(
        &self,
        instance_ids: &[String],
    ) -> Result<BatchReport<B::Error>, RecreateError<B::Error>> {
        let mut instances = self
            .backend
            .describe_instances(instance_ids)
            .await
            .map_err(api_error(Operation::DescribeInstances))?;
        if instances.is_empty() {
            return Err(PreconditionError::NoInstancesFound {
                requested: instance_ids.join(", "),
            }
            .into());
        }
        instances.sort_by_key(|instance| {
            instance_ids
                .iter()
                .position(|id| *id == instance.id)
                .unwrap_or(usize::MAX)
        });

        let mut reports = Vec::with_capacity(instances.len());
        for instance in &instances {
            let result = self.recreate(instance).await;
            reports.push(InstanceReport {
                instance_id: instance.id.clone(),
                result,
            });
        }
        Ok(BatchReport { reports })
    }

    /// Recreates one described instance.
    ///
    /// # Errors
    ///
    /// Returns [`RecreateError`] when a precondition does not hold, a call
    /// fails, or a bounded wait gives up. Nothing is rolled back.
    pub async fn recreate(
        &self,
        source: &InstanceDescriptor,
    ) -> Result<RecreateOutcome, RecreateError<B::Error>> {
        match self.run_steps(source).await {
            Ok(outcome) => Ok(outcome),
            Err(Interrupt::DryRun(operation)) => {
                info!("dry run: {operation} for instance {} would succeed", source.id);
                Ok(RecreateOutcome::DryRun {
                    source_instance_id: source.id.clone(),
                    operation,
                })
            }
            Err(Interrupt::Failed(err)) => Err(err),
        }
    }

    async fn run_steps(
        &self,
        source: &InstanceDescriptor,
    ) -> Result<RecreateOutcome, Interrupt<B::Error>> {
        let source_id = source.id.as_str();
        let root_volume = source
            .root_volume_id()
            .ok_or_else(|| PreconditionError::MissingRootVolume {
                instance_id: source_id.to_owned(),
            })?;
        debug!("instance {source_id} boots from {root_volume}");

        let mappings = self.source_mappings(source).await?;
        let user_data = self
            .backend
            .describe_user_data(source_id)
            .await
            .map_err(api_error(Operation::DescribeInstanceAttribute))?;
        let image_id = self.create_image(source_id, mappings.clone()).await?;

        let mut plan = LaunchPlan::for_source(source, &image_id, mappings);
        if user_data.is_some() {
            plan.request.user_data = user_data;
        }
        debug!(
            "rebuilt network interfaces for {source_id}: {:?}",
            plan.network_interfaces
        );
        info!("launching replacement for instance {source_id}");
        let launched = self
            .backend
            .run_instance(&plan.request, self.options.dry_run)
            .await
            .map_err(api_error(Operation::RunInstances))?;
        let new_id = applied(launched, Operation::RunInstances)?;
        info!("new instance launched: {new_id}");
        self.wait_for_instance_state(&new_id, STATE_RUNNING).await?;

        if self.options.launch_only {
            info!("launch only: leaving instance {source_id} untouched");
            return Ok(RecreateOutcome::Launched {
                source_instance_id: source_id.to_owned(),
                image_id,
                new_instance_id: new_id,
            });
        }

        info!("stopping instances {source_id} and {new_id}");
        let pair = vec![source_id.to_owned(), new_id.clone()];
        let stopped = self
            .backend
            .stop_instances(&pair, self.options.dry_run)
            .await
            .map_err(api_error(Operation::StopInstances))?;
        applied(stopped, Operation::StopInstances)?;
        self.wait_for_instance_state(source_id, STATE_STOPPED).await?;
        self.wait_for_instance_state(&new_id, STATE_STOPPED).await?;

        let moved_volumes = self.detach_volumes(source_id).await?;
        let orphaned_volumes = self.detach_volumes(&new_id).await?;
        self.attach_volumes(&moved_volumes, &new_id).await?;

        info!("starting instance {new_id}");
        let started = self
            .backend
            .start_instances(std::slice::from_ref(&new_id), self.options.dry_run)
            .await
            .map_err(api_error(Operation::StartInstances))?;
        applied(started, Operation::StartInstances)?;
        self.wait_for_instance_state(&new_id, STATE_RUNNING).await?;
        info!("instance {source_id} recreated as {new_id}");

        Ok(RecreateOutcome::Migrated {
            source_instance_id: source_id.to_owned(),
            image_id,
            new_instance_id: new_id,
            moved_volumes,
            orphaned_volumes,
        })
    }

    async fn source_mappings(
        &self,
        source: &InstanceDescriptor,
    ) -> Result<Vec<BlockDeviceMapping>, Interrupt<B::Error>> {
        let volume_ids: Vec<String> = source
            .block_devices
            .iter()
            .map(|device| device.volume_id.clone())
            .collect();
        let volumes = self
            .backend
            .describe_volumes(&volume_ids)
            .await
            .map_err(api_error(Operation::DescribeVolumes))?;
        Ok(block_device_mappings(source, &volumes)?)
    }

    async fn create_image(
        &self,
        source_id: &str,
        mappings: Vec<BlockDeviceMapping>,
    ) -> Result<String, Interrupt<B::Error>> {
        let request = self.image_naming.image_request(source_id, mappings);
        info!("creating image {} from instance {source_id}", request.name);
        let created = self
            .backend
            .create_image(&request, self.options.dry_run)
            .await
            .map_err(api_error(Operation::CreateImage))?;
        let image_id = applied(created, Operation::CreateImage)?;

        let backend = &self.backend;
        let image_ids = vec![image_id.clone()];
        let ids = image_ids.as_slice();
        wait_for_status(&self.poll_policy, &image_id, STATE_AVAILABLE, move || async move {
            let images = visible_or_empty(backend, backend.describe_images(ids).await)?;
            Ok::<_, B::Error>(images.into_iter().map(|image| image.state).collect())
        })
        .await
        .map_err(|err| RecreateError::from_poll(err, Operation::DescribeImages))?;
        info!("image {image_id} created from instance {source_id}");
        Ok(image_id)
    }

    async fn wait_for_instance_state(
        &self,
        instance_id: &str,
        target: &str,
    ) -> Result<(), RecreateError<B::Error>> {
        let backend = &self.backend;
        let instance_ids = vec![instance_id.to_owned()];
        let ids = instance_ids.as_slice();
        wait_for_status(&self.poll_policy, instance_id, target, move || async move {
            let instances = visible_or_empty(backend, backend.describe_instances(ids).await)?;
            Ok::<_, B::Error>(
                instances
                    .into_iter()
                    .map(|instance| instance.state)
                    .collect(),
            )
        })
        .await
        .map_err(|err| RecreateError::from_poll(err, Operation::DescribeInstances))?;
        info!("instance {instance_id} is {target}");
        Ok(())
    }
}
