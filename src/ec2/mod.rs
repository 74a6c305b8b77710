//! EC2 implementation of the backend, built on the AWS SDK for Rust.

mod convert;
mod error;
mod lifecycle;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::Client;
use log::debug;

use crate::backend::{
    Backend, BackendFuture, CallOutcome, ImageDescriptor, ImageRequest, InstanceDescriptor,
    LaunchRequest, VolumeDescriptor, VolumeRef,
};
use crate::config::RecreatorConfig;

pub use error::{DRY_RUN_CODE, Ec2BackendError};

/// Backend that drives the EC2 API.
#[derive(Clone, Debug)]
pub struct Ec2Backend {
    client: Client,
}

impl Ec2Backend {
    /// Loads SDK configuration and builds a client.
    ///
    /// Credentials and, when not configured, the region come from the SDK's
    /// default provider chain. A configured profile selects a named profile
    /// from the shared AWS config files.
    pub async fn connect(config: &RecreatorConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;
        debug!(
            "EC2 client configured for region {}",
            sdk_config
                .region()
                .map_or("<unset>", |region| region.as_ref())
        );
        Self::from_client(Client::new(&sdk_config))
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Backend for Ec2Backend {
    type Error = Ec2BackendError;

    fn describe_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<InstanceDescriptor>, Self::Error> {
        Box::pin(async move { self.fetch_instances(instance_ids).await })
    }

    fn describe_volumes<'a>(
        &'a self,
        volume_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<VolumeDescriptor>, Self::Error> {
        Box::pin(async move { self.fetch_volumes(volume_ids).await })
    }

    fn describe_images<'a>(
        &'a self,
        image_ids: &'a [String],
    ) -> BackendFuture<'a, Vec<ImageDescriptor>, Self::Error> {
        Box::pin(async move { self.fetch_images(image_ids).await })
    }

    fn describe_user_data<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> BackendFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move { self.fetch_user_data(instance_id).await })
    }

    fn is_not_yet_visible(&self, err: &Self::Error) -> bool {
        err.is_not_yet_visible()
    }

    fn create_image<'a>(
        &'a self,
        request: &'a ImageRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error> {
        Box::pin(async move { self.create_image_from(request, dry_run).await })
    }

    fn run_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<String>, Self::Error> {
        Box::pin(async move { self.launch(request, dry_run).await })
    }

    fn stop_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        Box::pin(async move { self.stop(instance_ids, dry_run).await })
    }

    fn start_instances<'a>(
        &'a self,
        instance_ids: &'a [String],
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        Box::pin(async move { self.start(instance_ids, dry_run).await })
    }

    fn attach_volume<'a>(
        &'a self,
        volume: &'a VolumeRef,
        instance_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        Box::pin(async move { self.attach(volume, instance_id, dry_run).await })
    }

    fn detach_volume<'a>(
        &'a self,
        volume_id: &'a str,
        dry_run: bool,
    ) -> BackendFuture<'a, CallOutcome<()>, Self::Error> {
        Box::pin(async move { self.detach(volume_id, dry_run).await })
    }
}
