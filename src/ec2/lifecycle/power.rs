//! Instance stop and start.

use crate::backend::{CallOutcome, Operation};
use crate::ec2::Ec2Backend;
use crate::ec2::error::{Ec2BackendError, mutation_outcome};

impl Ec2Backend {
    pub(in crate::ec2) async fn stop(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<CallOutcome<()>, Ec2BackendError> {
        let result = self
            .client
            .stop_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;
        Ok(mutation_outcome(Operation::StopInstances, result)?.map(drop))
    }

    pub(in crate::ec2) async fn start(
        &self,
        instance_ids: &[String],
        dry_run: bool,
    ) -> Result<CallOutcome<()>, Ec2BackendError> {
        let result = self
            .client
            .start_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .dry_run(dry_run)
            .send()
            .await;
        Ok(mutation_outcome(Operation::StartInstances, result)?.map(drop))
    }
}
