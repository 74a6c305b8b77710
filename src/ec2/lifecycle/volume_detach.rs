//! Volume detachment.

use crate::backend::{CallOutcome, Operation};
use crate::ec2::Ec2Backend;
use crate::ec2::error::{Ec2BackendError, mutation_outcome};

impl Ec2Backend {
    pub(in crate::ec2) async fn detach(
        &self,
        volume_id: &str,
        dry_run: bool,
    ) -> Result<CallOutcome<()>, Ec2BackendError> {
        let result = self
            .client
            .detach_volume()
            .volume_id(volume_id)
            .dry_run(dry_run)
            .send()
            .await;
        Ok(mutation_outcome(Operation::DetachVolume, result)?.map(drop))
    }
}
