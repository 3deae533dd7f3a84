//! Operation polling with a shared deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::StageFailure;
use crate::models::{OperationRef, OperationStatus};
use crate::provision::ProvisioningApi;

/// Polls operations until they succeed, fail, or the deadline passes.
pub struct OperationPoller<'a> {
    api: &'a dyn ProvisioningApi,
    interval: Duration,
}

impl<'a> OperationPoller<'a> {
    pub fn new(api: &'a dyn ProvisioningApi, interval: Duration) -> Self {
        Self { api, interval }
    }

    /// Wait for each operation in turn. Entries without an id are skipped.
    pub async fn await_all(
        &self,
        operations: &[OperationRef],
        deadline: Instant,
    ) -> Result<(), StageFailure> {
        for id in operations.iter().filter_map(|op| op.id.as_deref()) {
            self.await_completion(id, deadline).await?;
        }
        Ok(())
    }

    pub async fn await_completion(
        &self,
        operation_id: &str,
        deadline: Instant,
    ) -> Result<(), StageFailure> {
        loop {
            if Instant::now() >= deadline {
                return Err(StageFailure::Timeout {
                    id: operation_id.to_string(),
                });
            }

            let operation = self.api.get_operation(operation_id).await?;
            match &operation.status {
                OperationStatus::Succeeded => {
                    tracing::debug!(operation_id, "Operation succeeded");
                    return Ok(());
                }
                status @ (OperationStatus::Failed | OperationStatus::Canceled) => {
                    return Err(StageFailure::OperationFailed {
                        id: operation_id.to_string(),
                        status: status.clone(),
                        detail: operation.error_detail(),
                    });
                }
                OperationStatus::Pending(raw) => {
                    tracing::debug!(operation_id, status = %raw, "Operation still running");
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
