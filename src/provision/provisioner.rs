//! Branch, endpoint and database creation with reverse rollback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{ProvisionError, Stage, TransportError};
use crate::models::{ProvisionOutcome, ProvisionRequest, ProvisionedResources};
use crate::provision::{ConnectionResolver, DatabaseProvisioner, OperationPoller, ProvisioningApi};

/// Timing knobs for a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionSettings {
    /// Sleep between operation polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for the whole run, checked before every poll.
    pub deadline: Duration,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            deadline: Duration::from_secs(90),
        }
    }
}

/// `<name>-<random suffix>`, so concurrent runs never collide on a branch name.
pub fn branch_name(database_name: &str) -> String {
    let base: String = database_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", base, &suffix[..12])
}

/// Delete an endpoint and then its branch. Both are attempted; the first error is returned.
pub async fn teardown(
    api: &dyn ProvisioningApi,
    resources: &ProvisionedResources,
) -> Result<(), TransportError> {
    let mut first_error = None;

    if let Some(endpoint_id) = resources.endpoint_id.as_deref() {
        match api.delete_endpoint(endpoint_id).await {
            Ok(()) => tracing::info!(endpoint_id, "Deleted endpoint"),
            Err(e) => {
                tracing::warn!(endpoint_id, error = %e, "Failed to delete endpoint");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(branch_id) = resources.branch_id.as_deref() {
        match api.delete_branch(branch_id).await {
            Ok(()) => tracing::info!(branch_id, "Deleted branch"),
            Err(e) => {
                tracing::warn!(branch_id, error = %e, "Failed to delete branch");
                first_error.get_or_insert(e);
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// Resources registered for cleanup. Unwound in reverse unless committed.
struct Rollback<'a> {
    api: &'a dyn ProvisioningApi,
    resources: ProvisionedResources,
    armed: bool,
}

impl<'a> Rollback<'a> {
    fn new(api: &'a dyn ProvisioningApi) -> Self {
        Self {
            api,
            resources: ProvisionedResources::default(),
            armed: true,
        }
    }

    fn commit(mut self) -> ProvisionedResources {
        self.armed = false;
        std::mem::take(&mut self.resources)
    }

    async fn unwind(mut self) {
        self.armed = false;
        let resources = std::mem::take(&mut self.resources);
        if resources.branch_id.is_none() && resources.endpoint_id.is_none() {
            return;
        }

        tracing::warn!(
            branch_id = ?resources.branch_id,
            endpoint_id = ?resources.endpoint_id,
            database_created = resources.database_created,
            "Rolling back provisioned resources"
        );
        // Best effort: the caller must see the error that triggered the rollback.
        let _ = teardown(self.api, &resources).await;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if self.armed && (self.resources.branch_id.is_some() || self.resources.endpoint_id.is_some())
        {
            tracing::warn!(
                branch_id = ?self.resources.branch_id,
                endpoint_id = ?self.resources.endpoint_id,
                "Provisioning abandoned; resources may be orphaned"
            );
        }
    }
}

/// Creates branch, endpoint and database in order, rolling back on failure.
pub struct ResourceProvisioner {
    api: Arc<dyn ProvisioningApi>,
    settings: ProvisionSettings,
}

impl ResourceProvisioner {
    pub fn new(api: Arc<dyn ProvisioningApi>, settings: ProvisionSettings) -> Self {
        Self { api, settings }
    }

    async fn create_resources(
        &self,
        request: &ProvisionRequest,
        deadline: Instant,
        rollback: &mut Rollback<'_>,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let api = self.api.as_ref();
        let poller = OperationPoller::new(api, self.settings.poll_interval);

        let name = branch_name(&request.database_name);
        tracing::info!(branch = %name, parent = ?request.parent_branch_id, "Creating branch");
        let branch = api
            .create_branch(&name, request.parent_branch_id.as_deref())
            .await
            .map_err(|e| ProvisionError::new(Stage::Branch, e))?;
        rollback.resources.branch_id = Some(branch.id.clone());
        poller
            .await_all(&branch.operations, deadline)
            .await
            .map_err(|e| ProvisionError::new(Stage::Branch, e))?;
        tracing::info!(branch_id = %branch.id, "Branch created");

        let endpoint = api
            .create_endpoint(&branch.id)
            .await
            .map_err(|e| ProvisionError::new(Stage::Endpoint, e))?;
        rollback.resources.endpoint_id = Some(endpoint.id.clone());
        poller
            .await_all(&endpoint.operations, deadline)
            .await
            .map_err(|e| ProvisionError::new(Stage::Endpoint, e))?;
        tracing::info!(endpoint_id = %endpoint.id, "Endpoint created");

        let operations = api
            .create_database(&branch.id, &request.database_name, Some(&request.role_name))
            .await
            .map_err(|e| ProvisionError::new(Stage::Database, e))?;
        poller
            .await_all(&operations, deadline)
            .await
            .map_err(|e| ProvisionError::new(Stage::Database, e))?;
        rollback.resources.database_created = true;
        tracing::info!(database = %request.database_name, "Database created");

        let uris = ConnectionResolver::new(api)
            .resolve(&branch.id, &request.database_name, &request.role_name)
            .await?;
        tracing::info!(?uris, "Connection URIs resolved");

        Ok(ProvisionOutcome {
            branch_id: Some(branch.id),
            endpoint_id: Some(endpoint.id),
            uris,
        })
    }
}

#[async_trait]
impl DatabaseProvisioner for ResourceProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        let deadline = Instant::now() + self.settings.deadline;
        let mut rollback = Rollback::new(self.api.as_ref());

        match self.create_resources(request, deadline, &mut rollback).await {
            Ok(outcome) => {
                rollback.commit();
                Ok(outcome)
            }
            Err(err) => {
                tracing::error!(stage = %err.stage, error = %err, "Provisioning failed");
                rollback.unwind().await;
                Err(err)
            }
        }
    }
}
