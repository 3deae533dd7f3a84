//! Pooled and direct connection URI lookup.

use crate::error::{ProvisionError, Stage, StageFailure};
use crate::models::ConnectionUris;
use crate::provision::ProvisioningApi;

/// Fetches pooled and direct connection URIs for a new database.
pub struct ConnectionResolver<'a> {
    api: &'a dyn ProvisioningApi,
}

impl<'a> ConnectionResolver<'a> {
    pub fn new(api: &'a dyn ProvisioningApi) -> Self {
        Self { api }
    }

    pub async fn resolve(
        &self,
        branch_id: &str,
        database_name: &str,
        role_name: &str,
    ) -> Result<ConnectionUris, ProvisionError> {
        let pooled = self.fetch(branch_id, database_name, role_name, true).await?;
        let direct = self.fetch(branch_id, database_name, role_name, false).await?;
        Ok(ConnectionUris { pooled, direct })
    }

    async fn fetch(
        &self,
        branch_id: &str,
        database_name: &str,
        role_name: &str,
        pooled: bool,
    ) -> Result<String, ProvisionError> {
        self.api
            .get_connection_uri(branch_id, database_name, role_name, pooled)
            .await
            .map_err(|e| ProvisionError::new(Stage::ConnectionUri, e))?
            .into_uri()
            .ok_or_else(|| {
                ProvisionError::new(Stage::ConnectionUri, StageFailure::ConnectionResolution)
            })
    }
}
