//! Creation of branch, endpoint and database on the provider, with rollback.

mod poller;
mod provisioner;
mod resolver;

use async_trait::async_trait;

use crate::error::{ProvisionError, TransportError};
use crate::models::{
    ConnectionUriResponse, Created, OperationRef, ProvisionOutcome, ProvisionRequest,
    RemoteOperation,
};

pub use poller::OperationPoller;
pub use provisioner::{branch_name, teardown, ProvisionSettings, ResourceProvisioner};
pub use resolver::ConnectionResolver;

/// The provider capabilities the provisioning flow needs.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn create_branch(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Created, TransportError>;

    async fn create_endpoint(&self, branch_id: &str) -> Result<Created, TransportError>;

    async fn create_database(
        &self,
        branch_id: &str,
        name: &str,
        owner_name: Option<&str>,
    ) -> Result<Vec<OperationRef>, TransportError>;

    async fn get_operation(&self, operation_id: &str) -> Result<RemoteOperation, TransportError>;

    async fn get_connection_uri(
        &self,
        branch_id: &str,
        database_name: &str,
        role_name: &str,
        pooled: bool,
    ) -> Result<ConnectionUriResponse, TransportError>;

    async fn delete_branch(&self, branch_id: &str) -> Result<(), TransportError>;

    async fn delete_endpoint(&self, endpoint_id: &str) -> Result<(), TransportError>;
}

/// Anything that can turn a request into a reachable database.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError>;
}
