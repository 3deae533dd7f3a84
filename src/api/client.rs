//! Neon HTTP API client.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use url::Url;

use crate::api::retry::{RetryPolicy, RetryingHttpClient};
use crate::error::TransportError;
use crate::models::{
    BranchResponse, ConnectionUriResponse, Created, EndpointResponse, OperationRef,
    OperationResponse, OperationsResponse, RemoteOperation,
};
use crate::provision::ProvisioningApi;

pub const API_BASE: &str = "https://console.neon.tech/api/v2";

/// Neon HTTP API client scoped to one project.
pub struct NeonClient {
    http: RetryingHttpClient,
    base_url: String,
    project_id: String,
}

impl NeonClient {
    /// Create a new Neon client with API key and project id.
    pub fn new(
        api_key: String,
        project_id: String,
        policy: RetryPolicy,
    ) -> Result<Self, TransportError> {
        Self::with_base_url(API_BASE, api_key, project_id, policy)
    }

    /// Same as [`NeonClient::new`] against a different API root.
    pub fn with_base_url(
        base_url: &str,
        api_key: String,
        project_id: String,
        policy: RetryPolicy,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            http: RetryingHttpClient::new(api_key, policy)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/projects/{}{}", self.base_url, self.project_id, endpoint)
    }
}

/// Responses that name a created resource must carry its id.
fn require_id(
    id: Option<String>,
    field: &'static str,
    operations: Vec<OperationRef>,
) -> Result<Created, TransportError> {
    match id.filter(|id| !id.is_empty()) {
        Some(id) => Ok(Created { id, operations }),
        None => Err(TransportError::Decode(format!("response missing {field}"))),
    }
}

#[async_trait]
impl ProvisioningApi for NeonClient {
    async fn create_branch(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<Created, TransportError> {
        let mut branch = json!({ "name": name });
        if let Some(parent_id) = parent_id {
            branch["parent_id"] = json!(parent_id);
        }

        let response: BranchResponse = self
            .http
            .request_json(Method::POST, &self.url("/branches"), Some(&json!({ "branch": branch })))
            .await?;

        require_id(
            response.branch.and_then(|b| b.id),
            "branch.id",
            response.operations,
        )
    }

    async fn create_endpoint(&self, branch_id: &str) -> Result<Created, TransportError> {
        let body = json!({
            "endpoint": {
                "type": "read_write",
                "branch_id": branch_id,
            }
        });

        let response: EndpointResponse = self
            .http
            .request_json(Method::POST, &self.url("/endpoints"), Some(&body))
            .await?;

        require_id(
            response.endpoint.and_then(|e| e.id),
            "endpoint.id",
            response.operations,
        )
    }

    async fn create_database(
        &self,
        branch_id: &str,
        name: &str,
        owner_name: Option<&str>,
    ) -> Result<Vec<OperationRef>, TransportError> {
        let mut database = json!({ "name": name });
        if let Some(owner_name) = owner_name {
            database["owner_name"] = json!(owner_name);
        }

        let response: OperationsResponse = self
            .http
            .request_json(
                Method::POST,
                &self.url(&format!("/branches/{}/databases", branch_id)),
                Some(&json!({ "database": database })),
            )
            .await?;

        Ok(response.operations)
    }

    async fn get_operation(&self, operation_id: &str) -> Result<RemoteOperation, TransportError> {
        let response: OperationResponse = self
            .http
            .request_json(
                Method::GET,
                &self.url(&format!("/operations/{}", operation_id)),
                None,
            )
            .await?;

        Ok(response.operation)
    }

    async fn get_connection_uri(
        &self,
        branch_id: &str,
        database_name: &str,
        role_name: &str,
        pooled: bool,
    ) -> Result<ConnectionUriResponse, TransportError> {
        let url = Url::parse_with_params(
            &self.url("/connection_uri"),
            &[
                ("branch_id", branch_id),
                ("database_name", database_name),
                ("role_name", role_name),
                ("pooler", if pooled { "true" } else { "false" }),
            ],
        )
        .map_err(|e| TransportError::Decode(format!("invalid connection URI request: {e}")))?;

        self.http
            .request_json(Method::GET, url.as_str(), None)
            .await
    }

    async fn delete_branch(&self, branch_id: &str) -> Result<(), TransportError> {
        self.http
            .request(
                Method::DELETE,
                &self.url(&format!("/branches/{}", branch_id)),
                None,
            )
            .await?;
        Ok(())
    }

    async fn delete_endpoint(&self, endpoint_id: &str) -> Result<(), TransportError> {
        self.http
            .request(
                Method::DELETE,
                &self.url(&format!("/endpoints/{}", endpoint_id)),
                None,
            )
            .await?;
        Ok(())
    }
}
