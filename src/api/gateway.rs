//! Client for the provisioning gateway, which hands back a ready database URL.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::api::retry::{RetryPolicy, RetryingHttpClient};
use crate::error::{ProvisionError, Stage, StageFailure, TransportError};
use crate::models::{ConnectionUris, ProvisionOutcome, ProvisionRequest, Provider};
use crate::provision::DatabaseProvisioner;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayResponse {
    #[serde(default)]
    database_url: Option<String>,
}

/// `POST {gateway}/provision` behind a bearer token.
pub struct GatewayClient {
    http: RetryingHttpClient,
    provision_url: String,
}

impl GatewayClient {
    pub fn new(gateway_url: &Url, token: String, policy: RetryPolicy) -> Result<Self, TransportError> {
        if gateway_url.cannot_be_a_base() {
            return Err(TransportError::Decode(format!(
                "invalid gateway URL: {gateway_url}"
            )));
        }

        Ok(Self {
            http: RetryingHttpClient::new(token, policy)?,
            provision_url: format!("{}/provision", gateway_url.as_str().trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl DatabaseProvisioner for GatewayClient {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionOutcome, ProvisionError> {
        let mut body = json!({
            "provider": request.provider,
            "name": request.database_name,
        });
        if request.provider == Provider::Neon {
            if let Some(org) = &request.organization_id {
                body["org"] = json!(org);
            }
        }

        tracing::info!(
            name = %request.database_name,
            provider = %request.provider,
            "Calling gateway to provision database"
        );

        let response: GatewayResponse = self
            .http
            .request_json(Method::POST, &self.provision_url, Some(&body))
            .await
            .map_err(|e| ProvisionError::new(Stage::Gateway, e))?;

        let database_url = response
            .database_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                ProvisionError::new(Stage::Gateway, StageFailure::MissingField("databaseUrl"))
            })?;

        Ok(ProvisionOutcome {
            branch_id: None,
            endpoint_id: None,
            uris: ConnectionUris::single(database_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_jitter: Duration::ZERO,
            timeout_per_attempt: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn returns_database_url_for_both_uris() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/provision"))
            .and(header("authorization", "Bearer admin"))
            .and(body_json(json!({ "provider": "neon", "name": "appdb", "org": "proj-1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "databaseUrl": "postgres://u:p@host/appdb"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            GatewayClient::new(&Url::parse(&server.uri()).unwrap(), "admin".into(), policy())
                .unwrap();
        let mut request = ProvisionRequest::new(Provider::Neon, "appdb");
        request.organization_id = Some("proj-1".into());

        let outcome = client.provision(&request).await.unwrap();
        assert_eq!(outcome.uris.pooled, "postgres://u:p@host/appdb");
        assert_eq!(outcome.uris.direct, "postgres://u:p@host/appdb");
        assert_eq!(outcome.branch_id, None);
    }

    #[tokio::test]
    async fn supabase_request_omits_org() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "provider": "supabase", "name": "appdb" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "databaseUrl": "postgres://u:p@host/appdb"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            GatewayClient::new(&Url::parse(&server.uri()).unwrap(), "admin".into(), policy())
                .unwrap();
        let mut request = ProvisionRequest::new(Provider::Supabase, "appdb");
        request.organization_id = Some("ignored".into());

        client.provision(&request).await.unwrap();
    }

    #[tokio::test]
    async fn missing_database_url_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let client =
            GatewayClient::new(&Url::parse(&server.uri()).unwrap(), "admin".into(), policy())
                .unwrap();
        let err = client
            .provision(&ProvisionRequest::new(Provider::Neon, "appdb"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Gateway);
        assert!(matches!(err.source, StageFailure::MissingField("databaseUrl")));
    }

    #[tokio::test]
    async fn fatal_status_surfaces_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "unauthorized" })))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            GatewayClient::new(&Url::parse(&server.uri()).unwrap(), "admin".into(), policy())
                .unwrap();
        let err = client
            .provision(&ProvisionRequest::new(Provider::Neon, "appdb"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "gateway provisioning failed: HTTP 401 Unauthorized: unauthorized");
    }
}
