//! The flow API seam ([`FlowApi`]) and its reqwest implementation.

use flow_studio_core::{Flow, FlowId};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FlowStudioClientConfig;
use crate::errors::FlowStudioError;
use crate::wire::{CancelAck, FlowBody, NodeTestRequest, RunKey, RunSnapshot, TestFlowRequest};

/// Remote operations used by persistence and test execution.
#[async_trait::async_trait]
pub trait FlowApi: Send + Sync {
    async fn get_flow(&self, id: &FlowId) -> Result<Flow, FlowStudioError>;

    async fn create_flow(&self, flow: &Flow) -> Result<Flow, FlowStudioError>;

    async fn update_flow(&self, id: &FlowId, flow: &Flow) -> Result<Flow, FlowStudioError>;

    async fn delete_flow(&self, id: &FlowId) -> Result<(), FlowStudioError>;

    async fn publish_flow(&self, id: &FlowId) -> Result<(), FlowStudioError>;

    async fn submit_test(&self, request: &TestFlowRequest) -> Result<RunKey, FlowStudioError>;

    /// `Ok(None)` while the engine has nothing to report for the run yet.
    async fn test_status(&self, key: &RunKey) -> Result<Option<RunSnapshot>, FlowStudioError>;

    async fn cancel_test(&self, key: &RunKey) -> Result<CancelAck, FlowStudioError>;

    async fn test_node(&self, request: &NodeTestRequest) -> Result<Value, FlowStudioError>;
}

/// [`FlowApi`] over HTTP.
pub struct HttpFlowApi {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpFlowApi {
    pub fn new(config: &FlowStudioClientConfig) -> Result<Self, FlowStudioError> {
        config.validate()?;
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| FlowStudioError::Config(format!("invalid flow API URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(FlowStudioError::Config(format!(
                "flow API URL {base_url} cannot be used as a base"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FlowStudioError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    pub fn from_env() -> Result<Self, FlowStudioError> {
        Self::new(&FlowStudioClientConfig::from_env()?)
    }

    /// Base URL plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Result<Url, FlowStudioError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FlowStudioError::Config("flow API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and map failure statuses: 409 to a conflict, 404 to not-found, the rest to transport.
    async fn execute(
        &self,
        op: &'static str,
        resource: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FlowStudioError> {
        debug!(event = "http.request", domain = "http", op, resource);
        let response = request.send().await.map_err(|e| {
            warn!(event = "http.request_failed", domain = "http", op, error = %e);
            FlowStudioError::transport(format!("{op} request failed: {e}"), None)
        })?;
        let status = response.status();
        debug!(
            event = "http.response",
            domain = "http",
            op,
            status = status.as_u16()
        );
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::CONFLICT => Err(FlowStudioError::conflict()),
            StatusCode::NOT_FOUND => Err(FlowStudioError::NotFound {
                resource: resource.to_string(),
            }),
            _ => {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<unreadable body>".to_string());
                Err(FlowStudioError::transport(
                    format!("{op} failed with status {status}: {body}"),
                    Some(status.as_u16()),
                ))
            }
        }
    }

    async fn read_text(op: &'static str, response: reqwest::Response) -> Result<String, FlowStudioError> {
        response
            .text()
            .await
            .map_err(|e| FlowStudioError::transport(format!("{op} body could not be read: {e}"), None))
    }

    async fn read_json<T: DeserializeOwned>(
        op: &'static str,
        response: reqwest::Response,
    ) -> Result<T, FlowStudioError> {
        let text = Self::read_text(op, response).await?;
        serde_json::from_str(&text)
            .map_err(|e| FlowStudioError::Protocol(format!("{op} returned an invalid body: {e}")))
    }
}

#[async_trait::async_trait]
impl FlowApi for HttpFlowApi {
    async fn get_flow(&self, id: &FlowId) -> Result<Flow, FlowStudioError> {
        let url = self.url(&["flows", id.as_str()])?;
        let response = self
            .execute("get_flow", &format!("flow {id}"), self.request(Method::GET, url))
            .await?;
        Self::read_json("get_flow", response).await
    }

    async fn create_flow(&self, flow: &Flow) -> Result<Flow, FlowStudioError> {
        let url = self.url(&["flows"])?;
        let request = self
            .request(Method::POST, url)
            .json(&FlowBody::from_flow(flow));
        let response = self.execute("create_flow", "flows", request).await?;
        Self::read_json("create_flow", response).await
    }

    async fn update_flow(&self, id: &FlowId, flow: &Flow) -> Result<Flow, FlowStudioError> {
        let url = self.url(&["flows", id.as_str()])?;
        let request = self.request(Method::PUT, url).json(&FlowBody::from_flow(flow));
        let response = self
            .execute("update_flow", &format!("flow {id}"), request)
            .await?;
        Self::read_json("update_flow", response).await
    }

    async fn delete_flow(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        let url = self.url(&["flows", id.as_str()])?;
        self.execute(
            "delete_flow",
            &format!("flow {id}"),
            self.request(Method::DELETE, url),
        )
        .await?;
        Ok(())
    }

    async fn publish_flow(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        let url = self.url(&["flows", id.as_str(), "publish"])?;
        self.execute(
            "publish_flow",
            &format!("flow {id}"),
            self.request(Method::POST, url),
        )
        .await?;
        Ok(())
    }

    async fn submit_test(&self, request: &TestFlowRequest) -> Result<RunKey, FlowStudioError> {
        let url = self.url(&["test", "flow"])?;
        let response = self
            .execute(
                "submit_test",
                "test run",
                self.request(Method::POST, url).json(request),
            )
            .await?;
        Self::read_json("submit_test", response).await
    }

    async fn test_status(&self, key: &RunKey) -> Result<Option<RunSnapshot>, FlowStudioError> {
        let mut url = self.url(&["test", "flow", &key.run_id])?;
        url.query_pairs_mut()
            .append_pair("workflow_id", &key.workflow_id);
        let response = match self
            .execute(
                "test_status",
                &format!("run {key}"),
                self.request(Method::GET, url),
            )
            .await
        {
            Ok(response) => response,
            Err(FlowStudioError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        let text = Self::read_text("test_status", response).await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Option<RunSnapshot>>(&text).map_err(|e| {
            FlowStudioError::Protocol(format!("test_status returned an invalid body: {e}"))
        })
    }

    async fn cancel_test(&self, key: &RunKey) -> Result<CancelAck, FlowStudioError> {
        let url = self.url(&["test", "flow", "cancel"])?;
        let response = self
            .execute(
                "cancel_test",
                &format!("run {key}"),
                self.request(Method::POST, url).json(key),
            )
            .await?;
        let text = Self::read_text("cancel_test", response).await?;
        // Acks without a JSON body still count as acknowledged.
        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    async fn test_node(&self, request: &NodeTestRequest) -> Result<Value, FlowStudioError> {
        let url = self.url(&["test", "node"])?;
        let response = self
            .execute(
                "test_node",
                "node test",
                self.request(Method::POST, url).json(request),
            )
            .await?;
        let text = Self::read_text("test_node", response).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| FlowStudioError::Protocol(format!("test_node returned an invalid body: {e}")))
    }
}
