//! HTTP client against the master API.

use dedalus_core::{ApiError, ApiResponse};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Result type alias for client calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors the client surfaces to the terminal.
#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// The master answered with an error envelope.
    #[error("master refused the request: {0}")]
    #[diagnostic(code(dedalus::client::api))]
    Api(#[from] ApiError),

    /// The master could not be reached or answered garbage.
    #[error("talking to the master failed: {0}")]
    #[diagnostic(
        code(dedalus::client::network),
        help("is the master running and reachable?")
    )]
    Network(#[from] reqwest::Error),

    /// Local input was unusable.
    #[error("{0}")]
    #[diagnostic(code(dedalus::client::input))]
    Input(String),
}

/// Thin typed wrapper over the master's HTTP API.
pub struct MasterApiClient {
    url_prefix: String,
    client: reqwest::Client,
}

impl MasterApiClient {
    /// Client for `host:port` with the given api version.
    #[must_use]
    pub fn new(host: &str, port: u16, ssl: bool, api_version: &str) -> Self {
        let scheme = if ssl { "https" } else { "http" };
        Self {
            url_prefix: format!("{scheme}://{host}:{port}/{api_version}"),
            client: reqwest::Client::new(),
        }
    }

    /// Create a graph revision; returns `{graph_name, revision}`.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn create_graph(&self, name: &str, graph: &Value) -> Result<Value> {
        self.post(&format!("graph/{name}"), Some(graph)).await
    }

    /// Read one graph (latest revision unless pinned).
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn read_graph(&self, name: &str, revision: Option<u64>) -> Result<Value> {
        let path = match revision {
            Some(revision) => format!("graph/{name}/{revision}"),
            None => format!("graph/{name}"),
        };
        self.get(&path).await
    }

    /// List graphs, optionally of one name.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn list_graphs(&self, name: Option<&str>) -> Result<Value> {
        let path = match name {
            Some(name) => format!("graphs?graph_name={name}"),
            None => "graphs".to_string(),
        };
        self.get(&path).await
    }

    /// Launch an instance of a graph; returns the instance document.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn launch_graph(&self, name: &str, revision: Option<u64>) -> Result<Value> {
        let path = match revision {
            Some(revision) => format!("graph/{name}/{revision}/launch"),
            None => format!("graph/{name}/launch"),
        };
        self.post(&path, None).await
    }

    /// Install a cron schedule for a graph.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn schedule_graph(&self, name: &str, rule: &str) -> Result<Value> {
        self.post(
            &format!("graph/{name}/schedule"),
            Some(&serde_json::json!({ "schedule": rule })),
        )
        .await
    }

    /// Read one instance document.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn read_instance(&self, instance_id: &str) -> Result<Value> {
        self.get(&format!("instance/{instance_id}")).await
    }

    /// List all instances.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn list_instances(&self) -> Result<Value> {
        self.get("instances").await
    }

    /// Start an instance; returns `{prev_state, new_state}`.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn start_instance(&self, instance_id: &str) -> Result<Value> {
        self.post(&format!("instance/{instance_id}/start"), None).await
    }

    /// Stop an instance; returns `{prev_state, new_state}`.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn stop_instance(&self, instance_id: &str) -> Result<Value> {
        self.post(&format!("instance/{instance_id}/stop"), None).await
    }

    /// Read the proxied log of one task on one host.
    ///
    /// # Errors
    ///
    /// Network failures and error envelopes.
    pub async fn instance_logs(
        &self,
        instance_id: &str,
        task_name: &str,
        host: &str,
        log_type: &str,
    ) -> Result<String> {
        let payload = self
            .get(&format!(
                "instance/{instance_id}/logs/{task_name}/{host}/{log_type}"
            ))
            .await?;
        Ok(payload["data"].as_str().unwrap_or_default().to_string())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/{path}", self.url_prefix))
            .send()
            .await?;
        Self::unwrap_envelope(response).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.client.post(format!("{}/{path}", self.url_prefix));
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::unwrap_envelope(request.send().await?).await
    }

    async fn unwrap_envelope(response: reqwest::Response) -> Result<Value> {
        let envelope: ApiResponse<Value> = response.json().await?;
        Ok(envelope.into_payload()?)
    }
}
