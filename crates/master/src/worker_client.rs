//! Thin HTTP client the master uses against workers.
//!
//! The engine talks to workers through the [`WorkerApi`] trait so tests can
//! substitute an in-memory worker; [`HttpWorkerClient`] is the real thing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dedalus_core::{ApiResponse, LogStream, TaskState, TaskStruct};
use serde::Deserialize;

use crate::{Error, Result};

/// The worker operations the master needs.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Create a task, returning the worker-assigned id.
    async fn create_task(&self, structure: &TaskStruct) -> Result<String>;

    /// Start a task, returning its new state.
    async fn start_task(&self, task_id: &str) -> Result<TaskState>;

    /// Stop a task, returning its new state.
    async fn stop_task(&self, task_id: &str) -> Result<TaskState>;

    /// Poll a task's state.
    async fn get_task_state(&self, task_id: &str) -> Result<TaskState>;

    /// Read a captured task log.
    async fn get_task_log(&self, task_id: &str, stream: LogStream) -> Result<String>;
}

/// Maps a cluster host address to a client for it.
pub trait WorkerConnector: Send + Sync {
    /// Client for `host` (a bare host or `host:port`).
    fn client_for(&self, host: &str) -> Arc<dyn WorkerApi>;
}

/// reqwest-backed [`WorkerApi`] implementation.
pub struct HttpWorkerClient {
    host: String,
    url_prefix: String,
    client: reqwest::Client,
}

impl HttpWorkerClient {
    /// Client for `host`; a bare host gets `default_port` appended.
    ///
    /// # Errors
    ///
    /// [`Error::WorkerRpc`] if the HTTP client cannot be built.
    pub fn new(host: &str, default_port: u16, timeout: Duration) -> Result<Self> {
        let authority = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{default_port}")
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::rpc(host, err))?;
        Ok(Self {
            host: host.to_string(),
            url_prefix: format!("http://{authority}/v1.0"),
            client,
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        envelope
            .into_payload()
            .map_err(|err| Error::rpc(&self.host, err))
    }
}

#[derive(Debug, Deserialize)]
struct CreatedTask {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StateChanged {
    new_state: TaskState,
}

#[derive(Debug, Deserialize)]
struct PolledState {
    state: TaskState,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    data: String,
}

#[async_trait]
impl WorkerApi for HttpWorkerClient {
    async fn create_task(&self, structure: &TaskStruct) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/task/", self.url_prefix))
            .json(structure)
            .send()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        Ok(self.decode::<CreatedTask>(response).await?.task_id)
    }

    async fn start_task(&self, task_id: &str) -> Result<TaskState> {
        let response = self
            .client
            .post(format!("{}/task/{task_id}/start", self.url_prefix))
            .send()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        Ok(self.decode::<StateChanged>(response).await?.new_state)
    }

    async fn stop_task(&self, task_id: &str) -> Result<TaskState> {
        let response = self
            .client
            .post(format!("{}/task/{task_id}/stop", self.url_prefix))
            .send()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        Ok(self.decode::<StateChanged>(response).await?.new_state)
    }

    async fn get_task_state(&self, task_id: &str) -> Result<TaskState> {
        let response = self
            .client
            .get(format!("{}/task/{task_id}/state", self.url_prefix))
            .send()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        Ok(self.decode::<PolledState>(response).await?.state)
    }

    async fn get_task_log(&self, task_id: &str, stream: LogStream) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/task/{task_id}/log/{stream}", self.url_prefix))
            .send()
            .await
            .map_err(|err| Error::rpc(&self.host, err))?;
        Ok(self.decode::<LogPayload>(response).await?.data)
    }
}

/// Connector producing [`HttpWorkerClient`]s, cached per host.
pub struct HttpWorkerConnector {
    default_port: u16,
    timeout: Duration,
    clients: Mutex<HashMap<String, Arc<HttpWorkerClient>>>,
}

impl HttpWorkerConnector {
    /// Connector with the configured default worker port and RPC timeout.
    #[must_use]
    pub fn new(default_port: u16, timeout: Duration) -> Self {
        Self {
            default_port,
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl WorkerConnector for HttpWorkerConnector {
    fn client_for(&self, host: &str) -> Arc<dyn WorkerApi> {
        let mut clients = match self.clients.lock() {
            Ok(clients) => clients,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(client) = clients.get(host) {
            return Arc::clone(client) as Arc<dyn WorkerApi>;
        }
        // Building a client only fails on broken TLS setup; fall back to a
        // default-config client rather than poisoning every caller.
        let client = HttpWorkerClient::new(host, self.default_port, self.timeout)
            .unwrap_or_else(|_| HttpWorkerClient {
                host: host.to_string(),
                url_prefix: format!("http://{host}:{}/v1.0", self.default_port),
                client: reqwest::Client::new(),
            });
        let client = Arc::new(client);
        clients.insert(host.to_string(), Arc::clone(&client));
        client
    }
}
