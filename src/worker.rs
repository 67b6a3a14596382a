//! Client for the external scraping worker.
//!
//! Dispatch is fire-and-forget over HTTP. The worker answers later by
//! POSTing to the callback URL carried in the task, so a failed or
//! refused hand-off is soft: the pending record stays behind and the
//! requeue path can try again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::{ServerConfig, WorkerConfig};
use crate::models::{LookupTask, TaskKind};

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Hand a task to the worker. Returns whether it was accepted.
    async fn dispatch(&self, task: &LookupTask) -> bool;
}

// ============ HTTP implementation ============

pub struct HttpWorkerClient {
    client: Client,
    endpoint: Option<String>,
    callback_base_url: String,
}

impl HttpWorkerClient {
    pub fn new(worker: &WorkerConfig, server: &ServerConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let callback_base_url = worker
            .callback_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", server.bind));
        Ok(Self {
            client,
            endpoint: worker.endpoint.clone(),
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn callback_url(&self, task: &LookupTask) -> String {
        let route = match task.kind {
            TaskKind::AffiliateLink => "affiliate",
            TaskKind::ProductSearch => "search",
        };
        format!(
            "{}/callbacks/{}/{}",
            self.callback_base_url, route, task.correlation_id
        )
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn dispatch(&self, task: &LookupTask) -> bool {
        let endpoint = match self.endpoint.as_deref() {
            Some(endpoint) => endpoint,
            None => {
                tracing::warn!(
                    correlation_id = %task.correlation_id,
                    "no worker endpoint configured, task left pending"
                );
                return false;
            }
        };

        let body = json!({
            "kind": task.kind.as_str(),
            "correlationId": task.correlation_id,
            "payload": task.payload,
            "callbackUrl": self.callback_url(task),
        });

        match self.client.post(endpoint).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(
                    correlation_id = %task.correlation_id,
                    kind = task.kind.as_str(),
                    "dispatched lookup task"
                );
                true
            }
            Ok(response) => {
                tracing::warn!(
                    correlation_id = %task.correlation_id,
                    status = %response.status(),
                    "worker rejected lookup task"
                );
                false
            }
            Err(err) => {
                tracing::warn!(
                    correlation_id = %task.correlation_id,
                    error = %err,
                    "worker dispatch failed"
                );
                false
            }
        }
    }
}

// ============ Recording implementation for tests ============

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Worker double that records every task and accepts or refuses
    /// them all, as configured.
    pub struct RecordingWorker {
        pub accept: bool,
        tasks: Mutex<Vec<LookupTask>>,
    }

    impl RecordingWorker {
        pub fn accepting() -> Self {
            Self {
                accept: true,
                tasks: Mutex::new(Vec::new()),
            }
        }

        pub fn refusing() -> Self {
            Self {
                accept: false,
                tasks: Mutex::new(Vec::new()),
            }
        }

        pub fn tasks(&self) -> Vec<LookupTask> {
            self.tasks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WorkerClient for RecordingWorker {
        async fn dispatch(&self, task: &LookupTask) -> bool {
            self.tasks.lock().unwrap().push(task.clone());
            self.accept
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url_routes_by_task_kind() {
        let config = WorkerConfig {
            endpoint: Some("http://worker.local/tasks".to_string()),
            callback_base_url: Some("http://recon.local:8787/".to_string()),
            callback_secret: None,
            platform: "amazon".to_string(),
        };
        let client = HttpWorkerClient::new(&config, &ServerConfig::default()).unwrap();

        let task = LookupTask {
            kind: TaskKind::AffiliateLink,
            correlation_id: "abc".to_string(),
            payload: json!({}),
        };
        assert_eq!(
            client.callback_url(&task),
            "http://recon.local:8787/callbacks/affiliate/abc"
        );

        let task = LookupTask {
            kind: TaskKind::ProductSearch,
            correlation_id: "xyz".to_string(),
            payload: json!({}),
        };
        assert_eq!(
            client.callback_url(&task),
            "http://recon.local:8787/callbacks/search/xyz"
        );
    }

    #[tokio::test]
    async fn test_unconfigured_endpoint_soft_fails() {
        let config = WorkerConfig {
            endpoint: None,
            callback_base_url: None,
            callback_secret: None,
            platform: "amazon".to_string(),
        };
        let client = HttpWorkerClient::new(&config, &ServerConfig::default()).unwrap();
        let task = LookupTask {
            kind: TaskKind::AffiliateLink,
            correlation_id: "abc".to_string(),
            payload: json!({}),
        };
        assert!(!client.dispatch(&task).await);
    }
}
