use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use threadline_transport::ApiClient;
use threadline_types::{CancelToken, Event, Result};

/// Lifecycle of an archived run as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// One entry of a thread's run list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub status: RunState,
    /// Text of the user turn that started the run, when the archive keeps it
    /// outside the event log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
}

impl RunInfo {
    /// Completed logs never change and may be cached.
    pub fn is_completed(&self) -> bool {
        self.status == RunState::Completed
    }
}

/// Where archived runs come from.
#[async_trait]
pub trait RunSource: Send + Sync {
    async fn list_runs(&self, thread_id: &str, cancel: &CancelToken) -> Result<Vec<RunInfo>>;

    async fn run_events(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>>;
}

/// [`RunSource`] backed by the conversation API.
pub struct HttpRunSource {
    client: Arc<ApiClient>,
}

impl HttpRunSource {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunSource for HttpRunSource {
    async fn list_runs(&self, thread_id: &str, cancel: &CancelToken) -> Result<Vec<RunInfo>> {
        self.client
            .get_json(&format!("/threads/{}/runs", thread_id), cancel)
            .await
    }

    async fn run_events(
        &self,
        thread_id: &str,
        run_id: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<Event>> {
        tracing::debug!(thread_id, run_id, "fetching run events");
        self.client
            .get_json(
                &format!("/threads/{}/runs/{}/events", thread_id, run_id),
                cancel,
            )
            .await
    }
}
