//! High-level builder API for wiring a conversation client

use crate::config::ClientConfig;
use crate::session::{RunRequest, RunSession};
use anyhow::{Context, Result};
use std::sync::Arc;
use threadline_history::{HistoryReconstructor, HttpRunSource, RunEventCache};
use threadline_transport::{
    ApiClient, HttpObserver, SharedTransport, TokenProvider, TokenRefresher, Transport,
    TransportStackBuilder,
};
use threadline_types::{CancelToken, Conversation, RunStatus, TransportError};

/// High-level builder for a [`Threadline`] client
///
/// # Example
///
/// ```rust,no_run
/// use threadline::prelude::*;
/// use std::sync::Arc;
///
/// # fn main() -> Result<()> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com/v1")
///     .token_provider(Arc::new(StaticToken("secret".to_string())))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    token_provider: Option<Arc<dyn TokenProvider>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    observers: Vec<Arc<dyn HttpObserver>>,
    shared_transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from loaded configuration (see [`ClientConfig::load`])
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the API base URL (required unless present in config)
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.server.base_url = Some(base_url.into());
        self
    }

    /// Bearer token accessor; without one requests go out unauthenticated
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Called once per burst of 401 responses
    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn HttpObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Use a transport owned by someone else as the base layer.
    ///
    /// Closing the built client never closes it.
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.shared_transport = Some(transport);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No base URL is configured
    /// - The HTTP client cannot be created
    pub fn build(self) -> Result<Threadline> {
        let base_url = self
            .config
            .server
            .base_url
            .clone()
            .context("Base URL is required. Call .base_url(url) or set server.base_url")?;

        let mut stack = TransportStackBuilder::new()
            .connect_timeout(self.config.server.connect_timeout())
            .redactor(self.config.redaction.redactor());

        if let Some(timeout) = self.config.server.timeout() {
            stack = stack.timeout(timeout);
        }
        if let Some(shared) = self.shared_transport {
            stack = stack.base(Box::new(SharedTransport::new(shared)));
        }
        if let Some(provider) = self.token_provider {
            stack = stack.token_provider(provider);
        }
        if let Some(refresher) = self.refresher {
            stack = stack.refresher(refresher);
        }
        for observer in self.observers {
            stack = stack.observer(observer);
        }

        let api = Arc::new(
            stack
                .build_client(&base_url)
                .context("Failed to create transport stack")?,
        );

        let history = HistoryReconstructor::new(
            Arc::new(HttpRunSource::new(Arc::clone(&api))),
            RunEventCache::new(self.config.history.cache_capacity),
        )
        .with_max_concurrent_fetches(self.config.history.max_concurrent_fetches);

        tracing::debug!(base_url = %base_url, "threadline client ready");

        Ok(Threadline { api, history })
    }
}

/// A configured client: live runs plus history replay over one transport stack
pub struct Threadline {
    api: Arc<ApiClient>,
    history: HistoryReconstructor,
}

impl Threadline {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Rebuild a thread from its completed runs.
    pub async fn reconstruct(
        &self,
        thread_id: &str,
        cancel: &CancelToken,
    ) -> threadline_types::Result<Conversation> {
        self.history.reconstruct(thread_id, cancel).await
    }

    /// Like [`reconstruct`](Self::reconstruct), but a failure is folded into
    /// the returned conversation's status instead of being returned.
    pub async fn load_thread(&self, thread_id: &str, cancel: &CancelToken) -> Conversation {
        match self.reconstruct(thread_id, cancel).await {
            Ok(conversation) => conversation,
            Err(TransportError::Cancelled) => {
                Conversation::new(thread_id).with_status(RunStatus::Cancelled { reason: None })
            }
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "failed to load thread history");
                Conversation::new(thread_id).with_status(RunStatus::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Post a user turn to the thread and stream the resulting run.
    pub async fn send_message(
        &self,
        conversation: Conversation,
        message_id: impl Into<String>,
        message: impl Into<String>,
        cancel: CancelToken,
    ) -> threadline_types::Result<RunSession> {
        let request = RunRequest {
            message_id: message_id.into(),
            message: message.into(),
        };
        RunSession::start(&self.api, conversation, request, cancel).await
    }

    /// Re-attach to a run that is still streaming on the server.
    pub async fn resume_run(
        &self,
        conversation: Conversation,
        run_id: &str,
        cancel: CancelToken,
    ) -> threadline_types::Result<RunSession> {
        RunSession::resume(&self.api, conversation, run_id, cancel).await
    }

    /// Get the JSON facade for direct API calls
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn history(&self) -> &HistoryReconstructor {
        &self.history
    }

    /// Close the transport stack. A shared base transport stays open.
    pub fn close(&self) {
        self.api.close();
    }
}
