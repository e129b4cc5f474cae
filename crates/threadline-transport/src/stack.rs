use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::authenticated::{AuthenticatedTransport, TokenProvider};
use crate::base::BaseTransport;
use crate::client::ApiClient;
use crate::observable::{HttpObserver, ObservableTransport, Redactor};
use crate::refreshing::{RefreshingTransport, TokenRefresher};
use crate::transport::Transport;

/// Composes the layers in their fixed order, innermost first:
/// base, observable, authenticated, refreshing.
///
/// Observation is always on (with no observers it only logs). The
/// authenticated and refreshing layers are added when their collaborator
/// is supplied.
#[derive(Default)]
pub struct TransportStackBuilder {
    base: Option<Box<dyn Transport>>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    redactor: Redactor,
    observers: Vec<Arc<dyn HttpObserver>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl TransportStackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reqwest-backed base layer (tests use scripted fakes).
    pub fn base(mut self, base: Box<dyn Transport>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn HttpObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn build(self) -> Result<Box<dyn Transport>> {
        let base: Box<dyn Transport> = match self.base {
            Some(base) => base,
            None => Box::new(BaseTransport::new(self.timeout, self.connect_timeout)?),
        };

        let mut transport: Box<dyn Transport> = Box::new(
            ObservableTransport::new(base, self.redactor).with_observers(self.observers),
        );

        if let Some(provider) = self.token_provider {
            transport = Box::new(AuthenticatedTransport::new(transport, provider));
        }

        if let Some(refresher) = self.refresher {
            transport = Box::new(RefreshingTransport::new(transport, refresher));
        }

        Ok(transport)
    }

    pub fn build_client(self, base_url: impl Into<String>) -> Result<ApiClient> {
        Ok(ApiClient::new(base_url, self.build()?))
    }
}
