//! 401 handling with single-flight token refresh.
//!
//! Every request remembers the refresh generation it was sent under. When it
//! comes back 401, it enters the critical section: if no refresh happened
//! since it was sent, it performs one; otherwise it reuses the outcome of the
//! refresh that already ran. N concurrent 401s therefore trigger exactly one
//! call to the refresh function, and every waiter retries once.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use threadline_types::{CancelToken, Result, TransportError};
use tokio::sync::Mutex;

use crate::transport::{HttpRequest, HttpResponse, StreamResponse, Transport};

const UNAUTHORIZED: u16 = 401;

/// Obtains a fresh token, typically by storing it where the
/// [`TokenProvider`](crate::TokenProvider) reads from.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> anyhow::Result<()>;
}

struct RefreshState {
    generation: u64,
    last_succeeded: bool,
}

pub struct RefreshingTransport {
    inner: Box<dyn Transport>,
    refresher: Arc<dyn TokenRefresher>,
    state: Mutex<RefreshState>,
    // Mirror of `state.generation` readable without the lock.
    generation: AtomicU64,
}

impl RefreshingTransport {
    pub fn new(inner: Box<dyn Transport>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            inner,
            refresher,
            state: Mutex::new(RefreshState {
                generation: 0,
                last_succeeded: true,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of refreshes performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Returns whether a usable token should now be in place.
    async fn refresh_after_unauthorized(&self, observed: u64) -> bool {
        let mut state = self.state.lock().await;

        if state.generation != observed {
            tracing::debug!(
                generation = state.generation,
                "token already refreshed by a concurrent request"
            );
            return state.last_succeeded;
        }

        tracing::info!("access token rejected; refreshing");
        let succeeded = match self.refresher.refresh().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                false
            }
        };

        state.generation += 1;
        state.last_succeeded = succeeded;
        self.generation.store(state.generation, Ordering::SeqCst);
        succeeded
    }
}

#[async_trait]
impl Transport for RefreshingTransport {
    async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        let observed = self.generation.load(Ordering::SeqCst);
        let response = self.inner.send(request.clone(), cancel).await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }

        if !self.refresh_after_unauthorized(observed).await {
            return Err(TransportError::Auth {
                status_code: UNAUTHORIZED,
            });
        }

        cancel.check()?;
        let retried = self.inner.send(request, cancel).await?;
        if retried.status == UNAUTHORIZED {
            tracing::warn!("request still unauthorized after token refresh");
            return Err(TransportError::Auth {
                status_code: UNAUTHORIZED,
            });
        }
        Ok(retried)
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        let observed = self.generation.load(Ordering::SeqCst);
        let response = self.inner.open_stream(request.clone(), cancel).await?;
        if response.status != UNAUTHORIZED {
            return Ok(response);
        }
        drop(response);

        if !self.refresh_after_unauthorized(observed).await {
            return Err(TransportError::Auth {
                status_code: UNAUTHORIZED,
            });
        }

        cancel.check()?;
        let retried = self.inner.open_stream(request, cancel).await?;
        if retried.status == UNAUTHORIZED {
            tracing::warn!("stream still unauthorized after token refresh");
            return Err(TransportError::Auth {
                status_code: UNAUTHORIZED,
            });
        }
        Ok(retried)
    }

    fn close(&self) {
        self.inner.close();
    }
}
