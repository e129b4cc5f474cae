use async_trait::async_trait;
use std::sync::Arc;
use threadline_types::{CancelToken, Result};

use crate::transport::{HttpRequest, HttpResponse, StreamResponse, Transport};

/// Wraps a transport the caller still owns. `close` is a no-op, so a
/// facade built on top can be dropped or closed without tearing down the
/// caller's transport.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<dyn Transport>,
}

impl SharedTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for SharedTransport {
    async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        self.inner.send(request, cancel).await
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        self.inner.open_stream(request, cancel).await
    }

    fn close(&self) {
        tracing::trace!("close ignored on shared transport");
    }
}
