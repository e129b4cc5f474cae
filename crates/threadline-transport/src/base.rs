// Innermost layer: executes requests against the network with reqwest

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use threadline_types::{CancelToken, Result, TransportError};

use crate::transport::{HttpRequest, HttpResponse, StreamResponse, Transport};

/// Plain HTTP transport. Connection failures surface as
/// [`TransportError::Network`] and are never retried here.
pub struct BaseTransport {
    http_client: reqwest::Client,
    closed: AtomicBool,
}

impl BaseTransport {
    pub fn new(timeout: Option<Duration>, connect_timeout: Option<Duration>) -> AnyResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        let http_client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self::from_client(http_client))
    }

    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response> {
        if self.is_closed() {
            return Err(TransportError::network("transport is closed"));
        }
        cancel.check()?;

        let mut builder = self
            .http_client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        // reqwest errors embed the full URL, query string included.
        builder.send().await.map_err(|e| {
            let e = e.without_url();
            let path = request.url.split('?').next().unwrap_or_default();
            tracing::debug!(url = %path, error = %e, "request failed before a response");
            TransportError::network(e)
        })
    }
}

#[async_trait]
impl Transport for BaseTransport {
    async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        let response = self.execute(request, cancel).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        cancel.check()?;
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::network(e.without_url()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        let response = self.execute(request, cancel).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let cancel = cancel.clone();

        let body = Box::pin(async_stream::stream! {
            let mut chunks = Box::pin(response.bytes_stream());

            loop {
                if cancel.is_cancelled() {
                    yield Err(TransportError::Cancelled);
                    break;
                }

                match chunks.next().await {
                    Some(Ok(bytes)) => yield Ok(bytes),
                    Some(Err(e)) => {
                        yield Err(TransportError::network(e.without_url()));
                        break;
                    }
                    None => break,
                }
            }
        });

        Ok(StreamResponse {
            status,
            headers,
            body,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
