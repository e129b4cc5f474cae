// JSON facade over the transport stack

use futures::Stream;
use reqwest::header::{HeaderValue, ACCEPT};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use threadline_types::{CancelToken, Event, Result, TransportError};

use crate::frames::event_stream;
use crate::shared::SharedTransport;
use crate::transport::{HttpRequest, HttpResponse, StreamResponse, Transport};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event>> + Send>>;

/// Typed client for the conversation backend.
///
/// Serializes request bodies, decodes JSON responses and maps non-success
/// statuses onto [`TransportError`]. Transport errors are passed through
/// unchanged.
pub struct ApiClient {
    transport: Box<dyn Transport>,
    base_url: String,
}

impl ApiClient {
    /// Client that owns `transport`; `close` tears it down.
    pub fn new(base_url: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client over a transport that outlives it. `close` leaves it open.
    pub fn with_shared(base_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::new(base_url, Box::new(SharedTransport::new(transport)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send a raw request and map the status.
    pub async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        cancel.check()?;
        let resource = resource_of(&request.url);
        let response = self.transport.send(request, cancel).await?;

        if !response.is_success() {
            tracing::debug!(status = response.status, resource = %resource, "request rejected");
            return Err(TransportError::from_status(
                response.status,
                &resource,
                &response.text(),
            ));
        }
        Ok(response)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<T> {
        let response = self.send(HttpRequest::get(self.url(path)), cancel).await?;
        decode_json(&response)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B, cancel: &CancelToken) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::post(self.url(path)).json(body)?;
        let response = self.send(request, cancel).await?;
        decode_json(&response)
    }

    pub async fn delete(&self, path: &str, cancel: &CancelToken) -> Result<()> {
        self.send(HttpRequest::delete(self.url(path)), cancel)
            .await
            .map(|_| ())
    }

    /// Open a streaming request. Error statuses are drained so the mapped
    /// error carries the server's message.
    pub async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        cancel.check()?;
        let resource = resource_of(&request.url);
        let response = self.transport.open_stream(request, cancel).await?;

        if !response.is_success() {
            let status = response.status;
            let body = response.collect_body().await.unwrap_or_default();
            return Err(TransportError::from_status(
                status,
                &resource,
                &String::from_utf8_lossy(&body),
            ));
        }
        Ok(response)
    }

    /// Open a run's event stream. With a body the request is a POST,
    /// otherwise a GET.
    pub async fn open_event_stream<B>(
        &self,
        path: &str,
        body: Option<&B>,
        cancel: &CancelToken,
    ) -> Result<EventStream>
    where
        B: Serialize + ?Sized,
    {
        let request = match body {
            Some(body) => HttpRequest::post(self.url(path)).json(body)?,
            None => HttpRequest::get(self.url(path)),
        }
        .header(
            ACCEPT,
            HeaderValue::from_static("text/event-stream, application/x-ndjson"),
        );

        let response = self.open_stream(request, cancel).await?;
        Ok(event_stream(response.body))
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| TransportError::Api {
        status_code: response.status,
        message: format!("Failed to decode response body: {}", e),
    })
}

/// Path portion of a URL, used to name the resource in `NotFound`.
fn resource_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].to_string(),
        None => "/".to_string(),
    }
}
