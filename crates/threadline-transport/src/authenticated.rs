use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use std::sync::{Arc, RwLock};
use threadline_types::{CancelToken, Result};

use crate::transport::{HttpRequest, HttpResponse, StreamResponse, Transport};

/// Supplies the current bearer token.
///
/// Implemented by the authentication subsystem; `Ok(None)` means the
/// request goes out unauthenticated.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<Option<String>>;
}

/// Fixed token, mostly for tools and tests.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Shared, replaceable token slot. A refresh function writes it, the
/// authenticated layer reads it.
#[derive(Default)]
pub struct TokenCell {
    token: RwLock<Option<String>>,
}

impl TokenCell {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }
}

#[async_trait]
impl TokenProvider for TokenCell {
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        Ok(self.get())
    }
}

/// Injects `Authorization: Bearer <token>` into every request.
pub struct AuthenticatedTransport {
    inner: Box<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
}

impl AuthenticatedTransport {
    pub fn new(inner: Box<dyn Transport>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { inner, tokens }
    }

    async fn authorize(&self, mut request: HttpRequest) -> HttpRequest {
        let token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "token provider failed; sending request without credentials");
                None
            }
        };

        match token {
            Some(token) => match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(_) => tracing::warn!("access token is not a valid header value; skipped"),
            },
            None => {
                request.headers.remove(AUTHORIZATION);
            }
        }
        request
    }
}

#[async_trait]
impl Transport for AuthenticatedTransport {
    async fn send(&self, request: HttpRequest, cancel: &CancelToken) -> Result<HttpResponse> {
        let request = self.authorize(request).await;
        self.inner.send(request, cancel).await
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
        cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        let request = self.authorize(request).await;
        self.inner.open_stream(request, cancel).await
    }

    fn close(&self) {
        self.inner.close();
    }
}
