use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::AUTHORIZATION;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use threadline_transport::{
    HttpRequest, HttpResponse, StreamResponse, TokenCell, TokenRefresher, Transport,
    TransportStackBuilder,
};
use threadline_types::{CancelToken, Result, TransportError};

/// Accepts only `Bearer <accepted>`, answers 401 otherwise.
struct Gatekeeper {
    accepted: &'static str,
    calls: Arc<AtomicUsize>,
}

impl Gatekeeper {
    fn status_for(&self, request: &HttpRequest) -> u16 {
        let expected = format!("Bearer {}", self.accepted);
        match request.headers.get(AUTHORIZATION) {
            Some(value) if value.to_str().unwrap() == expected => 200,
            _ => 401,
        }
    }
}

#[async_trait]
impl Transport for Gatekeeper {
    async fn send(&self, request: HttpRequest, _cancel: &CancelToken) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(HttpResponse::new(self.status_for(&request), "{}"))
    }

    async fn open_stream(
        &self,
        request: HttpRequest,
        _cancel: &CancelToken,
    ) -> Result<StreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<bytes::Bytes>> = vec![Ok(bytes::Bytes::from("ok"))];
        Ok(StreamResponse {
            status: self.status_for(&request),
            headers: Default::default(),
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }

    fn close(&self) {}
}

/// Writes `next` into the token cell, optionally failing or cancelling.
struct CellRefresher {
    cell: Arc<TokenCell>,
    next: &'static str,
    fail: bool,
    cancel_on_refresh: Option<CancelToken>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl TokenRefresher for CellRefresher {
    async fn refresh(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Some(cancel) = &self.cancel_on_refresh {
            cancel.cancel();
        }
        if self.fail {
            anyhow::bail!("refresh token revoked");
        }
        self.cell.set(Some(self.next.to_string()));
        Ok(())
    }
}

struct Harness {
    transport: Box<dyn Transport>,
    network_calls: Arc<AtomicUsize>,
    refresh_calls: Arc<AtomicUsize>,
}

fn harness(
    accepted: &'static str,
    next: &'static str,
    fail: bool,
    cancel: Option<CancelToken>,
) -> Harness {
    let network_calls = Arc::new(AtomicUsize::new(0));
    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let cell = Arc::new(TokenCell::new(Some("stale".to_string())));

    let transport = TransportStackBuilder::new()
        .base(Box::new(Gatekeeper {
            accepted,
            calls: network_calls.clone(),
        }))
        .token_provider(cell.clone())
        .refresher(Arc::new(CellRefresher {
            cell,
            next,
            fail,
            cancel_on_refresh: cancel,
            calls: refresh_calls.clone(),
        }))
        .build()
        .unwrap();

    Harness {
        transport,
        network_calls,
        refresh_calls,
    }
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let h = harness("fresh", "fresh", false, None);
    let cancel = CancelToken::new();

    let results = join_all((0..5).map(|i| {
        h.transport
            .send(HttpRequest::get(format!("http://api/items/{}", i)), &cancel)
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap().status, 200);
    }
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
    // five rejected originals plus at most five retries
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_second_401_is_not_retried_again() {
    let h = harness("never-issued", "still-wrong", false, None);

    let result = h
        .transport
        .send(HttpRequest::get("http://api/items"), &CancelToken::new())
        .await;

    assert_eq!(result.unwrap_err(), TransportError::Auth { status_code: 401 });
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_refresh_surfaces_auth_error_without_retry() {
    let h = harness("fresh", "fresh", true, None);

    let result = h
        .transport
        .send(HttpRequest::get("http://api/items"), &CancelToken::new())
        .await;

    assert_eq!(result.unwrap_err(), TransportError::Auth { status_code: 401 });
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_during_refresh_skips_retry() {
    let cancel = CancelToken::new();
    let h = harness("fresh", "fresh", false, Some(cancel.clone()));

    let result = h
        .transport
        .send(HttpRequest::get("http://api/items"), &cancel)
        .await;

    assert_eq!(result.unwrap_err(), TransportError::Cancelled);
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_is_reopened_after_refresh() {
    let h = harness("fresh", "fresh", false, None);

    let response = h
        .transport
        .open_stream(HttpRequest::get("http://api/stream"), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.collect_body().await.unwrap(), bytes::Bytes::from("ok"));
    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_refreshed_token_is_reused() {
    let h = harness("fresh", "fresh", false, None);
    let cancel = CancelToken::new();

    h.transport
        .send(HttpRequest::get("http://api/a"), &cancel)
        .await
        .unwrap();
    // token is now valid, no new refresh needed
    h.transport
        .send(HttpRequest::get("http://api/b"), &cancel)
        .await
        .unwrap();

    assert_eq!(h.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.network_calls.load(Ordering::SeqCst), 3);
}
