//! Live run coordinator.
//!
//! A [`RunSession`] drives one run's event stream through the reducer on a
//! background task and publishes every intermediate view over a
//! `tokio::sync::watch` channel. Watchers only ever see the latest snapshot.

use futures::StreamExt;
use serde::Serialize;
use threadline_state::reduce;
use threadline_transport::{ApiClient, EventStream};
use threadline_types::{
    CancelToken, ChatMessage, Conversation, Event, LoadingMessage, Result, StreamingProjection,
    TextMessage, TransportError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What a watcher renders: the durable conversation plus the volatile tail.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation: Conversation,
    pub projection: Option<StreamingProjection>,
}

/// Body of `POST /threads/{thread_id}/runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub message_id: String,
    pub message: String,
}

pub struct RunSession {
    snapshots: watch::Receiver<SessionSnapshot>,
    cancel: CancelToken,
    driver: JoinHandle<Conversation>,
}

impl RunSession {
    /// Send a user turn and stream the run it starts.
    ///
    /// The user message and a loading placeholder are shown immediately;
    /// the placeholder goes away with the first streamed text or when the
    /// run ends.
    pub async fn start(
        client: &ApiClient,
        conversation: Conversation,
        request: RunRequest,
        cancel: CancelToken,
    ) -> Result<Self> {
        let path = format!("/threads/{}/runs", conversation.thread_id);
        let conversation = conversation
            .with_message(ChatMessage::Text(TextMessage::user(
                &request.message_id,
                &request.message,
            )))
            .with_message(ChatMessage::Loading(LoadingMessage {
                id: format!("{}-loading", request.message_id),
            }));

        let events = client
            .open_event_stream(&path, Some(&request), &cancel)
            .await?;
        Ok(Self::spawn(conversation, events, cancel))
    }

    /// Re-attach to a run that is still in progress on the server.
    pub async fn resume(
        client: &ApiClient,
        conversation: Conversation,
        run_id: &str,
        cancel: CancelToken,
    ) -> Result<Self> {
        let path = format!(
            "/threads/{}/runs/{}/stream",
            conversation.thread_id, run_id
        );
        let events = client
            .open_event_stream::<()>(&path, None, &cancel)
            .await?;
        Ok(Self::spawn(conversation, events, cancel))
    }

    /// Drive an already opened event stream.
    pub fn spawn(conversation: Conversation, events: EventStream, cancel: CancelToken) -> Self {
        let (tx, rx) = watch::channel(SessionSnapshot {
            conversation: conversation.clone(),
            projection: None,
        });
        let driver = tokio::spawn(drive(conversation, events, tx, cancel.clone()));

        Self {
            snapshots: rx,
            cancel,
            driver,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end and return the final conversation.
    pub async fn finish(self) -> Conversation {
        match self.driver.await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::error!(error = %e, "run session task failed");
                self.snapshots.borrow().conversation.clone()
            }
        }
    }
}

async fn drive(
    mut conversation: Conversation,
    mut events: EventStream,
    tx: watch::Sender<SessionSnapshot>,
    cancel: CancelToken,
) -> Conversation {
    let mut projection: Option<StreamingProjection> = None;

    // Ends on the first terminal event; a stream that runs dry before one
    // arrives is a failure, whatever the conversation status says.
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => Event::RunCancelled {
                run_id: None,
                reason: Some("cancelled by user".to_string()),
            },
            next = events.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => terminal_for(&e),
                None => Event::RunError {
                    run_id: None,
                    message: "event stream ended before the run finished".to_string(),
                    code: None,
                },
            },
        };

        let terminal = event.is_terminal();
        (conversation, projection) = reduce(conversation, projection, &event);
        tx.send_replace(SessionSnapshot {
            conversation: conversation.clone(),
            projection: projection.clone(),
        });

        if terminal {
            break;
        }
    }

    tracing::debug!(
        thread_id = %conversation.thread_id,
        status = ?conversation.status,
        "run session ended"
    );
    conversation
}

/// Transport failures end the run like a server-side terminal event would.
fn terminal_for(error: &TransportError) -> Event {
    match error {
        TransportError::Cancelled => Event::RunCancelled {
            run_id: None,
            reason: None,
        },
        other => {
            tracing::warn!(error = %other, "run stream failed");
            Event::RunError {
                run_id: None,
                message: other.to_string(),
                code: None,
            }
        }
    }
}
