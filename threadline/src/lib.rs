//! # Threadline - client-side conversation engine
//!
//! Threadline turns a backend agent's event stream into a renderable
//! conversation:
//! - **Event sourcing**: a pure reducer folds run events into a [`Conversation`]
//! - **Resilient transport**: bearer auth, single-flight token refresh, redacted traffic logs
//! - **History replay**: completed runs are fetched concurrently, cached and folded in order
//! - **Live sessions**: watch-channel snapshots while a run streams
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use threadline::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ClientBuilder::new()
//!         .base_url("https://api.example.com/v1")
//!         .token_provider(Arc::new(StaticToken(std::env::var("API_TOKEN")?)))
//!         .build()?;
//!
//!     let cancel = CancelToken::new();
//!     let conversation = client.load_thread("thread-42", &cancel).await;
//!
//!     let session = client
//!         .send_message(conversation, "m-1", "Summarize the refund policy", cancel)
//!         .await?;
//!
//!     let mut updates = session.subscribe();
//!     while updates.changed().await.is_ok() {
//!         let snapshot = updates.borrow().clone();
//!         if !snapshot.conversation.is_running() {
//!             break;
//!         }
//!     }
//!
//!     let conversation = session.finish().await;
//!     for message in conversation.text_messages() {
//!         println!("{:?}: {}", message.author, message.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **threadline-types**: Conversation model, wire events, error taxonomy, cancel token
//! - **threadline-transport**: Layered HTTP transport and JSON facade
//! - **threadline-state**: Reducer, patch engine, citation extractor
//! - **threadline-history**: Run source, run-event cache, history reconstructor
//!
//! The reducer and patch engine are synchronous and usable on their own:
//!
//! ```rust
//! use threadline::prelude::*;
//!
//! let events = vec![
//!     Event::RunStarted { thread_id: "t1".into(), run_id: "r1".into() },
//!     Event::RunFinished { thread_id: "t1".into(), run_id: "r1".into() },
//! ];
//! let conversation = fold_events(Conversation::new("t1"), events.iter());
//! assert_eq!(conversation.status, RunStatus::Completed);
//! ```

// Re-export all public APIs
pub use threadline_history as history;
pub use threadline_state as state;
pub use threadline_transport as transport;
pub use threadline_types as types;

// Re-export commonly used types
pub use threadline_history::{HistoryReconstructor, RunEventCache, RunSource};
pub use threadline_state::{apply_patch, extract_new_citations, fold_events, reduce};
pub use threadline_transport::{ApiClient, HttpObserver, TokenProvider, TokenRefresher, Transport};
pub use threadline_types::{
    CancelToken, ChatMessage, Conversation, Event, RunStatus, StreamingProjection,
    TransportError,
};

/// High-level builder for wiring a client
pub mod builder;

/// Layered configuration (files + environment)
pub mod config;

/// Live run sessions
pub mod session;

pub use builder::{ClientBuilder, Threadline};
pub use config::ClientConfig;
pub use session::{RunRequest, RunSession, SessionSnapshot};

/// Convenient prelude with commonly used types
pub mod prelude {
    pub use crate::builder::{ClientBuilder, Threadline};
    pub use crate::config::ClientConfig;
    pub use crate::session::{RunSession, SessionSnapshot};
    pub use crate::state::{fold_events, reduce};
    pub use crate::transport::{StaticToken, TokenCell};
    pub use crate::types::{
        CancelToken, ChatMessage, Conversation, Event, RunStatus, StreamingProjection,
        TransportError,
    };
    pub use anyhow::Result;
}
