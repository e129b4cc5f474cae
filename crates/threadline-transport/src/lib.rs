pub mod authenticated;
pub mod base;
pub mod client;
pub mod frames;
pub mod observable;
pub mod refreshing;
pub mod shared;
pub mod stack;
pub mod transport;

pub use authenticated::{AuthenticatedTransport, StaticToken, TokenCell, TokenProvider};
pub use base::BaseTransport;
pub use client::{ApiClient, EventStream};
pub use frames::{decode_event, event_stream, FrameDecoder};
pub use observable::{HttpEvent, HttpObserver, ObservableTransport, RedactedBody, Redactor};
pub use refreshing::{RefreshingTransport, TokenRefresher};
pub use shared::SharedTransport;
pub use stack::TransportStackBuilder;
pub use transport::{ByteStream, HttpRequest, HttpResponse, StreamResponse, Transport};
