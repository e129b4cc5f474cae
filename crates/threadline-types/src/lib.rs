pub mod cancel;
pub mod conversation;
pub mod error;
pub mod events;

pub use cancel::CancelToken;
pub use conversation::{
    Activity, ChatMessage, Conversation, ErrorMessage, GenUiMessage, LoadingMessage, Role,
    RunStatus, SourceReference, StreamingProjection, TextMessage, ToolCallInfo, ToolCallMessage,
    ToolCallStatus,
};
pub use error::{Result, TransportError};
pub use events::{Event, PatchOp, PatchOperation};
