//! Renderable conversation values.
//!
//! A [`Conversation`] is an immutable value: every method that "changes" it
//! consumes `self` and returns the evolved value. Message ids are unique and
//! kept in insertion order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
    Tool,
    /// Also the fallback for unrecognized authors.
    #[default]
    #[serde(other)]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
    pub tool_calls: Vec<ToolCallInfo>,
    pub status: RunStatus,
    /// Server-controlled shared state, mutated only through patches.
    pub state: Value,
    /// Snapshot of `state` taken when the current run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_baseline: Option<Value>,
    /// Ids of the tool calls started by the current run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_tool_calls: Vec<String>,
}

impl Conversation {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            tool_calls: Vec::new(),
            status: RunStatus::Idle,
            state: Value::Object(Default::default()),
            run_baseline: None,
            run_tool_calls: Vec::new(),
        }
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCallInfo> {
        self.tool_calls.iter().find(|t| t.id == id)
    }

    /// Append `message`, or replace the existing message with the same id in place.
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        match self.messages.iter().position(|m| m.id() == message.id()) {
            Some(idx) => self.messages[idx] = message,
            None => self.messages.push(message),
        }
        self
    }

    pub fn with_tool_call(mut self, info: ToolCallInfo) -> Self {
        match self.tool_calls.iter().position(|t| t.id == info.id) {
            Some(idx) => self.tool_calls[idx] = info,
            None => self.tool_calls.push(info),
        }
        self
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn without_loading(mut self) -> Self {
        self.messages
            .retain(|m| !matches!(m, ChatMessage::Loading(_)));
        self
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running { .. })
    }

    pub fn text_messages(&self) -> impl Iterator<Item = &TextMessage> {
        self.messages.iter().filter_map(|m| match m {
            ChatMessage::Text(text) => Some(text),
            _ => None,
        })
    }
}

/// Closed set of renderable messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    Text(TextMessage),
    Error(ErrorMessage),
    ToolCall(ToolCallMessage),
    GenUi(GenUiMessage),
    Loading(LoadingMessage),
}

impl ChatMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Text(m) => &m.id,
            Self::Error(m) => &m.id,
            Self::ToolCall(m) => &m.id,
            Self::GenUi(m) => &m.id,
            Self::Loading(m) => &m.id,
        }
    }

    pub fn as_text(&self) -> Option<&TextMessage> {
        match self {
            Self::Text(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub id: String,
    pub author: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    /// Set when the message was cut short by a failed or cancelled run.
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<SourceReference>,
}

impl TextMessage {
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: Role::User,
            text: text.into(),
            reasoning_text: None,
            interrupted: false,
            citations: Vec::new(),
        }
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: Role::Assistant,
            ..Self::user(id, text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    pub tool_call: ToolCallInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenUiMessage {
    pub id: String,
    pub widget: String,
    pub payload: Value,
}

/// Placeholder shown between sending a prompt and the first streamed token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingMessage {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    /// Raw argument text as streamed (usually JSON).
    pub arguments: String,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl ToolCallInfo {
    pub fn started(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
            status: ToolCallStatus::Streaming,
            result: None,
        }
    }

    /// Arguments parsed as JSON, if they are complete and well-formed.
    pub fn parsed_arguments(&self) -> Option<Value> {
        serde_json::from_str(&self.arguments).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Streaming,
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running {
        run_id: String,
    },
    Completed,
    Failed {
        error: String,
    },
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// What the backend is currently doing, as far as the client can tell.
///
/// Carried across events that say nothing new so the UI does not flicker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "activity", rename_all = "snake_case")]
pub enum Activity {
    Thinking,
    ToolCall { names: Vec<String> },
    Responding,
    Processing,
}

/// Volatile tail of a run; never persisted, discarded on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StreamingProjection {
    AwaitingText {
        current_activity: Activity,
        buffered_reasoning_text: String,
    },
    TextStreaming {
        message_id: String,
        author: Role,
        text: String,
        reasoning_text: String,
        current_activity: Activity,
    },
}

impl StreamingProjection {
    pub fn awaiting(activity: Activity) -> Self {
        Self::AwaitingText {
            current_activity: activity,
            buffered_reasoning_text: String::new(),
        }
    }

    pub fn current_activity(&self) -> &Activity {
        match self {
            Self::AwaitingText {
                current_activity, ..
            }
            | Self::TextStreaming {
                current_activity, ..
            } => current_activity,
        }
    }

    pub fn with_activity(mut self, activity: Activity) -> Self {
        match &mut self {
            Self::AwaitingText {
                current_activity, ..
            }
            | Self::TextStreaming {
                current_activity, ..
            } => *current_activity = activity,
        }
        self
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::TextStreaming { message_id, .. } => Some(message_id),
            Self::AwaitingText { .. } => None,
        }
    }
}

/// A citation from an answer back to a source chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub chunk_id: String,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_numbers: Option<Vec<u32>>,
}
