use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversation::Role;

/// One server-pushed event of a run.
///
/// Delivered live from a run's event stream, or replayed from an archived
/// run log. Unrecognized discriminants decode to [`Event::Unknown`] so newer
/// servers never break older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        thread_id: String,
        run_id: String,
    },

    RunFinished {
        thread_id: String,
        run_id: String,
    },

    RunError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    RunCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// The user turn that triggered a run.
    UserMessageCreated {
        message_id: String,
        text: String,
    },

    TextMessageStart {
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },

    TextMessageContent {
        message_id: String,
        delta: String,
    },

    TextMessageEnd {
        message_id: String,
    },

    ReasoningStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    ReasoningContent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        delta: String,
    },

    ReasoningEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },

    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },

    ToolCallEnd {
        tool_call_id: String,
    },

    ToolCallResult {
        message_id: String,
        tool_call_id: String,
        content: String,
    },

    StateSnapshot {
        snapshot: Value,
    },

    StateDelta {
        delta: Vec<PatchOperation>,
    },

    /// Client-renderable widget payload.
    GenUi {
        message_id: String,
        widget: String,
        #[serde(default)]
        payload: Value,
    },

    #[serde(other)]
    Unknown,
}

impl Event {
    /// Wire discriminant, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunFinished { .. } => "run_finished",
            Self::RunError { .. } => "run_error",
            Self::RunCancelled { .. } => "run_cancelled",
            Self::UserMessageCreated { .. } => "user_message_created",
            Self::TextMessageStart { .. } => "text_message_start",
            Self::TextMessageContent { .. } => "text_message_content",
            Self::TextMessageEnd { .. } => "text_message_end",
            Self::ReasoningStart { .. } => "reasoning_start",
            Self::ReasoningContent { .. } => "reasoning_content",
            Self::ReasoningEnd { .. } => "reasoning_end",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallArgs { .. } => "tool_call_args",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::StateSnapshot { .. } => "state_snapshot",
            Self::StateDelta { .. } => "state_delta",
            Self::GenUi { .. } => "gen_ui",
            Self::Unknown => "unknown",
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            Self::RunStarted { run_id, .. } | Self::RunFinished { run_id, .. } => Some(run_id),
            Self::RunError { run_id, .. } | Self::RunCancelled { run_id, .. } => run_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunFinished { .. } | Self::RunError { .. } | Self::RunCancelled { .. }
        )
    }
}

/// One RFC 6902-style operation: `{"op": "add", "path": "/a/0", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self::Add {
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }

    pub fn op(&self) -> PatchOp {
        match self {
            Self::Add { .. } => PatchOp::Add,
            Self::Replace { .. } => PatchOp::Replace,
            Self::Remove { .. } => PatchOp::Remove,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

impl std::fmt::Display for PatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        };
        f.write_str(name)
    }
}
