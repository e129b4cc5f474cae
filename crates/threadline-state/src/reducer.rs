//! The event reducer.
//!
//! `reduce` folds one [`Event`] into a `(Conversation, Option<StreamingProjection>)`
//! pair. It is total: unknown or out-of-place events are logged and leave the
//! state as it was. Live streaming and history replay call the exact same
//! function, so folding the same events always yields the same conversation.

use serde_json::Value;
use threadline_types::{
    Activity, ChatMessage, Conversation, ErrorMessage, Event, GenUiMessage, Role, RunStatus,
    StreamingProjection, TextMessage, ToolCallInfo, ToolCallMessage, ToolCallStatus,
};

use crate::citations::extract_new_citations;
use crate::patch::apply_patch;

type Reduced = (Conversation, Option<StreamingProjection>);

/// Apply one event.
pub fn reduce(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    event: &Event,
) -> Reduced {
    match event {
        Event::RunStarted { run_id, .. } => run_started(conversation, run_id),
        Event::RunFinished { .. } => run_finished(conversation, projection),
        Event::RunError {
            run_id, message, ..
        } => run_failed(conversation, projection, run_id.as_deref(), message),
        Event::RunCancelled { reason, .. } => run_cancelled(conversation, projection, reason),

        Event::UserMessageCreated { message_id, text } => (
            conversation.with_message(ChatMessage::Text(TextMessage::user(message_id, text))),
            projection,
        ),

        Event::TextMessageStart { message_id, role } => {
            let (conversation, projection) =
                ensure_streaming(conversation, projection, message_id, role.unwrap_or_default());
            (conversation, Some(projection))
        }
        Event::TextMessageContent { message_id, delta } => {
            let (conversation, projection) =
                ensure_streaming(conversation, projection, message_id, Role::Assistant);
            (conversation, Some(append_text(projection, delta)))
        }
        Event::TextMessageEnd { message_id } => text_end(conversation, projection, message_id),

        Event::ReasoningStart { .. } | Event::ReasoningEnd { .. } => {
            let projection = projection
                .unwrap_or_else(|| StreamingProjection::awaiting(Activity::Thinking))
                .with_activity(Activity::Thinking);
            (conversation, Some(projection))
        }
        Event::ReasoningContent { delta, .. } => {
            (conversation, Some(append_reasoning(projection, delta)))
        }

        Event::ToolCallStart {
            tool_call_id,
            tool_call_name,
            ..
        } => tool_call_start(conversation, projection, tool_call_id, tool_call_name),
        Event::ToolCallArgs {
            tool_call_id,
            delta,
        } => {
            let conversation = update_tool_call(conversation, tool_call_id, |info| {
                info.arguments.push_str(delta)
            });
            (conversation, projection)
        }
        Event::ToolCallEnd { tool_call_id } => {
            let conversation = update_tool_call(conversation, tool_call_id, |info| {
                info.status = ToolCallStatus::Pending
            });
            (conversation, projection)
        }
        Event::ToolCallResult {
            tool_call_id,
            content,
            ..
        } => {
            let conversation = update_tool_call(conversation, tool_call_id, |info| {
                info.status = ToolCallStatus::Completed;
                info.result = Some(content.clone());
            });
            let projection = projection.map(|p| p.with_activity(tool_activity(&conversation)));
            (conversation, projection)
        }

        Event::StateSnapshot { snapshot } => (conversation.with_state(snapshot.clone()), projection),
        Event::StateDelta { delta } => match apply_patch(&conversation.state, delta) {
            Ok(state) => (conversation.with_state(state), projection),
            Err(e) => {
                tracing::warn!(error = %e, operations = delta.len(), "state patch rejected");
                (conversation, projection)
            }
        },

        Event::GenUi {
            message_id,
            widget,
            payload,
        } => {
            let (conversation, projection) = materialize(conversation, projection, false);
            let conversation = conversation.without_loading().with_message(ChatMessage::GenUi(
                GenUiMessage {
                    id: message_id.clone(),
                    widget: widget.clone(),
                    payload: payload.clone(),
                },
            ));
            (conversation, projection)
        }

        Event::Unknown => {
            tracing::warn!("ignoring unknown event kind");
            (conversation, projection)
        }
    }
}

/// Fold `events` in order from `conversation`. The streaming tail is dropped.
pub fn fold_events<'a>(
    conversation: Conversation,
    events: impl IntoIterator<Item = &'a Event>,
) -> Conversation {
    let (conversation, _) = events
        .into_iter()
        .fold((conversation, None), |(conversation, projection), event| {
            reduce(conversation, projection, event)
        });
    conversation
}

fn run_started(conversation: Conversation, run_id: &str) -> Reduced {
    let mut conversation = conversation.with_status(RunStatus::Running {
        run_id: run_id.to_string(),
    });
    conversation.run_baseline = Some(conversation.state.clone());
    conversation.run_tool_calls.clear();
    (
        conversation,
        Some(StreamingProjection::awaiting(Activity::Thinking)),
    )
}

fn run_finished(conversation: Conversation, projection: Option<StreamingProjection>) -> Reduced {
    let (conversation, projection) = materialize(conversation, projection, false);
    let mut conversation = flush_reasoning(conversation, projection, false);
    conversation.run_tool_calls.clear();

    let baseline = conversation
        .run_baseline
        .take()
        .unwrap_or_else(|| Value::Object(Default::default()));
    let citations = extract_new_citations(&baseline, &conversation.state);
    if !citations.is_empty() {
        conversation = attach_citations(conversation, citations);
    }

    (
        conversation
            .without_loading()
            .with_status(RunStatus::Completed),
        None,
    )
}

fn run_failed(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    run_id: Option<&str>,
    message: &str,
) -> Reduced {
    let (conversation, projection) = materialize(conversation, projection, true);
    let mut conversation = flush_reasoning(conversation, projection, true);
    conversation.run_baseline = None;
    conversation.run_tool_calls.clear();

    let id = match run_id.or_else(|| running_id(&conversation)) {
        Some(run_id) => format!("{}-error", run_id),
        None => format!("error-{}", conversation.messages.len()),
    };

    (
        conversation
            .without_loading()
            .with_message(ChatMessage::Error(ErrorMessage {
                id,
                message: message.to_string(),
            }))
            .with_status(RunStatus::Failed {
                error: message.to_string(),
            }),
        None,
    )
}

fn run_cancelled(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    reason: &Option<String>,
) -> Reduced {
    let (conversation, projection) = materialize(conversation, projection, true);
    let mut conversation = flush_reasoning(conversation, projection, true);
    conversation.run_baseline = None;
    conversation.run_tool_calls.clear();
    (
        conversation
            .without_loading()
            .with_status(RunStatus::Cancelled {
                reason: reason.clone(),
            }),
        None,
    )
}

fn running_id(conversation: &Conversation) -> Option<&str> {
    match &conversation.status {
        RunStatus::Running { run_id } => Some(run_id),
        _ => None,
    }
}

/// Make sure the projection is streaming `message_id`, closing out any other
/// message that was streaming before. A message that was closed early (by a
/// tool call, say) continues from the text it already has.
fn ensure_streaming(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    message_id: &str,
    author: Role,
) -> (Conversation, StreamingProjection) {
    let already_streaming = projection.as_ref().and_then(|p| p.message_id()) == Some(message_id);
    if already_streaming {
        if let Some(projection) = projection {
            return (conversation, projection);
        }
    }

    let (conversation, projection) = materialize(conversation, projection, false);
    let buffered = match projection {
        Some(StreamingProjection::AwaitingText {
            buffered_reasoning_text,
            ..
        }) => buffered_reasoning_text,
        _ => String::new(),
    };

    let (author, text, reasoning_text) =
        match conversation.message(message_id).and_then(ChatMessage::as_text) {
            Some(existing) => {
                let mut reasoning_text = existing.reasoning_text.clone().unwrap_or_default();
                reasoning_text.push_str(&buffered);
                (existing.author, existing.text.clone(), reasoning_text)
            }
            None => (author, String::new(), buffered),
        };

    (
        conversation.without_loading(),
        StreamingProjection::TextStreaming {
            message_id: message_id.to_string(),
            author,
            text,
            reasoning_text,
            current_activity: Activity::Responding,
        },
    )
}

fn append_text(projection: StreamingProjection, delta: &str) -> StreamingProjection {
    match projection {
        StreamingProjection::TextStreaming {
            message_id,
            author,
            mut text,
            reasoning_text,
            ..
        } => {
            text.push_str(delta);
            StreamingProjection::TextStreaming {
                message_id,
                author,
                text,
                reasoning_text,
                current_activity: Activity::Responding,
            }
        }
        other => other,
    }
}

fn append_reasoning(projection: Option<StreamingProjection>, delta: &str) -> StreamingProjection {
    match projection {
        Some(StreamingProjection::TextStreaming {
            message_id,
            author,
            text,
            mut reasoning_text,
            ..
        }) => {
            reasoning_text.push_str(delta);
            StreamingProjection::TextStreaming {
                message_id,
                author,
                text,
                reasoning_text,
                current_activity: Activity::Thinking,
            }
        }
        Some(StreamingProjection::AwaitingText {
            mut buffered_reasoning_text,
            ..
        }) => {
            buffered_reasoning_text.push_str(delta);
            StreamingProjection::AwaitingText {
                current_activity: Activity::Thinking,
                buffered_reasoning_text,
            }
        }
        None => StreamingProjection::AwaitingText {
            current_activity: Activity::Thinking,
            buffered_reasoning_text: delta.to_string(),
        },
    }
}

fn text_end(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    message_id: &str,
) -> Reduced {
    if projection.as_ref().and_then(|p| p.message_id()) != Some(message_id) {
        tracing::debug!(message_id, "end of a message that is not streaming");
        return (conversation, projection);
    }

    let (conversation, projection) = materialize(conversation, projection, false);
    let projection = projection.map(|p| p.with_activity(Activity::Processing));
    (conversation, projection)
}

/// Turn a streaming text message into a [`TextMessage`] on the conversation.
/// The projection falls back to awaiting text with the same activity.
fn materialize(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    interrupted: bool,
) -> Reduced {
    match projection {
        Some(StreamingProjection::TextStreaming {
            message_id,
            author,
            text,
            reasoning_text,
            current_activity,
        }) => {
            let awaiting = Some(StreamingProjection::awaiting(current_activity));
            if text.is_empty() && reasoning_text.is_empty() {
                return (conversation, awaiting);
            }

            let citations = conversation
                .message(&message_id)
                .and_then(ChatMessage::as_text)
                .map(|existing| existing.citations.clone())
                .unwrap_or_default();
            let message = TextMessage {
                id: message_id,
                author,
                text,
                reasoning_text: (!reasoning_text.is_empty()).then_some(reasoning_text),
                interrupted,
                citations,
            };
            (
                conversation.with_message(ChatMessage::Text(message)),
                awaiting,
            )
        }
        other => (conversation, other),
    }
}

/// Keep reasoning that never reached a text message when the run ends. It is
/// added to the turn's last assistant message, or shown as a message of its own.
fn flush_reasoning(
    mut conversation: Conversation,
    projection: Option<StreamingProjection>,
    interrupted: bool,
) -> Conversation {
    let reasoning = match projection {
        Some(StreamingProjection::AwaitingText {
            buffered_reasoning_text,
            ..
        }) if !buffered_reasoning_text.is_empty() => buffered_reasoning_text,
        _ => return conversation,
    };

    if let Some(id) = last_assistant_reply(&conversation) {
        for message in conversation.messages.iter_mut() {
            if let ChatMessage::Text(text) = message {
                if text.id == id {
                    text.reasoning_text
                        .get_or_insert_with(String::new)
                        .push_str(&reasoning);
                    break;
                }
            }
        }
        return conversation;
    }

    let id = match running_id(&conversation) {
        Some(run_id) => format!("{}-reasoning", run_id),
        None => format!("reasoning-{}", conversation.messages.len()),
    };
    conversation.with_message(ChatMessage::Text(TextMessage {
        id,
        author: Role::Assistant,
        text: String::new(),
        reasoning_text: Some(reasoning),
        interrupted,
        citations: Vec::new(),
    }))
}

fn tool_call_start(
    conversation: Conversation,
    projection: Option<StreamingProjection>,
    tool_call_id: &str,
    name: &str,
) -> Reduced {
    let (conversation, projection) = materialize(conversation, projection, false);

    let info = match conversation.tool_call(tool_call_id) {
        Some(existing) => existing.clone(),
        None => ToolCallInfo::started(tool_call_id, name),
    };
    let mut conversation = conversation
        .without_loading()
        .with_tool_call(info.clone())
        .with_message(ChatMessage::ToolCall(ToolCallMessage {
            id: tool_call_id.to_string(),
            tool_call: info,
        }));
    if !conversation.run_tool_calls.iter().any(|id| id == tool_call_id) {
        conversation.run_tool_calls.push(tool_call_id.to_string());
    }

    let activity = tool_activity(&conversation);
    let projection = projection
        .unwrap_or_else(|| StreamingProjection::awaiting(activity.clone()))
        .with_activity(activity);
    (conversation, Some(projection))
}

/// Apply `update` to a tool call and mirror it into its message.
fn update_tool_call(
    conversation: Conversation,
    tool_call_id: &str,
    update: impl FnOnce(&mut ToolCallInfo),
) -> Conversation {
    let Some(mut info) = conversation.tool_call(tool_call_id).cloned() else {
        tracing::warn!(tool_call_id, "event for unknown tool call");
        return conversation;
    };
    update(&mut info);

    conversation
        .with_tool_call(info.clone())
        .with_message(ChatMessage::ToolCall(ToolCallMessage {
            id: tool_call_id.to_string(),
            tool_call: info,
        }))
}

/// `ToolCall` while any call of the current run is unfinished, `Processing` otherwise.
fn tool_activity(conversation: &Conversation) -> Activity {
    let names: Vec<String> = conversation
        .tool_calls
        .iter()
        .filter(|t| conversation.run_tool_calls.contains(&t.id))
        .filter(|t| t.status != ToolCallStatus::Completed)
        .map(|t| t.name.clone())
        .collect();

    if names.is_empty() {
        Activity::Processing
    } else {
        Activity::ToolCall { names }
    }
}

/// Id of the last assistant message after the most recent user turn.
fn last_assistant_reply(conversation: &Conversation) -> Option<String> {
    conversation
        .messages
        .iter()
        .rev()
        .take_while(|m| !matches!(m, ChatMessage::Text(t) if t.author == Role::User))
        .find_map(|m| match m {
            ChatMessage::Text(t) if t.author == Role::Assistant => Some(t.id.clone()),
            _ => None,
        })
}

fn attach_citations(
    mut conversation: Conversation,
    citations: Vec<threadline_types::SourceReference>,
) -> Conversation {
    match last_assistant_reply(&conversation) {
        Some(id) => {
            for message in conversation.messages.iter_mut() {
                if let ChatMessage::Text(text) = message {
                    if text.id == id {
                        text.citations.extend(citations);
                        break;
                    }
                }
            }
        }
        None => tracing::warn!(
            count = citations.len(),
            "no assistant message to attach citations to"
        ),
    }
    conversation
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(id: &str, delta: &str) -> Event {
        Event::TextMessageContent {
            message_id: id.to_string(),
            delta: delta.to_string(),
        }
    }

    #[test]
    fn test_deltas_accumulate_in_projection() {
        let (conversation, projection) = reduce(Conversation::new("t1"), None, &content("m1", "Hel"));
        let (conversation, projection) = reduce(conversation, projection, &content("m1", "lo"));

        assert!(conversation.messages.is_empty());
        match projection {
            Some(StreamingProjection::TextStreaming { text, author, .. }) => {
                assert_eq!(text, "Hello");
                assert_eq!(author, Role::Assistant);
            }
            other => panic!("Expected TextStreaming, got {:?}", other),
        }
    }

    #[test]
    fn test_new_message_id_materializes_previous() {
        let (conversation, projection) = reduce(Conversation::new("t1"), None, &content("m1", "one"));
        let (conversation, projection) = reduce(conversation, projection, &content("m2", "two"));

        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].id(), "m1");
        assert_eq!(projection.as_ref().and_then(|p| p.message_id()), Some("m2"));
    }

    #[test]
    fn test_reasoning_before_text_is_carried_over() {
        let start = Event::TextMessageStart {
            message_id: "m1".to_string(),
            role: None,
        };
        let thinking = Event::ReasoningContent {
            message_id: None,
            delta: "hmm".to_string(),
        };

        let (conversation, projection) = reduce(Conversation::new("t1"), None, &thinking);
        assert_eq!(projection.as_ref().map(|p| p.current_activity()), Some(&Activity::Thinking));

        let (conversation, projection) = reduce(conversation, projection, &start);
        let (conversation, projection) = reduce(conversation, projection, &content("m1", "answer"));
        let (conversation, _) = reduce(
            conversation,
            projection,
            &Event::TextMessageEnd {
                message_id: "m1".to_string(),
            },
        );

        let message = conversation.messages[0].as_text().unwrap();
        assert_eq!(message.text, "answer");
        assert_eq!(message.reasoning_text.as_deref(), Some("hmm"));
    }

    #[test]
    fn test_bad_patch_keeps_state() {
        let conversation = Conversation::new("t1").with_state(json!({"filters": []}));
        let event = Event::StateDelta {
            delta: vec![
                threadline_types::PatchOperation::add("/filters/-", json!("pdf")),
                threadline_types::PatchOperation::replace("/missing/x", json!(1)),
            ],
        };

        let (conversation, _) = reduce(conversation, None, &event);
        assert_eq!(conversation.state, json!({"filters": []}));
    }

    #[test]
    fn test_unknown_tool_call_update_is_ignored() {
        let conversation = Conversation::new("t1");
        let (after, _) = reduce(
            conversation.clone(),
            None,
            &Event::ToolCallEnd {
                tool_call_id: "nope".to_string(),
            },
        );
        assert_eq!(after, conversation);
    }

    fn started(run_id: &str) -> Event {
        Event::RunStarted {
            thread_id: "t1".to_string(),
            run_id: run_id.to_string(),
        }
    }

    fn finished(run_id: &str) -> Event {
        Event::RunFinished {
            thread_id: "t1".to_string(),
            run_id: run_id.to_string(),
        }
    }

    fn tool_start(id: &str, name: &str) -> Event {
        Event::ToolCallStart {
            tool_call_id: id.to_string(),
            tool_call_name: name.to_string(),
            parent_message_id: None,
        }
    }

    #[test]
    fn test_text_continues_after_tool_call() {
        let events = vec![
            started("r1"),
            Event::TextMessageStart {
                message_id: "a1".to_string(),
                role: None,
            },
            content("a1", "Let me look that up. "),
            tool_start("c1", "search"),
            Event::ToolCallEnd {
                tool_call_id: "c1".to_string(),
            },
            content("a1", "Refunds take 5 days."),
            Event::TextMessageEnd {
                message_id: "a1".to_string(),
            },
            finished("r1"),
        ];

        let conversation = fold_events(Conversation::new("t1"), events.iter());

        let ids: Vec<&str> = conversation.messages.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec!["a1", "c1"]);
        let answer = conversation.message("a1").and_then(|m| m.as_text()).unwrap();
        assert_eq!(answer.text, "Let me look that up. Refunds take 5 days.");
    }

    #[test]
    fn test_trailing_reasoning_is_kept_at_run_end() {
        let thinking = |delta: &str| Event::ReasoningContent {
            message_id: None,
            delta: delta.to_string(),
        };

        let answered = vec![
            started("r1"),
            content("a1", "Done."),
            Event::TextMessageEnd {
                message_id: "a1".to_string(),
            },
            thinking("double-checked"),
            finished("r1"),
        ];
        let conversation = fold_events(Conversation::new("t1"), answered.iter());
        let answer = conversation.message("a1").and_then(|m| m.as_text()).unwrap();
        assert_eq!(answer.reasoning_text.as_deref(), Some("double-checked"));

        let silent = vec![started("r2"), thinking("nothing to say"), finished("r2")];
        let conversation = fold_events(Conversation::new("t1"), silent.iter());
        let reasoning = conversation
            .message("r2-reasoning")
            .and_then(|m| m.as_text())
            .unwrap();
        assert_eq!(reasoning.text, "");
        assert_eq!(reasoning.reasoning_text.as_deref(), Some("nothing to say"));
    }

    #[test]
    fn test_tool_activity_ignores_earlier_runs() {
        let earlier = vec![
            started("r1"),
            tool_start("c1", "search"),
            finished("r1"),
        ];
        let conversation = fold_events(Conversation::new("t1"), earlier.iter());
        assert_eq!(
            conversation.tool_call("c1").map(|c| &c.status),
            Some(&ToolCallStatus::Streaming)
        );

        let (conversation, projection) = reduce(conversation, None, &started("r2"));
        let (_, projection) = reduce(conversation, projection, &tool_start("c2", "weather"));

        assert_eq!(
            projection.as_ref().map(|p| p.current_activity()),
            Some(&Activity::ToolCall {
                names: vec!["weather".to_string()]
            })
        );
    }
}
