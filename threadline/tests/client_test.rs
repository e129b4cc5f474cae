use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use threadline::prelude::*;
use threadline::types::ToolCallStatus;
use tokio_test::assert_ok;

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect()
}

#[tokio::test]
async fn test_send_message_streams_into_conversation() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({"type": "run_started", "thread_id": "t1", "run_id": "r1"}),
        json!({"type": "user_message_created", "message_id": "u1", "text": "Weather in Lisbon?"}),
        json!({"type": "tool_call_start", "tool_call_id": "c1", "tool_call_name": "weather"}),
        json!({"type": "tool_call_args", "tool_call_id": "c1", "delta": "{\"city\":\"Lisbon\"}"}),
        json!({"type": "tool_call_end", "tool_call_id": "c1"}),
        json!({"type": "tool_call_result", "message_id": "res1", "tool_call_id": "c1", "content": "21C"}),
        json!({"type": "text_message_start", "message_id": "a1", "role": "assistant"}),
        json!({"type": "text_message_content", "message_id": "a1", "delta": "It is 21C."}),
        json!({"type": "text_message_end", "message_id": "a1"}),
        json!({"type": "run_finished", "thread_id": "t1", "run_id": "r1"}),
    ]);

    let mock = server
        .mock("POST", "/threads/t1/runs")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(
            json!({"message_id": "u1", "message": "Weather in Lisbon?"}),
        ))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let client = ClientBuilder::new()
        .base_url(server.url())
        .token_provider(Arc::new(StaticToken("secret".to_string())))
        .build()
        .unwrap();

    let session = assert_ok!(
        client
            .send_message(
                Conversation::new("t1"),
                "u1",
                "Weather in Lisbon?",
                CancelToken::new(),
            )
            .await
    );
    let watcher = session.subscribe();
    let conversation = session.finish().await;

    mock.assert_async().await;
    assert_eq!(conversation.status, RunStatus::Completed);

    let ids: Vec<&str> = conversation.messages.iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec!["u1", "c1", "a1"]);

    let call = conversation.tool_call("c1").unwrap();
    assert_eq!(call.status, ToolCallStatus::Completed);
    assert_eq!(call.parsed_arguments(), Some(json!({"city": "Lisbon"})));

    let last = watcher.borrow().clone();
    assert_eq!(last.conversation, conversation);
    assert!(last.projection.is_none());
}

#[tokio::test]
async fn test_rejected_run_surfaces_error() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/threads/t1/runs")
        .with_status(409)
        .with_body("run already in progress")
        .create_async()
        .await;

    let client = ClientBuilder::new().base_url(server.url()).build().unwrap();
    let err = client
        .send_message(Conversation::new("t1"), "u1", "hi", CancelToken::new())
        .await
        .err()
        .unwrap();

    match err {
        TransportError::Api {
            status_code,
            message,
        } => {
            assert_eq!(status_code, 409);
            assert!(message.contains("run already in progress"));
        }
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_load_thread_maps_failure_to_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/threads/t1/runs")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let client = ClientBuilder::new().base_url(server.url()).build().unwrap();
    let conversation = client.load_thread("t1", &CancelToken::new()).await;

    assert!(conversation.messages.is_empty());
    assert!(matches!(conversation.status, RunStatus::Failed { .. }));
}

#[tokio::test]
async fn test_load_thread_cancelled_before_start() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/threads/t1/runs")
        .expect(0)
        .create_async()
        .await;

    let client = ClientBuilder::new().base_url(server.url()).build().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let conversation = client.load_thread("t1", &cancel).await;

    mock.assert_async().await;
    assert_eq!(conversation.status, RunStatus::Cancelled { reason: None });
}

#[tokio::test]
async fn test_resume_picks_up_running_stream() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/threads/t1/runs/r2/stream")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(sse(&[
            json!({"type": "run_started", "thread_id": "t1", "run_id": "r2"}),
            json!({"type": "text_message_content", "message_id": "a2", "delta": "partial"}),
            json!({"type": "run_error", "message": "model overloaded", "code": "overloaded"}),
        ]))
        .create_async()
        .await;

    let client = ClientBuilder::new().base_url(server.url()).build().unwrap();
    let session = assert_ok!(
        client
            .resume_run(Conversation::new("t1"), "r2", CancelToken::new())
            .await
    );
    let conversation = session.finish().await;

    assert_eq!(
        conversation.status,
        RunStatus::Failed {
            error: "model overloaded".to_string()
        }
    );
    let partial = conversation.message("a2").and_then(|m| m.as_text()).unwrap();
    assert_eq!(partial.text, "partial");
    assert!(partial.interrupted);
    assert!(conversation.message("r2-error").is_some());
}
