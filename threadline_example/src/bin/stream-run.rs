use anyhow::{Context, Result};
use threadline::prelude::*;
use threadline_example::{connect, print_conversation};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let thread_id = args
        .next()
        .context("usage: stream-run <thread-id> <message>")?;
    let message = args.collect::<Vec<_>>().join(" ");
    if message.is_empty() {
        anyhow::bail!("usage: stream-run <thread-id> <message>");
    }

    println!("Threadline - Live Run");
    println!("=====================\n");

    let client = connect()?;
    let cancel = CancelToken::new();

    println!("1. Loading history...");
    let conversation = client.load_thread(&thread_id, &cancel).await;
    println!("   ✓ {} messages\n", conversation.messages.len());

    println!("2. Sending message (Ctrl-C cancels)...");
    let message_id = format!("local-{}", conversation.messages.len());
    let session = client
        .send_message(conversation, message_id, message, cancel.clone())
        .await?;

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut updates = session.subscribe();
    let mut last_activity = None;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        let activity = snapshot
            .projection
            .as_ref()
            .map(|p| p.current_activity().clone());
        if activity.is_some() && activity != last_activity {
            println!("   ... {:?}", activity);
            last_activity = activity;
        }
        if !snapshot.conversation.is_running() && snapshot.projection.is_none() {
            break;
        }
    }

    let conversation = session.finish().await;
    println!("\n3. Final conversation:\n");
    print_conversation(&conversation);

    client.close();
    Ok(())
}
