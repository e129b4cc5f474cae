use anyhow::{Context, Result};
use threadline::prelude::*;
use threadline_example::{connect, print_conversation};

#[tokio::main]
async fn main() -> Result<()> {
    let thread_id = std::env::args()
        .nth(1)
        .context("usage: replay-thread <thread-id>")?;

    println!("Threadline - History Replay");
    println!("===========================\n");

    let client = connect()?;
    let cancel = CancelToken::new();

    println!("1. Reconstructing thread {}...", thread_id);
    let conversation = client.reconstruct(&thread_id, &cancel).await?;
    println!("   ✓ {} messages\n", conversation.messages.len());
    print_conversation(&conversation);

    println!("\n2. Replaying again (served from cache)...");
    client.reconstruct(&thread_id, &cancel).await?;
    let stats = client.history().cache().stats();
    println!(
        "   ✓ cache: {} entries, {} hits, {} misses\n",
        stats.entries, stats.hits, stats.misses
    );

    client.close();
    Ok(())
}
