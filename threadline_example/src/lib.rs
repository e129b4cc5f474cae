//! Shared wiring for the example binaries.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use threadline::config::LoggingConfig;
use threadline::prelude::*;
use threadline::types::{Role, TextMessage};
use threadline::TokenRefresher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TOKEN_VAR: &str = "THREADLINE_TOKEN";

pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }
}

/// Re-reads the token from the environment (and `.env`) after a 401.
struct EnvRefresher {
    cell: Arc<TokenCell>,
}

#[async_trait]
impl TokenRefresher for EnvRefresher {
    async fn refresh(&self) -> anyhow::Result<()> {
        dotenvy::dotenv().ok();
        let token = std::env::var(TOKEN_VAR)
            .with_context(|| format!("{} is not set", TOKEN_VAR))?;
        self.cell.set(Some(token));
        Ok(())
    }
}

/// Load config, start logging and build a client.
///
/// The bearer token comes from `THREADLINE_TOKEN`, never from config files.
pub fn connect() -> Result<Threadline> {
    dotenvy::dotenv().ok();

    let config = ClientConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging);

    let token = std::env::var(TOKEN_VAR).ok();
    if token.is_none() {
        tracing::warn!("{} is not set; requests will be unauthenticated", TOKEN_VAR);
    }

    let cell = Arc::new(TokenCell::new(token));
    ClientBuilder::new()
        .config(config)
        .token_provider(cell.clone())
        .refresher(Arc::new(EnvRefresher { cell }))
        .build()
}

pub fn print_conversation(conversation: &Conversation) {
    for message in &conversation.messages {
        match message {
            ChatMessage::Text(text) => print_text(text),
            ChatMessage::ToolCall(call) => {
                println!("   [tool] {}({})", call.tool_call.name, call.tool_call.arguments);
            }
            ChatMessage::Error(error) => println!("   [error] {}", error.message),
            ChatMessage::GenUi(ui) => println!("   [widget] {}", ui.widget),
            ChatMessage::Loading(_) => println!("   ..."),
        }
    }
    println!("\n   Status: {:?}", conversation.status);
}

fn print_text(message: &TextMessage) {
    let speaker = match message.author {
        Role::User => "You",
        _ => "Assistant",
    };
    println!("   {}: {}", speaker, message.text);
    for citation in &message.citations {
        println!(
            "      [source] {} ({})",
            citation.title.as_deref().unwrap_or(&citation.document_id),
            citation.chunk_id
        );
    }
}
