/// Ripple demo - scripted two-user exchange over the in-memory backend
use colored::*;
use ripple_core::composer::{Composer, ComposerAction, Key};
use ripple_core::memory::MemoryBackend;
use ripple_core::outbox::Attachment;
use ripple_core::scanner;
use ripple_core::types::{Conversation, Participant};
use ripple_core::{ChatSession, Config};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args).map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let name = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "alice".to_string());

    let backend: Arc<MemoryBackend> = Arc::new(MemoryBackend::new());
    let me = Participant::new(name.to_lowercase(), name.clone());
    let bob = Participant::new("bob", "bob");

    info!("Starting Ripple demo session for {}", me.display_name);
    let session = ChatSession::new(backend.clone(), config.clone(), me.clone());
    session
        .open(Conversation::direct(me.clone(), bob.clone()))
        .await?;

    // Compose "hey @b<Enter>" - Enter commits the mention, not the message
    let participants = session.participants().await;
    let mut composer = Composer::new(config.mention_limit);
    for key in "hey @b".chars().map(Key::Char) {
        composer.handle_key(key, &participants);
        session.notify_typing().await;
    }
    println!(
        "{} {:?} (popup open: {})",
        "compose:".dimmed(),
        composer.text(),
        composer.mention_active()
    );
    composer.handle_key(Key::Enter, &participants);
    println!("{} {:?}", "after mention commit:".dimmed(), composer.text());

    // Second Enter submits
    if let ComposerAction::Submit(text) = composer.handle_key(Key::Enter, &participants) {
        session.submit(&text, None).await?;
    }
    session
        .submit(
            "and here is a picture",
            Some(Attachment {
                name: "cat.png".to_string(),
                bytes: bytes::Bytes::from_static(b"\x89PNG fake"),
            }),
        )
        .await?;

    for message in session.messages().await {
        let status = format!("{:?}", message.status).to_lowercase();
        println!(
            "{} {} {}",
            format!("[{}]", status).green(),
            message.sender.to_string().cyan().bold(),
            message.body
        );
        // Render mention segments the way a UI would
        for segment in scanner::annotate(&message.body, &[]) {
            if let scanner::Segment::Mention(name) = segment {
                println!("    {} {}", "mention:".dimmed(), name.yellow());
            }
        }
    }

    // Search across the conversation
    let hits = session.search("picture").await;
    println!(
        "{} {} message(s) match {}",
        "search:".dimmed(),
        hits.len().to_string().green(),
        "\"picture\"".yellow()
    );

    let summaries = session.load_summaries().await?;
    for summary in summaries {
        println!(
            "{} {} {}",
            "summary:".dimmed(),
            summary.conversation_id.to_string().cyan(),
            summary.last_preview
        );
    }

    session.close().await;
    info!("Demo session finished");
    Ok(())
}
