/// Chat session: wiring between the compose surface, the send pipeline,
/// typing presence, and the backend's realtime subscriptions
///
/// All state is owned explicitly by the session and injected into the
/// collaborators that need it; there are no ambient singletons. Realtime
/// snapshots are treated as full-state replacements, reconciled with
/// locally held provisional messages.
use crate::backend::{ChatBackend, MESSAGES, SUMMARIES, TYPING};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::mention;
use crate::outbox::{Attachment, Outbox};
use crate::scanner;
use crate::typing::{active_typists, TypingThrottle};
use crate::types::{
    ChatEvent, Conversation, ConversationId, ConversationSummary, Message, MessageDoc, MessageId,
    Participant, SearchMatch, TypingSignal,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct ActiveConversation {
    conversation: Arc<RwLock<Conversation>>,
    throttle: Arc<TypingThrottle>,
    readers: Vec<JoinHandle<()>>,
}

/// One user's chat session
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    config: Config,
    user: Participant,
    messages: Arc<RwLock<Vec<Message>>>,
    typists: Arc<RwLock<Vec<TypingSignal>>>,
    events: broadcast::Sender<ChatEvent>,
    outbox: Outbox,
    active: RwLock<Option<ActiveConversation>>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, config: Config, user: Participant) -> Self {
        let (events, _) = broadcast::channel(64);
        let messages = Arc::new(RwLock::new(Vec::new()));
        let outbox = Outbox::new(
            backend.clone(),
            user.id.clone(),
            config.clone(),
            messages.clone(),
            events.clone(),
        );

        Self {
            backend,
            config,
            user,
            messages,
            typists: Arc::new(RwLock::new(Vec::new())),
            events,
            outbox,
            active: RwLock::new(None),
        }
    }

    pub fn user(&self) -> &Participant {
        &self.user
    }

    /// Subscribe to session events for UI consumers
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Open a conversation: load history, then follow realtime snapshots
    /// of messages and typing presence until `close`
    pub async fn open(&self, conversation: Conversation) -> Result<()> {
        self.close().await;

        let history = match &conversation.id {
            Some(id) => self.load_history(id).await?,
            None => Vec::new(),
        };
        info!(
            "Opened conversation ({} history messages{})",
            history.len(),
            if conversation.is_pending() { ", pending" } else { "" }
        );
        *self.messages.write().await = history;

        let conversation = Arc::new(RwLock::new(conversation));
        // The throttle shares the conversation handle: once the first send
        // creates the durable record, presence writes carry the real id
        let throttle = Arc::new(TypingThrottle::new(
            self.backend.clone(),
            conversation.clone(),
            self.user.clone(),
            &self.config,
        ));

        let readers = vec![
            self.spawn_message_reader(conversation.clone()),
            self.spawn_typing_reader(conversation.clone()),
        ];

        *self.active.write().await = Some(ActiveConversation {
            conversation,
            throttle,
            readers,
        });
        Ok(())
    }

    /// Leave the active conversation. Typing presence is cleared
    /// synchronously; in-flight sends are not aborted.
    pub async fn close(&self) {
        let active = self.active.write().await.take();
        if let Some(active) = active {
            for reader in active.readers {
                reader.abort();
            }
            active.throttle.clear().await;
        }
        self.typists.write().await.clear();
    }

    /// Submit a message to the active conversation. Empty submits are
    /// silent no-ops; failures surface as per-message `Failed` status.
    pub async fn submit(&self, text: &str, image: Option<Attachment>) -> Result<Option<MessageId>> {
        let (conversation, throttle) = self.active_parts().await?;
        // Sending is the strongest "stopped typing" signal there is
        throttle.clear().await;
        Ok(self.outbox.submit(&conversation, text, image).await)
    }

    /// Manually retry a failed message
    pub async fn retry(&self, id: &MessageId) -> Result<()> {
        let (conversation, _) = self.active_parts().await?;
        self.outbox.retry(&conversation, id).await
    }

    /// Called on every keystroke while composing
    pub async fn notify_typing(&self) {
        if let Ok((_, throttle)) = self.active_parts().await {
            throttle.notify_activity().await;
        }
    }

    /// Participants currently typing, excluding this user and stale entries
    pub async fn typists(&self) -> Vec<TypingSignal> {
        let signals = self.typists.read().await;
        active_typists(&signals, Utc::now(), &self.user.id, self.config.typing_timeout)
    }

    /// Snapshot of the local message list
    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    /// Mention-autocomplete candidates for the active conversation.
    /// Degrades to an empty list when participants are unavailable.
    pub async fn mention_candidates(&self, query: &str) -> Vec<Participant> {
        let active = self.active.read().await;
        let Some(active) = active.as_ref() else {
            debug!("Mention candidates requested with no active conversation");
            return Vec::new();
        };
        let conversation = active.conversation.read().await;
        mention::candidates(&conversation.participants, query, self.config.mention_limit)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Participant list of the active conversation
    pub async fn participants(&self) -> Vec<Participant> {
        let active = self.active.read().await;
        match active.as_ref() {
            Some(active) => active.conversation.read().await.participants.clone(),
            None => Vec::new(),
        }
    }

    /// Search the loaded messages, case-insensitive
    pub async fn search(&self, query: &str) -> Vec<SearchMatch> {
        let messages = self.messages.read().await;
        scanner::find_matches(&messages, query)
    }

    /// This user's conversation summaries, newest first
    pub async fn load_summaries(&self) -> Result<Vec<ConversationSummary>> {
        let docs = self.backend.list_documents(SUMMARIES).await?;
        let mut summaries: Vec<ConversationSummary> = docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value::<ConversationSummary>(doc).ok())
            .filter(|s| s.user == self.user.id)
            .collect();
        summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
        Ok(summaries)
    }

    /// Mark the active conversation read: flip this user's summary record
    /// and join the read-by set of messages not yet observed
    pub async fn mark_read(&self) -> Result<()> {
        let (conversation, _) = self.active_parts().await?;
        let conv_id = match conversation.read().await.id.clone() {
            Some(id) => id,
            None => return Ok(()), // nothing persisted yet
        };

        let unseen: Vec<String> = {
            let messages = self.messages.read().await;
            messages
                .iter()
                .filter(|m| !m.read_by.contains(&self.user.id))
                .filter_map(|m| match &m.id {
                    MessageId::Server(id) => Some(id.clone()),
                    MessageId::Provisional(_) => None,
                })
                .collect()
        };
        for id in unseen {
            if let Err(e) = self
                .backend
                .append_to_array(MESSAGES, &id, "read_by", Value::String(self.user.id.0.clone()))
                .await
            {
                warn!("Failed to update read-by set for {}: {}", id, e);
            }
        }

        let summary_id = format!("{}:{}", conv_id, self.user.id);
        if let Some(mut doc) = self.backend.get_document(SUMMARIES, &summary_id).await? {
            if let Some(obj) = doc.as_object_mut() {
                obj.insert("seen".to_string(), Value::Bool(true));
                obj.insert("unread".to_string(), Value::from(0u32));
            }
            self.backend
                .upsert_document(SUMMARIES, &summary_id, doc)
                .await?;
        }
        Ok(())
    }

    async fn active_parts(&self) -> Result<(Arc<RwLock<Conversation>>, Arc<TypingThrottle>)> {
        let active = self.active.read().await;
        active
            .as_ref()
            .map(|a| (a.conversation.clone(), a.throttle.clone()))
            .ok_or_else(|| ChatError::Conversation("no active conversation".to_string()))
    }

    async fn load_history(&self, conversation: &ConversationId) -> Result<Vec<Message>> {
        let docs = self.backend.list_documents(MESSAGES).await?;
        let mut history = parse_messages(&docs, conversation);
        if history.len() > self.config.history_limit {
            history = history.split_off(history.len() - self.config.history_limit);
        }
        Ok(history)
    }

    fn spawn_message_reader(&self, conversation: Arc<RwLock<Conversation>>) -> JoinHandle<()> {
        let mut sub = self.backend.subscribe(MESSAGES);
        let messages = self.messages.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(snapshot) = sub.next().await {
                let conv_id = conversation.read().await.id.clone();
                let Some(conv_id) = conv_id else {
                    continue; // pending conversation, nothing persisted yet
                };
                let fresh = parse_messages(&snapshot.documents, &conv_id);
                apply_message_snapshot(&mut *messages.write().await, fresh);
                let _ = events.send(ChatEvent::SnapshotApplied {
                    collection: MESSAGES.to_string(),
                });
            }
        })
    }

    fn spawn_typing_reader(&self, conversation: Arc<RwLock<Conversation>>) -> JoinHandle<()> {
        let mut sub = self.backend.subscribe(TYPING);
        let typists = self.typists.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(snapshot) = sub.next().await {
                let conv_id = conversation.read().await.id.clone();
                let fresh: Vec<TypingSignal> = snapshot
                    .documents
                    .iter()
                    .filter_map(|doc| serde_json::from_value::<TypingSignal>(doc.clone()).ok())
                    .filter(|s| Some(&s.conversation) == conv_id.as_ref())
                    .collect();
                let changed = {
                    let mut current = typists.write().await;
                    let changed = *current != fresh;
                    *current = fresh;
                    changed
                };
                if changed {
                    if let Some(conv_id) = conv_id {
                        let _ = events.send(ChatEvent::TypingChanged { conversation: conv_id });
                    }
                }
            }
        })
    }
}

fn parse_messages(docs: &[Value], conversation: &ConversationId) -> Vec<Message> {
    let mut messages: Vec<Message> = docs
        .iter()
        .filter_map(|doc| serde_json::from_value::<MessageDoc>(doc.clone()).ok())
        .filter(|doc| doc.conversation == conversation.as_str())
        .map(MessageDoc::into_message)
        .collect();
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    messages
}

/// Replace local state with a snapshot, keeping provisional entries that
/// the backend cannot know about yet (in-flight or failed sends)
fn apply_message_snapshot(local: &mut Vec<Message>, fresh: Vec<Message>) {
    let mut next = fresh;
    for message in local.drain(..) {
        if message.id.is_provisional() {
            next.push(message);
        }
    }
    next.sort_by(|a, b| a.sent_at.cmp(&b.sent_at));
    *local = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeliveryStatus, UserId};

    fn message(id: MessageId, body: &str, at_secs: i64) -> Message {
        Message {
            id,
            conversation: Some(ConversationId::new("c1")),
            sender: UserId::new("alice"),
            body: body.to_string(),
            image_url: None,
            sent_at: chrono::DateTime::from_timestamp(at_secs, 0).unwrap(),
            status: DeliveryStatus::Sent,
            read_by: vec![],
        }
    }

    #[test]
    fn test_snapshot_keeps_provisional_entries() {
        let mut failed = message(MessageId::Provisional(7), "retry me", 20);
        failed.status = DeliveryStatus::Failed;
        let mut local = vec![message(MessageId::Server("a".into()), "old", 10), failed];

        let fresh = vec![
            message(MessageId::Server("a".into()), "old", 10),
            message(MessageId::Server("b".into()), "new", 30),
        ];
        apply_message_snapshot(&mut local, fresh);

        assert_eq!(local.len(), 3);
        // Ordered by timestamp, the failed provisional stays in place
        assert_eq!(local[1].id, MessageId::Provisional(7));
        assert_eq!(local[2].id, MessageId::Server("b".into()));
    }

    #[test]
    fn test_snapshot_is_full_replacement() {
        let mut local = vec![
            message(MessageId::Server("a".into()), "kept", 10),
            message(MessageId::Server("gone".into()), "deleted remotely", 20),
        ];
        let fresh = vec![message(MessageId::Server("a".into()), "kept", 10)];
        apply_message_snapshot(&mut local, fresh);

        assert_eq!(local.len(), 1);
        assert_eq!(local[0].id, MessageId::Server("a".into()));
    }
}
