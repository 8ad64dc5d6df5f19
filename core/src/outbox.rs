/// Optimistic send pipeline
///
/// A submitted message becomes visible locally with a provisional id
/// before any network call, then is reconciled with the backend: durable
/// conversation record first when the conversation is still pending, blob
/// upload before the message write, message write, then per-participant
/// summary fan-out. Any failure leaves the message visible in `Failed`
/// state for manual retry; nothing is ever silently dropped.
use crate::backend::{ChatBackend, CONVERSATIONS, MESSAGES, SUMMARIES};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::types::{
    ChatEvent, Conversation, ConversationId, ConversationSummary, DeliveryStatus, Message,
    MessageDoc, MessageId, Participant, UserId,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// An image attached to a message, uploaded to blob storage before the
/// message record is written
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub bytes: Bytes,
}

pub struct Outbox {
    backend: Arc<dyn ChatBackend>,
    user: UserId,
    config: Config,
    messages: Arc<RwLock<Vec<Message>>>,
    events: broadcast::Sender<ChatEvent>,
    /// Provisional id source. Provisional ids never leave the session,
    /// so a session-local counter cannot collide.
    counter: AtomicU64,
    /// Attachments of failed sends, kept for retry until upload succeeds
    pending_uploads: Mutex<HashMap<MessageId, Attachment>>,
    /// Server ids of message writes whose pipeline failed later (summary
    /// fan-out); retry must not create a second durable copy
    persisted: Mutex<HashMap<MessageId, String>>,
}

impl Outbox {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        user: UserId,
        config: Config,
        messages: Arc<RwLock<Vec<Message>>>,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            backend,
            user,
            config,
            messages,
            events,
            counter: AtomicU64::new(0),
            pending_uploads: Mutex::new(HashMap::new()),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a message. No-op when both text and image are empty.
    ///
    /// The local insert, the `MessageQueued` event, and the returned
    /// provisional id all happen before any backend call; the caller can
    /// clear its compose input immediately, independent of the outcome.
    pub async fn submit(
        &self,
        conversation: &Arc<RwLock<Conversation>>,
        text: &str,
        image: Option<Attachment>,
    ) -> Option<MessageId> {
        if text.trim().is_empty() && image.is_none() {
            return None;
        }

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let provisional = MessageId::Provisional(seq);
        let sent_at = Utc::now();

        let message = Message {
            id: provisional.clone(),
            conversation: conversation.read().await.id.clone(),
            sender: self.user.clone(),
            body: text.to_string(),
            image_url: None,
            sent_at,
            status: DeliveryStatus::Sending,
            read_by: vec![self.user.clone()],
        };
        self.messages.write().await.push(message);
        let _ = self.events.send(ChatEvent::MessageQueued {
            id: provisional.clone(),
        });

        if let Some(attachment) = image {
            self.pending_uploads
                .lock()
                .await
                .insert(provisional.clone(), attachment);
        }

        self.send(conversation, &provisional, text.to_string(), sent_at)
            .await;
        Some(provisional)
    }

    /// Re-run the pipeline for a message in `Failed` state
    pub async fn retry(
        &self,
        conversation: &Arc<RwLock<Conversation>>,
        id: &MessageId,
    ) -> Result<()> {
        let (body, sent_at) = {
            let messages = self.messages.read().await;
            let message = messages
                .iter()
                .find(|m| &m.id == id)
                .ok_or_else(|| ChatError::Conversation(format!("no such message: {:?}", id)))?;
            if message.status != DeliveryStatus::Failed {
                return Err(ChatError::Conversation(
                    "only failed messages can be retried".to_string(),
                ));
            }
            (message.body.clone(), message.sent_at)
        };

        self.set_status(id, DeliveryStatus::Sending).await;
        self.send(conversation, id, body, sent_at).await;
        Ok(())
    }

    /// Steps 3-5 of the pipeline plus the resulting status transition
    async fn send(
        &self,
        conversation: &Arc<RwLock<Conversation>>,
        provisional: &MessageId,
        body: String,
        sent_at: DateTime<Utc>,
    ) {
        match self.persist(conversation, provisional, &body, sent_at).await {
            Ok(server_id) => {
                self.pending_uploads.lock().await.remove(provisional);
                self.persisted.lock().await.remove(provisional);
                self.finalize(provisional, &server_id).await;
                info!("Message persisted as {}", server_id);
                let _ = self.events.send(ChatEvent::MessageSent {
                    id: provisional.clone(),
                    server_id,
                });
            }
            Err(e) => {
                // Uniform Failed state for the user; the log keeps the cause
                match &e {
                    ChatError::Upload(cause) => warn!("Image upload failed: {}", cause),
                    other => error!("Message send failed: {}", other),
                }
                self.set_status(provisional, DeliveryStatus::Failed).await;
                let _ = self.events.send(ChatEvent::MessageFailed {
                    id: provisional.clone(),
                });
            }
        }
    }

    async fn persist(
        &self,
        conversation: &Arc<RwLock<Conversation>>,
        provisional: &MessageId,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<String> {
        // A pending conversation gets its durable record first. The write
        // lock is held across the create so two concurrent submits cannot
        // both create one.
        let (conv_id, participants) = {
            let mut conv = conversation.write().await;
            let id = match &conv.id {
                Some(id) => id.clone(),
                None => {
                    let doc = serde_json::to_value(&*conv)?;
                    let created = self.backend.create_document(CONVERSATIONS, doc).await?;
                    let created = ConversationId::new(created);
                    conv.id = Some(created.clone());
                    debug!("Created conversation {}", created);
                    let _ = self.events.send(ChatEvent::ConversationCreated {
                        id: created.clone(),
                    });
                    created
                }
            };
            (id, conv.participants.clone())
        };
        self.set_conversation(provisional, &conv_id).await;

        // Upload before the message write; an already-uploaded attachment
        // (earlier attempt failed later in the pipeline) is not re-sent
        let image_url = match self.image_url(provisional).await {
            Some(url) => Some(url),
            None => {
                let attachment = self.pending_uploads.lock().await.get(provisional).cloned();
                match attachment {
                    Some(att) => {
                        let url = self
                            .backend
                            .upload_blob(&att.name, att.bytes)
                            .await
                            .map_err(|e| ChatError::Upload(e.to_string()))?;
                        self.set_image_url(provisional, &url).await;
                        Some(url)
                    }
                    None => None,
                }
            }
        };

        // An earlier attempt may have written the document and then failed
        // in the fan-out below; retry reuses the existing record
        let already_persisted = self.persisted.lock().await.get(provisional).cloned();
        let server_id = match already_persisted {
            Some(id) => id,
            None => {
                let doc = MessageDoc {
                    id: String::new(),
                    conversation: conv_id.as_str().to_string(),
                    sender: self.user.as_str().to_string(),
                    body: body.to_string(),
                    image_url: image_url.clone(),
                    sent_at,
                    read_by: vec![self.user.as_str().to_string()],
                };
                let id = self
                    .backend
                    .create_document(MESSAGES, serde_json::to_value(&doc)?)
                    .await?;
                self.persisted
                    .lock()
                    .await
                    .insert(provisional.clone(), id.clone());
                id
            }
        };

        self.fan_out_summaries(&conv_id, &participants, body, image_url.is_some(), sent_at)
            .await?;

        Ok(server_id)
    }

    /// Update every participant's summary record: group chats fan out to
    /// all members, direct chats to exactly two
    async fn fan_out_summaries(
        &self,
        conversation: &ConversationId,
        participants: &[Participant],
        body: &str,
        has_image: bool,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let preview = if body.trim().is_empty() && has_image {
            "[image]".to_string()
        } else {
            truncate_chars(body, self.config.preview_len)
        };

        for participant in participants {
            let summary_id = format!("{}:{}", conversation, participant.id);
            let is_sender = participant.id == self.user;

            let prev_unread = self
                .backend
                .get_document(SUMMARIES, &summary_id)
                .await
                .ok()
                .flatten()
                .and_then(|doc| doc.get("unread").and_then(|v| v.as_u64()))
                .unwrap_or(0) as u32;

            let summary = ConversationSummary {
                conversation_id: conversation.clone(),
                user: participant.id.clone(),
                last_preview: preview.clone(),
                last_sender: self.user.clone(),
                last_timestamp: sent_at,
                unread: if is_sender { 0 } else { prev_unread + 1 },
                seen: is_sender,
            };
            self.backend
                .upsert_document(SUMMARIES, &summary_id, serde_json::to_value(&summary)?)
                .await?;
        }
        Ok(())
    }

    async fn set_status(&self, id: &MessageId, status: DeliveryStatus) {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.iter_mut().find(|m| &m.id == id) {
            message.status = status;
        }
    }

    async fn set_conversation(&self, id: &MessageId, conversation: &ConversationId) {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.iter_mut().find(|m| &m.id == id) {
            message.conversation = Some(conversation.clone());
        }
    }

    async fn set_image_url(&self, id: &MessageId, url: &str) {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.iter_mut().find(|m| &m.id == id) {
            message.image_url = Some(url.to_string());
        }
    }

    async fn image_url(&self, id: &MessageId) -> Option<String> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .find(|m| &m.id == id)
            .and_then(|m| m.image_url.clone())
    }

    /// The provisional entry learns its server id and flips to `Sent`;
    /// body and timestamp are left untouched. If a realtime snapshot
    /// already delivered the persisted copy, the provisional entry is
    /// dropped instead of duplicated.
    async fn finalize(&self, provisional: &MessageId, server_id: &str) {
        let mut messages = self.messages.write().await;
        let server = MessageId::Server(server_id.to_string());
        if messages.iter().any(|m| m.id == server) {
            messages.retain(|m| &m.id != provisional);
            return;
        }
        if let Some(message) = messages.iter_mut().find(|m| &m.id == provisional) {
            message.id = server;
            message.status = DeliveryStatus::Sent;
        }
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
