/// Shared types for the chat client core
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a user (assigned by the backend's auth service)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a durable conversation record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation participant; doubles as a mention-autocomplete candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }
}

/// Conversation variant, carrying only the fields relevant to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKind {
    /// One-to-one chat with a single peer
    Direct { peer: UserId },
    /// Named group chat
    Group { name: String },
    /// The single global room every user can see
    Global,
}

/// A conversation as the session sees it
///
/// `id` is `None` for a pending conversation opened from a contact picker
/// before any message was ever sent; the send pipeline creates the durable
/// record on first submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Option<ConversationId>,
    #[serde(flatten)]
    pub kind: ConversationKind,
    pub participants: Vec<Participant>,
}

impl Conversation {
    pub fn direct(me: Participant, peer: Participant) -> Self {
        Self {
            id: None,
            kind: ConversationKind::Direct {
                peer: peer.id.clone(),
            },
            participants: vec![me, peer],
        }
    }

    pub fn group(name: impl Into<String>, participants: Vec<Participant>) -> Self {
        Self {
            id: None,
            kind: ConversationKind::Group { name: name.into() },
            participants,
        }
    }

    pub fn global(participants: Vec<Participant>) -> Self {
        Self {
            id: None,
            kind: ConversationKind::Global,
            participants,
        }
    }

    /// Pending conversations have no durable record yet
    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }
}

/// Message identity: exactly one of the two variants is authoritative at
/// any time. A provisional message is replaced in place, never merged,
/// once the server id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageId {
    /// Locally generated, not yet persisted
    Provisional(u64),
    /// Assigned by the backend
    Server(String),
}

impl MessageId {
    pub fn is_provisional(&self) -> bool {
        matches!(self, MessageId::Provisional(_))
    }
}

/// Delivery status of a message as rendered locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Delivered,
    Failed,
}

/// A message in the session's local list
///
/// Invariant: `body` and `sent_at` never change across the
/// provisional-to-final transition; only `id` and `status` do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// `None` only while the message belongs to a pending conversation
    /// whose durable record is still being created
    pub conversation: Option<ConversationId>,
    pub sender: UserId,
    pub body: String,
    pub image_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub read_by: Vec<UserId>,
}

/// Wire shape of a message document in the `messages` collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDoc {
    #[serde(default)]
    pub id: String,
    pub conversation: String,
    pub sender: String,
    pub body: String,
    pub image_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub read_by: Vec<String>,
}

impl MessageDoc {
    /// Convert a persisted document into a local message. Persisted
    /// messages are by definition at least `Sent`.
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId::Server(self.id),
            conversation: Some(ConversationId::new(self.conversation)),
            sender: UserId::new(self.sender),
            body: self.body,
            image_url: self.image_url,
            sent_at: self.sent_at,
            status: if self.read_by.len() > 1 {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Sent
            },
            read_by: self.read_by.into_iter().map(UserId::new).collect(),
        }
    }
}

/// Per-participant denormalized view of a conversation, used to render
/// conversation lists without reading full message history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub user: UserId,
    pub last_preview: String,
    pub last_sender: UserId,
    pub last_timestamp: DateTime<Utc>,
    pub unread: u32,
    pub seen: bool,
}

/// Ephemeral "is typing" marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingSignal {
    pub conversation: ConversationId,
    pub user: UserId,
    pub display_name: String,
    pub updated_at: DateTime<Utc>,
}

/// Search hit: a message plus the matched character ranges in its body.
/// Recomputed whenever the query or message set changes; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub message: MessageId,
    pub ranges: Vec<(usize, usize)>,
}

/// Real-time events emitted by the session for UI consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message entered the local list with a provisional id
    MessageQueued { id: MessageId },
    /// A provisional message was persisted and learned its server id
    MessageSent { id: MessageId, server_id: String },
    /// A send failed; the message stays visible for manual retry
    MessageFailed { id: MessageId },
    /// A pending conversation obtained its durable record
    ConversationCreated { id: ConversationId },
    /// A realtime snapshot replaced local state for a collection
    SnapshotApplied { collection: String },
    /// The set of active typists changed
    TypingChanged { conversation: ConversationId },
}

impl ChatEvent {
    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::MessageQueued { .. } => "message_queued",
            ChatEvent::MessageSent { .. } => "message_sent",
            ChatEvent::MessageFailed { .. } => "message_failed",
            ChatEvent::ConversationCreated { .. } => "conversation_created",
            ChatEvent::SnapshotApplied { .. } => "snapshot_applied",
            ChatEvent::TypingChanged { .. } => "typing_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = ChatEvent::MessageQueued {
            id: MessageId::Provisional(42),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChatEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type(), "message_queued");
        assert!(json.contains("\"type\":\"message_queued\""));
    }

    #[test]
    fn test_message_doc_roundtrip() {
        let doc = MessageDoc {
            id: "abc".to_string(),
            conversation: "conv-1".to_string(),
            sender: "alice".to_string(),
            body: "hello".to_string(),
            image_url: None,
            sent_at: Utc::now(),
            read_by: vec!["alice".to_string()],
        };
        let value = serde_json::to_value(&doc).unwrap();
        let back: MessageDoc = serde_json::from_value(value).unwrap();
        let msg = back.into_message();
        assert_eq!(msg.id, MessageId::Server("abc".to_string()));
        assert_eq!(msg.status, DeliveryStatus::Sent);
    }

    #[test]
    fn test_conversation_kind_tagged() {
        let conv = Conversation::group(
            "rustaceans",
            vec![
                Participant::new("a", "Alice"),
                Participant::new("b", "Bob"),
            ],
        );
        let json = serde_json::to_value(&conv).unwrap();
        assert_eq!(json["kind"], "group");
        assert_eq!(json["name"], "rustaceans");
    }
}
