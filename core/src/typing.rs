/// Typing presence throttle
///
/// Rate-limits "user is typing" writes and expires them two ways: the
/// writer schedules its own clear, and readers independently filter stale
/// entries on every snapshot, so a tab closed without unmount still stops
/// showing as typing.
use crate::backend::{ChatBackend, TYPING};
use crate::config::Config;
use crate::types::{Conversation, Participant, TypingSignal, UserId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct ThrottleInner {
    last_broadcast: Option<Instant>,
    expiry: Option<JoinHandle<()>>,
    doc_id: Option<String>,
}

/// Writer side of typing presence for one (conversation, user) pair.
/// Shares the session's conversation handle so presence records pick up
/// the durable id once a pending conversation obtains one.
pub struct TypingThrottle {
    backend: Arc<dyn ChatBackend>,
    conversation: Arc<RwLock<Conversation>>,
    user: Participant,
    throttle: Duration,
    timeout: Duration,
    inner: Arc<Mutex<ThrottleInner>>,
}

impl TypingThrottle {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        conversation: Arc<RwLock<Conversation>>,
        user: Participant,
        config: &Config,
    ) -> Self {
        Self {
            backend,
            conversation,
            user,
            throttle: config.typing_throttle,
            timeout: config.typing_timeout,
            inner: Arc::new(Mutex::new(ThrottleInner {
                last_broadcast: None,
                expiry: None,
                doc_id: None,
            })),
        }
    }

    /// Called on every keystroke while composing. Within the throttle
    /// window the network write is suppressed but the pending expiry timer
    /// is refreshed; outside it, a presence record is written immediately.
    pub async fn notify_activity(&self) {
        // Presence is keyed by the durable conversation id; while the
        // conversation is pending no peer can be subscribed to it yet
        let conversation = match self.conversation.read().await.id.clone() {
            Some(id) => id,
            None => return,
        };

        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let within_window = inner
            .last_broadcast
            .map(|last| now.duration_since(last) < self.throttle)
            .unwrap_or(false);

        if !within_window {
            let signal = TypingSignal {
                conversation,
                user: self.user.id.clone(),
                display_name: self.user.display_name.clone(),
                updated_at: Utc::now(),
            };
            let body = match serde_json::to_value(&signal) {
                Ok(body) => body,
                Err(e) => {
                    debug!("Typing signal serialization failed: {}", e);
                    return;
                }
            };

            // Presence is best-effort: failures are swallowed, not surfaced
            let result = match &inner.doc_id {
                Some(id) => self.backend.update_document(TYPING, id, body).await,
                None => match self.backend.create_document(TYPING, body).await {
                    Ok(id) => {
                        inner.doc_id = Some(id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = result {
                debug!("Typing presence write failed: {}", e);
            }
            inner.last_broadcast = Some(now);
        }

        self.schedule_expiry(&mut inner);
    }

    /// Remove the presence record unconditionally and cancel any pending
    /// expiry timer. Used on send, blur, and teardown.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(handle) = inner.expiry.take() {
            handle.abort();
        }
        inner.last_broadcast = None;
        if let Some(id) = inner.doc_id.take() {
            if let Err(e) = self.backend.delete_document(TYPING, &id).await {
                debug!("Typing presence clear failed: {}", e);
            }
        }
    }

    fn schedule_expiry(&self, inner: &mut ThrottleInner) {
        if let Some(handle) = inner.expiry.take() {
            handle.abort();
        }

        let backend = self.backend.clone();
        let shared = self.inner.clone();
        let timeout = self.timeout;
        inner.expiry = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut inner = shared.lock().await;
            inner.last_broadcast = None;
            if let Some(id) = inner.doc_id.take() {
                if let Err(e) = backend.delete_document(TYPING, &id).await {
                    debug!("Typing presence expiry failed: {}", e);
                }
            }
        }));
    }
}

/// Reader side: filter a typing snapshot down to entries that are fresh
/// and not the reading participant's own. Re-evaluated on every snapshot
/// rather than trusting writers to clear in time.
pub fn active_typists(
    signals: &[TypingSignal],
    now: DateTime<Utc>,
    self_id: &UserId,
    timeout: Duration,
) -> Vec<TypingSignal> {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(3));
    signals
        .iter()
        .filter(|s| &s.user != self_id)
        .filter(|s| now.signed_duration_since(s.updated_at) <= timeout)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationId;

    fn signal(user: &str, age_secs: i64, now: DateTime<Utc>) -> TypingSignal {
        TypingSignal {
            conversation: ConversationId::new("c1"),
            user: UserId::new(user),
            display_name: user.to_string(),
            updated_at: now - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_reader_filters_stale_and_self() {
        let now = Utc::now();
        let signals = vec![
            signal("alice", 0, now),
            signal("bob", 1, now),
            signal("carol", 10, now),
        ];

        let me = UserId::new("alice");
        let active = active_typists(&signals, now, &me, Duration::from_secs(3));

        // Own entry and the 10s-old one are gone
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].user, UserId::new("bob"));
    }

    #[test]
    fn test_reader_empty_snapshot() {
        let me = UserId::new("alice");
        assert!(active_typists(&[], Utc::now(), &me, Duration::from_secs(3)).is_empty());
    }
}
