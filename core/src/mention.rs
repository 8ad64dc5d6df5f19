/// Mention autocomplete engine
///
/// A small state machine over {inactive, active}, driven entirely by the
/// current text and caret. Activation requires an `@` with no whitespace
/// between it and the caret, at start-of-text or right after whitespace.
use crate::types::Participant;

/// State of an in-progress mention while autocomplete is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionState {
    /// Byte offset of the trigger `@`
    pub trigger: usize,
    /// Substring between the trigger and the caret
    pub query: String,
    /// Byte offset of the caret
    pub caret: usize,
}

/// Derive the active mention at `caret`, if any.
///
/// `caret` must lie on a character boundary.
pub fn mention_at(text: &str, caret: usize) -> Option<MentionState> {
    let caret = caret.min(text.len());
    let before = &text[..caret];

    let mut trigger = None;
    for (i, c) in before.char_indices().rev() {
        if c.is_whitespace() {
            // Whitespace between a trigger and the caret kills the mention
            return None;
        }
        if c == '@' {
            trigger = Some(i);
            break;
        }
    }
    let trigger = trigger?;

    // The trigger must open a word: position 0 or preceded by whitespace
    if trigger > 0 {
        let preceding = text[..trigger].chars().next_back()?;
        if !preceding.is_whitespace() {
            return None;
        }
    }

    Some(MentionState {
        trigger,
        query: text[trigger + 1..caret].to_string(),
        caret,
    })
}

/// Filter participants by case-insensitive substring match on display
/// name, preserving list order, capped at `limit`.
pub fn candidates<'a>(
    participants: &'a [Participant],
    query: &str,
    limit: usize,
) -> Vec<&'a Participant> {
    let query = query.to_lowercase();
    participants
        .iter()
        .filter(|p| p.display_name.to_lowercase().contains(&query))
        .take(limit)
        .collect()
}

/// Splice a chosen candidate into the text: the trigger-through-caret span
/// becomes `@<display name><space>`. Returns the new text and the caret
/// offset at the end of the inserted text.
pub fn complete(text: &str, state: &MentionState, candidate: &Participant) -> (String, usize) {
    let mut out = String::with_capacity(text.len() + candidate.display_name.len() + 2);
    out.push_str(&text[..state.trigger]);
    out.push('@');
    out.push_str(&candidate.display_name);
    out.push(' ');
    let caret = out.len();
    out.push_str(&text[state.caret.min(text.len())..]);
    (out, caret)
}

/// Tracks mention state across edits, including explicit dismissal and a
/// wrapped selection cursor over the candidate list.
#[derive(Debug, Default)]
pub struct MentionTracker {
    state: Option<MentionState>,
    /// Trigger offset the user escaped out of; stays dismissed until the
    /// trigger changes or disappears
    dismissed: Option<usize>,
    selection: usize,
}

impl MentionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-derive state from the latest text and caret. Called after every
    /// edit so popup state always follows the buffer.
    pub fn sync(&mut self, text: &str, caret: usize) {
        let next = mention_at(text, caret);

        match (&self.state, &next) {
            // Same trigger: the query changed, keep the selection
            (Some(prev), Some(new)) if prev.trigger == new.trigger => {}
            _ => self.selection = 0,
        }

        if let Some(new) = &next {
            if self.dismissed != Some(new.trigger) {
                self.dismissed = None;
            }
        } else {
            self.dismissed = None;
        }

        self.state = next;
    }

    pub fn is_active(&self) -> bool {
        match &self.state {
            Some(state) => self.dismissed != Some(state.trigger),
            None => false,
        }
    }

    pub fn state(&self) -> Option<&MentionState> {
        if self.is_active() {
            self.state.as_ref()
        } else {
            None
        }
    }

    /// Cancel without modifying text; reactivates only on a new trigger
    pub fn dismiss(&mut self) {
        if let Some(state) = &self.state {
            self.dismissed = Some(state.trigger);
        }
        self.selection = 0;
    }

    pub fn selection(&self) -> usize {
        self.selection
    }

    /// Move the selection cursor down, wrapping at the end
    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selection = (self.selection + 1) % count;
        }
    }

    /// Move the selection cursor up, wrapping at the start
    pub fn select_prev(&mut self, count: usize) {
        if count > 0 {
            self.selection = (self.selection + count - 1) % count;
        }
    }

    /// Clamp the selection after the candidate list shrinks
    pub fn clamp_selection(&mut self, count: usize) {
        if count == 0 {
            self.selection = 0;
        } else if self.selection >= count {
            self.selection = count - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants() -> Vec<Participant> {
        vec![
            Participant::new("u1", "alice"),
            Participant::new("u2", "bob"),
            Participant::new("u3", "bobby"),
            Participant::new("u4", "carol"),
            Participant::new("u5", "dan"),
            Participant::new("u6", "dana"),
            Participant::new("u7", "dane"),
        ]
    }

    #[test]
    fn test_active_inside_mention() {
        // "@bob hi" with caret right after "bob"
        let state = mention_at("@bob hi", 4).unwrap();
        assert_eq!(state.trigger, 0);
        assert_eq!(state.query, "bob");
    }

    #[test]
    fn test_inactive_past_whitespace() {
        // Caret past the space: the mention is closed
        assert!(mention_at("@bob hi", 7).is_none());
    }

    #[test]
    fn test_trigger_must_open_word() {
        // Email-style '@' mid-word never activates
        assert!(mention_at("mail me a@b", 11).is_none());
        // After whitespace it does
        assert!(mention_at("hey @b", 6).is_some());
    }

    #[test]
    fn test_empty_query_right_after_trigger() {
        let state = mention_at("hey @", 5).unwrap();
        assert_eq!(state.trigger, 4);
        assert_eq!(state.query, "");
    }

    #[test]
    fn test_candidates_filter_cap_and_order() {
        let list = participants();
        let hits = candidates(&list, "bo", 5);
        assert_eq!(
            hits.iter().map(|p| p.display_name.as_str()).collect::<Vec<_>>(),
            vec!["bob", "bobby"]
        );

        // Empty query matches everyone, capped at the limit
        let hits = candidates(&list, "", 5);
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].display_name, "alice");

        // Case-insensitive substring
        let hits = candidates(&list, "DAN", 5);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_complete_splice_and_caret() {
        // "hey @b", trigger at 4, caret at 6 -> "hey @bob ", caret 9
        let state = mention_at("hey @b", 6).unwrap();
        assert_eq!(state.trigger, 4);
        let bob = Participant::new("u2", "bob");
        let (text, caret) = complete("hey @b", &state, &bob);
        assert_eq!(text, "hey @bob ");
        assert_eq!(caret, 9);
    }

    #[test]
    fn test_complete_preserves_tail() {
        let text = "ask @al about it";
        let state = mention_at(text, 7).unwrap();
        let alice = Participant::new("u1", "alice");
        let (out, caret) = complete(text, &state, &alice);
        assert_eq!(out, "ask @alice  about it");
        assert_eq!(caret, 11);
    }

    #[test]
    fn test_tracker_dismiss_until_new_trigger() {
        let mut tracker = MentionTracker::new();
        tracker.sync("hey @b", 6);
        assert!(tracker.is_active());

        tracker.dismiss();
        assert!(!tracker.is_active());

        // Same trigger, longer query: stays dismissed
        tracker.sync("hey @bo", 7);
        assert!(!tracker.is_active());

        // New trigger elsewhere reactivates
        tracker.sync("hey bo @c", 9);
        assert!(tracker.is_active());
    }

    #[test]
    fn test_selection_wraps_both_ends() {
        let mut tracker = MentionTracker::new();
        tracker.sync("@d", 2);
        assert_eq!(tracker.selection(), 0);

        tracker.select_prev(3);
        assert_eq!(tracker.selection(), 2);
        tracker.select_next(3);
        assert_eq!(tracker.selection(), 0);
        tracker.select_next(3);
        assert_eq!(tracker.selection(), 1);
    }
}
