/// Compose surface: text buffer, caret, and key routing
///
/// Keys are routed to the mention popup while it is visible and to the
/// compose surface otherwise. Enter is the one deliberately overloaded
/// key: it commits the selected candidate when the popup is open and
/// submits the message when it is closed.
use crate::mention::{candidates, complete, MentionTracker};
use crate::types::Participant;

/// Keys the compose surface reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Backspace,
    Up,
    Down,
    Enter,
    Escape,
}

/// What the caller should do after a key was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerAction {
    /// Nothing beyond re-rendering
    None,
    /// The user submitted the composed text; the input is already cleared
    Submit(String),
}

/// Compose-surface state for one conversation
#[derive(Debug)]
pub struct Composer {
    text: String,
    caret: usize,
    tracker: MentionTracker,
    mention_limit: usize,
}

impl Composer {
    pub fn new(mention_limit: usize) -> Self {
        Self {
            text: String::new(),
            caret: 0,
            tracker: MentionTracker::new(),
            mention_limit,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn mention_active(&self) -> bool {
        self.tracker.is_active()
    }

    pub fn selection(&self) -> usize {
        self.tracker.selection()
    }

    /// Current autocomplete candidates, empty when the popup is closed
    pub fn mention_candidates<'a>(&self, participants: &'a [Participant]) -> Vec<&'a Participant> {
        match self.tracker.state() {
            Some(state) => candidates(participants, &state.query, self.mention_limit),
            None => Vec::new(),
        }
    }

    /// Handle one key; popup state is re-synced after every edit
    pub fn handle_key(&mut self, key: Key, participants: &[Participant]) -> ComposerAction {
        match key {
            Key::Char(c) => {
                self.text.insert(self.caret, c);
                self.caret += c.len_utf8();
                self.sync(participants);
                ComposerAction::None
            }
            Key::Backspace => {
                let previous = self.text[..self.caret].chars().next_back();
                if let Some(c) = previous {
                    self.caret -= c.len_utf8();
                    self.text.remove(self.caret);
                }
                self.sync(participants);
                ComposerAction::None
            }
            Key::Up => {
                if self.tracker.is_active() {
                    let count = self.mention_candidates(participants).len();
                    self.tracker.select_prev(count);
                }
                ComposerAction::None
            }
            Key::Down => {
                if self.tracker.is_active() {
                    let count = self.mention_candidates(participants).len();
                    self.tracker.select_next(count);
                }
                ComposerAction::None
            }
            Key::Enter => {
                if self.tracker.is_active() {
                    self.commit_selected(participants);
                    ComposerAction::None
                } else {
                    let text = std::mem::take(&mut self.text);
                    self.caret = 0;
                    self.sync(participants);
                    ComposerAction::Submit(text)
                }
            }
            Key::Escape => {
                // Cancels the popup without modifying text
                if self.tracker.is_active() {
                    self.tracker.dismiss();
                }
                ComposerAction::None
            }
        }
    }

    /// Replace the whole buffer (e.g. after an external edit) and place
    /// the caret deterministically
    pub fn set_text(&mut self, text: impl Into<String>, caret: usize, participants: &[Participant]) {
        self.text = text.into();
        self.caret = caret.min(self.text.len());
        self.sync(participants);
    }

    fn commit_selected(&mut self, participants: &[Participant]) {
        let state = match self.tracker.state() {
            Some(state) => state.clone(),
            None => return,
        };
        let hits = candidates(participants, &state.query, self.mention_limit);
        let chosen = match hits.get(self.tracker.selection()) {
            Some(p) => (*p).clone(),
            None => return,
        };
        let (text, caret) = complete(&self.text, &state, &chosen);
        self.text = text;
        self.caret = caret;
        self.sync(participants);
    }

    fn sync(&mut self, participants: &[Participant]) {
        self.tracker.sync(&self.text, self.caret);
        let count = self.mention_candidates(participants).len();
        self.tracker.clamp_selection(count);
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
        ]
    }

    fn type_str(composer: &mut Composer, text: &str, participants: &[Participant]) {
        for c in text.chars() {
            composer.handle_key(Key::Char(c), participants);
        }
    }

    #[test]
    fn test_enter_submits_when_popup_closed() {
        let list = participants();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "hello world", &list);
        assert!(!composer.mention_active());

        let action = composer.handle_key(Key::Enter, &list);
        assert_eq!(action, ComposerAction::Submit("hello world".to_string()));
        // Input cleared synchronously
        assert_eq!(composer.text(), "");
        assert_eq!(composer.caret(), 0);
    }

    #[test]
    fn test_enter_commits_candidate_when_popup_open() {
        let list = participants();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "hey @b", &list);
        assert!(composer.mention_active());

        // Popup open: Enter must NOT submit
        let action = composer.handle_key(Key::Enter, &list);
        assert_eq!(action, ComposerAction::None);
        assert_eq!(composer.text(), "hey @bob ");
        assert_eq!(composer.caret(), 9);
        assert!(!composer.mention_active());

        // Now the same key submits
        let action = composer.handle_key(Key::Enter, &list);
        assert_eq!(action, ComposerAction::Submit("hey @bob ".to_string()));
    }

    #[test]
    fn test_arrows_move_wrapped_selection() {
        let list = participants();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "@b", &list);
        assert_eq!(composer.mention_candidates(&list).len(), 2);

        composer.handle_key(Key::Down, &list);
        assert_eq!(composer.selection(), 1);
        composer.handle_key(Key::Down, &list);
        assert_eq!(composer.selection(), 0);
        composer.handle_key(Key::Up, &list);
        assert_eq!(composer.selection(), 1);

        let action = composer.handle_key(Key::Enter, &list);
        assert_eq!(action, ComposerAction::None);
        assert_eq!(composer.text(), "@bobby ");
    }

    #[test]
    fn test_escape_cancels_without_touching_text() {
        let list = participants();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "hey @b", &list);
        assert!(composer.mention_active());

        composer.handle_key(Key::Escape, &list);
        assert!(!composer.mention_active());
        assert_eq!(composer.text(), "hey @b");

        // Dismissed popup: Enter falls through to submit
        let action = composer.handle_key(Key::Enter, &list);
        assert_eq!(action, ComposerAction::Submit("hey @b".to_string()));
    }

    #[test]
    fn test_backspace_reopens_popup_state() {
        let list = participants();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "@bo ", &list);
        // Whitespace closed the mention
        assert!(!composer.mention_active());

        composer.handle_key(Key::Backspace, &list);
        assert!(composer.mention_active());
        assert_eq!(composer.text(), "@bo");
    }

    #[test]
    fn test_candidate_cap() {
        let list: Vec<Participant> = (0..10)
            .map(|i| Participant::new(format!("u{}", i), format!("user{}", i)))
            .collect();
        let mut composer = Composer::new(5);
        type_str(&mut composer, "@user", &list);
        assert_eq!(composer.mention_candidates(&list).len(), 5);
    }
}
