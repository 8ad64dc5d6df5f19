/// Text annotation scanner and search matching
///
/// Pure string scanning, no I/O. Segments a message body into plain,
/// highlighted, and mention runs for rendering, and computes
/// case-insensitive search match offsets. All offsets are byte offsets on
/// character boundaries.
use crate::types::{Message, SearchMatch};

/// A typed run of message text, in original character order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Plain(String),
    Highlighted(String),
    Mention(String),
}

impl Segment {
    pub fn text(&self) -> &str {
        match self {
            Segment::Plain(s) | Segment::Highlighted(s) | Segment::Mention(s) => s,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Snap an offset down to the nearest character boundary
fn snap(text: &str, mut i: usize) -> usize {
    i = i.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Segment `text` into plain/highlighted/mention runs.
///
/// Highlight ranges are sorted by start offset and take precedence: text
/// inside a highlight range is rendered as highlighted even if it also
/// matches the mention pattern. Intentional policy, it keeps the merge
/// logic a single left-to-right pass. Segments concatenate back to the
/// input exactly; empty input yields no segments.
pub fn annotate(text: &str, highlights: &[(usize, usize)]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut ranges = highlights.to_vec();
    ranges.sort_by_key(|r| r.0);

    let mut pos = 0usize;
    for (start, end) in ranges {
        let start = snap(text, start.max(pos));
        let end = snap(text, end).max(start);
        if start > pos {
            scan_mentions(&text[pos..start], &mut segments);
        }
        if end > start {
            segments.push(Segment::Highlighted(text[start..end].to_string()));
        }
        pos = pos.max(end);
    }
    if pos < text.len() {
        scan_mentions(&text[pos..], &mut segments);
    }
    segments
}

/// Split a run into plain and mention segments. A mention is `@` followed
/// by one or more word characters, matched greedily left-to-right.
fn scan_mentions(run: &str, out: &mut Vec<Segment>) {
    let mut plain_start = 0usize;
    let mut iter = run.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if c != '@' {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, d)) = iter.peek() {
            if !is_word_char(d) {
                break;
            }
            end = j + d.len_utf8();
            iter.next();
        }
        // A bare '@' with no word characters stays plain
        if end == i + c.len_utf8() {
            continue;
        }
        if i > plain_start {
            out.push(Segment::Plain(run[plain_start..i].to_string()));
        }
        out.push(Segment::Mention(run[i..end].to_string()));
        plain_start = end;
    }

    if plain_start < run.len() {
        out.push(Segment::Plain(run[plain_start..].to_string()));
    }
}

/// Find all non-overlapping case-insensitive occurrences of `query` in
/// `text`, left-to-right, as (start, end) byte offsets.
pub fn search_matches(text: &str, query: &str) -> Vec<(usize, usize)> {
    if query.is_empty() || text.is_empty() {
        return Vec::new();
    }

    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match match_at(&chars, i, &needle) {
            Some(consumed) => {
                let start = chars[i].0;
                let end = chars
                    .get(i + consumed)
                    .map(|&(b, _)| b)
                    .unwrap_or(text.len());
                out.push((start, end));
                i += consumed;
            }
            None => i += 1,
        }
    }
    out
}

/// Try to match the lowercased needle starting at char index `start`;
/// returns the number of text characters consumed on success.
fn match_at(chars: &[(usize, char)], start: usize, needle: &[char]) -> Option<usize> {
    let mut qi = 0;
    let mut i = start;
    while qi < needle.len() {
        let (_, c) = *chars.get(i)?;
        for lc in c.to_lowercase() {
            if qi >= needle.len() || lc != needle[qi] {
                return None;
            }
            qi += 1;
        }
        i += 1;
    }
    Some(i - start)
}

/// Compute search matches over a message set, skipping messages with no
/// hits. Recomputed on every query or message-set change.
pub fn find_matches(messages: &[Message], query: &str) -> Vec<SearchMatch> {
    messages
        .iter()
        .filter_map(|msg| {
            let ranges = search_matches(&msg.body, query);
            if ranges.is_empty() {
                None
            } else {
                Some(SearchMatch {
                    message: msg.id.clone(),
                    ranges,
                })
            }
        })
        .collect()
}
