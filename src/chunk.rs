//! Heading-aware paragraph chunker.
//!
//! Splits a document into [`Chunk`]s whose word counts approximate
//! `target_words` while staying inside `[min_words, max_words]`. Splitting
//! happens on blank-line paragraph boundaries so each chunk stays coherent;
//! headings start new chunks once the current one is large enough.
//!
//! # Algorithm
//!
//! 1. Split the text on blank lines into paragraphs, tracking byte offsets.
//! 2. Pre-split any paragraph longer than `max_words - min_words` at sentence
//!    ends (or word boundaries when a sentence is itself too long).
//! 3. Walk the paragraphs with a running buffer. Close the buffer before a
//!    paragraph when:
//!    - the paragraph is a heading and the buffer has at least `min_words`;
//!    - adding the paragraph would exceed `max_words`;
//!    - the buffer has reached `target_words` and the paragraph is substantial.
//! 4. Rebalance: merge undersized chunks forward (or a trailing one backward)
//!    when the merge stays within `max_words`.
//!
//! Step 2 bounds every paragraph by `max_words - min_words`, so a buffer can
//! only overflow once it already holds more than `min_words`. Together with
//! step 3 this keeps every chunk but the last within bounds.
//!
//! # Guarantees
//!
//! - Chunks are in source order and `content == source[start_offset..end_offset]`.
//! - The text between consecutive chunks is whitespace only.
//! - An empty or whitespace-only document yields no chunks.
//! - A document shorter than `min_words` yields exactly one chunk.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkState};

/// Characters kept in [`Chunk::preview`].
const PREVIEW_CHARS: usize = 150;

/// Paragraphs shorter than this never trigger a target-size split.
const SUBSTANTIAL_PARAGRAPH_WORDS: usize = 40;

/// Longest first line still considered as a heading candidate.
const MAX_HEADING_WORDS: usize = 12;

const MAX_CAPS_HEADING_WORDS: usize = 10;

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n\s*").unwrap());

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

static MARKDOWN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}[ \t]+(.+?)[ \t]*#*[ \t]*$").unwrap());

static NAMED_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:chapter|section|part)[ \t]+(?:\d+|[ivxlcdm]+)\b(?:[.:)\-][ \t]*.*|[ \t]+.*)?$")
        .unwrap()
});

static NUMBERED_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)*[.)]?[ \t]+\p{Lu}[^.!?]*$").unwrap());

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split a document into chunks according to `config`.
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let piece_limit = config.max_words.saturating_sub(config.min_words).max(1);

    let mut units = Vec::new();
    for span in paragraphs(text) {
        if span.words > piece_limit {
            units.extend(split_oversized(text, span, piece_limit));
        } else {
            units.push(span);
        }
    }

    let mut drafts: Vec<Draft> = Vec::new();
    let mut running_title: Option<String> = None;
    let mut buffer: Option<Draft> = None;

    for unit in units {
        let heading = detect_heading(&text[unit.start..unit.end]);

        if let Some(current) = &buffer {
            let at_heading = heading.is_some() && current.words >= config.min_words;
            let overflows = current.words + unit.words > config.max_words;
            let reached_target = current.words >= config.target_words
                && unit.words >= SUBSTANTIAL_PARAGRAPH_WORDS;
            if at_heading || overflows || reached_target {
                drafts.extend(buffer.take());
            }
        }

        if let Some(title) = &heading {
            running_title = Some(title.clone());
        }

        match buffer.as_mut() {
            Some(draft) => {
                draft.end = unit.end;
                draft.words += unit.words;
                if draft.heading.is_none() {
                    draft.heading = heading;
                }
            }
            None => {
                buffer = Some(Draft {
                    start: unit.start,
                    end: unit.end,
                    words: unit.words,
                    heading,
                    inherited_title: running_title.clone(),
                });
            }
        }
    }
    drafts.extend(buffer);

    rebalance(drafts, config)
        .into_iter()
        .enumerate()
        .map(|(index, draft)| build_chunk(text, index, draft))
        .collect()
}

/// A trimmed byte range of the source with its word count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    words: usize,
}

/// A chunk under construction.
#[derive(Debug, Clone)]
struct Draft {
    start: usize,
    end: usize,
    words: usize,
    /// First heading found inside the chunk.
    heading: Option<String>,
    /// Most recent heading before the chunk started.
    inherited_title: Option<String>,
}

impl Draft {
    fn merge(self, next: Draft) -> Draft {
        Draft {
            start: self.start,
            end: next.end,
            words: self.words + next.words,
            heading: self.heading.or(next.heading),
            inherited_title: self.inherited_title,
        }
    }
}

fn paragraphs(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    for sep in PARAGRAPH_BREAK.find_iter(text) {
        push_trimmed(text, cursor, sep.start(), &mut spans);
        cursor = sep.end();
    }
    push_trimmed(text, cursor, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<Span>) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    let start = start + lead;
    spans.push(Span {
        start,
        end: start + trimmed.len(),
        words: word_count(trimmed),
    });
}

/// Break a paragraph into pieces of at most `limit` words, preferring
/// sentence ends in the second half of each window.
fn split_oversized(text: &str, span: Span, limit: usize) -> Vec<Span> {
    let body = &text[span.start..span.end];
    let words: Vec<(usize, usize, bool)> = WORD
        .find_iter(body)
        .map(|m| {
            (
                span.start + m.start(),
                span.start + m.end(),
                ends_sentence(m.as_str()),
            )
        })
        .collect();

    let mut pieces = Vec::new();
    let mut first = 0;
    while first < words.len() {
        let window_end = (first + limit).min(words.len());
        let cut = if window_end == words.len() {
            window_end
        } else {
            (first + limit / 2..window_end)
                .rev()
                .find(|&i| words[i].2)
                .map(|i| i + 1)
                .unwrap_or(window_end)
        };
        pieces.push(Span {
            start: words[first].0,
            end: words[cut - 1].1,
            words: cut - first,
        });
        first = cut;
    }
    pieces
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')', ']', '”', '’'])
        .ends_with(['.', '!', '?'])
}

/// Return the heading text if the paragraph opens with a heading line.
fn detect_heading(paragraph: &str) -> Option<String> {
    let first_line = paragraph.lines().next()?.trim();
    if first_line.is_empty() || word_count(first_line) > MAX_HEADING_WORDS {
        return None;
    }
    let single_line = !paragraph.trim().contains('\n');

    if let Some(caps) = MARKDOWN_HEADING.captures(first_line) {
        return Some(caps[1].trim().to_string());
    }
    if NAMED_SECTION.is_match(first_line) {
        return Some(first_line.to_string());
    }
    if single_line && NUMBERED_SECTION.is_match(first_line) {
        return Some(first_line.to_string());
    }
    if is_caps_heading(first_line) {
        return Some(first_line.to_string());
    }
    None
}

fn is_caps_heading(line: &str) -> bool {
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3
        && word_count(line) <= MAX_CAPS_HEADING_WORDS
        && letters.iter().all(|c| !c.is_lowercase())
        && letters.iter().any(|c| c.is_uppercase())
}

fn rebalance(drafts: Vec<Draft>, config: &ChunkingConfig) -> Vec<Draft> {
    let mut out: Vec<Draft> = Vec::with_capacity(drafts.len());
    let mut iter = drafts.into_iter().peekable();

    while let Some(mut draft) = iter.next() {
        while draft.words < config.min_words {
            let words = draft.words;
            match iter.next_if(|next| words + next.words <= config.max_words) {
                Some(next) => draft = draft.merge(next),
                None => break,
            }
        }
        out.push(draft);
    }

    // A trailing undersized chunk folds back into its predecessor.
    let n = out.len();
    if n >= 2
        && out[n - 1].words < config.min_words
        && out[n - 2].words + out[n - 1].words <= config.max_words
    {
        if let (Some(last), Some(prev)) = (out.pop(), out.pop()) {
            out.push(prev.merge(last));
        }
    }

    out
}

fn build_chunk(text: &str, index: usize, draft: Draft) -> Chunk {
    let content = text[draft.start..draft.end].to_string();
    let title = draft
        .heading
        .or(draft.inherited_title)
        .unwrap_or_else(|| {
            if index == 0 {
                "Introduction".to_string()
            } else {
                format!("Section {}", index + 1)
            }
        });

    Chunk {
        id: Uuid::new_v4().to_string(),
        index,
        title,
        preview: preview(&content),
        words: word_count(&content),
        content,
        start_offset: draft.start,
        end_offset: draft.end,
        selected: false,
        state: ChunkState::Pending,
        rewritten: None,
        explanation: None,
    }
}

fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head.trim_end())
    } else {
        head
    }
}
