//! Text normalizer applied to backend output.
//!
//! Three passes run in a fixed order, each driven by a pattern table:
//!
//! | Pass | Removes / rewrites |
//! |------|--------------------|
//! | [`strip_meta_text`] | `[continued…]`, `[Note: …]`, `[truncated]`, trailing ellipses |
//! | [`strip_markup`] | headings, emphasis, code fences, links, quotes, list markers |
//! | [`reflow_paragraphs`] | sentence spacing and paragraph grouping |
//!
//! [`normalize`] repeats the pipeline until the text stops changing, so
//! `normalize(normalize(x)) == normalize(x)` for every input. The loop
//! terminates because reflow only touches whitespace and the other passes
//! only ever delete non-whitespace characters from reflowed text.

use once_cell::sync::Lazy;
use regex::Regex;

/// A single text → text pass.
pub type Pass = fn(&str) -> String;

/// The normalization pipeline, in application order.
pub const PASSES: [(&str, Pass); 3] = [
    ("meta_text", strip_meta_text),
    ("markup", strip_markup),
    ("reflow", reflow_paragraphs),
];

/// Bracketed annotations and truncation markers a model adds around its output.
const META_PATTERNS: &[&str] = &[
    r"(?i)\[\s*(?:to be )?(?:continued|continuing|continues|cont\b|truncated|text truncated|output truncated|content truncated|end of (?:excerpt|section|chunk|part)|remaining (?:text|content)|rest of (?:the )?(?:text|document|section)|(?:text|content|section) continues)[^\[\]]*\]",
    r"(?i)\[\s*(?:note|notes|editor'?s note|ed\.? note|author'?s note|rewriter'?s note|translator'?s note|revision note|comment|commentary)\s*:[^\[\]]*\]",
    r"(?i)\(\s*(?:continued|truncated|to be continued)[^()]*\)",
    r"(?:\s*(?:\.{3,}|…))+\s*$",
];

/// Markdown constructs and their replacements. Every rule deletes characters.
const MARKUP_RULES: &[(&str, &str)] = &[
    (r"(?m)^[ \t]*(?:```|~~~)[^\n]*\n?", ""),
    (r"(?m)^[ \t]*(?:[-*_][ \t]*){3,}$", ""),
    (r"(?m)^[ \t]{0,3}#{1,6}[ \t]+", ""),
    (r"(?m)^[ \t]*>[ \t]?", ""),
    (r"(?m)^[ \t]*(?:[-*+•]|\d{1,3}[.)])[ \t]+", ""),
    (r"!?\[([^\]\n]*)\]\([^)\n]*\)", "$1"),
    (r"`([^`\n]+)`", "$1"),
    (r"\*\*([^*\n]+?)\*\*", "$1"),
    (r"__([^_\n]+?)__", "$1"),
    (r"~~([^~\n]+?)~~", "$1"),
    (r"\*([^*\n]+?)\*", "$1"),
    (r"(?m)(^|[\s(\[])_([^_\n]+?)_", "$1$2"),
    (r"\n[ \t]*\n(?:[ \t]*\n)+", "\n\n"),
];

static META: Lazy<Vec<Regex>> = Lazy::new(|| {
    META_PATTERNS
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

static MARKUP: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    MARKUP_RULES
        .iter()
        .map(|(p, r)| (Regex::new(p).unwrap(), *r))
        .collect()
});

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t\r]*\n").unwrap());

/// Reflowed paragraphs close after this many sentences.
const MAX_SENTENCES: usize = 4;
/// ...or after this many once they reach [`SOFT_CHARS`].
const SOFT_SENTENCES: usize = 3;
const SOFT_CHARS: usize = 250;
/// ...or as soon as they reach this length.
const MAX_CHARS: usize = 400;

/// Run every pass in [`PASSES`] until the text reaches a fixpoint.
pub fn normalize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = PASSES
            .iter()
            .fold(current.clone(), |acc, (_, pass)| pass(&acc));
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Remove continuation, truncation and editorial annotations. Text outside
/// the matched spans is left untouched.
pub fn strip_meta_text(text: &str) -> String {
    to_fixpoint(text, |input| {
        META.iter().fold(input.to_string(), |acc, re| {
            re.replace_all(&acc, "").into_owned()
        })
    })
}

/// Remove markdown syntax, keeping the readable text.
pub fn strip_markup(text: &str) -> String {
    to_fixpoint(text, |input| {
        MARKUP.iter().fold(input.to_string(), |acc, (re, rep)| {
            re.replace_all(&acc, *rep).into_owned()
        })
    })
}

/// Normalize spacing and regroup sentences into short paragraphs.
///
/// Existing paragraph breaks are kept; long paragraphs are split at
/// sentence boundaries (terminal punctuation followed by a capital letter).
pub fn reflow_paragraphs(text: &str) -> String {
    PARAGRAPH_BREAK
        .split(text)
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .flat_map(|p| regroup(&split_sentences(&p)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Apply `pass` until it stops changing the text. Each caller's rules only
/// delete characters, so this terminates.
fn to_fixpoint(text: &str, pass: impl Fn(&str) -> String) -> String {
    let mut current = text.to_string();
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Split single-spaced text into sentences.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if !is_terminator(chars[i].1) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < chars.len() && (is_terminator(chars[j].1) || is_closer(chars[j].1)) {
            j += 1;
        }
        let breaks = j + 1 < chars.len() && chars[j].1 == ' ' && chars[j + 1].1.is_uppercase();
        if breaks {
            sentences.push(&text[start..chars[j].0]);
            start = chars[j + 1].0;
            i = j + 1;
        } else {
            i = j;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '»')
}

fn regroup(sentences: &[&str]) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for sentence in sentences {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
        count += 1;

        let len = current.chars().count();
        if count >= MAX_SENTENCES || (count >= SOFT_SENTENCES && len >= SOFT_CHARS) || len >= MAX_CHARS
        {
            paragraphs.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn meta_text_removes_annotations_only() {
        let input = "Alpha [continued in next section] beta [Note: rewritten for clarity] gamma [1] [sic].";
        assert_eq!(strip_meta_text(input), "Alpha  beta  gamma [1] [sic].");
    }

    #[test]
    fn meta_text_removes_trailing_ellipsis() {
        assert_eq!(strip_meta_text("The story goes on..."), "The story goes on");
        assert_eq!(strip_meta_text("Wait… … "), "Wait");
        assert_eq!(strip_meta_text("Mid... sentence ellipsis stays."), "Mid... sentence ellipsis stays.");
    }

    #[test]
    fn meta_text_handles_nested_annotations() {
        assert_eq!(strip_meta_text("a [continued [TRUNCATED] here] b"), "a  b");
    }

    #[test]
    fn markup_is_stripped() {
        let input = "# Title\n\n> Quoted **bold** and *italic* and ~~gone~~.\n\n- item one\n2. item two\n\nSee [the docs](http://x.y) and `code`.\n\n```rust\nlet x = 1;\n```\n\n\n\nEnd __here__ and _there_.";
        let expected = "Title\n\nQuoted bold and italic and gone.\n\nitem one\nitem two\n\nSee the docs and code.\n\nlet x = 1;\n\nEnd here and there.";
        assert_eq!(strip_markup(input), expected);
    }

    #[test]
    fn markup_keeps_snake_case_identifiers() {
        assert_eq!(strip_markup("call snake_case_name now"), "call snake_case_name now");
    }

    #[test]
    fn reflow_groups_sentences() {
        let input = "One.  Two. Three.\nFour. Five. Six. Seven. Eight.";
        assert_eq!(
            reflow_paragraphs(input),
            "One. Two. Three. Four.\n\nFive. Six. Seven. Eight."
        );
    }

    #[test]
    fn reflow_keeps_existing_paragraphs() {
        assert_eq!(reflow_paragraphs("First.\n\n\n   Second."), "First.\n\nSecond.");
    }

    #[test]
    fn reflow_does_not_split_before_lowercase() {
        assert_eq!(
            reflow_paragraphs("Use e.g. this form. And more."),
            "Use e.g. this form. And more."
        );
    }

    #[test]
    fn reflow_closes_long_paragraphs() {
        let long = format!("{}.", "x".repeat(420));
        let input = format!("{} Short one. Short two.", long);
        let out = reflow_paragraphs(&input);
        assert_eq!(out, format!("{}\n\nShort one. Short two.", long));
    }

    #[test]
    fn normalize_runs_all_passes() {
        let input = "## Heading\n\nThis is **good**.  It works [continued...]";
        assert_eq!(normalize(input), "Heading\n\nThis is good. It works");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            "...",
            "plain text",
            "a *\nb* c",
            "[continued [continued] x] tail",
            "**bold** and *it* and `code`",
            "# A\n\n\n\n## B\n\n- one\n- two\n\n> quote...",
            "[Note: [nested]] remains? Yes! OK.",
            "One. Two. Three. Four. Five. Six. Seven. Eight. Nine.",
            "* * *\n\nMr. Smith went to Washington. He said \"Hi.\" Then left.",
            "1. First\n2. Second\n\n~~~\ncode\n~~~",
            "Trailing dots . . .",
            "_under_score_ and __double__",
        ];
        for sample in samples {
            let once = normalize(sample);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn each_pass_is_idempotent() {
        let sample = "# T\n\n[continued] **a** *b*.  C. D. E. F. G...\n\n\n\n> q";
        for (name, pass) in PASSES {
            let once = pass(sample);
            assert_eq!(pass(&once), once, "pass {} not idempotent", name);
        }
    }

    /// Fragments of model output: markup, annotations, ellipses and prose.
    fn markdownish() -> impl Strategy<Value = String> {
        let pieces = vec![
            "# ", "## ", "**", "*", "_", "__", "`", "~~~\n", "> ", "- ", "1. ", "* * *",
            "[continued]", "[Note: x]", "[1]", "(continued)", "...", ". . .", "\u{2026}",
            " ", "  ", "\n", "\n\n", "\n\n\n\n", "\t",
            "Word", "Mr. Smith", "Short one.", "Is it? ", "Yes! ", "\"Hi.\" ",
            "A much longer sentence that keeps going for quite a while before it stops. ",
        ];
        proptest::collection::vec(proptest::sample::select(pieces), 0..60)
            .prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(input in markdownish()) {
            let once = normalize(&input);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_every_pass_is_idempotent(input in markdownish()) {
            for (name, pass) in PASSES {
                let once = pass(&input);
                prop_assert_eq!(pass(&once), once.clone(), "pass {} not idempotent", name);
            }
        }
    }
}
