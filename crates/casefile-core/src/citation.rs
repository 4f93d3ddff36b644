//! Recovering source attribution from free-text answers.
//!
//! The generation service returns plain text, so citations are recovered
//! by matching the answer against the passages that were put in front of
//! the model. Matching is pluggable through [`CitationMatcher`]; the
//! default chain tries explicit references, then verbatim sentences, then
//! lexical overlap.
//!
//! Only passages passed in can ever be cited, so the returned sources are
//! always a subset of what was retrieved.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::embedding::tokenize;
use crate::models::{RetrievedPassage, SourceRef};
use crate::prompt::reference_token;

const EXCERPT_CHARS: usize = 200;
const MIN_QUOTE_CHARS: usize = 20;
const TAG_OPEN: &str = "[source:";

/// Words too common to signal that an answer drew on a passage.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "was", "were", "are", "with", "that", "this", "from", "have", "has",
    "had", "not", "but", "you", "your", "his", "her", "they", "them", "their", "there", "what",
    "when", "where", "who", "which", "into", "about", "been", "also", "than", "then", "its",
    "our", "any", "all", "can", "did", "does", "said",
];

/// Decides whether an answer draws on a passage.
pub trait CitationMatcher: Send + Sync {
    fn name(&self) -> &str;
    fn matches(&self, answer: &str, passage: &RetrievedPassage) -> bool;
}

/// Matches passages the answer refers to explicitly: the full reference
/// tag, the chunk id, or the filename. Ids and filenames only count as
/// whole tokens, so `data.txt` does not cite `a.txt`.
#[derive(Debug, Default, Clone)]
pub struct ReferenceMatcher;

impl CitationMatcher for ReferenceMatcher {
    fn name(&self) -> &str {
        "reference"
    }

    fn matches(&self, answer: &str, passage: &RetrievedPassage) -> bool {
        let tag = reference_token(&passage.filename, &passage.chunk_id).to_ascii_lowercase();
        answer.to_ascii_lowercase().contains(&tag)
            || contains_token(answer, &passage.chunk_id)
            || contains_token(answer, &passage.filename)
    }
}

/// Matches when a sentence of the passage is quoted verbatim
/// (case-insensitive, whitespace-normalized).
#[derive(Debug, Default, Clone)]
pub struct ExactSubstringMatcher;

impl CitationMatcher for ExactSubstringMatcher {
    fn name(&self) -> &str {
        "exact-substring"
    }

    fn matches(&self, answer: &str, passage: &RetrievedPassage) -> bool {
        let answer = squash(answer);
        passage
            .text
            .split(['.', '!', '?', '\n'])
            .map(squash)
            .filter(|s| s.chars().count() >= MIN_QUOTE_CHARS)
            .any(|s| answer.contains(&s))
    }
}

/// Fuzzy matcher based on shared distinctive terms.
///
/// Overlap is `shared / min(|passage terms|, |answer terms|)`; a passage
/// matches when at least `min_shared` terms are shared and the overlap
/// reaches `min_overlap`.
#[derive(Debug, Clone)]
pub struct LexicalOverlapMatcher {
    pub min_overlap: f64,
    pub min_shared: usize,
}

impl Default for LexicalOverlapMatcher {
    fn default() -> Self {
        Self {
            min_overlap: 0.5,
            min_shared: 2,
        }
    }
}

impl LexicalOverlapMatcher {
    pub fn overlap(&self, answer: &str, passage: &str) -> (usize, f64) {
        let a = distinctive_terms(answer);
        let p = distinctive_terms(passage);
        let smaller = a.len().min(p.len());
        if smaller == 0 {
            return (0, 0.0);
        }
        let shared = a.intersection(&p).count();
        (shared, shared as f64 / smaller as f64)
    }
}

impl CitationMatcher for LexicalOverlapMatcher {
    fn name(&self) -> &str {
        "lexical-overlap"
    }

    fn matches(&self, answer: &str, passage: &RetrievedPassage) -> bool {
        let (shared, ratio) = self.overlap(answer, &passage.text);
        shared >= self.min_shared && ratio >= self.min_overlap
    }
}

/// Tries each matcher in order; the first hit wins.
pub struct FallbackMatcher {
    matchers: Vec<Box<dyn CitationMatcher>>,
}

impl FallbackMatcher {
    pub fn new(matchers: Vec<Box<dyn CitationMatcher>>) -> Self {
        Self { matchers }
    }

    /// Reference tags, then verbatim quotes, then lexical overlap.
    pub fn standard(min_overlap: f64) -> Self {
        Self::new(vec![
            Box::new(ReferenceMatcher),
            Box::new(ExactSubstringMatcher),
            Box::new(LexicalOverlapMatcher {
                min_overlap,
                ..LexicalOverlapMatcher::default()
            }),
        ])
    }
}

impl CitationMatcher for FallbackMatcher {
    fn name(&self) -> &str {
        "fallback"
    }

    fn matches(&self, answer: &str, passage: &RetrievedPassage) -> bool {
        self.matchers.iter().any(|m| {
            let hit = m.matches(answer, passage);
            if hit {
                debug!(matcher = m.name(), chunk_id = %passage.chunk_id, "citation matched");
            }
            hit
        })
    }
}

/// A cleaned answer and the passages it was attributed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citations {
    pub cleaned_answer: String,
    pub cited_sources: Vec<SourceRef>,
}

/// Extract citations from `raw_answer`.
///
/// Reference tags are stripped from the returned answer. Sources appear in
/// passage rank order, once per chunk. With no passages the answer is
/// returned as-is and nothing is cited.
pub fn extract_citations(
    raw_answer: &str,
    passages: &[RetrievedPassage],
    matcher: &dyn CitationMatcher,
) -> Citations {
    Citations {
        cleaned_answer: strip_reference_tags(raw_answer),
        cited_sources: cite(raw_answer, passages, matcher),
    }
}

fn cite(
    answer: &str,
    passages: &[RetrievedPassage],
    matcher: &dyn CitationMatcher,
) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    passages
        .iter()
        .filter(|p| matcher.matches(answer, p))
        .filter(|p| seen.insert(p.chunk_id.clone()))
        .map(|p| SourceRef {
            filename: p.filename.clone(),
            chunk_id: p.chunk_id.clone(),
            excerpt: excerpt(&p.text),
        })
        .collect()
}

/// Citation extraction bound to a matcher and the persona's no-evidence
/// reply.
pub struct CitationExtractor {
    matcher: Box<dyn CitationMatcher>,
    no_evidence_reply: String,
}

impl CitationExtractor {
    pub fn new(matcher: Box<dyn CitationMatcher>, no_evidence_reply: impl Into<String>) -> Self {
        Self {
            matcher,
            no_evidence_reply: no_evidence_reply.into(),
        }
    }

    /// Like [`extract_citations`], but the no-evidence reply never earns a
    /// citation. When the reply is only part of the answer, the rest of
    /// the answer is still matched against the passages.
    pub fn extract(&self, raw_answer: &str, passages: &[RetrievedPassage]) -> Citations {
        let reply = squash(&self.no_evidence_reply);
        let answer = squash(raw_answer);
        if reply.is_empty() || !answer.contains(&reply) {
            return extract_citations(raw_answer, passages, self.matcher.as_ref());
        }

        let remainder = answer.replace(&reply, " ");
        Citations {
            cleaned_answer: strip_reference_tags(raw_answer),
            cited_sources: cite(&remainder, passages, self.matcher.as_ref()),
        }
    }

    /// True when the answer is the no-evidence reply and nothing else.
    pub fn is_no_evidence_reply(&self, answer: &str) -> bool {
        let reply = squash(&self.no_evidence_reply);
        !reply.is_empty() && squash(answer) == reply
    }
}

/// Remove every `[source: …]` tag (any case) and the space before it.
/// The rest of the answer is left as written.
pub fn strip_reference_tags(text: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    while let Some(pos) = lower[last..].find(TAG_OPEN) {
        let open = last + pos;
        let Some(close) = lower[open..].find(']') else {
            break;
        };
        let kept = &text[last..open];
        out.push_str(kept.strip_suffix(' ').unwrap_or(kept));
        last = open + close + 1;
    }
    out.push_str(&text[last..]);
    out.trim().to_string()
}

/// Whether `needle` occurs in `haystack` as a whole token, ignoring ASCII
/// case. A trailing full stop is allowed when it ends a sentence.
fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let hay = haystack.to_ascii_lowercase();
    let needle = needle.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = hay[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before = hay[..start].chars().next_back();
        let after = hay[end..].chars().next();
        let open = before.map_or(true, |c| !is_name_char(c));
        let closed = match after {
            None => true,
            Some('.') => hay[end + 1..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric()),
            Some(c) => !is_name_char(c),
        };
        if open && closed {
            return true;
        }
        from = start + hay[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let head: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn squash(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn distinctive_terms(text: &str) -> HashSet<String> {
    tokenize(text)
        .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}
