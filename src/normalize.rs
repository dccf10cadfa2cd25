//! Company name normalization
//!
//! Canonicalizes noisy spreadsheet names into stable lookup keys.
//! Stages, applied in this order:
//! - Collapse every whitespace run (tabs, U+3000 included) to one space, trim the ends
//! - Remove business suffix phrases ("and subsidiaries", version and plan-type markers)
//! - Strip status markers from both ends, bracketed or bare
//! - Fold full-width ASCII forms to half-width
//! - Canonicalize bracket style to `(` `)`
//! - Lowercase
//!
//! The stage order is load-bearing: fallback identifiers are derived from the
//! normalized key, so reordering changes the key (and the identifier) for names
//! that have already been seen.

use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

/// Status markers stripped from either end of a name (compared after width/case folding)
const STATUS_MARKERS: &[&str] = &[
    "transferred-out",
    "transferred out",
    "transferred",
    "account closed",
    "closed",
    "terminated",
    "frozen",
    "suspended",
    "dormant",
    "cancelled",
    "canceled",
    "deregistered",
    "liquidated",
    "in liquidation",
    "under liquidation",
    "merged",
    "expired",
    "inactive",
    "lapsed",
    "withdrawn",
    "surrendered",
    "void",
    "invalid",
    "duplicate",
    "deleted",
    "archived",
    "on hold",
    "migrated",
    "pending closure",
];

/// Trailing business phrases that do not identify the company
const SUFFIX_PHRASES: &[&str] = &[
    "and its subsidiaries",
    "and subsidiaries",
    "& subsidiaries",
    "and affiliates",
    "& affiliates",
];

/// Trailing version / plan-type markers, matched against the folded view
// constant pattern, covered by test_suffix_phrases
static TRAILING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\s\-_/,]*(?:\(\s*)?(?:(?:v|ver\.?|version)\s*\d+(?:\.\d+)*|(?:db|dc|annuity|pension|retirement|401k)\s+plan)(?:\s*\))?$",
    )
    .unwrap()
});

/// Deterministic name canonicalizer.
///
/// Cheap to construct; holds no state besides the static tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizationService;

impl NormalizationService {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw name. Empty input yields an empty string.
    ///
    /// ```
    /// use company_id_resolver::NormalizationService;
    ///
    /// let svc = NormalizationService::new();
    /// assert_eq!(svc.normalize(" Example Co (transferred-out) "), "example co");
    /// assert_eq!(svc.normalize("ＡＢＣ Holdings【Closed】"), "abc holdings");
    /// ```
    pub fn normalize(&self, raw: &str) -> String {
        let mut chars = collapse_whitespace(raw);

        loop {
            let mut changed = false;
            while strip_suffix_phrase(&mut chars) || strip_trailing_marker(&mut chars) {
                changed = true;
            }
            while strip_status_marker(&mut chars) {
                changed = true;
            }
            if !changed {
                break;
            }
        }

        chars.into_iter().map(fold_char).collect()
    }

    /// Normalize an optional field; `None` and blank input both yield `None`.
    pub fn normalize_opt(&self, raw: Option<&str>) -> Option<String> {
        raw.map(|s| self.normalize(s)).filter(|s| !s.is_empty())
    }
}

fn collapse_whitespace(raw: &str) -> Vec<char> {
    let mut chars = Vec::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !chars.is_empty() {
            chars.push(' ');
        }
        chars.extend(word.chars());
    }
    chars
}

/// Width, bracket and case folding for a single character.
///
/// Strictly one char in, one char out, so positions in the folded view line up
/// with positions in the original.
fn fold_char(c: char) -> char {
    let c = match c {
        '\u{3000}' | '\u{FF01}'..='\u{FF5E}' => std::iter::once(c).nfkc().next().unwrap_or(c),
        _ => c,
    };
    let c = match c {
        '[' | '【' | '〔' | '〖' | '{' => '(',
        ']' | '】' | '〕' | '〗' | '}' => ')',
        _ => c,
    };
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

fn folded(chars: &[char]) -> String {
    chars.iter().copied().map(fold_char).collect()
}

fn trim_chars(chars: &mut Vec<char>) {
    while chars
        .last()
        .is_some_and(|c| c.is_whitespace() || matches!(c, ',' | '-'))
    {
        chars.pop();
    }
    let lead = chars.iter().take_while(|c| c.is_whitespace()).count();
    chars.drain(..lead);
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

/// Remove one trailing suffix phrase; returns whether anything was removed.
fn strip_suffix_phrase(chars: &mut Vec<char>) -> bool {
    let view: Vec<char> = folded(chars).chars().collect();
    for phrase in SUFFIX_PHRASES {
        let p: Vec<char> = phrase.chars().collect();
        if view.len() < p.len() || view[view.len() - p.len()..] != p[..] {
            continue;
        }
        let start = view.len() - p.len();
        if start > 0 && is_word_char(view[start - 1]) && is_word_char(p[0]) {
            continue;
        }
        chars.truncate(start);
        trim_chars(chars);
        return true;
    }
    false
}

fn strip_trailing_marker(chars: &mut Vec<char>) -> bool {
    let view = folded(chars);
    let Some(m) = TRAILING_MARKER_RE.find(&view) else {
        return false;
    };
    let start = view[..m.start()].chars().count();
    let first = view[m.start()..].chars().next();
    let prev = view[..m.start()].chars().next_back();
    // "Conv2" keeps its digits: a bare marker must start on a word boundary
    if prev.is_some_and(is_word_char) && first.is_some_and(is_word_char) {
        return false;
    }
    // never strip the whole name down to nothing via a version marker
    if start == 0 {
        return false;
    }
    chars.truncate(start);
    trim_chars(chars);
    true
}

/// Strip one status marker from the start or end, bracketed or bare.
fn strip_status_marker(chars: &mut Vec<char>) -> bool {
    let view: Vec<char> = folded(chars).chars().collect();
    for marker in STATUS_MARKERS {
        let m: Vec<char> = marker.chars().collect();

        // bracketed: "(closed)" at either end, no boundary check
        let bracketed: Vec<char> = std::iter::once('(')
            .chain(m.iter().copied())
            .chain(std::iter::once(')'))
            .collect();
        if view.ends_with(&bracketed) {
            chars.truncate(view.len() - bracketed.len());
            trim_chars(chars);
            return true;
        }
        if view.starts_with(&bracketed) {
            chars.drain(..bracketed.len());
            trim_chars(chars);
            return true;
        }

        // bare: must sit on a word boundary
        if view.ends_with(&m) {
            let start = view.len() - m.len();
            if start == 0 || !is_word_char(view[start - 1]) {
                chars.truncate(start);
                trim_chars(chars);
                return true;
            }
        }
        if view.starts_with(&m) && (view.len() == m.len() || !is_word_char(view[m.len()])) {
            chars.drain(..m.len());
            trim_chars(chars);
            return true;
        }
    }
    false
}
