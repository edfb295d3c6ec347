//! Keyword search over the house manual.
//!
//! A query is normalized into tokens, every token must match a record (AND),
//! and matching records are ranked by how strongly they match.
//!
//! Per-token scores, best applicable wins:
//!
//! | match                                             | score |
//! |---------------------------------------------------|-------|
//! | token equals a keyword                            | 10    |
//! | title contains token                              | 8     |
//! | keyword contains token                            | 6     |
//! | token contains keywords                           | 6 per keyword |
//! | body contains token                               | 3     |
//! | bigram similarity with title or keyword ≥ 0.5     | 2     |

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::house::manual::ManualRecord;

const SCORE_KEYWORD_EXACT: u32 = 10;
const SCORE_TITLE: u32 = 8;
const SCORE_KEYWORD_PARTIAL: u32 = 6;
const SCORE_BODY: u32 = 3;
const SCORE_SIMILAR: u32 = 2;

/// Minimum Dice coefficient for an approximate match.
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

/// Tokens that carry no meaning on their own.
const FILLER_TOKENS: &[&str] = &[
    "教えて", "おしえて", "教えてください", "ください", "について", "とは", "って", "何", "なに",
    "どう", "どこ", "いつ", "ですか", "ますか", "知りたい", "the", "a", "an", "what", "how", "is",
    "are", "about", "please", "where", "when",
];

/// Trailing particles stripped from a token, longest first.
const FILLER_SUFFIXES: &[&str] = &[
    "について教えて", "を教えて", "教えて", "について", "ってなに", "って何", "ですか", "ますか", "とは",
    "って", "は", "を", "が", "の", "に", "で", "へ", "も", "か", "？", "?",
];

/// Fold full-width ASCII and the ideographic space to their half-width forms.
fn fold_width(c: char) -> char {
    match c {
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        '\u{3000}' => ' ',
        _ => c,
    }
}

/// Particles that join two words inside an unspaced Japanese question.
const INNER_PARTICLES: &[char] = &['の', 'は', 'を', 'が', 'に', 'で', 'と', 'も', 'や'];

fn is_hiragana(c: char) -> bool {
    matches!(c, '\u{3041}'..='\u{309F}')
}

fn is_ideograph(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}')
}

/// Split a token at particles that sit between two non-hiragana characters
/// (`キッチンのルール` becomes `キッチン`, `ルール`). Particles next to
/// hiragana belong to a verb or a longer phrase and stay.
fn split_particles(token: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = token.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    for i in 1..chars.len().saturating_sub(1) {
        let (pos, c) = chars[i];
        if INNER_PARTICLES.contains(&c) && !is_hiragana(chars[i - 1].1) && !is_hiragana(chars[i + 1].1) {
            parts.push(&token[start..pos]);
            start = pos + c.len_utf8();
        }
    }
    parts.push(&token[start..]);
    parts
}

fn is_separator(c: char) -> bool {
    c.is_whitespace()
        || (c.is_ascii_punctuation() && c != '-' && c != '/')
        || matches!(c, '、' | '。' | '・' | '「' | '」' | '『' | '』' | '（' | '）' | '！' | '？' | '〜' | '…')
}

fn strip_suffixes(token: &str) -> &str {
    let mut current = token;
    loop {
        let stripped = FILLER_SUFFIXES
            .iter()
            .find_map(|suffix| current.strip_suffix(suffix).filter(|rest| !rest.is_empty()));
        match stripped {
            Some(rest) => current = rest,
            None => return current,
        }
    }
}

/// Normalize a free-text query into search tokens.
///
/// Trims, lowercases, folds full-width characters, splits on whitespace,
/// punctuation and particles between words, drops filler words and strips
/// trailing particles. Duplicate tokens are removed, first occurrence wins.
pub fn normalize_query(query: &str) -> Vec<String> {
    let folded: String = query.trim().chars().map(fold_width).collect::<String>().to_lowercase();

    let mut seen = HashSet::new();
    folded
        .split(is_separator)
        .filter(|t| !t.is_empty())
        .filter(|t| !FILLER_TOKENS.contains(t))
        .flat_map(split_particles)
        .filter(|t| !t.is_empty())
        .map(strip_suffixes)
        .filter(|t| !FILLER_TOKENS.contains(t))
        .map(str::to_string)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn normalize_field(s: &str) -> String {
    s.chars().map(fold_width).collect::<String>().to_lowercase()
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Sørensen–Dice coefficient over character bigrams. Single characters
/// compare by equality.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let (ba, bb) = (bigrams(a), bigrams(b));
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }
    let mut remaining = bb.clone();
    let mut shared = 0usize;
    for g in &ba {
        if let Some(pos) = remaining.iter().position(|x| x == g) {
            remaining.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f64 / (ba.len() + bb.len()) as f64
}

/// Normalized text of one record, computed once per search.
struct Haystack {
    title: String,
    body: String,
    keywords: Vec<String>,
}

impl Haystack {
    fn new(record: &ManualRecord) -> Self {
        Self {
            title: normalize_field(&record.title),
            body: normalize_field(&record.body),
            keywords: record.keywords.iter().map(|k| normalize_field(k)).collect(),
        }
    }

    fn score(&self, token: &str) -> u32 {
        if self.keywords.iter().any(|k| k == token) {
            return SCORE_KEYWORD_EXACT;
        }
        if self.title.contains(token) {
            return SCORE_TITLE;
        }
        // A compound token ("キッチンルール") scores once per keyword it covers.
        let covered = self
            .keywords
            .iter()
            .filter(|k| is_inner_keyword(k) && token.contains(k.as_str()))
            .collect::<HashSet<_>>()
            .len() as u32;
        if covered > 0 {
            return SCORE_KEYWORD_PARTIAL * covered;
        }
        if self.keywords.iter().any(|k| k.contains(token)) {
            return SCORE_KEYWORD_PARTIAL;
        }
        if self.body.contains(token) {
            return SCORE_BODY;
        }
        let similar = std::iter::once(&self.title)
            .chain(self.keywords.iter())
            .any(|field| similarity(token, field) >= SIMILARITY_THRESHOLD);
        if similar { SCORE_SIMILAR } else { 0 }
    }
}

/// Whether a keyword may match inside a longer token. Single kana are too
/// common to mean anything; a single kanji (`鍵`, `夜`) is a word.
fn is_inner_keyword(keyword: &str) -> bool {
    let mut chars = keyword.chars();
    match (chars.next(), chars.next()) {
        (Some(_), Some(_)) => true,
        (Some(c), None) => is_ideograph(c),
        _ => false,
    }
}

/// A matching record and its score.
#[derive(Debug, Clone)]
pub struct SearchHit<'a> {
    pub record: &'a ManualRecord,
    pub score: u32,
}

fn by_title(a: &ManualRecord, b: &ManualRecord) -> Ordering {
    a.title.cmp(&b.title).then(a.id.cmp(&b.id))
}

/// Rank `records` against `query`, best match first.
///
/// An empty normalized query returns every record in title order.
pub fn search<'a>(records: &'a [ManualRecord], query: &str) -> Vec<SearchHit<'a>> {
    let tokens = normalize_query(query);

    if tokens.is_empty() {
        let mut all: Vec<_> = records.iter().map(|record| SearchHit { record, score: 0 }).collect();
        all.sort_by(|a, b| by_title(a.record, b.record));
        return all;
    }

    let mut hits: Vec<SearchHit<'a>> = records
        .iter()
        .filter_map(|record| {
            let hay = Haystack::new(record);
            let mut total = 0;
            for token in &tokens {
                let s = hay.score(token);
                if s == 0 {
                    return None;
                }
                total += s;
            }
            Some(SearchHit { record, score: total })
        })
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| by_title(a.record, b.record)));
    hits
}
