//! Three-tier retrieval over vault notes.
//!
//! Tier 1 matches `Debug-<keyword>-*.md` filenames (weight 10), tier 2
//! evaluates frontmatter metadata (weight 5), tier 3 scans note bodies for
//! substrings (weight 1, scaled by match count).  Per-document tier scores
//! are aggregated, then ranked by
//!
//! ```text
//! relevance = tier1*10 + tier2*5 + tier3*1 + freshness_bonus*2 + usefulness*3
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::trace;

use crate::schema::SearchResult;
use crate::vault::VaultStore;

/// Common words excluded from the keyword set.  Matches the feed the search
/// index was tuned against; extending it changes ranking, so keep additions
/// deliberate.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "in", "on", "at", "to",
    "for", "of", "with", "how", "what", "when", "where", "why", "which",
];

/// Punctuation stripped from keyword edges.
const EDGE_PUNCT: &[char] = &[
    '.', ',', ';', ':', '!', '?', '"', '\'', '(', ')', '[', ']', '{', '}',
];

/// Snippet context captured around a tier-3 match, in bytes.
const SNIPPET_LEN: usize = 200;

/// Lowercase, split on whitespace, strip edge punctuation, drop stop words
/// and tokens shorter than 3 characters.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .map(|word| word.trim_matches(|c: char| EDGE_PUNCT.contains(&c)).to_string())
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .filter(|word| word.chars().count() >= 3)
        .collect()
}

/// Read-only per-document usefulness lookup, aggregated from user feedback
/// by an external collaborator.  Values range −5.0 to +5.0.
pub trait UsefulnessSource: Send + Sync {
    fn usefulness(&self, document_id: &str) -> f64;
}

/// Default source when no feedback aggregation is wired in.
pub struct NoFeedback;

impl UsefulnessSource for NoFeedback {
    fn usefulness(&self, _document_id: &str) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// When set, tier 2 requires the note's `error_type` to match exactly.
    pub error_type: Option<String>,
    pub max_results: usize,
    pub min_score: f64,
    /// Tier 3 (full-text) participation.  The tier-1 error-resolution path
    /// disables it to stay within its latency budget.
    pub content_tier: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            error_type: None,
            max_results: 10,
            min_score: 5.0,
            content_tier: true,
        }
    }
}

#[derive(Default)]
struct TierScores {
    tier1: f64,
    tier2: f64,
    tier3: f64,
    snippet: String,
}

pub struct SearchEngine {
    vault: Arc<VaultStore>,
    usefulness: Arc<dyn UsefulnessSource>,
}

impl SearchEngine {
    pub fn new(vault: Arc<VaultStore>, usefulness: Arc<dyn UsefulnessSource>) -> Self {
        Self { vault, usefulness }
    }

    pub fn vault(&self) -> &Arc<VaultStore> {
        &self.vault
    }

    /// Run the staged pipeline and return ranked results at or above
    /// `min_score`.  Read failures degrade to empty results.
    pub fn search(&self, query: &str, opts: &SearchOptions) -> Vec<SearchResult> {
        let keywords = extract_keywords(query);
        if keywords.is_empty() && opts.error_type.is_none() {
            return Vec::new();
        }

        let filename_patterns = tier1_patterns(&keywords);
        let files = self.vault.list_note_files();
        let mut scored: HashMap<String, TierScores> = HashMap::new();

        for path in &files {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();

            // Tier 1 — filename pattern match, one hit per matching keyword.
            let tier1_hits = filename_patterns
                .iter()
                .filter(|pattern| pattern.is_match(&filename))
                .count();
            if tier1_hits > 0 {
                scored.entry(path.display().to_string()).or_default().tier1 +=
                    10.0 * tier1_hits as f64;
            }

            // Tiers 2 and 3 need the note content.
            let Ok((frontmatter, body)) = self.vault.read_note(path) else {
                continue;
            };

            let error_type_ok = match &opts.error_type {
                Some(wanted) => frontmatter
                    .get("error_type")
                    .and_then(|v| v.as_text())
                    .map(|found| found.eq_ignore_ascii_case(wanted))
                    .unwrap_or(false),
                None => true,
            };
            if error_type_ok {
                let tags: Vec<String> = frontmatter
                    .get("tags")
                    .and_then(|v| v.as_list())
                    .map(|tags| tags.iter().map(|t| t.to_lowercase()).collect())
                    .unwrap_or_default();
                let category = frontmatter
                    .get("error_category")
                    .and_then(|v| v.as_text())
                    .map(str::to_lowercase);

                let tier2_hits = keywords
                    .iter()
                    .filter(|kw| {
                        tags.iter().any(|tag| tag == *kw)
                            || category.as_deref() == Some(kw.as_str())
                    })
                    .count();
                if tier2_hits > 0 {
                    scored.entry(path.display().to_string()).or_default().tier2 +=
                        5.0 * tier2_hits as f64;
                }
            }

            if opts.content_tier {
                let lower_body = body.to_lowercase();
                let match_count: usize = keywords
                    .iter()
                    .map(|kw| lower_body.matches(kw.as_str()).count())
                    .sum();
                if match_count > 0 {
                    let entry = scored.entry(path.display().to_string()).or_default();
                    entry.tier3 += 1.0 * (1.0 + 0.1 * match_count as f64);
                    if entry.snippet.is_empty() {
                        if let Some(kw) = keywords
                            .iter()
                            .find(|kw| lower_body.contains(kw.as_str()))
                        {
                            let at = lower_body.find(kw.as_str()).unwrap_or(0);
                            entry.snippet = snippet_around(&body, at);
                        }
                    }
                }
            }
        }

        let mut results: Vec<SearchResult> = scored
            .into_iter()
            .map(|(doc_path, tiers)| {
                let path = Path::new(&doc_path);
                let freshness = VaultStore::freshness_days(path);
                let freshness_bonus = freshness_bonus(freshness);
                let document_id = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| doc_path.clone());
                let usefulness = self.usefulness.usefulness(&document_id);

                let relevance = tiers.tier1 * 10.0
                    + tiers.tier2 * 5.0
                    + tiers.tier3 * 1.0
                    + freshness_bonus * 2.0
                    + usefulness * 3.0;

                trace!(
                    doc = %document_id,
                    tier1 = tiers.tier1,
                    tier2 = tiers.tier2,
                    tier3 = tiers.tier3,
                    relevance,
                    "scored document"
                );

                SearchResult {
                    document_id,
                    document_path: doc_path,
                    relevance_score: relevance,
                    tier1_score: tiers.tier1,
                    tier2_score: tiers.tier2,
                    tier3_score: tiers.tier3,
                    freshness_bonus,
                    usefulness_score: usefulness,
                    matched_query: query.to_string(),
                    snippet: tiers.snippet,
                }
            })
            .filter(|result| result.relevance_score >= opts.min_score)
            .collect();

        results.sort_by(|left, right| {
            right
                .relevance_score
                .total_cmp(&left.relevance_score)
                .then_with(|| left.document_path.cmp(&right.document_path))
        });
        results.truncate(opts.max_results);
        results
    }
}

/// Tier-1 patterns: `Debug-<keyword>-*.md`, case-insensitive, with a
/// trailing `Error` suffix stripped from the keyword first.  Keywords that
/// normalize below 3 characters are skipped.
fn tier1_patterns(keywords: &[String]) -> Vec<Regex> {
    keywords
        .iter()
        .filter_map(|kw| {
            let normalized = kw.strip_suffix("error").unwrap_or(kw);
            if normalized.chars().count() < 3 {
                return None;
            }
            Regex::new(&format!(r"(?i)^Debug-{}-.*\.md$", regex::escape(normalized))).ok()
        })
        .collect()
}

fn freshness_bonus(days: i64) -> f64 {
    if days < 7 {
        5.0
    } else if days < 30 {
        3.0
    } else if days < 90 {
        1.0
    } else {
        0.0
    }
}

/// Up to [`SNIPPET_LEN`] bytes of context starting at `at`, snapped to char
/// boundaries of the original body.
fn snippet_around(body: &str, at: usize) -> String {
    let mut start = at.min(body.len());
    while start > 0 && !body.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + SNIPPET_LEN).min(body.len());
    while end < body.len() && !body.is_char_boundary(end) {
        end += 1;
    }
    body[start..end].to_string()
}
