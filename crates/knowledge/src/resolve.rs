//! Past-solution lookup for error messages.
//!
//! The fast path of staged error resolution: extract an error *kind* from
//! the raw message, run a tier-1 + tier-2 search constrained to that kind,
//! and pull the `## Solution` section out of the best note.  Misses escalate
//! to slower tiers owned by other collaborators.

use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::search::{SearchEngine, SearchOptions, extract_keywords};

static HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}$").expect("static regex"));

/// Extract the error kind used as the `error_type` search key.
///
/// The kind is the word before the first `:` when one exists, otherwise the
/// first whitespace-delimited token.  Bare HTTP status codes become
/// `HTTP-<code>` so `401 Unauthorized` and `401: Unauthorized` collapse to
/// the same kind.
pub fn extract_error_kind(error: &str) -> String {
    let head = match error.split_once(':') {
        Some((before, _)) => before,
        None => error,
    };
    let token = head.split_whitespace().next().unwrap_or("").trim();

    if HTTP_STATUS.is_match(token) {
        return format!("HTTP-{token}");
    }
    token.to_string()
}

/// Outcome of a tier-1 lookup, with the elapsed time the caller reports.
#[derive(Debug, Clone)]
pub struct ResolutionHit {
    pub solution: Option<String>,
    pub elapsed_ms: f64,
}

pub struct ErrorResolver {
    search: Arc<SearchEngine>,
    min_score: f64,
}

impl ErrorResolver {
    pub fn new(search: Arc<SearchEngine>) -> Self {
        Self {
            search,
            min_score: 5.0,
        }
    }

    /// Attempt to resolve `error` from past notes.  Returns `None` when no
    /// note scores above the threshold or the winning note carries no
    /// solution section.
    pub fn resolve_tier1(&self, error: &str) -> ResolutionHit {
        let started = Instant::now();
        let kind = extract_error_kind(error);

        // Search the message minus its kind prefix; the kind itself is the
        // frontmatter constraint.
        let remainder = error
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(error);
        let query = if extract_keywords(remainder).is_empty() {
            error.to_string()
        } else {
            remainder.to_string()
        };

        let opts = SearchOptions {
            error_type: Some(kind.clone()),
            max_results: 3,
            min_score: self.min_score,
            content_tier: false,
        };
        let results = self.search.search(&query, &opts);

        let solution = results.iter().find_map(|result| {
            let path = std::path::Path::new(&result.document_path);
            let (_, body) = self.search_vault_read(path)?;
            extract_solution_block(&body)
        });

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &solution {
            Some(_) => info!(kind = %kind, elapsed_ms, "tier-1 resolution hit"),
            None => debug!(kind = %kind, elapsed_ms, "tier-1 resolution miss"),
        }

        ResolutionHit {
            solution,
            elapsed_ms,
        }
    }

    fn search_vault_read(
        &self,
        path: &std::path::Path,
    ) -> Option<(crate::frontmatter::Frontmatter, String)> {
        self.search.vault().read_note(path).ok()
    }
}

/// Pull the text of the `## Solution` section out of a note body.  The
/// section ends at the next `## ` heading or end of input.
pub fn extract_solution_block(body: &str) -> Option<String> {
    let mut lines = body.lines();
    let mut collected: Option<Vec<&str>> = None;

    while let Some(line) = lines.next() {
        if line.trim() == "## Solution" {
            collected = Some(Vec::new());
            for line in lines.by_ref() {
                if line.starts_with("## ") {
                    break;
                }
                collected.as_mut().expect("just set").push(line);
            }
            break;
        }
    }

    let text = collected?.join("\n").trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_word_before_first_colon() {
        assert_eq!(
            extract_error_kind("ModuleNotFoundError: No module named 'pandas'"),
            "ModuleNotFoundError"
        );
        assert_eq!(
            extract_error_kind("PermissionError: Access denied"),
            "PermissionError"
        );
    }

    #[test]
    fn kind_falls_back_to_first_token() {
        assert_eq!(extract_error_kind("Segfault in worker thread"), "Segfault");
    }

    #[test]
    fn http_status_codes_get_the_http_prefix() {
        assert_eq!(extract_error_kind("401 Unauthorized"), "HTTP-401");
        assert_eq!(extract_error_kind("503: Service Unavailable"), "HTTP-503");
        // Four digits is not a status code.
        assert_eq!(extract_error_kind("4011 weird"), "4011");
    }

    #[test]
    fn solution_block_ends_at_next_heading() {
        let body = "## Event 1: error_resolution\n\n**Error**: x\n\n## Solution\n\npip install pandas\n\n## Event 2: task_completion\n\ndone\n";
        assert_eq!(
            extract_solution_block(body),
            Some("pip install pandas".to_string())
        );
    }

    #[test]
    fn missing_or_empty_solution_yields_none() {
        assert_eq!(extract_solution_block("# Note\n\nno fix here\n"), None);
        assert_eq!(extract_solution_block("## Solution\n\n\n## Next\n"), None);
    }
}
