//! Append-only vault of markdown notes organized by date.
//!
//! Layout: `<root>/<daily_dir>/<YYYY-MM-DD>/<YYYY-MM-DD_HHMMSS_<slug>>.md`.
//! A missing root never fails construction — the store reports
//! `vault_available = false` and write operations surface
//! [`KnowledgeError::VaultUnavailable`] while reads return empty results.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use udo_config::VaultConfig;

use crate::error::KnowledgeError;
use crate::frontmatter::{Frontmatter, split_note};
use crate::schema::NoteSummary;

/// Characters never allowed in note filenames.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of the sanitized title portion, in characters.
const MAX_SLUG_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct VaultStore {
    root: Option<PathBuf>,
    daily_dir: String,
    available: bool,
}

impl VaultStore {
    /// Locate the vault described by `config`.  Absence is detected and
    /// recorded, not raised.
    pub fn new(config: &VaultConfig) -> Self {
        let root = if config.path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.path))
        };

        let available = root.as_deref().map(Path::is_dir).unwrap_or(false);
        match (&root, available) {
            (Some(path), true) => {
                if !path.join(&config.marker).is_dir() {
                    debug!(root = %path.display(), marker = %config.marker, "vault marker missing — treating directory as vault anyway");
                }
            }
            (Some(path), false) => {
                warn!(root = %path.display(), "vault root not found — sync will be degraded");
            }
            (None, _) => {
                warn!("no vault path configured — sync will be degraded");
            }
        }

        Self {
            root,
            daily_dir: config.daily_dir.clone(),
            available,
        }
    }

    pub fn vault_available(&self) -> bool {
        self.available
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn daily_notes_dir(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(&self.daily_dir))
    }

    /// Persist a note, returning its final path.
    ///
    /// The filename derives from `(timestamp, title)`; collisions append
    /// `-2`, `-3`, … until unique.  Content is written to a temp sibling,
    /// fsync'd, then renamed so no partial file can exist under the target
    /// name.
    pub async fn write_note(
        &self,
        timestamp: DateTime<Local>,
        title: &str,
        frontmatter: &Frontmatter,
        body: &str,
    ) -> Result<PathBuf, KnowledgeError> {
        if !self.available {
            return Err(KnowledgeError::VaultUnavailable);
        }
        let day_dir = self
            .daily_notes_dir()
            .expect("available vault always has a root")
            .join(timestamp.format("%Y-%m-%d").to_string());
        tokio::fs::create_dir_all(&day_dir).await?;

        let slug = {
            let sanitized = sanitize_title(title);
            if sanitized.is_empty() {
                "note".to_string()
            } else {
                sanitized
            }
        };
        let stem = format!(
            "{}_{}_{}",
            timestamp.format("%Y-%m-%d"),
            timestamp.format("%H%M%S"),
            slug
        );

        let mut path = day_dir.join(format!("{stem}.md"));
        let mut suffix = 2u32;
        while path.exists() {
            path = day_dir.join(format!("{stem}-{suffix}.md"));
            suffix += 1;
        }

        let mut content = frontmatter.render();
        content.push('\n');
        content.push_str(body);

        let tmp_path = day_dir.join(format!(
            ".{}.tmp",
            path.file_name()
                .expect("note path always has a filename")
                .to_string_lossy()
        ));
        let write_result: Result<(), std::io::Error> = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(path = %path.display(), "note written");
        Ok(path)
    }

    /// Parse a note into `(frontmatter, body)`.  Malformed frontmatter lines
    /// are ignored — whatever parsed is returned.
    pub fn read_note(&self, path: &Path) -> Result<(Frontmatter, String), KnowledgeError> {
        let content = fs::read_to_string(path)?;
        Ok(split_note(&content))
    }

    /// Every note file under the daily tree, unordered.  Empty when the
    /// vault is unavailable.
    pub fn list_note_files(&self) -> Vec<PathBuf> {
        let Some(daily) = self.daily_notes_dir() else {
            return Vec::new();
        };
        let mut files = Vec::new();
        let Ok(day_dirs) = fs::read_dir(&daily) else {
            return files;
        };
        for day_dir in day_dirs.flatten() {
            let Ok(entries) = fs::read_dir(day_dir.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md") {
                    files.push(path);
                }
            }
        }
        files
    }

    /// Date a note belongs to, taken from its day directory name.
    pub fn note_date(path: &Path) -> Option<NaiveDate> {
        let dir = path.parent()?.file_name()?.to_str()?;
        NaiveDate::parse_from_str(dir, "%Y-%m-%d").ok()
    }

    /// Summaries of notes created within the last `days` days, most recent
    /// first.  Unreadable notes are skipped.
    pub fn recent_notes(&self, days: u32) -> Vec<NoteSummary> {
        let today = Local::now().date_naive();
        let cutoff = today - chrono::Duration::days(i64::from(days));

        let mut summaries: Vec<NoteSummary> = self
            .list_note_files()
            .into_iter()
            .filter_map(|path| {
                let date = Self::note_date(&path)?;
                if date < cutoff {
                    return None;
                }
                let (frontmatter, body) = self.read_note(&path).ok()?;
                let title = body
                    .lines()
                    .find_map(|line| line.strip_prefix("# "))
                    .unwrap_or_default()
                    .to_string();
                Some(NoteSummary {
                    path: path.display().to_string(),
                    date,
                    title,
                    event_type: frontmatter
                        .get("event_type")
                        .and_then(|v| v.as_text())
                        .map(str::to_string),
                    events_count: frontmatter.get("events_count").and_then(|v| v.as_int()),
                })
            })
            .collect();

        summaries.sort_by(|left, right| {
            right
                .date
                .cmp(&left.date)
                .then_with(|| right.path.cmp(&left.path))
        });
        summaries
    }

    /// Days elapsed since the note's date directory, for freshness scoring.
    /// Notes outside a date directory are treated as stale.
    pub fn freshness_days(path: &Path) -> i64 {
        match Self::note_date(path) {
            Some(date) => (Local::now().date_naive() - date).num_days().max(0),
            None => 365,
        }
    }
}

/// Strip the reserved character set and control characters, collapse
/// whitespace runs to `-`, and cap the result at 80 characters.
///
/// Non-ASCII letters pass through verbatim — Korean titles must survive
/// sanitization with every codepoint intact and in order.
pub fn sanitize_title(raw: &str) -> String {
    let mut collapsed = String::with_capacity(raw.len());
    let mut pending_separator = false;
    for ch in raw.chars() {
        if RESERVED.contains(&ch) || ch.is_control() {
            continue;
        }
        if ch.is_whitespace() {
            pending_separator = !collapsed.is_empty();
            continue;
        }
        if pending_separator {
            collapsed.push('-');
            pending_separator = false;
        }
        collapsed.push(ch);
    }
    collapsed.chars().take(MAX_SLUG_CHARS).collect()
}
