//! Sync coordination: batch notes, observation fan-out, lifecycle.
//!
//! The coordinator binds the event queue to the vault (every flush becomes
//! one note), derives belief observations from flushed events via the
//! configured rule table, keeps the sync history that backs
//! `sync_statistics`, and owns the periodic-backup loop.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use udo_config::{AppConfig, ObservationRule};
use udo_knowledge::belief::{BeliefTracker, Phase, UncertaintyVector};
use udo_knowledge::breaker::{BreakerError, CircuitBreaker};
use udo_knowledge::error::KnowledgeError;
use udo_knowledge::frontmatter::{Frontmatter, FrontmatterValue};
use udo_knowledge::resolve::extract_error_kind;
use udo_knowledge::schema::{Event, EventPayload};
use udo_knowledge::search::extract_keywords;
use udo_knowledge::state::{DEAD_LETTER_LOG, JsonlLog, SYNC_HISTORY_LOG};
use udo_knowledge::vault::VaultStore;

use crate::queue::{BatchSink, SyncQueue};

/// Deadline on a single vault write; a breach counts as a breaker failure.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// One flush outcome, kept in memory and persisted across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub at: DateTime<Utc>,
    pub events: usize,
    pub note_path: Option<String>,
    pub success: bool,
    pub by_event_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatistics {
    pub total_syncs: usize,
    pub total_events: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub by_event_type: BTreeMap<String, usize>,
    /// Average events per persisted note — the debouncer's win.
    pub batching_rate: f64,
    pub pending_events: usize,
    pub dropped_events: u64,
    pub vault_available: bool,
}

/// External "anything changed?" probe for the periodic backup.  Typically a
/// VCS status check; failures are logged by the loop and never propagate.
pub trait ChangeProbe: Send + Sync + 'static {
    fn has_changes(&self) -> impl Future<Output = Result<bool>> + Send;
}

/// `git status --porcelain` probe.  Best-effort: a missing `git` binary or
/// a non-repository directory reads as "no changes".
pub struct GitChangeProbe {
    repo_root: std::path::PathBuf,
}

impl GitChangeProbe {
    pub fn new(repo_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }
}

impl ChangeProbe for GitChangeProbe {
    async fn has_changes(&self) -> Result<bool> {
        let out = tokio::process::Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&self.repo_root)
            .output()
            .await;

        match out {
            Ok(o) if o.status.success() => {
                Ok(!String::from_utf8_lossy(&o.stdout).trim().is_empty())
            }
            Ok(o) => {
                let stderr = String::from_utf8_lossy(&o.stderr);
                debug!(%stderr, "git status failed — treating as no changes");
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // git not installed — skip silently
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Persists each batch as a single vault note and fans observations out to
/// the belief tracker.
pub struct NoteBatchSink {
    vault: Arc<VaultStore>,
    breaker: CircuitBreaker<KnowledgeError>,
    beliefs: Arc<Mutex<BeliefTracker>>,
    rules: Vec<ObservationRule>,
    history: Arc<Mutex<Vec<SyncRecord>>>,
}

impl NoteBatchSink {
    async fn record(&self, batch: &[Event], note_path: Option<String>, success: bool) {
        let mut by_event_type = BTreeMap::new();
        for event in batch {
            *by_event_type
                .entry(event.event_type().to_string())
                .or_insert(0usize) += 1;
        }
        self.history.lock().await.push(SyncRecord {
            at: Utc::now(),
            events: batch.len(),
            note_path,
            success,
            by_event_type,
        });
    }

    async fn publish_observations(&self, batch: &[Event]) {
        for event in batch {
            let Some(rule) = self
                .rules
                .iter()
                .find(|rule| rule.event_type == event.event_type())
            else {
                continue;
            };
            let Some(phase) = Phase::parse(&rule.phase) else {
                warn!(phase = %rule.phase, "observation rule names an unknown phase");
                continue;
            };
            let Some(vector) = event
                .payload
                .field(&rule.vector_key)
                .and_then(parse_vector)
            else {
                debug!(
                    event_type = event.event_type(),
                    key = %rule.vector_key,
                    "event carries no usable observation vector"
                );
                continue;
            };
            let success = event
                .payload
                .field(&rule.success_key)
                .and_then(Value::as_bool)
                .unwrap_or(false);

            if let Err(err) = self
                .beliefs
                .lock()
                .await
                .observe(phase, vector, success)
                .await
            {
                warn!(error = %format!("{err:#}"), "belief observation failed");
            }
        }
    }
}

impl BatchSink for NoteBatchSink {
    async fn persist(&self, batch: &[Event]) -> Result<()> {
        let (title, frontmatter, body) = build_batch_note(batch, Local::now());

        if !self.vault.vault_available() {
            debug!(events = batch.len(), "vault unavailable — batch not persisted");
            self.record(batch, None, false).await;
            self.publish_observations(batch).await;
            return Ok(());
        }

        let write = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(
                    IO_TIMEOUT,
                    self.vault.write_note(Local::now(), &title, &frontmatter, &body),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(KnowledgeError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "vault write timed out",
                    ))),
                }
            })
            .await;

        match write {
            Ok(path) => {
                info!(events = batch.len(), path = %path.display(), "batch persisted");
                self.record(batch, Some(path.display().to_string()), true).await;
                self.publish_observations(batch).await;
                Ok(())
            }
            Err(BreakerError::Open) => Err(anyhow::anyhow!(KnowledgeError::CircuitOpen)),
            Err(BreakerError::Inner(err)) => Err(err.into()),
        }
    }

    async fn abandoned(&self, batch: &[Event]) {
        self.record(batch, None, false).await;
    }
}

fn parse_vector(value: &Value) -> Option<UncertaintyVector> {
    let items = value.as_array()?;
    if items.len() != 5 {
        return None;
    }
    let mut components = [0.0f64; 5];
    for (slot, item) in components.iter_mut().zip(items) {
        *slot = item.as_f64()?;
    }
    Some(UncertaintyVector::new(
        components[0],
        components[1],
        components[2],
        components[3],
        components[4],
    ))
}

/// Build the single note representing a batch.
///
/// Title rules: a batch whose events all share one type is titled by that
/// type, mixed batches by their size.  Error-resolution events lift their
/// kind into `error_type` and their keywords into `tags` so the tier-1/2
/// lookup can find the note later.
pub fn build_batch_note(
    batch: &[Event],
    at: DateTime<Local>,
) -> (String, Frontmatter, String) {
    let mut type_labels: Vec<String> = Vec::new();
    for event in batch {
        let label = event.event_type().to_string();
        if !type_labels.contains(&label) {
            type_labels.push(label);
        }
    }
    let title = if type_labels.len() == 1 {
        type_labels[0].clone()
    } else {
        format!("{} events", batch.len())
    };

    let mut tags = type_labels.clone();
    let mut error_type: Option<String> = None;
    for event in batch {
        if let EventPayload::ErrorResolution { error, kind, .. } = &event.payload {
            if error_type.is_none() {
                error_type = Some(kind.clone());
            }
            if !tags.contains(kind) {
                tags.push(kind.clone());
            }
            for keyword in extract_keywords(error) {
                if !tags.contains(&keyword) {
                    tags.push(keyword);
                }
            }
        }
    }

    let mut frontmatter = Frontmatter::new();
    frontmatter.insert_text("date", at.format("%Y-%m-%d").to_string());
    frontmatter.insert_text("time", at.format("%H:%M:%S").to_string());
    frontmatter.insert_text("event_type", "batch_sync");
    frontmatter.insert("events_count", FrontmatterValue::Int(batch.len() as i64));
    frontmatter.insert("tags", FrontmatterValue::List(tags));
    if let Some(kind) = error_type {
        frontmatter.insert_text("error_type", kind);
    }

    let mut body = format!("# {title}\n\n");
    for (index, event) in batch.iter().enumerate() {
        body.push_str(&format!(
            "## Event {}: {}\n\n",
            index + 1,
            event.event_type()
        ));
        body.push_str(&format!(
            "*{}*\n\n",
            event.ingested_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        event.payload.render_markdown(&mut body);
        body.push('\n');
    }

    (title, frontmatter, body)
}

/// Orchestrator owning the queue, the flusher, and the backup loop.
pub struct SyncCoordinator {
    queue: SyncQueue,
    vault: Arc<VaultStore>,
    beliefs: Arc<Mutex<BeliefTracker>>,
    history: Arc<Mutex<Vec<SyncRecord>>>,
    history_log: JsonlLog,
    sink: Arc<NoteBatchSink>,
    shutdown_tx: watch::Sender<bool>,
    flusher: std::sync::Mutex<Option<JoinHandle<()>>>,
    backup: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Arm the background flusher and restore persisted sync history.
    pub fn start(
        config: &AppConfig,
        vault: Arc<VaultStore>,
        beliefs: Arc<Mutex<BeliefTracker>>,
        state_dir: &Path,
    ) -> Self {
        let history_log = JsonlLog::new(state_dir.join(SYNC_HISTORY_LOG));
        let restored: Vec<SyncRecord> = match history_log.load() {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "sync history unreadable — starting empty");
                Vec::new()
            }
        };
        if !restored.is_empty() {
            info!(records = restored.len(), "sync history restored");
        }
        let history = Arc::new(Mutex::new(restored));

        let breaker = CircuitBreaker::with_predicate(
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout_secs),
            // Only infrastructure failures trip the breaker; a missing vault
            // is a configuration state, not downstream flakiness.
            |err: &KnowledgeError| matches!(err, KnowledgeError::Io(_)),
        );

        let sink = Arc::new(NoteBatchSink {
            vault: vault.clone(),
            breaker,
            beliefs: beliefs.clone(),
            rules: config.belief.observation_rules.clone(),
            history: history.clone(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue, flusher_handle) = SyncQueue::spawn(
            Duration::from_secs(config.sync.debounce_window_secs),
            config.sync.max_pending,
            sink.clone(),
            JsonlLog::new(state_dir.join(DEAD_LETTER_LOG)),
            shutdown_rx,
        );

        Self {
            queue,
            vault,
            beliefs,
            history,
            history_log,
            sink,
            shutdown_tx,
            flusher: std::sync::Mutex::new(Some(flusher_handle)),
            backup: std::sync::Mutex::new(None),
        }
    }

    /// Start the periodic backup loop: every `interval`, ask `probe` for
    /// changes and enqueue a `periodic_backup` event (flushed immediately)
    /// when there are any.  Probe failures are logged, never propagated.
    pub fn start_backup<P: ChangeProbe>(&self, interval: Duration, probe: P) {
        let queue = self.queue.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval_label = format!("{}h", interval.as_secs() / 3600);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match probe.has_changes().await {
                            Ok(true) => {
                                let mut data = Map::new();
                                data.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
                                data.insert("sync_interval".to_string(), Value::String(interval_label.clone()));
                                data.insert(
                                    "message".to_string(),
                                    Value::String("automatic backup to prevent context loss".to_string()),
                                );
                                if let Err(err) = queue.sync_event("periodic_backup", data).await {
                                    warn!(error = %err, "periodic backup enqueue failed");
                                    continue;
                                }
                                // Don't wait out the debounce window for backups.
                                match queue.force_flush().await {
                                    Ok(count) => info!(count, "periodic backup flushed"),
                                    Err(err) => warn!(error = %format!("{err:#}"), "periodic backup flush failed"),
                                }
                            }
                            Ok(false) => debug!("no changes detected — skipping backup"),
                            Err(err) => warn!(error = %format!("{err:#}"), "backup probe failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        *self.backup.lock().expect("backup handle mutex poisoned") = Some(handle);
    }

    /// Fire-and-forget event intake.  Sub-millisecond; never waits for
    /// persistence.
    pub async fn sync_event(
        &self,
        event_type: &str,
        data: Map<String, Value>,
    ) -> Result<(), KnowledgeError> {
        self.queue.sync_event(event_type, data).await
    }

    /// Flush pending events now; returns how many were persisted.
    pub async fn force_flush(&self) -> Result<usize> {
        self.queue.force_flush().await
    }

    /// Persist one event as its own note immediately, bypassing the
    /// debouncer.  The manual sync surface.
    pub async fn sync_now(&self, event_type: &str, data: Map<String, Value>) -> Result<()> {
        let event = Event::new(event_type, data);
        self.sink.persist(std::slice::from_ref(&event)).await
    }

    /// Queue an error resolution for persistence; once flushed, future
    /// tier-1 lookups on the same kind will find the solution.
    pub async fn save_error_resolution(
        &self,
        error: &str,
        solution: &str,
        context: Map<String, Value>,
    ) -> Result<(), KnowledgeError> {
        let mut data = Map::new();
        data.insert("error".to_string(), Value::String(error.to_string()));
        data.insert("solution".to_string(), Value::String(solution.to_string()));
        data.insert(
            "kind".to_string(),
            Value::String(extract_error_kind(error)),
        );
        data.insert("context".to_string(), Value::Object(context));
        self.queue.sync_event("error_resolution", data).await
    }

    pub async fn pending_events(&self) -> usize {
        self.queue.pending_count().await
    }

    pub async fn statistics(&self) -> SyncStatistics {
        let pending_events = self.queue.pending_count().await;
        let dropped_events = self.queue.dropped_count().await;
        let records = self.history.lock().await;

        let total_syncs = records.len();
        let total_events: usize = records.iter().map(|record| record.events).sum();
        let successful = records.iter().filter(|record| record.success).count();
        let failed = total_syncs - successful;
        let mut by_event_type: BTreeMap<String, usize> = BTreeMap::new();
        for record in records.iter() {
            for (event_type, count) in &record.by_event_type {
                *by_event_type.entry(event_type.clone()).or_insert(0) += count;
            }
        }

        SyncStatistics {
            total_syncs,
            total_events,
            successful,
            failed,
            success_rate: if total_syncs > 0 {
                successful as f64 / total_syncs as f64
            } else {
                0.0
            },
            by_event_type,
            batching_rate: if total_syncs > 0 {
                total_events as f64 / total_syncs as f64
            } else {
                0.0
            },
            pending_events,
            dropped_events,
            vault_available: self.vault.vault_available(),
        }
    }

    /// Cancel timers, run the terminal flush, then persist history and
    /// beliefs.  Producers racing this call receive `ShuttingDown`.
    pub async fn stop(&self) -> Result<()> {
        self.queue.begin_shutdown().await;
        let _ = self.shutdown_tx.send(true);

        let flusher = self
            .flusher
            .lock()
            .expect("flusher handle mutex poisoned")
            .take();
        if let Some(handle) = flusher {
            let _ = handle.await;
        }
        let backup = self
            .backup
            .lock()
            .expect("backup handle mutex poisoned")
            .take();
        if let Some(handle) = backup {
            let _ = handle.await;
        }

        let records = self.history.lock().await.clone();
        self.history_log.overwrite(&records).await?;
        self.beliefs.lock().await.save()?;
        info!(syncs = records.len(), "sync coordinator stopped");
        Ok(())
    }
}
