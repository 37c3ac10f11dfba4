//! Process-wide core assembly.
//!
//! `CoreContext` owns the cache, vault, belief tracker, search pipeline,
//! resolver, and coordinator, constructed once at start-up and passed to
//! whatever surface (CLI, HTTP collaborator) drives it.  Disposal runs a
//! guaranteed final flush.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use udo_config::AppConfig;
use udo_knowledge::belief::BeliefTracker;
use udo_knowledge::cache::BoundedCache;
use udo_knowledge::error::KnowledgeError;
use udo_knowledge::resolve::{ErrorResolver, ResolutionHit};
use udo_knowledge::schema::{NoteSummary, SearchResult};
use udo_knowledge::search::{NoFeedback, SearchEngine, SearchOptions, UsefulnessSource};
use udo_knowledge::vault::VaultStore;

use crate::coordinator::{GitChangeProbe, SyncCoordinator, SyncStatistics};

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub vault_available: bool,
    pub vault_path: Option<String>,
    pub daily_notes_dir: Option<String>,
    pub pending_events: usize,
}

pub struct CoreContext {
    pub config: AppConfig,
    pub cache: Arc<BoundedCache>,
    pub vault: Arc<VaultStore>,
    pub beliefs: Arc<Mutex<BeliefTracker>>,
    pub search: Arc<SearchEngine>,
    pub resolver: ErrorResolver,
    pub coordinator: SyncCoordinator,
    state_dir: PathBuf,
}

impl CoreContext {
    /// Build the core with the default (no-feedback) usefulness source and
    /// the environment-resolved state directory.
    pub fn start(config: AppConfig) -> Self {
        Self::start_in(config, udo_config::state_dir(), Arc::new(NoFeedback))
    }

    pub fn start_with_usefulness(
        config: AppConfig,
        usefulness: Arc<dyn UsefulnessSource>,
    ) -> Self {
        Self::start_in(config, udo_config::state_dir(), usefulness)
    }

    /// Build the core against an explicit state directory, restoring
    /// persisted beliefs and sync history, and arm the background flusher.
    /// The periodic backup loop is opt-in via
    /// [`CoreContext::start_periodic_backup`].
    pub fn start_in(
        config: AppConfig,
        state_dir: PathBuf,
        usefulness: Arc<dyn UsefulnessSource>,
    ) -> Self {
        let cache = Arc::new(BoundedCache::new(config.cache.max_bytes));
        let vault = Arc::new(VaultStore::new(&config.vault));
        let beliefs = Arc::new(Mutex::new(BeliefTracker::new(
            config.belief.project.clone(),
            &state_dir,
        )));
        let search = Arc::new(SearchEngine::new(vault.clone(), usefulness));
        let resolver = ErrorResolver::new(search.clone());
        let coordinator =
            SyncCoordinator::start(&config, vault.clone(), beliefs.clone(), &state_dir);

        Self {
            config,
            cache,
            vault,
            beliefs,
            search,
            resolver,
            coordinator,
            state_dir,
        }
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Start the hourly-style backup loop against the current working
    /// directory's repository.
    pub fn start_periodic_backup(&self) {
        let hours = self.config.sync.backup_interval_hours;
        if hours == 0 {
            debug!("periodic backup disabled");
            return;
        }
        let repo_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        self.coordinator.start_backup(
            Duration::from_secs(hours * 3600),
            GitChangeProbe::new(repo_root),
        );
    }

    pub async fn sync_event(
        &self,
        event_type: &str,
        data: Map<String, Value>,
    ) -> Result<(), KnowledgeError> {
        self.coordinator.sync_event(event_type, data).await
    }

    pub async fn force_flush(&self) -> Result<usize> {
        self.coordinator.force_flush().await
    }

    /// Three-tier search with the hot-lookup cache in front.  Identical
    /// queries inside the cache window skip the vault scan entirely.
    pub fn search_knowledge(&self, query: &str, opts: &SearchOptions) -> Vec<SearchResult> {
        let cache_key = format!(
            "search:{query}:{}:{}:{}:{}",
            opts.error_type.as_deref().unwrap_or(""),
            opts.max_results,
            opts.min_score,
            opts.content_tier,
        );
        if let Some(cached) = self.cache.get(&cache_key) {
            if let Ok(results) = serde_json::from_value::<Vec<SearchResult>>(cached) {
                debug!(query, "search served from cache");
                return results;
            }
        }

        let results = self.search.search(query, opts);
        match serde_json::to_value(&results) {
            Ok(value) => {
                if let Err(err) = self.cache.set(cache_key, value) {
                    debug!(error = %err, "search result not cached");
                }
            }
            Err(err) => debug!(error = %err, "search result not serializable for cache"),
        }
        results
    }

    pub fn resolve_error_tier1(&self, error: &str) -> ResolutionHit {
        self.resolver.resolve_tier1(error)
    }

    pub async fn save_error_resolution(
        &self,
        error: &str,
        solution: &str,
        context: Map<String, Value>,
    ) -> Result<(), KnowledgeError> {
        // New knowledge invalidates cached lookups.
        self.cache.clear();
        self.coordinator
            .save_error_resolution(error, solution, context)
            .await
    }

    pub fn recent_notes(&self, days: u32) -> Vec<NoteSummary> {
        self.vault.recent_notes(days.clamp(1, 30))
    }

    pub async fn sync_statistics(&self) -> SyncStatistics {
        self.coordinator.statistics().await
    }

    pub async fn health(&self) -> Health {
        let pending_events = self.coordinator.pending_events().await;
        Health {
            status: if self.vault.vault_available() {
                "healthy"
            } else {
                "degraded"
            },
            vault_available: self.vault.vault_available(),
            vault_path: self.vault.root().map(|p| p.display().to_string()),
            daily_notes_dir: self
                .vault
                .daily_notes_dir()
                .map(|p| p.display().to_string()),
            pending_events,
        }
    }

    /// Final flush, then persist all state.  Producers racing this call
    /// receive `ShuttingDown`.
    pub async fn stop(&self) -> Result<()> {
        self.coordinator.stop().await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use udo_config::VaultConfig;

    /// Vault + state dirs under one [`TempDir`], removed on drop.
    fn fixture(tag: &str) -> (TempDir, CoreContext) {
        let dir = TempDir::new().unwrap();
        let vault_root = dir.path().join("vault");
        std::fs::create_dir_all(vault_root.join(".obsidian")).unwrap();

        let mut config = AppConfig::default();
        config.vault = VaultConfig {
            path: vault_root.display().to_string(),
            ..VaultConfig::default()
        };
        config.sync.debounce_window_secs = 60;
        config.belief.project = format!("ctx-{tag}");

        let state_dir = dir.path().join("state");
        let context = CoreContext::start_in(config, state_dir, Arc::new(NoFeedback));
        (dir, context)
    }

    #[tokio::test]
    async fn full_cycle_sync_flush_search() -> Result<()> {
        let (_dir, context) = fixture("cycle");

        context
            .sync_event(
                "phase_transition",
                [
                    ("from".to_string(), json!("design")),
                    ("to".to_string(), json!("mvp")),
                ]
                .into_iter()
                .collect(),
            )
            .await?;
        assert_eq!(context.force_flush().await?, 1);

        let opts = SearchOptions {
            min_score: 0.0,
            ..SearchOptions::default()
        };
        let results = context.search_knowledge("transition design", &opts);
        assert!(!results.is_empty());

        // Second identical query is a cache hit.
        let before = context.cache.stats().hits;
        let _ = context.search_knowledge("transition design", &opts);
        assert!(context.cache.stats().hits > before);

        context.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn resolution_round_trip_through_context() -> Result<()> {
        let (_dir, context) = fixture("resolution");

        context
            .save_error_resolution(
                "ModuleNotFoundError: No module named 'pandas'",
                "pip install pandas",
                Map::new(),
            )
            .await?;
        context.force_flush().await?;

        let hit = context.resolve_error_tier1("ModuleNotFoundError: No module named 'pandas'");
        assert!(hit.solution.expect("hit").contains("pip install pandas"));
        assert!(hit.elapsed_ms >= 0.0);

        context.stop().await?;
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_vault_and_pending_state() -> Result<()> {
        let (_dir, context) = fixture("health");

        context.sync_event("queued", Map::new()).await?;
        let health = context.health().await;
        assert_eq!(health.status, "healthy");
        assert!(health.vault_available);
        assert_eq!(health.pending_events, 1);

        context.stop().await?;
        Ok(())
    }
}
