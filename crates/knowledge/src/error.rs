use thiserror::Error;

/// Failure taxonomy of the knowledge core.  Each variant is a distinct kind
/// the caller can branch on; plumbing-level failures stay `anyhow` at the
/// call sites that do not need to distinguish them.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// A single cache value larger than the whole budget.  Caller bug —
    /// surfaced instead of silently evicting the cache to empty.
    #[error("value of {size} bytes exceeds cache budget of {max} bytes")]
    OversizedValue { size: usize, max: usize },

    /// The circuit breaker is open; retry after its recovery timeout.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// No vault root was found.  Writes degrade to no-ops and reads to
    /// empty results; `vault_available` reflects this.
    #[error("vault not available")]
    VaultUnavailable,

    /// Producer called `sync_event` after the coordinator began stopping.
    #[error("sync coordinator is shutting down")]
    ShuttingDown,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
