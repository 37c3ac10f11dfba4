pub mod belief;
pub mod breaker;
pub mod cache;
pub mod error;
pub mod frontmatter;
pub mod resolve;
pub mod schema;
pub mod search;
pub mod state;
pub mod vault;

pub use belief::{
    AdjustedThreshold, Belief, BeliefTracker, BiasKind, BiasProfile, Dimension, DimensionForecast,
    Phase, Prediction, QuantumState, Recommendation, UncertaintyVector, classify_quantum_state,
};
pub use breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use cache::{BoundedCache, CacheStats, DEFAULT_MAX_BYTES};
pub use error::KnowledgeError;
pub use frontmatter::{Frontmatter, FrontmatterValue, split_note};
pub use resolve::{ErrorResolver, ResolutionHit, extract_error_kind, extract_solution_block};
pub use schema::{DeadLetterRecord, Event, EventPayload, NoteSummary, SearchResult};
pub use search::{NoFeedback, SearchEngine, SearchOptions, UsefulnessSource, extract_keywords};
pub use state::JsonlLog;
pub use vault::{VaultStore, sanitize_title};
