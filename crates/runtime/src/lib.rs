pub mod context;
pub mod coordinator;
pub mod queue;

pub use context::{CoreContext, Health};
pub use coordinator::{
    ChangeProbe, GitChangeProbe, SyncCoordinator, SyncRecord, SyncStatistics, build_batch_note,
};
pub use queue::{BatchSink, SyncQueue};
