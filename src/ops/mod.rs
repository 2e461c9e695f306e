pub mod deps;
pub mod due;
pub mod priority;
pub mod propagate;
pub mod queries;
pub mod search;
pub mod store;
pub mod sync;

pub use queries::{ListQuery, SortKey};
pub use search::{MatchField, SearchQuery, SearchResult};
pub use store::{DeleteMode, NodeFilter, ParentScope, StoreError};
pub use sync::{Clock, DeleteReport, ReconcileOutcome, SyncEngine, SyncError, SyncStats, WatchHandle};
