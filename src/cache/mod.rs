// Gateway module for the query result cache - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod query_runner;
mod result_cache;
mod store;
mod types;

// Public re-exports - the ONLY way to access cache functionality
pub use query_runner::{CachedQueryRunner, QueryExecutor, QueryResponse};
pub use result_cache::{query_digest, ResultCache};
pub use store::{KeyValueStore, MemoryStore};
pub use types::{CacheEntry, CacheStats, CachedOutput, Query};
