pub mod prepared_cache;

pub use prepared_cache::{StatementCache, StatementCacheMetrics};
