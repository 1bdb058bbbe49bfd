pub mod binder;
pub mod connection;
pub mod core;
pub mod exception;
pub mod fetch;
pub mod runtime;
pub mod statement;
pub mod transaction;

pub use binder::{bind_var, MAX_BIND};
pub use connection::Connection;
pub use core::{StatementCache, StatementCacheMetrics};
pub use exception::{fatal, set_fatal_hook, translate, Stage};
pub use fetch::{BoundFetch, PullFetch, PullResult, PulledValue, ResultFetch, MAX_RESULT_COLUMNS};
pub use runtime::ClientRuntime;
pub use statement::{ColumnMeta, DbiStatement, StatementEntry, StatementState};
pub use transaction::{IsolationLevel, TransactionCmd};
