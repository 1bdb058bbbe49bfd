use crate::client::{ClientSession, ClientStatement};
use crate::engine::exception::{engine_error, translate, Stage};
use crate::error::{DbiError, Result};
use crate::protocol::{FieldType, ValueKind};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STATEMENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub field_type: FieldType,
    pub kind: ValueKind,
}

impl ColumnMeta {
    pub fn is_binary(&self) -> bool {
        self.kind.is_binary()
    }
}

/// A compiled statement plus the column metadata captured when it was
/// compiled. The metadata never changes afterwards.
pub struct StatementEntry {
    statement: Box<dyn ClientStatement>,
    param_count: usize,
    columns: Vec<ColumnMeta>,
}

impl StatementEntry {
    pub(crate) fn prepare(session: &mut dyn ClientSession, sql: &str) -> Result<Self> {
        let mut statement = session
            .prepare(sql)
            .map_err(|e| translate(Stage::Prepare, e))?;
        let param_count = statement.param_count();
        let columns = if statement.field_count() > 0 {
            statement
                .result_metadata()
                .map_err(|e| translate(Stage::Prepare, e))?
                .into_iter()
                .map(|f| ColumnMeta {
                    kind: f.field_type.value_kind(),
                    name: f.name,
                    field_type: f.field_type,
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            statement,
            param_count,
            columns,
        })
    }

    pub fn param_count(&self) -> usize {
        self.param_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Result<&ColumnMeta> {
        self.columns.get(index).ok_or_else(|| {
            engine_error(
                Stage::Fetch,
                "07009",
                0,
                format!(
                    "column index {} out of range, statement has {} columns",
                    index,
                    self.columns.len()
                ),
            )
        })
    }

    pub(crate) fn client(&mut self) -> &mut dyn ClientStatement {
        self.statement.as_mut()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    Unprepared,
    Prepared,
    Executed,
    Fetching,
    Closed,
}

/// The host's statement object: the query text plus the driver's compiled
/// form once prepared.
pub struct DbiStatement {
    id: u64,
    sql: String,
    state: StatementState,
    entry: Option<StatementEntry>,
}

impl DbiStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            id: NEXT_STATEMENT_ID.fetch_add(1, Ordering::Relaxed),
            sql: sql.into(),
            state: StatementState::Unprepared,
            entry: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn is_prepared(&self) -> bool {
        self.entry.is_some()
    }

    pub fn entry(&self) -> Option<&StatementEntry> {
        self.entry.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: StatementState) {
        self.state = state;
    }

    pub(crate) fn set_entry(&mut self, entry: StatementEntry) {
        self.entry = Some(entry);
        self.state = StatementState::Prepared;
    }

    pub(crate) fn entry_mut(&mut self) -> Result<&mut StatementEntry> {
        let id = self.id;
        self.entry
            .as_mut()
            .ok_or_else(|| DbiError::InvalidState(format!("statement {} is not prepared", id)))
    }

    /// Drops the compiled form and metadata and closes the statement.
    pub(crate) fn close(&mut self) -> Option<StatementEntry> {
        self.state = StatementState::Closed;
        self.entry.take()
    }
}

impl std::fmt::Debug for DbiStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbiStatement")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("prepared", &self.entry.is_some())
            .finish()
    }
}
