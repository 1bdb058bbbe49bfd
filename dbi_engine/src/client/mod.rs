//! The client library seam.
//!
//! The engine never talks to a database directly. It drives a
//! [`ClientLibrary`] (process-wide), the [`ClientSession`]s it connects and
//! the [`ClientStatement`]s those sessions compile.

mod cell_reader;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod odbc;

use crate::config::DriverConfig;
use crate::protocol::{FieldType, ParamValue, ValueKind};
use std::fmt;

/// Client error code for allocation failure inside the client library.
pub const CR_OUT_OF_MEMORY: i32 = 2008;
/// Client error code for a fetch whose data did not fit the bound buffer.
pub const CR_DATA_TRUNCATED: i32 = 2032;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    pub code: i32,
    pub sqlstate: String,
    pub message: String,
}

impl ClientError {
    pub fn new(code: i32, sqlstate: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate: sqlstate.to_string(),
            message: message.into(),
        }
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(CR_OUT_OF_MEMORY, "HY001", message)
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.code == CR_OUT_OF_MEMORY || self.sqlstate == "HY001"
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code: {} msg: {}", self.code, self.message)
    }
}

impl std::error::Error for ClientError {}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Row,
    /// A row is available but at least one column did not fit its buffer.
    Truncated,
    NoData,
}

impl FetchStatus {
    pub fn has_row(self) -> bool {
        !matches!(self, FetchStatus::NoData)
    }
}

/// Per-column length/null indicator filled by [`ClientStatement::fetch_bound`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputSlot {
    pub length: usize,
    pub is_null: bool,
}

/// Result of fetching one column of the current row into a buffer.
///
/// `length` is always the full length of the value. The number of bytes
/// copied is `min(length, buffer.len())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnFetch {
    pub length: usize,
    pub is_null: bool,
}

/// One bound input parameter, borrowed for the duration of a bind call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireParam<'a> {
    Null,
    Text(&'a [u8]),
    Binary(&'a [u8]),
}

impl<'a> WireParam<'a> {
    pub fn length(&self) -> usize {
        match self {
            WireParam::Null => 0,
            WireParam::Text(b) | WireParam::Binary(b) => b.len(),
        }
    }

    pub fn bytes(&self) -> Option<&'a [u8]> {
        match *self {
            WireParam::Null => None,
            WireParam::Text(b) | WireParam::Binary(b) => Some(b),
        }
    }
}

impl<'a> From<&'a ParamValue> for WireParam<'a> {
    fn from(value: &'a ParamValue) -> Self {
        match value {
            ParamValue::Null => WireParam::Null,
            ParamValue::Text(s) => WireParam::Text(s.as_bytes()),
            ParamValue::Binary(b) => WireParam::Binary(b),
        }
    }
}

pub trait ClientLibrary: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the library may be used from several threads at once.
    fn is_thread_safe(&self) -> bool;

    fn library_init(&self) -> ClientResult<()>;
    fn library_end(&self);

    fn thread_init(&self) -> ClientResult<()>;
    fn thread_end(&self);

    fn connect(&self, config: &DriverConfig) -> ClientResult<Box<dyn ClientSession>>;
}

pub trait ClientSession: Send {
    /// Runs a statement that produces no result set.
    fn execute_direct(&mut self, sql: &str) -> ClientResult<()>;

    fn ping(&mut self) -> ClientResult<()>;

    fn begin(&mut self) -> ClientResult<()>;
    fn commit(&mut self) -> ClientResult<()>;
    fn rollback(&mut self) -> ClientResult<()>;

    fn server_info(&self) -> String;

    fn prepare(&mut self, sql: &str) -> ClientResult<Box<dyn ClientStatement>>;
}

pub trait ClientStatement: Send {
    fn param_count(&self) -> usize;
    fn field_count(&self) -> usize;

    /// Column names and declared types, in column order.
    fn result_metadata(&mut self) -> ClientResult<Vec<FieldInfo>>;

    fn bind_params(&mut self, params: &[WireParam<'_>]) -> ClientResult<()>;

    fn execute(&mut self) -> ClientResult<()>;

    /// Advances to the next row without transferring column data.
    fn fetch(&mut self) -> ClientResult<FetchStatus>;

    /// Advances to the next row and reports each column's length and null
    /// indicator into `slots`.
    fn fetch_bound(&mut self, slots: &mut [OutputSlot]) -> ClientResult<FetchStatus>;

    /// Copies column `column` of the current row, starting at offset 0.
    fn fetch_column(
        &mut self,
        column: usize,
        kind: ValueKind,
        buffer: &mut [u8],
    ) -> ClientResult<ColumnFetch>;

    /// Discards unread rows; the compiled form stays valid.
    fn reset(&mut self) -> ClientResult<()>;
}
