//! Scripted in-memory client library.
//!
//! Statements are scripted by SQL text. Every call that reaches the client
//! is recorded so tests can assert on what the engine actually issued.

use super::{
    ClientError, ClientLibrary, ClientResult, ClientSession, ClientStatement, ColumnFetch,
    FetchStatus, FieldInfo, OutputSlot, WireParam,
};
use crate::config::DriverConfig;
use crate::protocol::ValueKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub type MockRow = Vec<Option<Vec<u8>>>;

/// Text cell helper for scripted rows.
pub fn cell(s: &str) -> Option<Vec<u8>> {
    Some(s.as_bytes().to_vec())
}

/// Native transaction calls, in the order the engine made them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Begin,
    Commit,
    Rollback,
}

/// Bound parameter as the client saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundParam {
    Null,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Default)]
struct MockScript {
    param_count: Option<usize>,
    columns: Vec<FieldInfo>,
    rows: Vec<MockRow>,
}

#[derive(Default)]
pub struct MockState {
    scripts: HashMap<String, MockScript>,
    /// Text sent through `execute_direct`, in order.
    pub direct_sql: Vec<String>,
    pub prepared_sql: Vec<String>,
    pub executed_sql: Vec<String>,
    pub native_ops: Vec<NativeOp>,
    pub bound_params: Vec<Vec<BoundParam>>,
    /// Parameters each successful execute actually sent.
    pub executed_params: Vec<Vec<BoundParam>>,
    /// `(column, kind)` of every column fetch.
    pub fetched_kinds: Vec<(usize, ValueKind)>,
    pub metadata_calls: usize,
    pub column_fetches: usize,
    pub resets: usize,
    pub library_inits: usize,
    pub library_ends: usize,
    pub thread_inits: usize,
    pub thread_ends: usize,
    pub connects: usize,
    fail_connect: Option<ClientError>,
    fail_prepare: HashMap<String, ClientError>,
    fail_execute: HashMap<String, ClientError>,
    fail_direct: Vec<(String, ClientError)>,
    fail_begin: Option<ClientError>,
    stale_null_length: Option<usize>,
    length_drift: usize,
    thread_unsafe: bool,
    ping_fails: bool,
}

#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the recorded state for inspection.
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Scripts a statement returning `rows` with the given columns.
    pub fn script(&self, sql: &str, columns: Vec<FieldInfo>, rows: Vec<MockRow>) {
        let mut st = self.state();
        let entry = st.scripts.entry(sql.to_string()).or_default();
        entry.columns = columns;
        entry.rows = rows;
    }

    /// Overrides the parameter count the client reports for `sql`.
    pub fn script_params(&self, sql: &str, count: usize) {
        self.state()
            .scripts
            .entry(sql.to_string())
            .or_default()
            .param_count = Some(count);
    }

    pub fn fail_connect(&self, err: ClientError) {
        self.state().fail_connect = Some(err);
    }

    pub fn fail_prepare(&self, sql: &str, err: ClientError) {
        self.state().fail_prepare.insert(sql.to_string(), err);
    }

    pub fn fail_execute(&self, sql: &str, err: ClientError) {
        self.state().fail_execute.insert(sql.to_string(), err);
    }

    /// Fails any direct statement starting with `prefix`.
    pub fn fail_direct(&self, prefix: &str, err: ClientError) {
        self.state().fail_direct.push((prefix.to_string(), err));
    }

    pub fn fail_begin(&self, err: ClientError) {
        self.state().fail_begin = Some(err);
    }

    /// Reports `len` as the length of NULL columns instead of 0.
    pub fn set_stale_null_length(&self, len: usize) {
        self.state().stale_null_length = Some(len);
    }

    /// Each repeated fetch of the same column reports `extra` more bytes
    /// than the previous one.
    pub fn set_length_drift(&self, extra: usize) {
        self.state().length_drift = extra;
    }

    pub fn set_thread_safe(&self, safe: bool) {
        self.state().thread_unsafe = !safe;
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.state().ping_fails = fails;
    }
}

impl ClientLibrary for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_thread_safe(&self) -> bool {
        !self.state().thread_unsafe
    }

    fn library_init(&self) -> ClientResult<()> {
        self.state().library_inits += 1;
        Ok(())
    }

    fn library_end(&self) {
        self.state().library_ends += 1;
    }

    fn thread_init(&self) -> ClientResult<()> {
        self.state().thread_inits += 1;
        Ok(())
    }

    fn thread_end(&self) {
        self.state().thread_ends += 1;
    }

    fn connect(&self, config: &DriverConfig) -> ClientResult<Box<dyn ClientSession>> {
        let mut st = self.state();
        if let Some(err) = st.fail_connect.clone() {
            return Err(err);
        }
        st.connects += 1;
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            server_info: format!("8.0.36-mock ({})", config.database),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    server_info: String,
}

impl MockSession {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ClientSession for MockSession {
    fn execute_direct(&mut self, sql: &str) -> ClientResult<()> {
        let mut st = self.state();
        st.direct_sql.push(sql.to_string());
        if let Some((_, err)) = st.fail_direct.iter().find(|(p, _)| sql.starts_with(p.as_str())) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn ping(&mut self) -> ClientResult<()> {
        if self.state().ping_fails {
            return Err(ClientError::new(2006, "08S01", "MySQL server has gone away"));
        }
        Ok(())
    }

    fn begin(&mut self) -> ClientResult<()> {
        let mut st = self.state();
        if let Some(err) = st.fail_begin.clone() {
            return Err(err);
        }
        st.native_ops.push(NativeOp::Begin);
        Ok(())
    }

    fn commit(&mut self) -> ClientResult<()> {
        self.state().native_ops.push(NativeOp::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> ClientResult<()> {
        self.state().native_ops.push(NativeOp::Rollback);
        Ok(())
    }

    fn server_info(&self) -> String {
        self.server_info.clone()
    }

    fn prepare(&mut self, sql: &str) -> ClientResult<Box<dyn ClientStatement>> {
        let mut st = self.state();
        if let Some(err) = st.fail_prepare.get(sql) {
            return Err(err.clone());
        }
        st.prepared_sql.push(sql.to_string());
        let script = st.scripts.get(sql).cloned().unwrap_or_default();
        let param_count = script
            .param_count
            .unwrap_or_else(|| sql.matches('?').count());
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
            param_count,
            script,
            next_row: None,
            current: None,
            attempts: HashMap::new(),
            pending: Vec::new(),
        }))
    }
}

struct MockStatement {
    state: Arc<Mutex<MockState>>,
    sql: String,
    param_count: usize,
    script: MockScript,
    /// Index of the next row to hand out; `None` until executed.
    next_row: Option<usize>,
    current: Option<usize>,
    attempts: HashMap<usize, usize>,
    /// Bound for the next execute only.
    pending: Vec<BoundParam>,
}

impl MockStatement {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn advance(&mut self) -> FetchStatus {
        self.attempts.clear();
        let Some(next) = self.next_row else {
            return FetchStatus::NoData;
        };
        if next < self.script.rows.len() {
            self.current = Some(next);
            self.next_row = Some(next + 1);
            FetchStatus::Row
        } else {
            self.current = None;
            FetchStatus::NoData
        }
    }
}

impl ClientStatement for MockStatement {
    fn param_count(&self) -> usize {
        self.param_count
    }

    fn field_count(&self) -> usize {
        self.script.columns.len()
    }

    fn result_metadata(&mut self) -> ClientResult<Vec<FieldInfo>> {
        self.state().metadata_calls += 1;
        Ok(self.script.columns.clone())
    }

    fn bind_params(&mut self, params: &[WireParam<'_>]) -> ClientResult<()> {
        let bound = params
            .iter()
            .map(|p| match p {
                WireParam::Null => BoundParam::Null,
                WireParam::Text(b) => BoundParam::Text(b.to_vec()),
                WireParam::Binary(b) => BoundParam::Binary(b.to_vec()),
            })
            .collect();
        self.pending.clone_from(&bound);
        self.state().bound_params.push(bound);
        Ok(())
    }

    fn execute(&mut self) -> ClientResult<()> {
        let sent = std::mem::take(&mut self.pending);
        let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(err) = st.fail_execute.get(&self.sql) {
            return Err(err.clone());
        }
        st.executed_sql.push(self.sql.clone());
        st.executed_params.push(sent);
        drop(st);
        self.next_row = Some(0);
        self.current = None;
        self.attempts.clear();
        Ok(())
    }

    fn fetch(&mut self) -> ClientResult<FetchStatus> {
        Ok(self.advance())
    }

    fn fetch_bound(&mut self, slots: &mut [OutputSlot]) -> ClientResult<FetchStatus> {
        let status = self.advance();
        let stale = self.state().stale_null_length;
        if let Some(idx) = self.current {
            for (slot, value) in slots.iter_mut().zip(self.script.rows[idx].iter()) {
                *slot = match value {
                    Some(v) => OutputSlot {
                        length: v.len(),
                        is_null: false,
                    },
                    None => OutputSlot {
                        length: stale.unwrap_or(0),
                        is_null: true,
                    },
                };
            }
        }
        Ok(status)
    }

    fn fetch_column(
        &mut self,
        column: usize,
        kind: ValueKind,
        buffer: &mut [u8],
    ) -> ClientResult<ColumnFetch> {
        let (stale, drift) = {
            let mut st = self.state();
            st.column_fetches += 1;
            st.fetched_kinds.push((column, kind));
            (st.stale_null_length, st.length_drift)
        };
        let idx = self
            .current
            .ok_or_else(|| ClientError::new(2051, "HY010", "No row fetched"))?;
        let value = self.script.rows[idx]
            .get(column)
            .ok_or_else(|| ClientError::new(2034, "07009", "Invalid column index"))?;
        let attempt = self.attempts.entry(column).or_insert(0);
        let extra = drift * *attempt;
        *attempt += 1;
        match value {
            None => Ok(ColumnFetch {
                length: stale.unwrap_or(0),
                is_null: true,
            }),
            Some(stored) => {
                // Text goes through the client's string conversion; binary
                // is copied untouched.
                let converted;
                let bytes: &[u8] = match kind {
                    ValueKind::Binary => stored,
                    ValueKind::Text => {
                        converted = String::from_utf8_lossy(stored).into_owned();
                        converted.as_bytes()
                    }
                };
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                Ok(ColumnFetch {
                    length: bytes.len() + extra,
                    is_null: false,
                })
            }
        }
    }

    fn reset(&mut self) -> ClientResult<()> {
        self.state().resets += 1;
        self.next_row = None;
        self.current = None;
        self.attempts.clear();
        Ok(())
    }
}
