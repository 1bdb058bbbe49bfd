//! The driver callback table.
//!
//! Every failure is written to the handle's exception slot and returned.

mod handle;

pub use handle::{DbiHandle, ExceptionSlot};

use crate::client::odbc::OdbcLibrary;
use crate::client::ClientLibrary;
use crate::config::DriverConfig;
use crate::engine::exception::{translate, Stage};
use crate::engine::statement::StatementState;
use crate::engine::{
    binder, transaction, ClientRuntime, Connection, DbiStatement, IsolationLevel, PullResult,
    StatementEntry, TransactionCmd,
};
use crate::error::{DbiError, Result};
use crate::observability::{Metrics, StructuredLogger};
use crate::protocol::ParamValue;
use log::Level;
use std::sync::Arc;
use std::time::Instant;

/// What a successful Exec produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The statement has a result set to fetch.
    Rows,
    /// The statement changed data and has no result set.
    Dml,
}

pub struct Driver {
    config: DriverConfig,
    runtime: Arc<ClientRuntime>,
    metrics: Arc<Metrics>,
    logger: StructuredLogger,
}

fn connected(conn: Option<&mut Connection>) -> Result<&mut Connection> {
    conn.ok_or(DbiError::NotConnected)
}

/// The bound slots belong to whichever statement holds the cursor.
fn holds_cursor(conn: &Connection, stmt: &DbiStatement) -> Result<()> {
    match conn.active_cursor() {
        Some(active) if active == stmt.id() => Ok(()),
        Some(active) => Err(DbiError::CursorActive { active }),
        None => Err(DbiError::InvalidState(format!(
            "statement {} is not positioned on a row",
            stmt.id()
        ))),
    }
}

/// Whether `stmt` may still hand out rows.
fn has_pending_rows(stmt: &DbiStatement) -> Result<bool> {
    match stmt.state() {
        StatementState::Executed | StatementState::Fetching => Ok(true),
        StatementState::Prepared => Ok(false),
        StatementState::Unprepared => Err(DbiError::InvalidState(format!(
            "statement {} has not been prepared",
            stmt.id()
        ))),
        StatementState::Closed => Err(DbiError::InvalidState(format!(
            "statement {} is closed",
            stmt.id()
        ))),
    }
}

fn prepared_entry(stmt: &DbiStatement) -> Result<&StatementEntry> {
    stmt.entry()
        .ok_or_else(|| DbiError::InvalidState(format!("statement {} is not prepared", stmt.id())))
}

impl Driver {
    pub fn new(library: Arc<dyn ClientLibrary>, config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let runtime = ClientRuntime::new(library)?;
        Ok(Self::with_runtime(runtime, config))
    }

    /// Driver over MySQL Connector/ODBC (or the configured DSN).
    pub fn odbc(config: DriverConfig) -> Result<Self> {
        Self::new(Arc::new(OdbcLibrary::new()), config)
    }

    /// Shares an already initialised client library between drivers.
    pub fn with_runtime(runtime: Arc<ClientRuntime>, config: DriverConfig) -> Self {
        Self {
            config,
            runtime,
            metrics: Arc::new(Metrics::new()),
            logger: StructuredLogger::default(),
        }
    }

    pub fn name(&self) -> &str {
        if self.config.module.is_empty() {
            "dbimysql"
        } else {
            &self.config.module
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<ClientRuntime> {
        &self.runtime
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    fn target(&self) -> String {
        match &self.config.dsn {
            Some(dsn) => format!("dsn={} db={}", dsn, self.config.database),
            None => format!(
                "{}:{}/{}",
                self.config.host.as_deref().unwrap_or("localhost"),
                self.config.port,
                self.config.database
            ),
        }
    }

    fn record(&self, slot: &mut ExceptionSlot, err: DbiError) -> DbiError {
        slot.set_error(&err);
        self.metrics.record_error();
        self.logger
            .log_error(&err, &[("driver", self.name().to_string())]);
        err
    }

    fn settle<T>(&self, slot: &mut ExceptionSlot, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.record(slot, e))
    }

    pub fn open(&self, handle: &mut DbiHandle) -> Result<()> {
        if handle.connection.is_some() {
            let err = DbiError::InvalidState("handle is already open".to_string());
            return Err(self.record(&mut handle.exception, err));
        }
        match Connection::open(&self.runtime, &self.config) {
            Ok(conn) => {
                handle
                    .exception
                    .set("00000", format!("({})", conn.server_info()));
                self.logger
                    .log_connection(Level::Info, &self.target(), "open");
                handle.connection = Some(conn);
                Ok(())
            }
            Err(e) => Err(self.record(&mut handle.exception, e)),
        }
    }

    pub fn close(&self, handle: &mut DbiHandle) {
        if let Some(conn) = handle.connection.take() {
            conn.close();
            self.logger
                .log_connection(Level::Info, &self.target(), "close");
        }
    }

    pub fn connected(&self, handle: &mut DbiHandle) -> bool {
        handle
            .connection
            .as_mut()
            .is_some_and(|conn| conn.connected())
    }

    pub fn bind_var(&self, sql: &mut String, name: &str, index: usize) {
        binder::bind_var(sql, name, index);
    }

    /// Compiles `stmt` unless it already is, returning its parameter and
    /// column counts.
    pub fn prepare(&self, handle: &mut DbiHandle, stmt: &mut DbiStatement) -> Result<(usize, usize)> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = self.prepare_inner(connection.as_mut(), stmt);
        self.settle(exception, result)
    }

    fn prepare_inner(
        &self,
        conn: Option<&mut Connection>,
        stmt: &mut DbiStatement,
    ) -> Result<(usize, usize)> {
        let conn = connected(conn)?;
        if stmt.state() == StatementState::Closed {
            return Err(DbiError::ValidationError(format!(
                "statement {} is closed",
                stmt.id()
            )));
        }
        if let Some(entry) = stmt.entry() {
            return Ok((entry.param_count(), entry.column_count()));
        }

        self.runtime.ensure_thread()?;
        let entry = StatementEntry::prepare(conn.session_mut(), stmt.sql())?;
        let counts = (entry.param_count(), entry.column_count());
        stmt.set_entry(entry);
        self.metrics.record_prepare();
        self.logger.log_statement(
            Level::Debug,
            stmt.sql(),
            &[
                ("stmt", stmt.id().to_string()),
                ("params", counts.0.to_string()),
                ("columns", counts.1.to_string()),
            ],
        );
        Ok(counts)
    }

    /// Releases the compiled form and metadata; the statement is closed.
    pub fn prepare_close(&self, handle: &mut DbiHandle, stmt: &mut DbiStatement) {
        if let Some(conn) = handle.connection.as_mut() {
            if conn.active_cursor() == Some(stmt.id()) {
                conn.fetch_mut().reset();
                conn.release_cursor(stmt.id());
            }
        }
        if let Some(mut entry) = stmt.close() {
            if let Err(e) = entry.client().reset() {
                log::debug!("prepare_close: reset of statement {} failed: {}", stmt.id(), e);
            }
        }
    }

    pub fn exec(
        &self,
        handle: &mut DbiHandle,
        stmt: &mut DbiStatement,
        values: &[ParamValue],
    ) -> Result<ExecOutcome> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = self.exec_inner(connection.as_mut(), stmt, values);
        self.settle(exception, result)
    }

    fn exec_inner(
        &self,
        conn: Option<&mut Connection>,
        stmt: &mut DbiStatement,
        values: &[ParamValue],
    ) -> Result<ExecOutcome> {
        let conn = connected(conn)?;
        self.runtime.ensure_thread()?;

        match conn.active_cursor() {
            Some(active) if active != stmt.id() => {
                return Err(DbiError::CursorActive { active });
            }
            Some(_) => self.flush_inner(conn, stmt)?,
            None => {}
        }

        let id = stmt.id();
        let entry = stmt.entry_mut()?;
        binder::bind(entry, values)?;

        let start = Instant::now();
        entry
            .client()
            .execute()
            .map_err(|e| translate(Stage::Execute, e))?;
        self.metrics.record_execution(start.elapsed());

        let outcome = if entry.column_count() > 0 {
            if let Err(e) = conn.fetch_mut().on_execute(entry) {
                if let Err(reset_err) = entry.client().reset() {
                    log::debug!("exec: reset after rejected result set failed: {}", reset_err);
                }
                return Err(e);
            }
            conn.set_active_cursor(Some(id));
            ExecOutcome::Rows
        } else {
            ExecOutcome::Dml
        };
        stmt.set_state(match outcome {
            ExecOutcome::Rows => StatementState::Executed,
            ExecOutcome::Dml => StatementState::Prepared,
        });

        self.logger.log_statement(
            Level::Debug,
            stmt.sql(),
            &[
                ("stmt", id.to_string()),
                ("params", values.len().to_string()),
                ("outcome", format!("{:?}", outcome)),
            ],
        );
        Ok(outcome)
    }

    /// Pull discipline: one value of the current row. Column 0 advances to
    /// the next row first.
    pub fn next_value<'a>(
        &self,
        handle: &'a mut DbiHandle,
        stmt: &mut DbiStatement,
        column: usize,
        row: usize,
    ) -> Result<PullResult<'a>> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = self.next_value_inner(connection.as_mut(), stmt, column, row);
        self.settle(exception, result)
    }

    fn next_value_inner<'a>(
        &self,
        conn: Option<&'a mut Connection>,
        stmt: &mut DbiStatement,
        column: usize,
        row: usize,
    ) -> Result<PullResult<'a>> {
        let conn = connected(conn)?;
        if !has_pending_rows(stmt)? {
            return Ok(PullResult::Done);
        }
        let id = stmt.id();
        let (fetch, cursor) = conn.fetch_and_cursor();
        self.metrics.record_regrowths(fetch.take_regrowths());

        let result = fetch.next_value(stmt.entry_mut()?, column, row)?;
        if result == PullResult::Done {
            if *cursor == Some(id) {
                *cursor = None;
            }
            stmt.set_state(StatementState::Prepared);
        } else {
            stmt.set_state(StatementState::Fetching);
        }
        Ok(result)
    }

    /// Bound discipline: advances one row. `false` once the rows are exhausted.
    pub fn next_row(&self, handle: &mut DbiHandle, stmt: &mut DbiStatement) -> Result<bool> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = self.next_row_inner(connection.as_mut(), stmt);
        self.settle(exception, result)
    }

    fn next_row_inner(&self, conn: Option<&mut Connection>, stmt: &mut DbiStatement) -> Result<bool> {
        let conn = connected(conn)?;
        if !has_pending_rows(stmt)? {
            return Ok(false);
        }
        let id = stmt.id();
        let has_row = conn.fetch_mut().next_row(stmt.entry_mut()?)?;
        if has_row {
            stmt.set_state(StatementState::Fetching);
        } else {
            conn.release_cursor(id);
            stmt.set_state(StatementState::Prepared);
        }
        Ok(has_row)
    }

    /// Bound discipline: length of `column` in the current row and whether
    /// it is binary. NULL reports 0.
    pub fn column_length(
        &self,
        handle: &mut DbiHandle,
        stmt: &DbiStatement,
        column: usize,
    ) -> Result<(usize, bool)> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = connected(connection.as_mut()).and_then(|conn| {
            holds_cursor(conn, stmt)?;
            conn.fetch_mut().column_length(prepared_entry(stmt)?, column)
        });
        self.settle(exception, result)
    }

    /// Bound discipline: copies `column` of the current row into `buffer`.
    pub fn column_value(
        &self,
        handle: &mut DbiHandle,
        stmt: &mut DbiStatement,
        column: usize,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = connected(connection.as_mut()).and_then(|conn| {
            holds_cursor(conn, stmt)?;
            conn.fetch_mut()
                .column_value(stmt.entry_mut()?, column, buffer)
        });
        self.settle(exception, result)
    }

    pub fn column_name(
        &self,
        handle: &mut DbiHandle,
        stmt: &DbiStatement,
        column: usize,
    ) -> Result<String> {
        let result = prepared_entry(stmt)
            .and_then(|entry| entry.column(column))
            .map(|meta| meta.name.clone());
        self.settle(&mut handle.exception, result)
    }

    pub fn transaction(
        &self,
        handle: &mut DbiHandle,
        depth: u32,
        cmd: TransactionCmd,
        isolation: IsolationLevel,
    ) -> Result<()> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = connected(connection.as_mut())
            .and_then(|conn| transaction::apply(conn, depth, cmd, isolation));
        self.settle(exception, result)
    }

    /// Runs `f` inside a depth-0 transaction: commit on `Ok`, rollback on `Err`.
    pub fn with_transaction<T, F>(
        &self,
        handle: &mut DbiHandle,
        isolation: IsolationLevel,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut DbiHandle) -> Result<T>,
    {
        self.transaction(handle, 0, TransactionCmd::Begin, isolation)?;
        match f(handle) {
            Ok(value) => {
                self.transaction(handle, 0, TransactionCmd::Commit, isolation)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) =
                    self.transaction(handle, 0, TransactionCmd::Rollback, isolation)
                {
                    log::warn!("rollback after failed transaction body failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Discards unread rows so the statement can be executed again. The
    /// compiled form and metadata are kept.
    pub fn flush(&self, handle: &mut DbiHandle, stmt: &mut DbiStatement) -> Result<()> {
        let DbiHandle {
            connection,
            exception,
        } = handle;
        let result = connected(connection.as_mut()).and_then(|conn| self.flush_inner(conn, stmt));
        self.settle(exception, result)
    }

    fn flush_inner(&self, conn: &mut Connection, stmt: &mut DbiStatement) -> Result<()> {
        let id = stmt.id();
        if stmt.is_prepared() {
            stmt.entry_mut()?
                .client()
                .reset()
                .map_err(|e| translate(Stage::Execute, e))?;
            stmt.set_state(StatementState::Prepared);
        }
        if conn.active_cursor().is_none() || conn.active_cursor() == Some(id) {
            let fetch = conn.fetch_mut();
            self.metrics.record_regrowths(fetch.take_regrowths());
            fetch.reset();
            conn.release_cursor(id);
        }
        Ok(())
    }

    /// Clears the handle's exception before it is reused.
    pub fn reset(&self, handle: &mut DbiHandle) -> Result<()> {
        handle.exception.clear();
        Ok(())
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name())
            .field("library", &self.runtime.library().name())
            .field("fetch_mode", &self.config.fetch_mode)
            .finish()
    }
}
