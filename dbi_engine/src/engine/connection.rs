use super::fetch::{self, ResultFetch};
use super::runtime::ClientRuntime;
use super::transaction::IsolationLevel;
use crate::client::ClientSession;
use crate::config::DriverConfig;
use crate::engine::exception::{translate, Stage};
use crate::error::Result;

/// Statement that makes the session speak and return UTF-8.
pub const CHARSET_SQL: &str = "SET NAMES 'utf8mb4'";
pub const STRICT_MODE_SQL: &str =
    "SET SESSION sql_mode = 'STRICT_ALL_TABLES,NO_ENGINE_SUBSTITUTION'";

/// One live session plus the per-connection engine state.
pub struct Connection {
    session: Box<dyn ClientSession>,
    default_isolation: IsolationLevel,
    /// Level set by a depth-0 Begin that differs from the default.
    applied_isolation: Option<IsolationLevel>,
    autocommit: bool,
    server_info: String,
    active_cursor: Option<u64>,
    fetch: Box<dyn ResultFetch>,
}

impl Connection {
    pub fn open(runtime: &ClientRuntime, config: &DriverConfig) -> Result<Self> {
        runtime.ensure_thread()?;
        let mut session = runtime
            .library()
            .connect(config)
            .map_err(|e| translate(Stage::Connect, e))?;

        // The session is dropped (closed) on this error path.
        session
            .execute_direct(CHARSET_SQL)
            .map_err(|e| translate(Stage::Connect, e))?;

        if let Some(tz) = &config.time_zone {
            let sql = format!("SET time_zone = '{}'", tz.replace('\'', "''"));
            if let Err(e) = session.execute_direct(&sql) {
                log::warn!("could not set session time zone {}: {}", tz, e);
            }
        }
        if config.strict_mode {
            if let Err(e) = session.execute_direct(STRICT_MODE_SQL) {
                log::warn!("could not enable strict sql_mode: {}", e);
            }
        }

        let server_info = session.server_info();
        Ok(Self {
            session,
            default_isolation: config.default_isolation,
            applied_isolation: None,
            autocommit: true,
            server_info,
            active_cursor: None,
            fetch: fetch::for_mode(config.fetch_mode, config.initial_value_capacity),
        })
    }

    /// Releases the session.
    pub fn close(self) {
        drop(self);
    }

    /// Pings the server; any failure reads as disconnected.
    pub fn connected(&mut self) -> bool {
        self.session.ping().is_ok()
    }

    pub fn server_info(&self) -> &str {
        &self.server_info
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    pub fn applied_isolation(&self) -> Option<IsolationLevel> {
        self.applied_isolation
    }

    pub(crate) fn set_applied_isolation(&mut self, level: Option<IsolationLevel>) {
        self.applied_isolation = level;
    }

    pub(crate) fn take_applied_isolation(&mut self) -> Option<IsolationLevel> {
        self.applied_isolation.take()
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub(crate) fn set_autocommit(&mut self, on: bool) {
        self.autocommit = on;
    }

    /// Statement whose rows are still being read, if any.
    pub fn active_cursor(&self) -> Option<u64> {
        self.active_cursor
    }

    pub(crate) fn set_active_cursor(&mut self, stmt: Option<u64>) {
        self.active_cursor = stmt;
    }

    /// Clears the guard if `stmt` holds it.
    pub(crate) fn release_cursor(&mut self, stmt: u64) {
        if self.active_cursor == Some(stmt) {
            self.active_cursor = None;
        }
    }

    pub fn execute_direct(&mut self, sql: &str) -> Result<()> {
        self.session
            .execute_direct(sql)
            .map_err(|e| translate(Stage::Execute, e))
    }

    pub(crate) fn session_mut(&mut self) -> &mut dyn ClientSession {
        self.session.as_mut()
    }

    pub(crate) fn fetch_mut(&mut self) -> &mut dyn ResultFetch {
        self.fetch.as_mut()
    }

    /// The fetch engine and the cursor guard, borrowed separately.
    pub(crate) fn fetch_and_cursor(&mut self) -> (&mut dyn ResultFetch, &mut Option<u64>) {
        (self.fetch.as_mut(), &mut self.active_cursor)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_info", &self.server_info)
            .field("default_isolation", &self.default_isolation)
            .field("applied_isolation", &self.applied_isolation)
            .field("autocommit", &self.autocommit)
            .field("active_cursor", &self.active_cursor)
            .field("fetch_mode", &self.fetch.mode())
            .finish()
    }
}
