// Allow FFI functions to dereference raw pointers without being marked unsafe
#![allow(clippy::not_unsafe_ptr_arg_deref)]

//! C ABI over the driver. Handles and statements are addressed by ids.
//!
//! Return convention: `0` success, `-1` error (details via
//! `dbi_get_exception`), `-2` output buffer too small.

use crate::client::odbc::OdbcLibrary;
use crate::config::DriverConfig;
use crate::driver::{DbiHandle, Driver, ExecOutcome};
use crate::engine::{ClientRuntime, IsolationLevel, PullResult, StatementCache, TransactionCmd};
use crate::error::{DbiError, Result, StructuredError};
use crate::protocol::deserialize_params;
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::{Arc, Mutex, OnceLock};

struct HandleSlot {
    driver: Arc<Driver>,
    handle: DbiHandle,
    statements: StatementCache,
    sql_by_id: HashMap<u32, String>,
    id_by_sql: HashMap<String, u32>,
}

impl HandleSlot {
    fn sql_for(&self, stmt_id: u32) -> Result<String> {
        self.sql_by_id
            .get(&stmt_id)
            .cloned()
            .ok_or(DbiError::InvalidHandle(stmt_id))
    }
}

struct GlobalState {
    odbc_runtime: Option<Arc<ClientRuntime>>,
    handles: HashMap<u32, HandleSlot>,
    next_handle_id: u32,
    next_stmt_id: u32,
    /// Failures with no handle to record them on (bad config, failed open).
    last_error: Option<StructuredError>,
}

static GLOBAL_STATE: OnceLock<Mutex<GlobalState>> = OnceLock::new();

fn get_global_state() -> &'static Mutex<GlobalState> {
    GLOBAL_STATE.get_or_init(|| {
        Mutex::new(GlobalState {
            odbc_runtime: None,
            handles: HashMap::new(),
            next_handle_id: 1,
            next_stmt_id: 1,
            last_error: None,
        })
    })
}

/// Returns None if the mutex is poisoned, avoiding a panic across the ABI.
fn try_lock_global_state() -> Option<std::sync::MutexGuard<'static, GlobalState>> {
    get_global_state().lock().ok()
}

fn set_global_error(state: &mut GlobalState, err: &DbiError) {
    state.last_error = Some(err.to_structured());
}

fn c_str_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // Safety: caller passes a valid nul-terminated string.
    let c_str = unsafe { CStr::from_ptr(ptr) };
    c_str.to_str().ok().map(str::to_string)
}

fn odbc_runtime(state: &mut GlobalState) -> Result<Arc<ClientRuntime>> {
    if let Some(rt) = &state.odbc_runtime {
        return Ok(Arc::clone(rt));
    }
    let rt = ClientRuntime::new(Arc::new(OdbcLibrary::new()))?;
    state.odbc_runtime = Some(Arc::clone(&rt));
    Ok(rt)
}

/// Opens a handle on an already built driver and registers it for the C ABI.
/// Returns the handle id.
pub fn register_handle(driver: Arc<Driver>) -> Result<u32> {
    let mut handle = DbiHandle::new();
    driver.open(&mut handle)?;
    let cache_size = driver.config().statement_cache_size;

    let mut state = try_lock_global_state()
        .ok_or_else(|| DbiError::InternalError("global state lock poisoned".to_string()))?;
    let id = state.next_handle_id;
    state.next_handle_id = state.next_handle_id.wrapping_add(1).max(1);
    state.handles.insert(
        id,
        HandleSlot {
            driver,
            handle,
            statements: StatementCache::new(cache_size),
            sql_by_id: HashMap::new(),
            id_by_sql: HashMap::new(),
        },
    );
    Ok(id)
}

/// Runs `f` on the slot for `handle_id`; unknown ids are recorded globally.
fn with_slot<T>(handle_id: c_uint, f: impl FnOnce(&mut HandleSlot) -> Result<T>) -> Result<T> {
    let Some(mut state) = try_lock_global_state() else {
        return Err(DbiError::InternalError(
            "global state lock poisoned".to_string(),
        ));
    };
    let result = match state.handles.get_mut(&handle_id) {
        Some(slot) => f(slot),
        None => Err(DbiError::InvalidHandle(handle_id)),
    };
    if let Err(e @ DbiError::InvalidHandle(_)) = &result {
        set_global_error(&mut state, e);
    }
    result
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Opens a connection with the ODBC client.
/// config_json: nul-terminated JSON object of driver config values
/// Returns: handle id (>0) on success, 0 on failure
#[no_mangle]
pub extern "C" fn dbi_open(config_json: *const c_char) -> c_uint {
    let Some(json) = c_str_arg(config_json) else {
        return 0;
    };

    let driver = {
        let Some(mut state) = try_lock_global_state() else {
            return 0;
        };
        let built = DriverConfig::from_json(&json)
            .and_then(|config| odbc_runtime(&mut state).map(|rt| Driver::with_runtime(rt, config)));
        match built {
            Ok(driver) => Arc::new(driver),
            Err(e) => {
                set_global_error(&mut state, &e);
                return 0;
            }
        }
    };

    match register_handle(driver) {
        Ok(id) => id,
        Err(e) => {
            if let Some(mut state) = try_lock_global_state() {
                set_global_error(&mut state, &e);
            }
            0
        }
    }
}

/// Closes the connection and every statement of the handle.
#[no_mangle]
pub extern "C" fn dbi_close(handle_id: c_uint) -> c_int {
    let Some(mut state) = try_lock_global_state() else {
        return -1;
    };
    let Some(mut slot) = state.handles.remove(&handle_id) else {
        set_global_error(&mut state, &DbiError::InvalidHandle(handle_id));
        return -1;
    };
    drop(state);

    for mut stmt in slot.statements.drain() {
        slot.driver.prepare_close(&mut slot.handle, &mut stmt);
    }
    slot.driver.close(&mut slot.handle);
    0
}

/// Returns: 1 connected, 0 not connected or unknown handle
#[no_mangle]
pub extern "C" fn dbi_connected(handle_id: c_uint) -> c_int {
    let connected = with_slot(handle_id, |slot| Ok(slot.driver.connected(&mut slot.handle)));
    matches!(connected, Ok(true)) as c_int
}

/// Prepares `sql` (cached by text) and reports its parameter and column counts.
/// Returns: statement id (>0) on success, 0 on failure
#[no_mangle]
pub extern "C" fn dbi_prepare(
    handle_id: c_uint,
    sql: *const c_char,
    out_params: *mut c_uint,
    out_cols: *mut c_uint,
) -> c_uint {
    let Some(sql) = c_str_arg(sql) else {
        return 0;
    };

    let next_id = {
        let Some(mut state) = try_lock_global_state() else {
            return 0;
        };
        let id = state.next_stmt_id;
        state.next_stmt_id = state.next_stmt_id.wrapping_add(1).max(1);
        id
    };

    let result = with_slot(handle_id, |slot| {
        let HandleSlot {
            driver,
            handle,
            statements,
            sql_by_id,
            id_by_sql,
        } = slot;

        let (stmt, evicted) = statements.get_or_insert(&sql)?;
        if let Some(mut old) = evicted {
            driver.prepare_close(handle, &mut old);
            if let Some(old_id) = id_by_sql.remove(old.sql()) {
                sql_by_id.remove(&old_id);
            }
        }
        let counts = driver.prepare(handle, stmt)?;
        let stmt_id = *id_by_sql.entry(sql.clone()).or_insert(next_id);
        sql_by_id.insert(stmt_id, sql.clone());
        Ok((stmt_id, counts))
    });

    match result {
        Ok((stmt_id, (params, cols))) => {
            // Safety: out pointers are checked for null before writing.
            unsafe {
                if !out_params.is_null() {
                    *out_params = params as c_uint;
                }
                if !out_cols.is_null() {
                    *out_cols = cols as c_uint;
                }
            }
            stmt_id
        }
        Err(_) => 0,
    }
}

#[no_mangle]
pub extern "C" fn dbi_prepare_close(handle_id: c_uint, stmt_id: c_uint) -> c_int {
    status(with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        slot.sql_by_id.remove(&stmt_id);
        slot.id_by_sql.remove(&sql);
        if let Some(mut stmt) = slot.statements.remove(&sql) {
            slot.driver.prepare_close(&mut slot.handle, &mut stmt);
        }
        Ok(())
    }))
}

/// Executes a prepared statement.
/// params_buffer: tagged parameter values (tag u8, length u32 LE, bytes), or NULL
/// Returns: 1 result rows to fetch, 0 no result set, -1 error
#[no_mangle]
pub extern "C" fn dbi_exec(
    handle_id: c_uint,
    stmt_id: c_uint,
    params_buffer: *const u8,
    params_len: c_uint,
) -> c_int {
    let params = if params_buffer.is_null() || params_len == 0 {
        Ok(Vec::new())
    } else {
        // Safety: caller guarantees `params_len` readable bytes.
        let bytes = unsafe { std::slice::from_raw_parts(params_buffer, params_len as usize) };
        deserialize_params(bytes)
    };

    let result = with_slot(handle_id, |slot| {
        let values = match params {
            Ok(v) => v,
            Err(e) => {
                slot.handle.set_exception(&e.sqlstate_str(), e.message());
                return Err(e);
            }
        };
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        slot.driver.exec(&mut slot.handle, stmt, &values)
    });

    match result {
        Ok(ExecOutcome::Rows) => 1,
        Ok(ExecOutcome::Dml) => 0,
        Err(_) => -1,
    }
}

/// Pull fetch of one value. `out_ptr` stays valid until the next call on
/// the handle; it is NULL for SQL NULL.
/// Returns: 1 value, 0 no more rows, -1 error
#[no_mangle]
pub extern "C" fn dbi_next_value(
    handle_id: c_uint,
    stmt_id: c_uint,
    column: c_uint,
    row: c_uint,
    out_ptr: *mut *const u8,
    out_len: *mut c_uint,
    out_binary: *mut c_int,
) -> c_int {
    if out_ptr.is_null() || out_len.is_null() {
        return -1;
    }
    let result = with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        let pulled = slot
            .driver
            .next_value(&mut slot.handle, stmt, column as usize, row as usize)?;
        Ok(match pulled {
            PullResult::Value(v) => Some((
                v.data.map_or(std::ptr::null(), <[u8]>::as_ptr),
                v.length,
                v.binary,
            )),
            PullResult::Done => None,
        })
    });

    match result {
        Ok(Some((ptr, len, binary))) => {
            // Safety: out pointers are non-null (checked above).
            unsafe {
                *out_ptr = ptr;
                *out_len = len as c_uint;
                if !out_binary.is_null() {
                    *out_binary = binary as c_int;
                }
            }
            1
        }
        Ok(None) => 0,
        Err(_) => -1,
    }
}

/// Returns: 1 row, 0 no more rows, -1 error
#[no_mangle]
pub extern "C" fn dbi_next_row(handle_id: c_uint, stmt_id: c_uint) -> c_int {
    let result = with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        slot.driver.next_row(&mut slot.handle, stmt)
    });
    match result {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn dbi_column_length(
    handle_id: c_uint,
    stmt_id: c_uint,
    column: c_uint,
    out_len: *mut c_uint,
    out_binary: *mut c_int,
) -> c_int {
    if out_len.is_null() {
        return -1;
    }
    let result = with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        slot.driver
            .column_length(&mut slot.handle, stmt, column as usize)
    });
    match result {
        Ok((len, binary)) => {
            // Safety: `out_len` checked non-null above.
            unsafe {
                *out_len = len as c_uint;
                if !out_binary.is_null() {
                    *out_binary = binary as c_int;
                }
            }
            0
        }
        Err(_) => -1,
    }
}

#[no_mangle]
pub extern "C" fn dbi_column_value(
    handle_id: c_uint,
    stmt_id: c_uint,
    column: c_uint,
    buffer: *mut u8,
    buffer_len: c_uint,
    out_written: *mut c_uint,
) -> c_int {
    if out_written.is_null() || (buffer.is_null() && buffer_len > 0) {
        return -1;
    }
    let result = with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        let out: &mut [u8] = if buffer_len == 0 {
            &mut []
        } else {
            // Safety: caller guarantees `buffer_len` writable bytes.
            unsafe { std::slice::from_raw_parts_mut(buffer, buffer_len as usize) }
        };
        slot.driver
            .column_value(&mut slot.handle, stmt, column as usize, out)
    });
    match result {
        Ok(written) => {
            // Safety: `out_written` checked non-null above.
            unsafe { *out_written = written as c_uint };
            0
        }
        Err(_) => -1,
    }
}

/// Copies the column name, nul-terminated.
/// Returns: name length on success, -1 error, -2 buffer too small
#[no_mangle]
pub extern "C" fn dbi_column_name(
    handle_id: c_uint,
    stmt_id: c_uint,
    column: c_uint,
    buffer: *mut c_char,
    buffer_len: c_uint,
) -> c_int {
    if buffer.is_null() || buffer_len == 0 {
        return -1;
    }
    let result = with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        slot.driver
            .column_name(&mut slot.handle, stmt, column as usize)
    });
    let Ok(name) = result else {
        return -1;
    };
    let bytes = name.as_bytes();
    if bytes.len() + 1 > buffer_len as usize {
        return -2;
    }
    // Safety: `buffer` valid for `buffer_len` bytes; length checked above.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, bytes.len());
        *buffer.add(bytes.len()) = 0;
    }
    bytes.len() as c_int
}

/// depth: 0 outermost transaction, >0 savepoint s<depth>
/// cmd: 0 begin, 1 commit, 2 rollback
/// isolation: 0 read uncommitted, 1 read committed, 2 repeatable read, 3 serializable
#[no_mangle]
pub extern "C" fn dbi_transaction(
    handle_id: c_uint,
    depth: c_uint,
    cmd: c_uint,
    isolation: c_uint,
) -> c_int {
    status(with_slot(handle_id, |slot| {
        let parsed = TransactionCmd::from_u32(cmd)
            .zip(IsolationLevel::from_u32(isolation))
            .ok_or_else(|| {
                DbiError::ValidationError(format!(
                    "invalid transaction command {} or isolation level {}",
                    cmd, isolation
                ))
            });
        let (cmd, isolation) = match parsed {
            Ok(p) => p,
            Err(e) => {
                slot.handle.set_exception(&e.sqlstate_str(), e.message());
                return Err(e);
            }
        };
        slot.driver
            .transaction(&mut slot.handle, depth, cmd, isolation)
    }))
}

#[no_mangle]
pub extern "C" fn dbi_flush(handle_id: c_uint, stmt_id: c_uint) -> c_int {
    status(with_slot(handle_id, |slot| {
        let sql = slot.sql_for(stmt_id)?;
        let stmt = slot
            .statements
            .get_mut(&sql)
            .ok_or(DbiError::InvalidHandle(stmt_id))?;
        slot.driver.flush(&mut slot.handle, stmt)
    }))
}

#[no_mangle]
pub extern "C" fn dbi_reset(handle_id: c_uint) -> c_int {
    status(with_slot(handle_id, |slot| {
        slot.driver.reset(&mut slot.handle)
    }))
}

/// Serialized exception of the handle (or the last handle-less failure when
/// `handle_id` is 0): sqlstate[5] native_code i32 LE msg_len u32 LE msg.
/// Returns: 0 on success, -1 error, -2 buffer too small
#[no_mangle]
pub extern "C" fn dbi_get_exception(
    handle_id: c_uint,
    buffer: *mut u8,
    buffer_len: c_uint,
    out_written: *mut c_uint,
) -> c_int {
    if buffer.is_null() || out_written.is_null() {
        return -1;
    }
    let Some(state) = try_lock_global_state() else {
        return -1;
    };

    let error = if handle_id == 0 {
        state.last_error.clone()
    } else {
        match state.handles.get(&handle_id) {
            Some(slot) => slot.handle.exception().to_structured(),
            None => state.last_error.clone(),
        }
    };
    let error_data = error
        .unwrap_or_else(|| StructuredError::new("00000", 0, ""))
        .serialize();

    if error_data.len() > buffer_len as usize {
        return -2;
    }

    // Safety: `buffer` valid for `buffer_len` bytes, `out_written` non-null.
    unsafe {
        std::ptr::copy_nonoverlapping(error_data.as_ptr(), buffer, error_data.len());
        *out_written = error_data.len() as c_uint;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::ffi::CString;

    fn read_exception(handle_id: c_uint) -> StructuredError {
        let mut buf = vec![0u8; 1024];
        let mut written: c_uint = 0;
        assert_eq!(
            dbi_get_exception(handle_id, buf.as_mut_ptr(), buf.len() as c_uint, &mut written),
            0
        );
        StructuredError::deserialize(&buf[..written as usize]).expect("valid exception")
    }

    #[test]
    fn test_open_null_config_fails() {
        assert_eq!(dbi_open(std::ptr::null()), 0);
    }

    #[test]
    #[serial]
    fn test_open_bad_json_records_global_error() {
        let cfg = CString::new("{not json").unwrap();
        assert_eq!(dbi_open(cfg.as_ptr()), 0);
        let err = read_exception(0);
        assert_eq!(err.sqlstate_str(), "HY009");
        assert!(err.message.contains("Invalid driver config"));
    }

    #[test]
    #[serial]
    fn test_unknown_handle_is_error() {
        assert_eq!(dbi_close(999_999), -1);
        assert_eq!(dbi_connected(999_999), 0);
        assert_eq!(dbi_flush(999_999, 1), -1);
        assert_eq!(dbi_reset(999_999), -1);
    }

    #[test]
    fn test_get_exception_null_buffer() {
        let mut written: c_uint = 0;
        assert_eq!(dbi_get_exception(0, std::ptr::null_mut(), 10, &mut written), -1);
    }

    #[test]
    #[serial]
    fn test_get_exception_buffer_too_small() {
        let mut buf = [0u8; 4];
        let mut written: c_uint = 0;
        assert_eq!(dbi_get_exception(0, buf.as_mut_ptr(), 4, &mut written), -2);
    }

    #[test]
    #[serial]
    fn test_mock_handle_prepare_exec_fetch() {
        use crate::client::mock::{cell, MockClient};
        use crate::client::FieldInfo;
        use crate::protocol::{serialize_params, FieldType, ParamValue};

        let mock = MockClient::new();
        mock.script(
            "SELECT name FROM t WHERE id = ?",
            vec![FieldInfo::new("name", FieldType::VarString)],
            vec![vec![cell("alice")]],
        );
        let driver = Driver::new(Arc::new(mock.clone()), DriverConfig::default()).unwrap();
        let handle_id = register_handle(Arc::new(driver)).unwrap();
        assert_eq!(dbi_connected(handle_id), 1);

        let sql = CString::new("SELECT name FROM t WHERE id = ?").unwrap();
        let (mut params, mut cols) = (0, 0);
        let stmt_id = dbi_prepare(handle_id, sql.as_ptr(), &mut params, &mut cols);
        assert!(stmt_id > 0);
        assert_eq!((params, cols), (1, 1));
        // Same text hits the cache and keeps its id.
        assert_eq!(dbi_prepare(handle_id, sql.as_ptr(), &mut params, &mut cols), stmt_id);

        let buf = serialize_params(&[ParamValue::text("1")]);
        assert_eq!(dbi_exec(handle_id, stmt_id, buf.as_ptr(), buf.len() as c_uint), 1);

        let mut ptr: *const u8 = std::ptr::null();
        let mut len: c_uint = 0;
        let mut binary: c_int = -1;
        assert_eq!(
            dbi_next_value(handle_id, stmt_id, 0, 0, &mut ptr, &mut len, &mut binary),
            1
        );
        let value = unsafe { std::slice::from_raw_parts(ptr, len as usize) };
        assert_eq!(value, b"alice");
        assert_eq!(binary, 0);
        assert_eq!(
            dbi_next_value(handle_id, stmt_id, 0, 1, &mut ptr, &mut len, &mut binary),
            0
        );

        let mut name = [0 as c_char; 16];
        assert_eq!(dbi_column_name(handle_id, stmt_id, 0, name.as_mut_ptr(), 16), 4);
        assert_eq!(dbi_column_name(handle_id, stmt_id, 0, name.as_mut_ptr(), 3), -2);

        assert_eq!(dbi_prepare_close(handle_id, stmt_id), 0);
        assert_eq!(dbi_flush(handle_id, stmt_id), -1);
        assert_eq!(dbi_close(handle_id), 0);
        assert_eq!(dbi_connected(handle_id), 0);
    }

    #[test]
    #[serial]
    fn test_mock_handle_exception_after_bind_mismatch() {
        use crate::client::mock::MockClient;

        let mock = MockClient::new();
        let driver = Driver::new(Arc::new(mock), DriverConfig::default()).unwrap();
        let handle_id = register_handle(Arc::new(driver)).unwrap();

        let sql = CString::new("UPDATE t SET a = ? WHERE b = ?").unwrap();
        let stmt_id = dbi_prepare(handle_id, sql.as_ptr(), std::ptr::null_mut(), std::ptr::null_mut());
        assert!(stmt_id > 0);

        let buf = serialize_one_text("x");
        assert_eq!(dbi_exec(handle_id, stmt_id, buf.as_ptr(), buf.len() as c_uint), -1);
        let err = read_exception(handle_id);
        assert_eq!(err.sqlstate_str(), "07001");

        assert_eq!(dbi_reset(handle_id), 0);
        assert_eq!(read_exception(handle_id).sqlstate_str(), "00000");
        assert_eq!(dbi_close(handle_id), 0);
    }

    fn serialize_one_text(s: &str) -> Vec<u8> {
        crate::protocol::serialize_params(&[crate::protocol::ParamValue::text(s)])
    }
}
