//! Production client backend over `odbc-api` (MySQL Connector/ODBC or any DSN).

use super::cell_reader::read_cell_bytes;
use super::{
    ClientError, ClientLibrary, ClientResult, ClientSession, ClientStatement, ColumnFetch,
    FetchStatus, FieldInfo, OutputSlot, WireParam,
};
use crate::config::DriverConfig;
use crate::protocol::{FieldType, ValueKind};
use odbc_api::handles::Record as OdbcRecord;
use odbc_api::parameter::{InputParameter, VarBinaryBox, VarCharBox};
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

static ENVIRONMENT: OnceLock<Result<&'static Environment, String>> = OnceLock::new();

/// `Connection<'static>` borrows the environment, so it is leaked once per
/// process and lives until exit.
fn environment() -> ClientResult<&'static Environment> {
    ENVIRONMENT
        .get_or_init(|| {
            Environment::new()
                .map(|env| &*Box::leak(Box::new(env)))
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|msg| ClientError::new(0, "HY000", msg))
}

impl From<odbc_api::Error> for ClientError {
    fn from(err: odbc_api::Error) -> Self {
        use odbc_api::Error as OdbcErr;
        let record = match &err {
            OdbcErr::Diagnostics { record, .. } => record,
            OdbcErr::UnsupportedOdbcApiVersion(record) => record,
            OdbcErr::InvalidRowArraySize { record, .. } => record,
            OdbcErr::UnableToRepresentNull(record) => record,
            OdbcErr::OracleOdbcDriverDoesNotSupport64Bit(record) => record,
            _ => return ClientError::new(0, "HY000", err.to_string()),
        };
        from_record(record)
    }
}

fn from_record(record: &OdbcRecord) -> ClientError {
    ClientError {
        code: record.native_error,
        sqlstate: String::from_utf8_lossy(&record.state.0).into_owned(),
        message: record.to_string(),
    }
}

fn lock_failed() -> ClientError {
    ClientError::new(0, "HY000", "ODBC connection lock poisoned")
}

/// Wraps a connection string attribute value in braces when it contains
/// characters that would otherwise end the attribute.
fn escape_attr(value: &str) -> String {
    if value.contains([';', '{', '}', '=']) || value.starts_with(' ') || value.ends_with(' ') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

pub(crate) fn connection_string(config: &DriverConfig) -> String {
    let mut parts = Vec::new();
    match &config.dsn {
        Some(dsn) => parts.push(format!("DSN={}", escape_attr(dsn))),
        None => {
            parts.push(format!("Driver={{{}}}", config.odbc_driver.replace('}', "}}")));
            parts.push(format!(
                "Server={}",
                escape_attr(config.host.as_deref().unwrap_or("localhost"))
            ));
            if config.port != 0 {
                parts.push(format!("Port={}", config.port));
            }
            if let Some(socket) = &config.unix_socket {
                parts.push(format!("Socket={}", escape_attr(socket)));
            }
        }
    }
    parts.push(format!("Database={}", escape_attr(&config.database)));
    parts.push(format!("Uid={}", escape_attr(&config.user)));
    if !config.password.is_empty() {
        parts.push(format!("Pwd={}", escape_attr(&config.password.to_string_lossy())));
    }
    parts.push("CharSet=utf8mb4".to_string());
    parts.join(";")
}

/// The process-wide ODBC client.
#[derive(Debug, Default)]
pub struct OdbcLibrary;

impl OdbcLibrary {
    pub fn new() -> Self {
        Self
    }
}

impl ClientLibrary for OdbcLibrary {
    fn name(&self) -> &str {
        "odbc"
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn library_init(&self) -> ClientResult<()> {
        environment().map(|_| ())
    }

    fn library_end(&self) {
        log::debug!("odbc: library end (environment released at process exit)");
    }

    fn thread_init(&self) -> ClientResult<()> {
        Ok(())
    }

    fn thread_end(&self) {}

    fn connect(&self, config: &DriverConfig) -> ClientResult<Box<dyn ClientSession>> {
        if config.embedded {
            return Err(ClientError::new(
                0,
                "HYC00",
                "embedded server is not available through ODBC",
            ));
        }
        let env = environment()?;
        let opts = ConnectionOptions {
            login_timeout_sec: config.connect_timeout_secs,
            ..ConnectionOptions::default()
        };
        let conn = env.connect_with_connection_string(&connection_string(config), opts)?;
        let server_info = conn
            .database_management_system_name()
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Box::new(OdbcSession {
            conn: Arc::new(Mutex::new(conn)),
            server_info,
        }))
    }
}

type SharedConnection = Arc<Mutex<Connection<'static>>>;

pub struct OdbcSession {
    conn: SharedConnection,
    server_info: String,
}

impl ClientSession for OdbcSession {
    fn execute_direct(&mut self, sql: &str) -> ClientResult<()> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        conn.execute(sql, (), None)?;
        Ok(())
    }

    fn ping(&mut self) -> ClientResult<()> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        conn.execute("SELECT 1", (), None)?;
        Ok(())
    }

    fn begin(&mut self) -> ClientResult<()> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        conn.set_autocommit(false)?;
        Ok(())
    }

    fn commit(&mut self) -> ClientResult<()> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        conn.commit()?;
        conn.set_autocommit(true)?;
        Ok(())
    }

    fn rollback(&mut self) -> ClientResult<()> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        conn.rollback()?;
        conn.set_autocommit(true)?;
        Ok(())
    }

    fn server_info(&self) -> String {
        self.server_info.clone()
    }

    fn prepare(&mut self, sql: &str) -> ClientResult<Box<dyn ClientStatement>> {
        let conn = self.conn.lock().map_err(|_| lock_failed())?;
        let mut prepared = conn.prepare(sql)?;
        let param_count = prepared.num_params()? as usize;
        let cols = prepared.num_result_cols()?;
        let mut fields = Vec::with_capacity(cols.max(0) as usize);
        for col in 1..=cols.max(0) as u16 {
            let name = prepared.col_name(col)?;
            let data_type = prepared.col_data_type(col)?;
            fields.push(FieldInfo::new(name, FieldType::from_data_type(&data_type)));
        }
        drop(prepared);
        drop(conn);

        Ok(Box::new(OdbcStatement {
            conn: Arc::clone(&self.conn),
            sql: sql.to_string(),
            param_count,
            fields,
            params: PendingParams::default(),
            rows: VecDeque::new(),
            current: None,
        }))
    }
}

#[derive(Debug, Clone)]
enum OwnedParam {
    Null,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// Values bound for the next execution only.
#[derive(Debug, Default)]
struct PendingParams(Vec<OwnedParam>);

impl PendingParams {
    fn set(&mut self, params: &[WireParam<'_>]) {
        self.0 = params
            .iter()
            .map(|p| match p {
                WireParam::Null => OwnedParam::Null,
                WireParam::Text(b) => OwnedParam::Text(b.to_vec()),
                WireParam::Binary(b) => OwnedParam::Binary(b.to_vec()),
            })
            .collect();
    }

    /// Consumes the bound values; an execution with nothing bound sends none.
    fn take_boxed(&mut self) -> Vec<Box<dyn InputParameter>> {
        std::mem::take(&mut self.0)
            .into_iter()
            .map(|p| -> Box<dyn InputParameter> {
                match p {
                    OwnedParam::Null => Box::new(VarCharBox::null()),
                    OwnedParam::Text(b) => Box::new(VarCharBox::from_vec(b)),
                    OwnedParam::Binary(b) => Box::new(VarBinaryBox::from_vec(b)),
                }
            })
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

type Row = Vec<Option<Vec<u8>>>;

/// A described statement. `prepare` only reads parameter and column
/// metadata; the SQL text is sent again on every execute, so there is no
/// server-side compiled form to reuse. The result set is materialized at
/// execute time so a column can be fetched again from offset 0.
pub struct OdbcStatement {
    conn: SharedConnection,
    sql: String,
    param_count: usize,
    fields: Vec<FieldInfo>,
    params: PendingParams,
    rows: VecDeque<Row>,
    current: Option<Row>,
}

impl OdbcStatement {
    fn advance(&mut self) -> FetchStatus {
        self.current = self.rows.pop_front();
        if self.current.is_some() {
            FetchStatus::Row
        } else {
            FetchStatus::NoData
        }
    }
}

impl ClientStatement for OdbcStatement {
    fn param_count(&self) -> usize {
        self.param_count
    }

    fn field_count(&self) -> usize {
        self.fields.len()
    }

    fn result_metadata(&mut self) -> ClientResult<Vec<FieldInfo>> {
        Ok(self.fields.clone())
    }

    fn bind_params(&mut self, params: &[WireParam<'_>]) -> ClientResult<()> {
        self.params.set(params);
        Ok(())
    }

    fn execute(&mut self) -> ClientResult<()> {
        self.rows.clear();
        self.current = None;
        let params = self.params.take_boxed();
        let kinds: Vec<ValueKind> = self
            .fields
            .iter()
            .map(|f| f.field_type.value_kind())
            .collect();

        let rows = {
            let conn = self.conn.lock().map_err(|_| lock_failed())?;
            let mut rows = VecDeque::new();
            if let Some(mut cursor) = conn.execute(&self.sql, params.as_slice(), None)? {
                while let Some(mut row) = cursor.next_row()? {
                    let mut values = Vec::with_capacity(kinds.len());
                    for (idx, kind) in kinds.iter().enumerate() {
                        values.push(read_cell_bytes(&mut row, (idx + 1) as u16, *kind)?);
                    }
                    rows.push_back(values);
                }
            }
            rows
        };
        self.rows = rows;
        Ok(())
    }

    fn fetch(&mut self) -> ClientResult<FetchStatus> {
        Ok(self.advance())
    }

    fn fetch_bound(&mut self, slots: &mut [OutputSlot]) -> ClientResult<FetchStatus> {
        let status = self.advance();
        if let Some(row) = &self.current {
            for (slot, value) in slots.iter_mut().zip(row.iter()) {
                *slot = match value {
                    Some(v) => OutputSlot {
                        length: v.len(),
                        is_null: false,
                    },
                    None => OutputSlot {
                        length: 0,
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
        _kind: ValueKind,
        buffer: &mut [u8],
    ) -> ClientResult<ColumnFetch> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| ClientError::new(2051, "HY010", "No row fetched"))?;
        let value = row
            .get(column)
            .ok_or_else(|| ClientError::new(2034, "07009", "Invalid column index"))?;
        match value {
            None => Ok(ColumnFetch {
                length: 0,
                is_null: true,
            }),
            Some(bytes) => {
                let n = bytes.len().min(buffer.len());
                buffer[..n].copy_from_slice(&bytes[..n]);
                Ok(ColumnFetch {
                    length: bytes.len(),
                    is_null: false,
                })
            }
        }
    }

    fn reset(&mut self) -> ClientResult<()> {
        self.rows.clear();
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_params_are_sent_once() {
        let mut pending = PendingParams::default();
        pending.set(&[WireParam::Text(b"42"), WireParam::Null, WireParam::Binary(&[0, 255])]);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.take_boxed().len(), 3);
        assert_eq!(pending.len(), 0);
        assert!(pending.take_boxed().is_empty());
    }

    #[test]
    fn test_connection_string_from_parts() {
        let config = DriverConfig {
            host: Some("db.example".to_string()),
            port: 3307,
            database: "shop".to_string(),
            user: "app".to_string(),
            password: "pw".into(),
            ..DriverConfig::default()
        };
        let s = connection_string(&config);
        assert_eq!(
            s,
            "Driver={MySQL ODBC 8.0 Unicode Driver};Server=db.example;Port=3307;Database=shop;Uid=app;Pwd=pw;CharSet=utf8mb4"
        );
    }

    #[test]
    fn test_connection_string_with_dsn() {
        let config = DriverConfig {
            dsn: Some("mysql-local".to_string()),
            ..DriverConfig::default()
        };
        let s = connection_string(&config);
        assert!(s.starts_with("DSN=mysql-local;Database=mysql;Uid=root"));
        assert!(!s.contains("Pwd="));
    }

    #[test]
    fn test_connection_string_escapes_separators() {
        let config = DriverConfig {
            password: "a;b}c".into(),
            unix_socket: Some("/tmp/mysql.sock".to_string()),
            ..DriverConfig::default()
        };
        let s = connection_string(&config);
        assert!(s.contains("Pwd={a;b}}c}"));
        assert!(s.contains("Socket=/tmp/mysql.sock"));
        assert!(s.contains("Server=localhost"));
    }

    #[test]
    fn test_embedded_is_rejected() {
        let lib = OdbcLibrary::new();
        let config = DriverConfig {
            embedded: true,
            ..DriverConfig::default()
        };
        match lib.connect(&config) {
            Err(e) => assert_eq!(e.sqlstate, "HYC00"),
            Ok(_) => panic!("embedded connect must fail"),
        }
    }

    #[test]
    fn test_library_reports_thread_safe() {
        assert!(OdbcLibrary::new().is_thread_safe());
        assert_eq!(OdbcLibrary::new().name(), "odbc");
    }
}
