use super::connection::Connection;
use crate::engine::exception::{translate, Stage};
use crate::error::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::ReadUncommitted),
            1 => Some(Self::ReadCommitted),
            2 => Some(Self::RepeatableRead),
            3 => Some(Self::Serializable),
            _ => None,
        }
    }

    /// Accepts `read committed`, `read_committed` and `READ-COMMITTED` style names.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | '-' => ' ',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "READ UNCOMMITTED" => Some(Self::ReadUncommitted),
            "READ COMMITTED" => Some(Self::ReadCommitted),
            "REPEATABLE READ" => Some(Self::RepeatableRead),
            "SERIALIZABLE" => Some(Self::Serializable),
            _ => None,
        }
    }

    pub(crate) fn to_sql_keyword(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCmd {
    Begin,
    Commit,
    Rollback,
}

impl TransactionCmd {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Begin),
            1 => Some(Self::Commit),
            2 => Some(Self::Rollback),
            _ => None,
        }
    }
}

fn isolation_sql(level: IsolationLevel) -> String {
    format!(
        "SET SESSION TRANSACTION ISOLATION LEVEL {}",
        level.to_sql_keyword()
    )
}

/// Statement issued for `cmd` on the savepoint of nesting level `depth` (> 0).
pub(crate) fn savepoint_sql(cmd: TransactionCmd, depth: u32) -> String {
    match cmd {
        TransactionCmd::Begin => format!("SAVEPOINT s{}", depth),
        TransactionCmd::Commit => format!("RELEASE SAVEPOINT s{}", depth),
        TransactionCmd::Rollback => format!("ROLLBACK TO SAVEPOINT s{}", depth),
    }
}

/// Puts the session back on the connection default if Begin changed it,
/// whatever level the caller names on Commit or Rollback.
fn restore_default_isolation(conn: &mut Connection) -> Result<()> {
    if conn.take_applied_isolation().is_some() {
        let sql = isolation_sql(conn.default_isolation());
        conn.session_mut()
            .execute_direct(&sql)
            .map_err(|e| translate(Stage::Transaction, e))?;
    }
    Ok(())
}

/// Runs one transaction step on `conn`.
///
/// Depth 0 uses the client's native begin/commit/rollback and is the only
/// level where the isolation level is applied and later restored. Deeper
/// levels map to savepoints `s<depth>`.
pub(crate) fn apply(
    conn: &mut Connection,
    depth: u32,
    cmd: TransactionCmd,
    isolation: IsolationLevel,
) -> Result<()> {
    if depth > 0 {
        let sql = savepoint_sql(cmd, depth);
        log::debug!("transaction depth={} {}", depth, sql);
        return conn
            .session_mut()
            .execute_direct(&sql)
            .map_err(|e| translate(Stage::Transaction, e));
    }

    match cmd {
        TransactionCmd::Begin => {
            if isolation != conn.default_isolation() {
                conn.session_mut()
                    .execute_direct(&isolation_sql(isolation))
                    .map_err(|e| translate(Stage::Transaction, e))?;
                conn.set_applied_isolation(Some(isolation));
            }
            if let Err(e) = conn.session_mut().begin() {
                if let Err(restore_err) = restore_default_isolation(conn) {
                    log::warn!("isolation restore after failed begin failed: {}", restore_err);
                }
                return Err(translate(Stage::Transaction, e));
            }
            conn.set_autocommit(false);
        }
        TransactionCmd::Commit | TransactionCmd::Rollback => {
            let outcome = if cmd == TransactionCmd::Commit {
                conn.session_mut().commit()
            } else {
                conn.session_mut().rollback()
            };
            outcome.map_err(|e| translate(Stage::Transaction, e))?;
            conn.set_autocommit(true);
            restore_default_isolation(conn)?;
        }
    }
    log::debug!("transaction depth=0 {:?} isolation={:?}", cmd, isolation);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_from_u32() {
        assert_eq!(
            IsolationLevel::from_u32(0),
            Some(IsolationLevel::ReadUncommitted)
        );
        assert_eq!(
            IsolationLevel::from_u32(1),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            IsolationLevel::from_u32(2),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(IsolationLevel::from_u32(3), Some(IsolationLevel::Serializable));
        assert_eq!(IsolationLevel::from_u32(4), None);
    }

    #[test]
    fn test_isolation_level_parse_variants() {
        assert_eq!(
            IsolationLevel::parse("read committed"),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            IsolationLevel::parse("REPEATABLE-READ"),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(
            IsolationLevel::parse("read_uncommitted"),
            Some(IsolationLevel::ReadUncommitted)
        );
        assert_eq!(IsolationLevel::parse("snapshot"), None);
    }

    #[test]
    fn test_isolation_level_to_sql_keyword() {
        assert_eq!(
            IsolationLevel::ReadUncommitted.to_sql_keyword(),
            "READ UNCOMMITTED"
        );
        assert_eq!(IsolationLevel::Serializable.to_sql_keyword(), "SERIALIZABLE");
    }

    #[test]
    fn test_savepoint_sql_per_command() {
        assert_eq!(savepoint_sql(TransactionCmd::Begin, 1), "SAVEPOINT s1");
        assert_eq!(
            savepoint_sql(TransactionCmd::Commit, 2),
            "RELEASE SAVEPOINT s2"
        );
        assert_eq!(
            savepoint_sql(TransactionCmd::Rollback, 3),
            "ROLLBACK TO SAVEPOINT s3"
        );
    }

    #[test]
    fn test_transaction_cmd_from_u32() {
        assert_eq!(TransactionCmd::from_u32(0), Some(TransactionCmd::Begin));
        assert_eq!(TransactionCmd::from_u32(2), Some(TransactionCmd::Rollback));
        assert_eq!(TransactionCmd::from_u32(7), None);
    }

    #[test]
    fn test_isolation_level_deserialize() {
        let level: IsolationLevel = serde_json::from_str("\"read_committed\"").unwrap();
        assert_eq!(level, IsolationLevel::ReadCommitted);
    }
}
