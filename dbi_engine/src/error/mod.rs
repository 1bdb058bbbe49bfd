use std::fmt;
use thiserror::Error;

/// Error family callers branch on (never on message text).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport or authentication failure at Open; the handle is unusable
    Connect,
    /// Malformed SQL or resource exhaustion while compiling
    Prepare,
    /// Parameter count/type mismatch; nothing was executed
    Bind,
    /// Runtime failure during execution or fetch
    Execute,
    /// Begin/commit/rollback/savepoint failure
    Transaction,
    /// Call made in the wrong statement or connection state
    State,
    /// Invalid caller input
    Validation,
    /// Bug or poisoned lock inside the engine
    Internal,
}

/// SQLSTATE + native code + message, as reported by the client library or
/// synthesized by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredError {
    pub sqlstate: [u8; 5],
    pub native_code: i32,
    pub message: String,
}

impl StructuredError {
    pub fn new(sqlstate: &str, native_code: i32, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate_bytes(sqlstate),
            native_code,
            message: message.into(),
        }
    }

    pub fn sqlstate_str(&self) -> String {
        String::from_utf8_lossy(&self.sqlstate).into_owned()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.sqlstate);
        buffer.extend_from_slice(&self.native_code.to_le_bytes());
        let msg_bytes = self.message.as_bytes();
        buffer.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
        buffer.extend_from_slice(msg_bytes);
        buffer
    }

    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < 13 {
            return None;
        }

        let mut sqlstate = [0u8; 5];
        sqlstate.copy_from_slice(&data[0..5]);

        let native_code = i32::from_le_bytes([data[5], data[6], data[7], data[8]]);

        let msg_len = u32::from_le_bytes([data[9], data[10], data[11], data[12]]) as usize;

        if data.len() < 13 + msg_len {
            return None;
        }

        let message = String::from_utf8(data[13..13 + msg_len].to_vec()).ok()?;

        Some(Self {
            sqlstate,
            native_code,
            message,
        })
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] ({}) {}",
            self.sqlstate_str(),
            self.native_code,
            self.message
        )
    }
}

/// Pads or truncates to exactly five bytes; short states are padded with '0'.
pub(crate) fn sqlstate_bytes(state: &str) -> [u8; 5] {
    let mut out = [b'0'; 5];
    for (dst, src) in out.iter_mut().zip(state.bytes()) {
        *dst = src;
    }
    out
}

#[derive(Error, Debug, Clone)]
pub enum DbiError {
    #[error("Connect failed: {0}")]
    Connect(StructuredError),

    #[error("Prepare failed: {0}")]
    Prepare(StructuredError),

    #[error("Bind failed: {0}")]
    Bind(StructuredError),

    #[error("Execute failed: {0}")]
    Execute(StructuredError),

    #[error("Fetch failed: {0}")]
    Fetch(StructuredError),

    #[error("Transaction failed: {0}")]
    Transaction(StructuredError),

    #[error("Statement {active} still has unread rows on this connection")]
    CursorActive { active: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid handle ID: {0}")]
    InvalidHandle(u32),

    #[error("Handle is not connected")]
    NotConnected,

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DbiError {
    /// The client or engine diagnostic carried by the stage families.
    pub fn diagnostic(&self) -> Option<&StructuredError> {
        match self {
            DbiError::Connect(d)
            | DbiError::Prepare(d)
            | DbiError::Bind(d)
            | DbiError::Execute(d)
            | DbiError::Fetch(d)
            | DbiError::Transaction(d) => Some(d),
            _ => None,
        }
    }

    pub fn sqlstate(&self) -> [u8; 5] {
        if let Some(d) = self.diagnostic() {
            return d.sqlstate;
        }
        let state = match self {
            DbiError::CursorActive { .. } => "24000",
            DbiError::InvalidState(_) => "HY010",
            DbiError::NotConnected => "08003",
            DbiError::UnsupportedFeature(_) => "HYC00",
            DbiError::ValidationError(_) => "HY009",
            _ => "HY000",
        };
        sqlstate_bytes(state)
    }

    pub fn sqlstate_str(&self) -> String {
        String::from_utf8_lossy(&self.sqlstate()).into_owned()
    }

    /// Two-character SQLSTATE class, e.g. `"08"` for connection exceptions.
    pub fn sqlstate_class(&self) -> String {
        String::from_utf8_lossy(&self.sqlstate()[..2]).into_owned()
    }

    pub fn native_code(&self) -> i32 {
        self.diagnostic().map(|d| d.native_code).unwrap_or(0)
    }

    pub fn message(&self) -> String {
        match self.diagnostic() {
            Some(d) => d.message.clone(),
            None => self.to_string(),
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError {
            sqlstate: self.sqlstate(),
            native_code: self.native_code(),
            message: self.message(),
        }
    }

    /// Returns true if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbiError::Connect(_) | DbiError::NotConnected)
            || self.sqlstate_class() == "08"
    }

    /// Returns the error category for decision-making
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            DbiError::Connect(_) | DbiError::NotConnected => ErrorCategory::Connect,
            DbiError::Prepare(_) => ErrorCategory::Prepare,
            DbiError::Bind(_) => ErrorCategory::Bind,
            DbiError::Execute(_) | DbiError::Fetch(_) => ErrorCategory::Execute,
            DbiError::Transaction(_) => ErrorCategory::Transaction,
            DbiError::CursorActive { .. } | DbiError::InvalidState(_) => ErrorCategory::State,
            DbiError::InvalidHandle(_)
            | DbiError::ValidationError(_)
            | DbiError::UnsupportedFeature(_) => ErrorCategory::Validation,
            DbiError::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbi_error_variants() {
        let err1 = DbiError::NotConnected;
        assert_eq!(err1.to_string(), "Handle is not connected");

        let err2 = DbiError::InvalidHandle(42);
        assert_eq!(err2.to_string(), "Invalid handle ID: 42");

        let err3 = DbiError::CursorActive { active: 7 };
        assert!(err3.to_string().contains("Statement 7"));

        let err4 = DbiError::ValidationError("Test validation".to_string());
        assert_eq!(err4.to_string(), "Validation error: Test validation");

        let err5 = DbiError::Prepare(StructuredError::new("42000", 1064, "syntax error"));
        assert!(err5.to_string().contains("syntax error"));
        assert!(err5.to_string().contains("[42000]"));

        let err6 = DbiError::UnsupportedFeature("Feature X".to_string());
        assert!(err6.to_string().contains("Feature X"));
    }

    #[test]
    fn test_structured_error_properties() {
        let err = DbiError::Execute(StructuredError {
            sqlstate: [b'2', b'3', b'0', b'0', b'0'],
            native_code: 1062,
            message: "Duplicate entry".to_string(),
        });

        assert_eq!(err.sqlstate(), [b'2', b'3', b'0', b'0', b'0']);
        assert_eq!(err.sqlstate_str(), "23000");
        assert_eq!(err.sqlstate_class(), "23");
        assert_eq!(err.native_code(), 1062);
        assert_eq!(err.message(), "Duplicate entry");
    }

    #[test]
    fn test_engine_errors_carry_synthesized_sqlstate() {
        assert_eq!(DbiError::CursorActive { active: 1 }.sqlstate_str(), "24000");
        assert_eq!(DbiError::NotConnected.sqlstate_str(), "08003");
        assert_eq!(
            DbiError::UnsupportedFeature("x".to_string()).sqlstate_str(),
            "HYC00"
        );
        assert_eq!(DbiError::InternalError("x".to_string()).native_code(), 0);
    }

    #[test]
    fn test_non_structured_error_message_returns_display() {
        let err = DbiError::ValidationError("Bad input".to_string());
        assert_eq!(err.message(), "Validation error: Bad input");
    }

    #[test]
    fn test_sqlstate_bytes_pads_short_states() {
        assert_eq!(&sqlstate_bytes("08"), b"08000");
        assert_eq!(&sqlstate_bytes("HY0001"), b"HY000");
    }

    #[test]
    fn test_to_structured() {
        let err = DbiError::ValidationError("Invalid input".to_string());
        let structured = err.to_structured();

        assert_eq!(&structured.sqlstate, b"HY009");
        assert_eq!(structured.native_code, 0);
        assert!(structured.message.contains("Invalid input"));
    }

    #[test]
    fn test_structured_error_serialize() {
        let error = StructuredError {
            sqlstate: [b'2', b'3', b'0', b'0', b'0'],
            native_code: 42,
            message: "Test error".to_string(),
        };

        let serialized = error.serialize();

        // Verify format: [sqlstate: 5][native_code: 4][msg_len: 4][message: N]
        assert_eq!(&serialized[0..5], b"23000");
        assert_eq!(
            i32::from_le_bytes([serialized[5], serialized[6], serialized[7], serialized[8]]),
            42
        );
        let msg_len = u32::from_le_bytes([
            serialized[9],
            serialized[10],
            serialized[11],
            serialized[12],
        ]) as usize;
        assert_eq!(msg_len, "Test error".len());
        assert_eq!(&serialized[13..], b"Test error");
    }

    #[test]
    fn test_structured_error_deserialize_invalid_data() {
        // Too short
        let data = vec![1, 2, 3];
        assert!(StructuredError::deserialize(&data).is_none());

        // Header only, no message
        let mut data = vec![0u8; 13];
        data[9..13].copy_from_slice(&10u32.to_le_bytes()); // msg_len = 10, but no data
        assert!(StructuredError::deserialize(&data).is_none());
    }

    #[test]
    fn test_structured_error_unicode_message() {
        let error = StructuredError::new("HY000", 2013, "Conexão perdida: €$¥");

        let serialized = error.serialize();
        let deserialized = StructuredError::deserialize(&serialized).expect("Should deserialize");

        assert_eq!(deserialized, error);
    }

    #[test]
    fn test_is_connection_error() {
        let lost = DbiError::Execute(StructuredError::new("08S01", 2013, "Lost connection"));
        assert!(lost.is_connection_error());
        assert!(DbiError::NotConnected.is_connection_error());

        let query_error = DbiError::Execute(StructuredError::new("42S02", 1146, "no table"));
        assert!(!query_error.is_connection_error());
    }

    #[test]
    fn test_error_category() {
        let cases = [
            (
                DbiError::Connect(StructuredError::new("08001", 2003, "refused")),
                ErrorCategory::Connect,
            ),
            (
                DbiError::Prepare(StructuredError::new("42000", 1064, "syntax")),
                ErrorCategory::Prepare,
            ),
            (
                DbiError::Bind(StructuredError::new("07001", 0, "count")),
                ErrorCategory::Bind,
            ),
            (
                DbiError::Fetch(StructuredError::new("01004", 2032, "truncated")),
                ErrorCategory::Execute,
            ),
            (
                DbiError::Transaction(StructuredError::new("42000", 1305, "no savepoint")),
                ErrorCategory::Transaction,
            ),
            (DbiError::CursorActive { active: 3 }, ErrorCategory::State),
            (DbiError::InvalidHandle(9), ErrorCategory::Validation),
            (
                DbiError::InternalError("poisoned".to_string()),
                ErrorCategory::Internal,
            ),
        ];

        for (err, category) in cases {
            assert_eq!(err.error_category(), category, "{err}");
        }
    }
}
