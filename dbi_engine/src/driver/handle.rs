use crate::engine::Connection;
use crate::error::{sqlstate_bytes, DbiError, StructuredError};

/// Last failure (or informational note) recorded on a handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionSlot {
    sqlstate: String,
    native_code: i32,
    message: String,
}

impl ExceptionSlot {
    pub fn set(&mut self, sqlstate: &str, message: impl Into<String>) {
        self.sqlstate = String::from_utf8_lossy(&sqlstate_bytes(sqlstate)).into_owned();
        self.native_code = 0;
        self.message = message.into();
    }

    pub fn set_error(&mut self, err: &DbiError) {
        self.set(&err.sqlstate_str(), err.message());
        self.native_code = err.native_code();
    }

    pub fn clear(&mut self) {
        self.sqlstate.clear();
        self.native_code = 0;
        self.message.clear();
    }

    pub fn native_code(&self) -> i32 {
        self.native_code
    }

    pub fn is_empty(&self) -> bool {
        self.sqlstate.is_empty() && self.message.is_empty()
    }

    pub fn sqlstate(&self) -> &str {
        &self.sqlstate
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// `None` when nothing has been recorded.
    pub fn to_structured(&self) -> Option<StructuredError> {
        (!self.is_empty())
            .then(|| StructuredError::new(&self.sqlstate, self.native_code, self.message.clone()))
    }
}

/// The host's database handle: an exception slot plus, once opened, the
/// driver's connection.
#[derive(Debug, Default)]
pub struct DbiHandle {
    pub(crate) connection: Option<Connection>,
    pub(crate) exception: ExceptionSlot,
}

impl DbiHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn exception(&self) -> &ExceptionSlot {
        &self.exception
    }

    pub fn set_exception(&mut self, sqlstate: &str, message: impl Into<String>) {
        self.exception.set(sqlstate, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_slot_set_and_clear() {
        let mut slot = ExceptionSlot::default();
        assert!(slot.is_empty());
        assert!(slot.to_structured().is_none());

        slot.set("42S02", "Table 'shop.x' doesn't exist");
        assert_eq!(slot.sqlstate(), "42S02");
        assert_eq!(slot.native_code(), 0);
        assert_eq!(slot.to_structured().unwrap().sqlstate_str(), "42S02");

        slot.clear();
        assert!(slot.is_empty());
    }

    #[test]
    fn test_exception_slot_from_error() {
        let mut slot = ExceptionSlot::default();
        slot.set_error(&DbiError::CursorActive { active: 4 });
        assert_eq!(slot.sqlstate(), "24000");
        assert!(slot.message().contains("Statement 4"));

        slot.set_error(&DbiError::Execute(StructuredError::new("23000", 1062, "Duplicate")));
        assert_eq!(slot.native_code(), 1062);
        assert_eq!(slot.to_structured().unwrap().native_code, 1062);
    }

    #[test]
    fn test_new_handle_is_closed() {
        let handle = DbiHandle::new();
        assert!(!handle.is_open());
        assert!(handle.exception().is_empty());
    }
}
