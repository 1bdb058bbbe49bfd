pub mod client;
pub mod config;
pub mod driver;
pub mod engine;
mod error;
pub mod ffi;
pub mod observability;
pub mod protocol;
pub mod security;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use client::{ClientError, ClientLibrary, ClientSession, ClientStatement, FieldInfo};
pub use config::{DriverConfig, FetchMode};
pub use driver::{DbiHandle, Driver, ExceptionSlot, ExecOutcome};
pub use engine::{
    set_fatal_hook, ClientRuntime, ColumnMeta, DbiStatement, IsolationLevel, PullResult,
    PulledValue, StatementCache, StatementState, TransactionCmd,
};
pub use error::{DbiError, ErrorCategory, Result, StructuredError};
pub use protocol::{deserialize_params, serialize_params, FieldType, ParamValue, ValueKind};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use std::sync::Arc;

    #[test]
    fn test_driver_round_trip_through_reexports() {
        let mock = MockClient::new();
        let driver = Driver::new(Arc::new(mock), DriverConfig::default()).unwrap();
        let mut handle = DbiHandle::new();
        driver.open(&mut handle).unwrap();
        assert!(driver.connected(&mut handle));

        let mut stmt = DbiStatement::new("DELETE FROM t");
        assert_eq!(driver.prepare(&mut handle, &mut stmt).unwrap(), (0, 0));
        assert_eq!(
            driver.exec(&mut handle, &mut stmt, &[]).unwrap(),
            ExecOutcome::Dml
        );
        driver.close(&mut handle);
        assert!(!handle.is_open());
    }

    #[test]
    fn test_exec_without_open_is_not_connected() {
        let driver = Driver::new(Arc::new(MockClient::new()), DriverConfig::default()).unwrap();
        let mut handle = DbiHandle::new();
        let mut stmt = DbiStatement::new("SELECT 1");
        let err = driver.prepare(&mut handle, &mut stmt).unwrap_err();
        assert!(matches!(err, DbiError::NotConnected));
        assert_eq!(handle.exception().sqlstate(), "08003");
    }
}
