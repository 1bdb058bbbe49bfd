//! Shared fixtures for integration tests.

use dbi_engine::client::mock::MockClient;
use dbi_engine::{DbiHandle, Driver, DriverConfig};
use std::sync::Arc;

/// ODBC_TEST_DSN (from the environment or `.env`). `None` means the
/// end-to-end tests have nothing to talk to.
#[allow(dead_code)]
pub fn test_dsn() -> Option<String> {
    dbi_engine::test_helpers::test_dsn()
}

#[allow(dead_code)]
pub fn mock_driver(client: &MockClient) -> Driver {
    mock_driver_with(client, DriverConfig::default())
}

#[allow(dead_code)]
pub fn mock_driver_with(client: &MockClient, config: DriverConfig) -> Driver {
    let _ = env_logger::builder().is_test(true).try_init();
    Driver::new(Arc::new(client.clone()), config).expect("mock driver")
}

/// An open handle on `driver`.
#[allow(dead_code)]
pub fn open_handle(driver: &Driver) -> DbiHandle {
    let mut handle = DbiHandle::new();
    driver.open(&mut handle).expect("open");
    handle
}
