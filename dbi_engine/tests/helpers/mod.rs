pub mod env;

#[allow(unused_imports)]
pub use env::{mock_driver, mock_driver_with, open_handle, test_dsn};
