//! Shared setup for tests that talk to a real server.

use std::sync::Once;

static DOTENV: Once = Once::new();

/// Loads `.env` once per process so `ODBC_TEST_DSN` and friends are visible.
pub fn load_dotenv() {
    DOTENV.call_once(|| {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("no .env loaded: {}", e);
        }
    });
}

/// The DSN for end-to-end tests, if one is configured.
pub fn test_dsn() -> Option<String> {
    load_dotenv();
    std::env::var("ODBC_TEST_DSN").ok().filter(|s| !s.is_empty())
}
