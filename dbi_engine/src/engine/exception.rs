//! Client error translation and the fatal path.

use crate::client::ClientError;
use crate::error::{DbiError, StructuredError};
use std::sync::RwLock;

/// Which driver operation a client error came from; picks the error family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Prepare,
    Bind,
    Execute,
    Fetch,
    Transaction,
}

type FatalHook = Box<dyn Fn(&str) + Send + Sync>;

lazy_static::lazy_static! {
    static ref FATAL_HOOK: RwLock<Option<FatalHook>> = RwLock::new(None);
}

/// Installs the process-wide hook run just before a fatal abort, replacing
/// any previous hook. `None` removes it.
pub fn set_fatal_hook(hook: Option<FatalHook>) {
    match FATAL_HOOK.write() {
        Ok(mut slot) => *slot = hook,
        Err(poisoned) => *poisoned.into_inner() = hook,
    }
}

/// Logs, runs the fatal hook, then aborts the process.
pub fn fatal(message: &str) -> ! {
    log::error!("fatal: {}", message);
    {
        let hook = FATAL_HOOK.read().unwrap_or_else(|p| p.into_inner());
        if let Some(hook) = hook.as_ref() {
            hook(message);
        }
    }
    std::process::abort()
}

/// Maps a client failure to the error family of `stage`.
///
/// Out-of-memory is never returned as a value: it goes to [`fatal`].
pub fn translate(stage: Stage, err: ClientError) -> DbiError {
    if err.is_out_of_memory() {
        fatal(&format!("client out of memory: {}", err.message));
    }
    let message = match stage {
        Stage::Connect => format!("code: {} msg: {}", err.code, err.message),
        _ => err.message,
    };
    let diag = StructuredError::new(&err.sqlstate, err.code, message);
    match stage {
        Stage::Connect => DbiError::Connect(diag),
        Stage::Prepare => DbiError::Prepare(diag),
        Stage::Bind => DbiError::Bind(diag),
        Stage::Execute => DbiError::Execute(diag),
        Stage::Fetch => DbiError::Fetch(diag),
        Stage::Transaction => DbiError::Transaction(diag),
    }
}

/// Engine-side failure in the family of `stage`, with no client diagnostic.
pub(crate) fn engine_error(stage: Stage, sqlstate: &str, code: i32, message: String) -> DbiError {
    let diag = StructuredError::new(sqlstate, code, message);
    match stage {
        Stage::Connect => DbiError::Connect(diag),
        Stage::Prepare => DbiError::Prepare(diag),
        Stage::Bind => DbiError::Bind(diag),
        Stage::Execute => DbiError::Execute(diag),
        Stage::Fetch => DbiError::Fetch(diag),
        Stage::Transaction => DbiError::Transaction(diag),
    }
}
