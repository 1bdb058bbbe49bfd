//! Process-lifetime client library state and per-thread init.

use crate::client::ClientLibrary;
use crate::engine::exception::{translate, Stage};
use crate::error::{DbiError, Result};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once, Weak};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);
static ATEXIT_REGISTERED: Once = Once::new();

lazy_static::lazy_static! {
    static ref LIVE_RUNTIMES: Mutex<Vec<Weak<ClientRuntime>>> = Mutex::new(Vec::new());
}

thread_local! {
    static THREAD_CONTEXTS: RefCell<HashMap<u64, ThreadContext>> = RefCell::new(HashMap::new());
}

/// Marks a thread as initialised for one runtime. Dropped at thread exit.
struct ThreadContext {
    library: Arc<dyn ClientLibrary>,
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        log::debug!("{}: thread cleanup", self.library.name());
        self.library.thread_end();
    }
}

extern "C" fn shutdown_live_runtimes() {
    let runtimes = match LIVE_RUNTIMES.lock() {
        Ok(list) => list.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    for runtime in runtimes.iter().filter_map(Weak::upgrade) {
        runtime.shutdown();
    }
}

fn register_for_exit(runtime: &Arc<ClientRuntime>) {
    ATEXIT_REGISTERED.call_once(|| {
        // SAFETY: registering a plain extern "C" fn with no captured state.
        let rc = unsafe { libc::atexit(shutdown_live_runtimes) };
        if rc != 0 {
            log::warn!("could not register client library exit hook");
        }
    });
    let mut list = LIVE_RUNTIMES.lock().unwrap_or_else(|p| p.into_inner());
    list.retain(|w| w.strong_count() > 0);
    list.push(Arc::downgrade(runtime));
}

/// One initialised client library.
///
/// `library_init` runs once at construction and `library_end` once at
/// shutdown, which happens explicitly, on drop, or at process exit.
pub struct ClientRuntime {
    id: u64,
    library: Arc<dyn ClientLibrary>,
    shut_down: AtomicBool,
}

impl ClientRuntime {
    pub fn new(library: Arc<dyn ClientLibrary>) -> Result<Arc<Self>> {
        if !library.is_thread_safe() {
            return Err(DbiError::UnsupportedFeature(format!(
                "client library '{}' is not thread safe",
                library.name()
            )));
        }
        library
            .library_init()
            .map_err(|e| translate(Stage::Connect, e))?;
        log::debug!("{}: library initialised", library.name());

        let runtime = Arc::new(Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            library,
            shut_down: AtomicBool::new(false),
        });
        register_for_exit(&runtime);
        Ok(runtime)
    }

    pub fn library(&self) -> &dyn ClientLibrary {
        self.library.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Ends the client library. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            log::debug!("{}: library end", self.library.name());
            self.library.library_end();
        }
    }

    /// Initialises the calling thread for this library on first use.
    pub fn ensure_thread(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(DbiError::InvalidState(
                "client library has been shut down".to_string(),
            ));
        }
        THREAD_CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            if contexts.contains_key(&self.id) {
                return Ok(());
            }
            self.library
                .thread_init()
                .map_err(|e| translate(Stage::Connect, e))?;
            log::debug!("{}: thread init", self.library.name());
            contexts.insert(
                self.id,
                ThreadContext {
                    library: Arc::clone(&self.library),
                },
            );
            Ok(())
        })
    }
}

impl std::fmt::Debug for ClientRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRuntime")
            .field("id", &self.id)
            .field("library", &self.library.name())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Drop for ClientRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
