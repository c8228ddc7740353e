use crate::core_set::format_cpu_list;
use crate::error::Result;
use crate::manager::LeaseManager;
use crate::session::SessionId;
use crate::store::LeaseState;
use corelease_common::log;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Drop `session` from `state`, returning the cores it held.
///
/// Unknown sessions free nothing.
pub fn revoke(state: &mut LeaseState, session: &SessionId) -> Vec<u32> {
    match state.owners.remove(session) {
        Some(entry) => {
            for core in &entry.cores {
                state.leased.remove(core);
            }
            entry.cores
        }
        None => Vec::new(),
    }
}

/// Releases one session's lease at most once.
///
/// Handlers of the same session obtained from one [`LeaseManager`] (or its
/// clones) share the completion flag, so the normal exit path and a signal
/// handler can each hold a handler and only the first call does any work.
#[derive(Debug, Clone)]
pub struct ReleaseHandler {
    manager: LeaseManager,
    session: SessionId,
    done: Arc<AtomicBool>,
}

impl ReleaseHandler {
    pub fn new(manager: LeaseManager, session: SessionId) -> Self {
        let done = manager.completion_flag(&session);
        Self {
            manager,
            session,
            done,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn is_released(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Free the session's cores. Every call after the first returns an empty list.
    ///
    /// The flag is set before the shared state is touched: a release that
    /// fails with an I/O error leaks the lease rather than retrying later.
    pub fn release(&self) -> Result<Vec<u32>> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.manager.release(&self.session)
    }

    /// Teardown variant of [`ReleaseHandler::release`]: failures are logged, never returned.
    pub fn release_logged(&self) -> Vec<u32> {
        match self.release() {
            Ok(freed) => freed,
            Err(e) => {
                log!(
                    error,
                    "Failed to release cores of session {}, lease is leaked: {}",
                    self.session,
                    e
                );
                Vec::new()
            }
        }
    }
}

/// Scoped lease: the cores are released when the guard is dropped.
#[derive(Debug)]
pub struct Lease {
    cores: Vec<u32>,
    handler: ReleaseHandler,
}

impl Lease {
    pub(crate) fn new(cores: Vec<u32>, handler: ReleaseHandler) -> Self {
        Self { cores, handler }
    }

    pub fn cores(&self) -> &[u32] {
        &self.cores
    }

    pub fn session(&self) -> &SessionId {
        self.handler.session()
    }

    /// Granted cores in cpu-list format, ready for `taskset -c` or a cpuset.
    pub fn cpu_list(&self) -> String {
        format_cpu_list(&self.cores)
    }

    /// A handler sharing this lease's completion flag, e.g. for a signal task.
    pub fn handler(&self) -> ReleaseHandler {
        self.handler.clone()
    }

    pub fn release(self) -> Result<Vec<u32>> {
        self.handler.release()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let freed = self.handler.release_logged();
        if !freed.is_empty() {
            log!(
                info,
                "Released cores {} of session {} on drop",
                format_cpu_list(&freed),
                self.handler.session()
            );
        }
    }
}
