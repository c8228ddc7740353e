use crate::allocator::{grant, LeaseRequest};
use crate::core_set::format_cpu_list;
use crate::error::{LeaseError, Result};
use crate::lock::LockGuard;
use crate::release::{revoke, Lease, ReleaseHandler};
use crate::session::SessionId;
use crate::settings::LeaseSettings;
use crate::store::{LeaseState, LeaseStore};
use corelease_common::log;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type CompletionFlags = HashMap<SessionId, Arc<AtomicBool>>;

/// Entry point for acquiring and releasing core leases on this host.
///
/// Cheap to clone; every operation opens its own lock and reads the shared
/// state afresh, so independent processes can each hold a manager.
/// Clones share the per-session completion flags of their release handlers.
#[derive(Debug, Clone)]
pub struct LeaseManager {
    store: LeaseStore,
    lock_timeout: Option<Duration>,
    completion: Arc<Mutex<CompletionFlags>>,
}

impl LeaseManager {
    pub fn new(settings: &LeaseSettings) -> Result<Self> {
        Self::open(
            &settings.state_dir,
            settings.total_cores(),
            settings.lock_timeout(),
        )
    }

    pub fn open(state_dir: &Path, total_cores: u32, lock_timeout: Option<Duration>) -> Result<Self> {
        if total_cores == 0 {
            return Err(LeaseError::InvalidRequest(
                "the core pool must not be empty".to_string(),
            ));
        }
        Ok(Self {
            store: LeaseStore::open(state_dir, total_cores)?,
            lock_timeout,
            completion: Arc::default(),
        })
    }

    pub fn total_cores(&self) -> u32 {
        self.store.total_cores()
    }

    pub fn store(&self) -> &LeaseStore {
        &self.store
    }

    /// Run `f` inside a critical section on the shared state.
    pub fn with_lock<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LeaseStore, &LockGuard) -> Result<T>,
    {
        let guard = self.store.lock(self.lock_timeout)?;
        f(&self.store, &guard)
    }

    /// Lease cores for `session` and return them.
    #[tracing::instrument(level = "info", name = "Acquire cores", skip(self), fields(session = %session, request = %request))]
    pub fn acquire(&self, session: &SessionId, request: &LeaseRequest) -> Result<Vec<u32>> {
        // fail fast on malformed requests without touching the lock
        request.validate(self.total_cores())?;

        let granted = self.with_lock(|store, guard| {
            let mut state = store.load(guard)?;
            let granted = grant(&mut state, session, request, self.total_cores())?;
            store.save(guard, &state)?;
            Ok(granted)
        });

        match &granted {
            Ok(cores) => {
                // a new lease starts with a fresh completion flag
                self.completion_flags()
                    .insert(session.clone(), Arc::new(AtomicBool::new(false)));
                log!(
                    info,
                    "Leased cores {} to session {}",
                    format_cpu_list(cores),
                    session
                )
            }
            Err(e) => log!(warn, "Lease request of session {} failed: {}", session, e),
        }
        granted
    }

    /// Like [`LeaseManager::acquire`], but the returned guard releases the cores when dropped.
    pub fn acquire_lease(&self, session: &SessionId, request: &LeaseRequest) -> Result<Lease> {
        let cores = self.acquire(session, request)?;
        Ok(Lease::new(
            cores,
            ReleaseHandler::new(self.clone(), session.clone()),
        ))
    }

    /// A one-shot release handler for `session`.
    ///
    /// Every handler for the same session of this manager (and its clones)
    /// shares one completion flag, until the session acquires a new lease.
    pub fn release_handler(&self, session: &SessionId) -> ReleaseHandler {
        ReleaseHandler::new(self.clone(), session.clone())
    }

    pub(crate) fn completion_flag(&self, session: &SessionId) -> Arc<AtomicBool> {
        self.completion_flags()
            .entry(session.clone())
            .or_default()
            .clone()
    }

    fn completion_flags(&self) -> MutexGuard<'_, CompletionFlags> {
        // the map stays valid even if a holder panicked
        self.completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Free the cores of `session`. Unknown or already released sessions free nothing.
    #[tracing::instrument(level = "info", name = "Release cores", skip(self), fields(session = %session))]
    pub fn release(&self, session: &SessionId) -> Result<Vec<u32>> {
        let freed = self.with_lock(|store, guard| {
            let mut state = store.load(guard)?;
            let freed = revoke(&mut state, session);
            if !freed.is_empty() {
                store.save(guard, &state)?;
            }
            Ok(freed)
        })?;

        if freed.is_empty() {
            log!(debug, "Session {} holds no cores", session);
        } else {
            log!(
                info,
                "Freed cores {} of session {}",
                format_cpu_list(&freed),
                session
            );
        }
        Ok(freed)
    }

    /// Consistent snapshot of the shared state, read under the lock.
    pub fn status(&self) -> Result<LeaseState> {
        self.with_lock(|store, guard| store.load(guard))
    }

    /// Drop every lease on the host and return what was dropped.
    ///
    /// Administrative only: sessions still running lose their reservation.
    #[tracing::instrument(level = "warn", name = "Clear all leases", skip(self))]
    pub fn clear(&self) -> Result<LeaseState> {
        let dropped = self.with_lock(|store, guard| {
            let state = store.load(guard)?;
            store.save(guard, &LeaseState::default())?;
            Ok(state)
        })?;
        log!(
            warn,
            "Cleared {} leases holding cores {}",
            dropped.owners.len(),
            format_cpu_list(&dropped.leased.iter().copied().collect::<Vec<_>>())
        );
        Ok(dropped)
    }
}
