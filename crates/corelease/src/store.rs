use crate::core_set::CoreSet;
use crate::error::{LeaseError, Result};
use crate::lock::LockGuard;
use crate::session::SessionId;
use chrono::{DateTime, Utc};
use corelease_common::log;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATE_FILE_NAME: &str = "leases.json";
pub const LOCK_FILE_NAME: &str = "leases.lock";
pub const STATE_VERSION: u32 = 1;

/// Registry record of one session's lease.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerEntry {
    /// Held cores, in the order they were granted
    pub cores: Vec<u32>,

    /// Process that acquired the lease
    pub pid: u32,

    /// User that acquired the lease
    pub user: String,

    /// Time of acquisition
    pub acquired_at: DateTime<Utc>,
}

impl OwnerEntry {
    pub fn new(cores: Vec<u32>) -> Self {
        Self {
            cores,
            pid: std::process::id(),
            user: whoami::username(),
            acquired_at: Utc::now(),
        }
    }
}

/// Lease Store and Owner Registry as one in-memory snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseState {
    /// Cores currently leased
    pub leased: BTreeSet<u32>,

    /// Active sessions and the cores they hold
    pub owners: BTreeMap<SessionId, OwnerEntry>,
}

impl LeaseState {
    pub fn core_set(&self, total_cores: u32) -> CoreSet {
        CoreSet::with_cores(total_cores, self.leased.iter().copied())
    }

    pub fn holder_of(&self, core: u32) -> Option<&SessionId> {
        self.owners
            .iter()
            .find(|(_, entry)| entry.cores.contains(&core))
            .map(|(session, _)| session)
    }

    /// Check that the registry accounts for every leased core exactly once.
    ///
    /// Core indices are not checked against a pool size: processes confined
    /// by affinity or a cgroup may see a smaller pool than the sessions that
    /// wrote the state, and must still be able to release. New grants are
    /// bounded by [`LeaseRequest::validate`](crate::LeaseRequest::validate)
    /// and the core set instead.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut owned = BTreeSet::new();
        for (session, entry) in &self.owners {
            if entry.cores.is_empty() {
                return Err(format!("session {} holds no cores", session));
            }
            for &core in &entry.cores {
                if !owned.insert(core) {
                    return Err(format!("core {} is held more than once", core));
                }
            }
        }

        if owned != self.leased {
            let untracked: Vec<u32> = self.leased.difference(&owned).copied().collect();
            let unrecorded: Vec<u32> = owned.difference(&self.leased).copied().collect();
            return Err(format!(
                "registry and lease record disagree (untracked {:?}, unrecorded {:?})",
                untracked, unrecorded
            ));
        }

        Ok(())
    }
}

/// On-disk layout of the state file.
#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    leased: Vec<u32>,
    owners: BTreeMap<SessionId, OwnerEntry>,
}

impl From<&LeaseState> for StateDocument {
    fn from(state: &LeaseState) -> Self {
        StateDocument {
            version: STATE_VERSION,
            leased: state.leased.iter().copied().collect(),
            owners: state.owners.clone(),
        }
    }
}

impl TryFrom<StateDocument> for LeaseState {
    type Error = String;

    fn try_from(document: StateDocument) -> std::result::Result<Self, Self::Error> {
        if document.version != STATE_VERSION {
            return Err(format!("unsupported state version {}", document.version));
        }

        let mut leased = BTreeSet::new();
        for core in document.leased {
            if !leased.insert(core) {
                return Err(format!("core {} is recorded as leased twice", core));
            }
        }

        Ok(LeaseState {
            leased,
            owners: document.owners,
        })
    }
}

/// Durable Lease Store and Owner Registry in a host-wide state directory.
///
/// Loading and saving require a [`LockGuard`] on the store's lock token, so
/// every read-modify-write happens inside a critical section.
#[derive(Debug, Clone)]
pub struct LeaseStore {
    state_path: PathBuf,
    lock_path: PathBuf,
    total_cores: u32,
}

impl LeaseStore {
    #[tracing::instrument(level = "debug", name = "Open lease store", skip(state_dir), fields(state_dir = %state_dir.display()))]
    pub fn open(state_dir: &Path, total_cores: u32) -> Result<Self> {
        ensure_state_dir(state_dir)?;
        Ok(Self {
            state_path: state_dir.join(STATE_FILE_NAME),
            lock_path: state_dir.join(LOCK_FILE_NAME),
            total_cores,
        })
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn lock(&self, timeout: Option<Duration>) -> Result<LockGuard> {
        LockGuard::acquire(&self.lock_path, timeout)
    }

    /// Read the current state. A missing or empty state file is an empty state.
    pub fn load(&self, guard: &LockGuard) -> Result<LeaseState> {
        debug_assert_eq!(guard.path(), self.lock_path.as_path(), "guard of a foreign lock");
        self.read_state()
    }

    pub fn save(&self, guard: &LockGuard, state: &LeaseState) -> Result<()> {
        debug_assert_eq!(guard.path(), self.lock_path.as_path(), "guard of a foreign lock");
        state.validate().map_err(|reason| {
            log!(error, "Refusing to persist inconsistent lease state: {}", reason);
            LeaseError::CorruptState {
                path: self.state_path.clone(),
                reason,
            }
        })?;

        let document = StateDocument::from(state);
        let data = serde_json::to_vec_pretty(&document).map_err(|e| LeaseError::StateWriteFailed {
            path: self.state_path.clone(),
            source: io::Error::new(io::ErrorKind::InvalidData, e),
        })?;
        atomic_write(&self.state_path, &data)
    }

    /// Unlocked read for diagnostics only; may observe a stale state.
    pub fn peek(&self) -> Result<LeaseState> {
        self.read_state()
    }

    fn read_state(&self) -> Result<LeaseState> {
        let data = match fs::read_to_string(&self.state_path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LeaseState::default()),
            Err(source) => {
                return Err(LeaseError::StateReadFailed {
                    path: self.state_path.clone(),
                    source,
                })
            }
        };

        if data.trim().is_empty() {
            return Ok(LeaseState::default());
        }

        let corrupt = |reason: String| LeaseError::CorruptState {
            path: self.state_path.clone(),
            reason,
        };
        let document: StateDocument =
            serde_json::from_str(&data).map_err(|e| corrupt(e.to_string()))?;
        let state = LeaseState::try_from(document).map_err(corrupt)?;
        state.validate().map_err(corrupt)?;
        Ok(state)
    }
}

fn ensure_state_dir(state_dir: &Path) -> Result<()> {
    if state_dir.is_dir() {
        return Ok(());
    }

    fs::create_dir_all(state_dir).map_err(|source| LeaseError::StateWriteFailed {
        path: state_dir.to_path_buf(),
        source,
    })?;

    // shared by every user like /tmp, sticky so nobody can replace another's files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(state_dir, fs::Permissions::from_mode(0o1777)) {
            log!(debug, "Could not widen permissions of {}: {}", state_dir.display(), e);
        }
    }

    log!(info, "Created lease state directory {}", state_dir.display());
    Ok(())
}

/// Write to a temp file in the same directory, then rename over `target`.
fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let write_failed = |source: io::Error| LeaseError::StateWriteFailed {
        path: target.to_path_buf(),
        source,
    };
    let parent = target.parent().ok_or_else(|| {
        write_failed(io::Error::new(
            io::ErrorKind::InvalidInput,
            "state file has no parent directory",
        ))
    })?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(write_failed)?;
    temp.write_all(data).map_err(write_failed)?;
    temp.as_file().sync_all().map_err(write_failed)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o666)) {
            log!(debug, "Could not widen permissions of {}: {}", temp.path().display(), e);
        }
    }

    temp.persist(target).map_err(|e| write_failed(e.error))?;
    Ok(())
}
