use corelease::{LeaseManager, LeaseRequest, LeaseState, SessionId};
use std::collections::BTreeSet;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHost {
    /// Keeps the state directory alive
    pub dir: TempDir,
    pub total_cores: u32,
    pub manager: LeaseManager,
}

impl TestHost {
    /// Another process's view of the same host.
    pub fn session_manager(&self) -> LeaseManager {
        LeaseManager::open(
            self.dir.path(),
            self.total_cores,
            Some(Duration::from_secs(10)),
        )
        .expect("Failed to open lease manager")
    }

    pub fn acquire(&self, session: &str, request: LeaseRequest) -> corelease::Result<Vec<u32>> {
        self.manager.acquire(&SessionId::from(session), &request)
    }

    pub fn state(&self) -> LeaseState {
        self.manager.status().expect("Failed to read lease state")
    }

    pub fn leased(&self) -> Vec<u32> {
        self.state().leased.into_iter().collect()
    }
}

pub fn spawn_host(total_cores: u32) -> TestHost {
    let dir = TempDir::new().expect("Failed to create state dir");
    let manager = LeaseManager::open(dir.path(), total_cores, Some(Duration::from_secs(10)))
        .expect("Failed to open lease manager");
    TestHost {
        dir,
        total_cores,
        manager,
    }
}

/// The registry accounts for every leased core exactly once, all inside the pool.
pub fn assert_consistent(state: &LeaseState, total_cores: u32) {
    state.validate().expect("lease state is inconsistent");
    assert!(
        state.leased.iter().all(|&core| core < total_cores),
        "leased cores {:?} exceed the pool of {}",
        state.leased,
        total_cores
    );
    let owned: BTreeSet<u32> = state
        .owners
        .values()
        .flat_map(|entry| entry.cores.iter().copied())
        .collect();
    assert_eq!(owned, state.leased);
}
