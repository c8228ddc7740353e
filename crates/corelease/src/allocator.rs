use crate::error::{LeaseError, Result};
use crate::session::SessionId;
use crate::store::{LeaseState, OwnerEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// What a session asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseRequest {
    /// Any `n` cores, lowest free indices first
    Count(u32),

    /// Exactly these cores, granted in the given order
    Cores(Vec<u32>),
}

impl LeaseRequest {
    /// Checks that do not depend on the shared state.
    pub fn validate(&self, total_cores: u32) -> Result<()> {
        match self {
            LeaseRequest::Count(0) => Err(LeaseError::InvalidRequest(
                "core count must be positive".to_string(),
            )),
            LeaseRequest::Count(_) => Ok(()),
            LeaseRequest::Cores(cores) => {
                if cores.is_empty() {
                    return Err(LeaseError::InvalidRequest(
                        "explicit core list is empty".to_string(),
                    ));
                }
                if let Some(core) = cores.iter().find(|&&core| core >= total_cores) {
                    return Err(LeaseError::InvalidRequest(format!(
                        "core {} is outside the pool 0..{}",
                        core, total_cores
                    )));
                }
                let mut seen = BTreeSet::new();
                if let Some(core) = cores.iter().find(|&&core| !seen.insert(core)) {
                    return Err(LeaseError::InvalidRequest(format!(
                        "core {} is listed more than once",
                        core
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for LeaseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseRequest::Count(count) => write!(f, "{} cores", count),
            LeaseRequest::Cores(cores) => write!(f, "cores {:?}", cores),
        }
    }
}

/// Compute a grant for `session` and record it in `state`.
///
/// `state` is left untouched when the request cannot be satisfied in full.
pub fn grant(
    state: &mut LeaseState,
    session: &SessionId,
    request: &LeaseRequest,
    total_cores: u32,
) -> Result<Vec<u32>> {
    request.validate(total_cores)?;

    if let Some(entry) = state.owners.get(session) {
        return Err(LeaseError::InvalidRequest(format!(
            "session {} already holds cores {:?}",
            session, entry.cores
        )));
    }

    let granted = match request {
        LeaseRequest::Count(count) => {
            let mut cores = state.core_set(total_cores);
            cores
                .allocate(*count)
                .ok_or_else(|| LeaseError::InsufficientResources {
                    requested: *count,
                    available: cores.free_count(),
                    total: total_cores,
                })?
        }
        LeaseRequest::Cores(cores) => {
            let conflicts: Vec<u32> = cores
                .iter()
                .copied()
                .filter(|core| state.leased.contains(core))
                .collect();
            if !conflicts.is_empty() {
                return Err(LeaseError::ResourceConflict { cores: conflicts });
            }
            cores.clone()
        }
    };

    state.leased.extend(granted.iter().copied());
    state
        .owners
        .insert(session.clone(), OwnerEntry::new(granted.clone()));
    Ok(granted)
}
