use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the owner of a lease in the registry.
///
/// Must be unique among concurrently active sessions. The process id is the
/// default; [`SessionId::random`] avoids collisions from process id reuse.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn current_process() -> Self {
        Self(std::process::id().to_string())
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u32> for SessionId {
    fn from(pid: u32) -> Self {
        Self(pid.to_string())
    }
}
