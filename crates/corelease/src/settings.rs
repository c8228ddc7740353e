use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde_aux::field_attributes::deserialize_option_number_from_string;

pub const DEFAULT_STATE_DIR: &str = "/tmp/corelease";

#[derive(serde::Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub lease: LeaseSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct LeaseSettings {
    /// Shared directory holding the state file and the lock token
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Size of the core pool, the host's logical core count when unset
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub total_cores: Option<u32>,

    /// Give up waiting for the lock after this many seconds, wait forever when unset
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    pub lock_timeout_secs: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            total_cores: None,
            lock_timeout_secs: None,
        }
    }
}

impl LeaseSettings {
    pub fn total_cores(&self) -> u32 {
        self.total_cores.unwrap_or_else(host_core_count)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }
}

/// Logical cores configured on the host, independent of the calling
/// process's affinity mask or cgroup quota.
pub fn host_core_count() -> u32 {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let configured = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
        if configured > 0 {
            return u32::try_from(configured).unwrap_or(u32::MAX);
        }
    }
    u32::try_from(num_cpus::get()).unwrap_or(u32::MAX)
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Settings:\n  Application:\n{} \n  Lease:\n{}",
            self.application, self.lease
        )
    }
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "    Log level: {}", self.log_level)
    }
}

impl fmt::Display for LeaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "    State dir: {}", self.state_dir.display())?;
        writeln!(f, "    Total cores: {}", self.total_cores())?;
        match self.lock_timeout_secs {
            Some(secs) => writeln!(f, "    Lock timeout: {}s", secs),
            None => writeln!(f, "    Lock timeout: none"),
        }
    }
}
