use clap::{Parser, Subcommand};
use corelease::{parse_cpu_list, LeaseError, LeaseRequest, LeaseSettings};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(version, about = "Lease disjoint CPU cores to concurrent sessions on this host", long_about = None)]
pub struct Args {
    /// Directory shared by all sessions for the lease state
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Number of cores in the pool
    #[arg(long = "total-cores", global = true)]
    pub total_cores: Option<u32>,

    /// Seconds to wait for the lease lock before giving up
    #[arg(long = "lock-timeout", global = true)]
    pub lock_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Command line flags take precedence over the configuration.
    pub fn apply(&self, settings: &mut LeaseSettings) {
        if let Some(state_dir) = &self.state_dir {
            settings.state_dir = state_dir.clone();
        }
        if let Some(total_cores) = self.total_cores {
            settings.total_cores = Some(total_cores);
        }
        if let Some(lock_timeout) = self.lock_timeout {
            settings.lock_timeout_secs = Some(lock_timeout);
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Lease cores and print them; the lease outlives this process
    Acquire {
        #[command(flatten)]
        request: RequestArgs,

        /// Session id, defaults to the id of the calling process
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Release the cores held by a session
    Release {
        /// Session id, defaults to the id of the calling process
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Lease cores, run a command with them and release on exit
    Run {
        #[command(flatten)]
        request: RequestArgs,

        /// Use a random session token instead of this process id
        #[arg(long = "random-session")]
        random_session: bool,

        /// Command and its arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Show all active leases
    Status {
        /// Print JSON instead of a table
        #[arg(long = "parseable")]
        parseable: bool,
    },

    /// Drop every lease on this host
    Clear {
        /// Confirm dropping leases of sessions that may still be running
        #[arg(long)]
        yes: bool,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RequestArgs {
    /// Number of cores to lease
    #[arg(short, long)]
    pub count: Option<u32>,

    /// Exact cores to lease, e.g. `0-3,8`
    #[arg(long)]
    pub cpus: Option<CpuList>,
}

impl RequestArgs {
    pub fn to_request(&self) -> LeaseRequest {
        match (&self.cpus, self.count) {
            (Some(cpus), _) => LeaseRequest::Cores(cpus.0.clone()),
            (None, Some(count)) => LeaseRequest::Count(count),
            // clap requires one of the two
            (None, None) => LeaseRequest::Count(0),
        }
    }
}

/// Core list argument in cpu-list syntax.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuList(pub Vec<u32>);

impl FromStr for CpuList {
    type Err = LeaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cpu_list(s).map(CpuList)
    }
}
