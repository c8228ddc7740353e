pub mod arg;

use anyhow::{anyhow, Result};
use arg::Command;
use colored::Colorize;
use corelease::core_set::join_cores;
use corelease::{format_cpu_list, ErrorKind, LeaseManager, LeaseRequest, LeaseState, SessionId};
use corelease_common::log;
use prettytable::{row, Table};
use tokio::process::Command as ChildCommand;
use tokio::signal::unix::{signal, SignalKind};

/// Environment variable holding the leased cores in cpu-list format.
pub const CPUS_ENV_VAR: &str = "CORELEASE_CPUS";

/// Environment variable holding the session id of the lease.
pub const SESSION_ENV_VAR: &str = "CORELEASE_SESSION";

/// Run a parsed command and return the process exit code.
pub async fn dispatch(command: Command, manager: LeaseManager) -> Result<i32> {
    match command {
        Command::Acquire { request, session } => {
            let session = session.map(SessionId::from).unwrap_or_else(calling_session);
            acquire(manager, session, request.to_request()).await
        }
        Command::Release { session } => {
            let session = session.map(SessionId::from).unwrap_or_else(calling_session);
            release(manager, session).await
        }
        Command::Run {
            request,
            random_session,
            command,
        } => {
            let session = if random_session {
                SessionId::random()
            } else {
                SessionId::current_process()
            };
            run(manager, session, request.to_request(), command).await
        }
        Command::Status { parseable } => status(manager, parseable).await,
        Command::Clear { yes } => clear(manager, yes).await,
    }
}

/// The process that invoked us, usually the launcher script that owns the session.
pub fn calling_session() -> SessionId {
    SessionId::from(std::os::unix::process::parent_id())
}

/// Exit code reported to the launcher for each failure category.
pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidRequest => 2,
        ErrorKind::InsufficientResources => 3,
        ErrorKind::ResourceConflict => 4,
        ErrorKind::LockTimeout => 5,
        ErrorKind::StateIo => 6,
    }
}

fn report(error: &corelease::LeaseError) -> i32 {
    eprintln!("{} {}", "error:".red().bold(), error);
    exit_code(error.kind())
}

async fn acquire(manager: LeaseManager, session: SessionId, request: LeaseRequest) -> Result<i32> {
    let result = tokio::task::spawn_blocking(move || manager.acquire(&session, &request)).await?;
    match result {
        Ok(cores) => {
            println!("{}", join_cores(&cores));
            Ok(0)
        }
        Err(e) => Ok(report(&e)),
    }
}

async fn release(manager: LeaseManager, session: SessionId) -> Result<i32> {
    let result = tokio::task::spawn_blocking(move || manager.release(&session)).await?;
    match result {
        Ok(freed) => {
            println!("{}", join_cores(&freed));
            Ok(0)
        }
        Err(e) => Ok(report(&e)),
    }
}

/// Lease cores, run `command` with them and release on every way out: child
/// exit, SIGINT, SIGTERM or SIGHUP.
#[tracing::instrument(level = "info", name = "Run leased command", skip(manager, request))]
async fn run(
    manager: LeaseManager,
    session: SessionId,
    request: LeaseRequest,
    command: Vec<String>,
) -> Result<i32> {
    let (program, program_args) = command
        .split_first()
        .ok_or_else(|| anyhow!("No command given"))?;

    // signal streams must exist before the lease does
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let lease = {
        let session = session.clone();
        match tokio::task::spawn_blocking(move || manager.acquire_lease(&session, &request)).await? {
            Ok(lease) => lease,
            Err(e) => return Ok(report(&e)),
        }
    };
    let handler = lease.handler();
    log!(
        info,
        "Session {} runs `{}` on cores {}",
        session,
        program,
        lease.cpu_list()
    );

    let mut child = match ChildCommand::new(program)
        .args(program_args)
        .env(CPUS_ENV_VAR, lease.cpu_list())
        .env(SESSION_ENV_VAR, session.as_str())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            log!(error, "Failed to start `{}`: {}", program, e);
            eprintln!("{} failed to start `{}`: {}", "error:".red().bold(), program, e);
            tokio::task::spawn_blocking(move || handler.release_logged()).await?;
            return Ok(127);
        }
    };

    let code = tokio::select! {
        status = child.wait() => exit_status_code(status?),
        _ = sigint.recv() => stop_child(&mut child, "SIGINT", 130).await,
        _ = sigterm.recv() => stop_child(&mut child, "SIGTERM", 143).await,
        _ = sighup.recv() => stop_child(&mut child, "SIGHUP", 129).await,
    };

    let freed = tokio::task::spawn_blocking(move || handler.release_logged()).await?;
    log!(
        info,
        "Session {} finished with code {}, freed cores {}",
        session,
        code,
        format_cpu_list(&freed)
    );
    drop(lease);
    Ok(code)
}

async fn stop_child(child: &mut tokio::process::Child, signal: &str, code: i32) -> i32 {
    log!(warn, "Received {}, stopping child", signal);
    if let Err(e) = child.kill().await {
        log!(warn, "Failed to stop child: {}", e);
    }
    code
}

fn exit_status_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

async fn status(manager: LeaseManager, parseable: bool) -> Result<i32> {
    let total_cores = manager.total_cores();
    let state = match tokio::task::spawn_blocking(move || manager.status()).await? {
        Ok(state) => state,
        Err(e) => return Ok(report(&e)),
    };

    if parseable {
        println!("{}", serde_json::to_string_pretty(&status_json(&state, total_cores))?);
    } else {
        print_status_table(&state, total_cores);
    }
    Ok(0)
}

pub fn status_json(state: &LeaseState, total_cores: u32) -> serde_json::Value {
    let free: Vec<u32> = state.core_set(total_cores).free_cores().collect();
    serde_json::json!({
        "total_cores": total_cores,
        "leased": state.leased,
        "free": free,
        "owners": state.owners,
    })
}

fn print_status_table(state: &LeaseState, total_cores: u32) {
    if state.owners.is_empty() {
        println!("No active leases ({} cores free)", total_cores);
        return;
    }

    let mut table = Table::new();
    table.set_titles(row!["SESSION", "CORES", "PID", "USER", "ACQUIRED"]);
    for (session, entry) in &state.owners {
        table.add_row(row![
            session,
            format_cpu_list(&entry.cores),
            entry.pid,
            entry.user,
            entry.acquired_at.format("%Y-%m-%d %H:%M:%S")
        ]);
    }
    table.printstd();

    let leased = state.leased.len() as u32;
    let summary = format!("{} of {} cores leased", leased, total_cores);
    if leased == total_cores {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}

async fn clear(manager: LeaseManager, yes: bool) -> Result<i32> {
    if !yes {
        eprintln!(
            "{} refusing to drop every lease without --yes",
            "error:".red().bold()
        );
        return Ok(exit_code(ErrorKind::InvalidRequest));
    }

    let dropped = match tokio::task::spawn_blocking(move || manager.clear()).await? {
        Ok(dropped) => dropped,
        Err(e) => return Ok(report(&e)),
    };
    for (session, entry) in &dropped.owners {
        println!("{} {}", session, join_cores(&entry.cores));
    }
    Ok(0)
}
