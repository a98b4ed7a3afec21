//! Process control: PID file, start, stop and status.
//!
//! `run` under a service supervisor is the preferred deployment; the
//! `start`/`stop` pair is kept for init scripts that expect a
//! self-daemonizing service.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use daemonize::Daemonize;
use thiserror::Error;
use tracing::{debug, info};

use crate::server::remove_socket;
use crate::sys;

/// Errors from the control commands.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot access pid file {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dns-filter is already running with pid {0}")]
    AlreadyRunning(i32),

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("pid {pid} still running after {waited:?}")]
    StopTimeout { pid: i32, waited: Duration },

    #[error("cannot open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to daemonize: {0}")]
    Daemonize(String),
}

/// Whether the daemon referenced by the PID file is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running(i32),
    NotRunning,
}

/// Read the pid stored in `path`.
///
/// A missing file or unparsable content means no pid.
pub fn read_pid(path: &Path) -> Result<Option<i32>, ControlError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ControlError::PidFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Record the current process in `path`.
pub fn write_pid(path: &Path) -> Result<(), ControlError> {
    let pid_err = |source| ControlError::PidFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(pid_err)?;
    }
    fs::write(path, format!("{}\n", std::process::id())).map_err(pid_err)
}

/// Remove the PID file, ignoring a missing one.
pub fn remove_pid(path: &Path) -> Result<(), ControlError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ControlError::PidFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn status(pid_file: &Path) -> Result<Status, ControlError> {
    Ok(match read_pid(pid_file)? {
        Some(pid) if sys::process_alive(pid) => Status::Running(pid),
        _ => Status::NotRunning,
    })
}

/// Fail with [`ControlError::AlreadyRunning`] if the PID file names a
/// live process.
pub fn ensure_not_running(pid_file: &Path) -> Result<(), ControlError> {
    match status(pid_file)? {
        Status::Running(pid) => Err(ControlError::AlreadyRunning(pid)),
        Status::NotRunning => Ok(()),
    }
}

/// Detach into the background, writing the child's pid to `pid_file`.
///
/// Must run before any tokio runtime or thread is created. Output goes
/// to `log_file` when given, otherwise to `/dev/null`. Open file
/// descriptors, such as an already bound listener, are inherited.
pub fn daemonize(pid_file: &Path, log_file: Option<&Path>) -> Result<(), ControlError> {
    ensure_not_running(pid_file)?;
    if let Some(parent) = pid_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ControlError::PidFile {
            path: pid_file.to_path_buf(),
            source,
        })?;
    }

    let mut daemon = Daemonize::new().pid_file(pid_file).working_directory("/");

    if let Some(log_path) = log_file {
        let open = || {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .map_err(|source| ControlError::LogFile {
                    path: log_path.to_path_buf(),
                    source,
                })
        };
        daemon = daemon.stdout(open()?).stderr(open()?);
    }

    daemon
        .start()
        .map_err(|e| ControlError::Daemonize(e.to_string()))
}

/// Stop the daemon named by `pid_file` and clean up after it.
///
/// Returns `false` when nothing was running; stale PID file and socket
/// are removed either way.
pub fn stop(pid_file: &Path, socket_path: &Path, wait: Duration) -> Result<bool, ControlError> {
    let was_running = match status(pid_file)? {
        Status::Running(pid) => {
            sys::terminate(pid).map_err(|source| ControlError::Signal { pid, source })?;
            info!(pid, "sent SIGTERM");
            wait_for_exit(pid, wait)?;
            true
        }
        Status::NotRunning => {
            debug!(pid_file = %pid_file.display(), "no running daemon");
            false
        }
    };

    remove_pid(pid_file)?;
    // The server removes its own socket on clean shutdown.
    if let Err(e) = remove_socket(socket_path) {
        debug!(socket = %socket_path.display(), "cannot remove socket: {}", e);
    }

    Ok(was_running)
}

fn wait_for_exit(pid: i32, wait: Duration) -> Result<(), ControlError> {
    let started = Instant::now();
    while sys::process_alive(pid) {
        if started.elapsed() >= wait {
            return Err(ControlError::StopTimeout { pid, waited: wait });
        }
        thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}
