//! Filter server: answers blocklist queries over a Unix socket.
//!
//! Each connection carries exactly one request and one response. Every
//! connection is handled in its own task against the shared, read-only
//! blocklist; the accept loop itself never waits on a client.

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ConfigError, Error, Result};
use crate::filter::{Blocklist, handle_request};
use crate::protocol::{ProtocolError, Request, Response, read_message};
use crate::stats::Stats;
use crate::sys;

/// A bound, loaded filter server that has not started accepting yet.
pub struct FilterServer {
    listener: StdUnixListener,
    socket_path: PathBuf,
    blocklist: Arc<Blocklist>,
    stats: Arc<Stats>,
    connection_timeout: Duration,
    stats_interval: Duration,
}

impl FilterServer {
    /// Prepare the socket and load the blocklist.
    ///
    /// Removes a stale socket left by a previous instance, binds, applies
    /// mode and ownership, then loads the lists exactly once. On any
    /// failure the freshly bound socket is removed again so no client can
    /// connect to a half-configured daemon.
    ///
    /// Needs no runtime, so `start` can do all of this before detaching
    /// and report failures to the operator.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        // Kept absolute: a daemonized server runs from `/`.
        let path = std::path::absolute(&config.socket_path).map_err(|source| Error::Socket {
            path: config.socket_path.clone(),
            source,
        })?;

        let parent = path
            .parent()
            .ok_or_else(|| ConfigError::InvalidSocketPath(path.clone()))?;
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| Error::Socket {
                path: path.clone(),
                source,
            })?;
        }

        remove_socket(&path).map_err(|source| Error::Socket {
            path: path.clone(),
            source,
        })?;

        let listener = StdUnixListener::bind(&path).map_err(|source| Error::Socket {
            path: path.clone(),
            source,
        })?;

        let prepared = listener
            .set_nonblocking(true)
            .map_err(|source| Error::Socket {
                path: path.clone(),
                source,
            })
            .and_then(|()| secure_socket(&path, config))
            .and_then(|()| {
                Blocklist::load_with_allowlist(
                    &config.filters_dir,
                    &config.block_suffix,
                    &config.allow_suffix,
                )
                .map_err(Error::from)
            });
        let blocklist = match prepared {
            Ok(blocklist) => blocklist,
            Err(e) => {
                drop(listener);
                let _ = remove_socket(&path);
                return Err(e);
            }
        };

        info!(
            socket = %path.display(),
            blocked = blocklist.len(),
            allowed = blocklist.allowlist_len(),
            disable_doh = blocklist.disable_doh(),
            "filter server ready"
        );

        Ok(Self {
            listener,
            socket_path: path,
            blocklist: Arc::new(blocklist),
            stats: Arc::new(Stats::new()),
            connection_timeout: config.connection_timeout,
            stats_interval: config.stats_interval,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    /// Run the accept loop until `shutdown` resolves.
    ///
    /// On shutdown the listener is closed first, in-flight connections are
    /// allowed to finish, then the socket path is removed.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            socket_path,
            blocklist,
            stats,
            connection_timeout,
            stats_interval,
        } = self;

        let listener = match UnixListener::from_std(listener) {
            Ok(listener) => listener,
            Err(e) => {
                let _ = remove_socket(&socket_path);
                return Err(e);
            }
        };
        let stats_task =
            (!stats_interval.is_zero()).then(|| tokio::spawn(log_stats(stats.clone(), stats_interval)));
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(
                            stream,
                            blocklist.clone(),
                            stats.clone(),
                            connection_timeout,
                        ));
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                        // Usually fd exhaustion; give handlers time to close.
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        info!(in_flight = connections.len(), "shutting down filter server");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!("connection task failed: {}", e);
            }
        }
        if let Some(task) = stats_task {
            task.abort();
        }

        remove_socket(&socket_path)?;
        info!(socket = %socket_path.display(), "filter server stopped");
        Ok(())
    }
}

/// Delete a socket path, treating "does not exist" as success.
pub fn remove_socket(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn secure_socket(path: &Path, config: &ServerConfig) -> Result<()> {
    let socket_err = |source| Error::Socket {
        path: path.to_path_buf(),
        source,
    };

    fs::set_permissions(path, fs::Permissions::from_mode(config.socket_mode))
        .map_err(socket_err)?;

    let (uid, mut gid) = match &config.owner {
        Some(owner) => {
            let (uid, gid) = sys::lookup_user(owner)
                .ok_or_else(|| ConfigError::UnknownUser(owner.clone()))?;
            (Some(uid), Some(gid))
        }
        None => (None, None),
    };
    if let Some(group) = &config.group {
        gid = Some(sys::lookup_group(group).ok_or_else(|| ConfigError::UnknownGroup(group.clone()))?);
    }

    if uid.is_some() || gid.is_some() {
        std::os::unix::fs::chown(path, uid, gid).map_err(socket_err)?;
        debug!(socket = %path.display(), ?uid, ?gid, "socket ownership set");
    }

    Ok(())
}

/// Handle a single connection: read request, answer, close.
async fn handle_connection(
    mut stream: UnixStream,
    blocklist: Arc<Blocklist>,
    stats: Arc<Stats>,
    timeout: Duration,
) {
    let start_time = Instant::now();

    match tokio::time::timeout(timeout, answer(&mut stream, &blocklist)).await {
        Ok(Ok((request, response))) => {
            let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
            match (request, response) {
                (Request::Lookup { domain }, Response::Lookup { blocked, .. }) => {
                    debug!(%domain, blocked, "lookup total={:.3}ms", elapsed_ms);
                    stats.record_lookup(blocked, elapsed_ms);
                }
                _ => {
                    debug!("probe total={:.3}ms", elapsed_ms);
                    stats.record_probe(elapsed_ms);
                }
            }
        }
        Ok(Err(e)) => {
            debug!("dropping connection: {}", e);
            stats.record_dropped();
        }
        Err(_) => {
            warn!("dropping connection: no request within {:?}", timeout);
            stats.record_dropped();
        }
    }
}

/// Nothing is written unless the request decoded completely.
async fn answer(
    stream: &mut UnixStream,
    blocklist: &Blocklist,
) -> std::result::Result<(Request, Response), ProtocolError> {
    let message = read_message(stream).await?;
    let request = Request::decode(&message)?;
    let response = handle_request(blocklist, &request);

    stream.write_all(&response.encode()).await?;
    stream.shutdown().await?;

    Ok((request, response))
}

async fn log_stats(stats: Arc<Stats>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let snapshot = stats.snapshot_and_reset();
        if snapshot.is_idle() {
            continue;
        }
        info!(
            "[stats] uptime={}s lookups={} blocked={} probes={} dropped={} avg_handle={:.3}ms",
            snapshot.uptime_secs,
            snapshot.lookups,
            snapshot.blocked,
            snapshot.probes,
            snapshot.dropped,
            snapshot.avg_handle_ms
        );
    }
}
