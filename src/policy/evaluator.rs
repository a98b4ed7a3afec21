//! Per-query policy evaluation inside the resolver.
//!
//! The evaluator must never make resolution fail: a missing daemon, a
//! refused connection, a slow or garbled answer all yield
//! [`Decision::Allow`].

use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Decision, decide};
use crate::client::FilterClient;
use crate::config::EvaluatorConfig;
use crate::domain::DomainName;

/// Decides what the resolver does with each query name.
///
/// Safe to share across resolver worker threads.
pub struct PolicyEvaluator {
    client: FilterClient,
    sinkhole: IpAddr,
    available: AtomicBool,
    /// Set while round trips keep failing, so only the first one warns.
    failing: AtomicBool,
    reprobe_interval: Option<Duration>,
    /// When availability was last checked; only consulted while unavailable.
    last_probe: Mutex<Instant>,
}

impl PolicyEvaluator {
    /// Create the evaluator and probe for the server socket.
    ///
    /// The daemon may start slightly after the resolver, so the socket
    /// path is checked up to `probe_attempts` times, `probe_interval`
    /// apart, before the server is declared unavailable.
    pub fn new(config: EvaluatorConfig) -> Self {
        let client = FilterClient::new(config.socket_path, config.timeout);
        let available = probe_socket(
            client.socket_path(),
            config.probe_attempts,
            config.probe_interval,
        );

        if available {
            info!(socket = %client.socket_path().display(), "filter server available");
        } else {
            warn!(
                socket = %client.socket_path().display(),
                "filter server unavailable, queries pass through unfiltered"
            );
        }

        Self {
            client,
            sinkhole: config.sinkhole,
            available: AtomicBool::new(available),
            failing: AtomicBool::new(false),
            reprobe_interval: config.reprobe_interval,
            last_probe: Mutex::new(Instant::now()),
        }
    }

    pub fn sinkhole(&self) -> IpAddr {
        self.sinkhole
    }

    /// Whether queries are currently sent to the server.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed) || self.reprobe()
    }

    /// Evaluate a raw query name as the resolver sees it, e.g. `"example.com."`.
    pub fn evaluate(&self, qname: &str) -> Decision {
        match DomainName::parse(qname) {
            Ok(name) => self.evaluate_name(&name),
            Err(e) => {
                debug!(qname, "not filtering query: {}", e);
                Decision::Allow
            }
        }
    }

    /// Evaluate an already normalized name.
    pub fn evaluate_name(&self, name: &DomainName) -> Decision {
        if !self.is_available() {
            return Decision::Allow;
        }

        match self.client.lookup(name) {
            Ok(lookup) => {
                if self.failing.swap(false, Ordering::Relaxed) {
                    info!(%name, "filter server answering again");
                }
                let decision = decide(name, lookup, self.sinkhole);
                debug!(%name, %decision, "policy decision");
                decision
            }
            Err(e) => {
                if self.failing.swap(true, Ordering::Relaxed) {
                    debug!(%name, "filter server query failed, allowing: {}", e);
                } else {
                    warn!(%name, "filter server query failed, allowing: {}", e);
                }
                Decision::Allow
            }
        }
    }

    /// Re-check an unavailable server, at most once per reprobe interval.
    ///
    /// Never sleeps: this runs on the resolver's query path.
    fn reprobe(&self) -> bool {
        let Some(every) = self.reprobe_interval else {
            return false;
        };
        // Another thread is already checking.
        let Ok(mut last_probe) = self.last_probe.try_lock() else {
            return false;
        };
        if last_probe.elapsed() < every {
            return false;
        }
        *last_probe = Instant::now();

        if self.client.socket_path().exists() {
            info!(socket = %self.client.socket_path().display(), "filter server became available");
            self.available.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

fn probe_socket(path: &Path, attempts: u32, interval: Duration) -> bool {
    for attempt in 0..attempts.max(1) {
        if path.exists() {
            return true;
        }
        if attempt + 1 < attempts {
            thread::sleep(interval);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    fn config(socket_path: &Path) -> EvaluatorConfig {
        EvaluatorConfig {
            socket_path: socket_path.to_path_buf(),
            probe_attempts: 2,
            probe_interval: Duration::from_millis(5),
            reprobe_interval: None,
            ..EvaluatorConfig::default()
        }
    }

    #[test]
    fn missing_socket_allows_everything() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = PolicyEvaluator::new(config(&dir.path().join("absent.sock")));

        assert!(!evaluator.is_available());
        assert_eq!(evaluator.evaluate("use-application-dns.net."), Decision::Allow);
        assert_eq!(evaluator.evaluate("ads.example.com"), Decision::Allow);
    }

    #[test]
    fn unparsable_name_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = PolicyEvaluator::new(config(&dir.path().join("absent.sock")));

        assert_eq!(evaluator.evaluate("."), Decision::Allow);
        assert_eq!(evaluator.evaluate("a..b"), Decision::Allow);
    }

    #[test]
    fn silent_server_times_out_to_allow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.sock");
        // Accepts connections (via the backlog) but never answers.
        let _listener = UnixListener::bind(&path).unwrap();
        let evaluator = PolicyEvaluator::new(EvaluatorConfig {
            timeout: Duration::from_millis(20),
            ..config(&path)
        });

        assert!(evaluator.is_available());
        assert_eq!(evaluator.evaluate("ads.example.com"), Decision::Allow);
    }

    #[test]
    fn full_accept_backlog_times_out_to_allow() {
        use socket2::{Domain, SockAddr, Socket, Type};
        use std::sync::mpsc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stalled.sock");
        // Listens but never accepts, like a stopped daemon.
        let listener = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();
        listener.bind(&SockAddr::unix(&path).unwrap()).unwrap();
        listener.listen(0).unwrap();

        let addr = SockAddr::unix(&path).unwrap();
        let mut queued = Vec::new();
        for _ in 0..64 {
            let socket = Socket::new(Domain::UNIX, Type::STREAM, None).unwrap();
            socket.set_nonblocking(true).unwrap();
            if socket.connect(&addr).is_err() {
                break;
            }
            queued.push(socket);
        }

        let evaluator = PolicyEvaluator::new(EvaluatorConfig {
            timeout: Duration::from_millis(50),
            probe_attempts: 1,
            ..config(&path)
        });
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(evaluator.evaluate("ads.example.com"));
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(3)), Ok(Decision::Allow));
        drop(queued);
    }

    #[test]
    fn failure_state_clears_on_next_answer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refusing.sock");
        // The socket file outlives the listener, so connects are refused.
        drop(UnixListener::bind(&path).unwrap());
        let evaluator = PolicyEvaluator::new(config(&path));

        assert_eq!(evaluator.evaluate("ads.example.com"), Decision::Allow);
        assert!(evaluator.failing.load(Ordering::Relaxed));
        assert_eq!(evaluator.evaluate("ads.example.com"), Decision::Allow);
        assert!(evaluator.failing.load(Ordering::Relaxed));

        // A listener that answers one lookup.
        std::fs::remove_file(&path).unwrap();
        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 256];
            let _ = stream.read(&mut request);
            stream
                .write_all(b"{\"blocked\":false,\"disable_doh\":false}\n")
                .unwrap();
        });

        assert_eq!(evaluator.evaluate("example.com"), Decision::Allow);
        assert!(!evaluator.failing.load(Ordering::Relaxed));
        server.join().unwrap();
    }

    #[test]
    fn reprobe_notices_late_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.sock");
        let evaluator = PolicyEvaluator::new(EvaluatorConfig {
            reprobe_interval: Some(Duration::ZERO),
            ..config(&path)
        });
        assert!(!evaluator.available.load(Ordering::Relaxed));

        let _listener = UnixListener::bind(&path).unwrap();

        assert!(evaluator.is_available());
    }

    #[test]
    fn one_shot_probe_keeps_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.sock");
        let evaluator = PolicyEvaluator::new(config(&path));

        let _listener = UnixListener::bind(&path).unwrap();

        assert!(!evaluator.is_available());
    }
}
