//! Blocking client for the filter server.
//!
//! Used from inside the resolver's query path, so every round trip
//! (connect, write and read together) is bounded by one deadline.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;

use crate::domain::DomainName;
use crate::protocol::{ProtocolError, Request, Response, read_message_blocking};

/// Result of a domain lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub blocked: bool,
    pub disable_doh: bool,
}

/// Errors talking to the filter server.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("round trip timed out")]
    Timeout,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server answered a different request: {0:?}")]
    UnexpectedResponse(Response),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        if is_timeout(&e) {
            ClientError::Timeout
        } else {
            ClientError::Protocol(ProtocolError::Io(e))
        }
    }
}

/// Opens one connection per request, as the server expects.
#[derive(Debug, Clone)]
pub struct FilterClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl FilterClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Ask whether `domain` is blocked.
    pub fn lookup(&self, domain: &DomainName) -> Result<Lookup, ClientError> {
        match self.round_trip(&Request::lookup(domain.clone()))? {
            Response::Lookup {
                blocked,
                disable_doh,
            } => Ok(Lookup {
                blocked,
                disable_doh,
            }),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// Ask whether DoH suppression is active.
    pub fn probe(&self) -> Result<bool, ClientError> {
        match self.round_trip(&Request::Probe)? {
            Response::Probe { disable_doh } => Ok(disable_doh),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    fn round_trip(&self, request: &Request) -> Result<Response, ClientError> {
        let deadline = Instant::now() + self.timeout;
        let stream = self.connect(deadline)?;
        let mut stream = DeadlineStream {
            stream: &stream,
            deadline,
        };

        stream.write_all(&request.encode())?;

        let message = read_message_blocking(&mut stream).map_err(|e| match e {
            ProtocolError::Io(io) => ClientError::from(io),
            other => ClientError::Protocol(other),
        })?;

        Ok(Response::decode(&message)?)
    }

    /// Connect without blocking past `deadline`.
    ///
    /// A plain blocking connect waits indefinitely while the server's
    /// accept backlog is full.
    fn connect(&self, deadline: Instant) -> Result<UnixStream, ClientError> {
        let connect_err = |source| ClientError::Connect {
            path: self.socket_path.clone(),
            source,
        };

        let addr = SockAddr::unix(&self.socket_path).map_err(connect_err)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(connect_err)?;
        match socket.connect_timeout(&addr, remaining(deadline)?) {
            Ok(()) => Ok(UnixStream::from(socket)),
            Err(e) if is_timeout(&e) => Err(ClientError::Timeout),
            Err(e) => Err(connect_err(e)),
        }
    }
}

/// Time left before `deadline`, or a timeout error once it has passed.
fn remaining(deadline: Instant) -> io::Result<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        Err(io::ErrorKind::TimedOut.into())
    } else {
        Ok(left)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Stream whose every read and write gets only the time left until a
/// shared deadline, so a server trickling bytes cannot stretch the
/// exchange.
struct DeadlineStream<'a> {
    stream: &'a UnixStream,
    deadline: Instant,
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(Some(remaining(self.deadline)?))?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(Some(remaining(self.deadline)?))?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
