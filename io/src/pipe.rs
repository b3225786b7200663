//! Non-blocking local IPC over filesystem-addressed stream sockets.
//!
//! [`Acceptor`] owns a listening unix-domain socket bound to a path and
//! yields a [`Pipe`] per incoming connection; a [`Pipe`] can also connect
//! directly to a peer's path. Both are configured non-blocking and
//! close-on-exec at creation and never block the calling thread: transient
//! unavailability (EAGAIN/EWOULDBLOCK/EINTR) comes back as `Ok(0)` /
//! `Ok(None)` for the caller's reactor to retry.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::sys::socket::{self, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};

use crate::error::{Error, Result};

/// Accept backlog used when none is given.
pub const DEFAULT_BACKLOG: i32 = 128;

fn transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// One exclusively-owned, non-blocking byte-stream endpoint.
#[derive(Debug)]
pub struct Pipe {
    stream: UnixStream,
}

impl Pipe {
    /// Connects to the peer listening on `path`.
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Pipe> {
        let stream =
            UnixStream::connect(path.as_ref()).map_err(|e| Error::io("connect a pipe", e))?;

        Pipe::from_stream(stream)
    }

    /// Takes ownership of an already-connected stream and configures it.
    fn from_stream(stream: UnixStream) -> Result<Pipe> {
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::io("configure a pipe", e))?;

        Ok(Pipe { stream })
    }

    /// Writes up to `buffer.len()` bytes, returning how many were taken.
    /// `Ok(0)` means the peer's buffer is full right now; retry later.
    /// Never blocks.
    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        match self.stream.write(buffer) {
            Ok(written) => Ok(written),
            Err(e) if transient(&e) => Ok(0),
            Err(e) => Err(Error::io("write to a pipe", e)),
        }
    }

    /// Reads up to `buffer.len()` bytes. `Ok(None)` means nothing is
    /// available right now; `Ok(Some(0))` is the peer's orderly shutdown
    /// (end-of-stream), distinct from transient unavailability. Never
    /// blocks.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>> {
        match self.stream.read(buffer) {
            Ok(length) => Ok(Some(length)),
            Err(e) if transient(&e) => Ok(None),
            Err(e) => Err(Error::io("read from a pipe", e)),
        }
    }
}

impl AsRawFd for Pipe {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// A listening unix-domain socket bound to a filesystem path.
#[derive(Debug)]
pub struct Acceptor {
    listener: UnixListener,
    path:     PathBuf,
}

impl Acceptor {
    /// Binds to `path` and starts listening with the default backlog.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Acceptor> {
        Acceptor::bind_with_backlog(path, DEFAULT_BACKLOG)
    }

    /// Binds to `path` and starts listening with the given backlog depth.
    pub fn bind_with_backlog<P: AsRef<Path>>(path: P, backlog: i32) -> Result<Acceptor> {
        let path = path.as_ref().to_path_buf();

        let fd = socket::socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(|e| Error::io("create an acceptor", e.into()))?;

        let address =
            UnixAddr::new(path.as_path()).map_err(|e| Error::io("bind an acceptor", e.into()))?;
        socket::bind(fd.as_raw_fd(), &address)
            .map_err(|e| Error::io("bind an acceptor", e.into()))?;

        let backlog =
            Backlog::new(backlog).map_err(|e| Error::io("listen on an acceptor", e.into()))?;
        socket::listen(&fd, backlog).map_err(|e| Error::io("listen on an acceptor", e.into()))?;

        tracing::debug!(path = %path.display(), "acceptor listening");

        Ok(Acceptor {
            listener: UnixListener::from(fd),
            path,
        })
    }

    /// Accepts one pending connection as a fully configured [`Pipe`], or
    /// `Ok(None)` when no connection is waiting. Never blocks.
    pub fn accept(&self) -> Result<Option<Pipe>> {
        match self.listener.accept() {
            Ok((stream, _)) => Pipe::from_stream(stream).map(Some),
            Err(e) if transient(&e) => Ok(None),
            Err(e) => Err(Error::io("accept a connection", e)),
        }
    }

    /// The filesystem path this acceptor is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for Acceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        // The descriptor closes with the listener; the bound path has to
        // be unlinked by hand. Both are best-effort.
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove the acceptor socket path"
            );
        }
    }
}
