//! Local socket placement: runtime directory resolution and the server
//! lock file.
//!
//! The socket path resolves from `PIPEWIRE_RUNTIME_DIR`, then
//! `XDG_RUNTIME_DIR`, then `USERPROFILE`; the name defaults to
//! `pipewire-0` so peers speaking this protocol find each other without
//! configuration. The server holds an exclusive flock on a sibling
//! `<socket>.lock` file so stale sockets can be reclaimed safely.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use crate::error::WireError;

/// Default socket name.
pub const DEFAULT_SOCKET_NAME: &str = "pipewire-0";

/// Resolve the runtime directory for sockets.
pub fn runtime_dir() -> Result<PathBuf, WireError> {
    for var in ["PIPEWIRE_RUNTIME_DIR", "XDG_RUNTIME_DIR", "USERPROFILE"] {
        if let Some(dir) = std::env::var_os(var) {
            if !dir.is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
    }
    Err(WireError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no runtime directory: set XDG_RUNTIME_DIR",
    )))
}

/// Full socket path for a name (or the default).
pub fn socket_path(name: Option<&str>) -> Result<PathBuf, WireError> {
    Ok(runtime_dir()?.join(name.unwrap_or(DEFAULT_SOCKET_NAME)))
}

/// A bound server socket holding the exclusive lock.
pub struct ServerSocket {
    listener: UnixListener,
    path: PathBuf,
    _lock: File,
}

impl ServerSocket {
    /// Bind the named socket in the runtime directory.
    ///
    /// Takes the `<socket>.lock` flock first; an already-locked file
    /// means another server is live and binding fails without touching
    /// its socket.
    pub fn bind(name: Option<&str>) -> Result<Self, WireError> {
        let path = socket_path(name)?;
        Self::bind_at(&path)
    }

    /// Bind at an explicit path (used by the tests).
    pub fn bind_at(path: &Path) -> Result<Self, WireError> {
        let lock_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".lock");
            PathBuf::from(p)
        };
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        #[allow(unsafe_code)]
        // SAFETY: flock on an owned, open descriptor.
        let res = unsafe { libc::flock(lock.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if res < 0 {
            return Err(WireError::Io(std::io::Error::last_os_error()));
        }

        // the lock proves any existing socket is stale
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        tracing::info!(path = %path.display(), "listening");
        Ok(Self {
            listener,
            path: path.to_owned(),
            _lock: lock,
        })
    }

    /// Accept one pending connection, if any.
    pub fn accept(&self) -> Result<Option<UnixStream>, WireError> {
        match self.listener.accept() {
            Ok((stream, _)) => Ok(Some(stream)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The bound path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ServerSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Connect to the named server socket.
pub fn client_connect(name: Option<&str>) -> Result<UnixStream, WireError> {
    let path = socket_path(name)?;
    connect_at(&path)
}

/// Connect at an explicit path.
pub fn connect_at(path: &Path) -> Result<UnixStream, WireError> {
    // std marks the fd CLOEXEC on creation
    Ok(UnixStream::connect(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_accept_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire-test-0");

        let server = ServerSocket::bind_at(&path).unwrap();
        assert!(server.accept().unwrap().is_none());

        let _client = connect_at(&path).unwrap();
        let accepted = server.accept().unwrap();
        assert!(accepted.is_some());
    }

    #[test]
    fn second_server_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire-test-1");

        let _server = ServerSocket::bind_at(&path).unwrap();
        assert!(ServerSocket::bind_at(&path).is_err());
    }

    #[test]
    fn stale_socket_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire-test-2");
        {
            let _server = ServerSocket::bind_at(&path).unwrap();
        }
        // the first server is gone; its lock is free, its socket may
        // linger - binding again must succeed
        std::fs::write(&path, b"").ok();
        let server = ServerSocket::bind_at(&path);
        assert!(server.is_ok());
    }
}
