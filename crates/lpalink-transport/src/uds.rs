use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::endpoint::{poll_fd, Endpoint};
use crate::error::{Result, TransportError};
use crate::traits::TransportConfig;

/// Listening Unix domain socket that hands out [`Endpoint`]s.
///
/// Stands in for the IPC device node when a simulated gateway runs on the
/// host. The socket file is removed again on drop.
pub struct UnixDomainSocket {
    listener: UnixListener,
    path: PathBuf,
    config: TransportConfig,
}

impl UnixDomainSocket {
    /// Permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a listening socket. Accepted endpoints use `config`.
    ///
    /// A stale socket file at `path` is replaced; any other kind of file is
    /// left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>, config: TransportConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            config,
        })
    }

    /// Accept one connection (blocking).
    pub fn accept(&self) -> Result<Endpoint> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted connection");
        Endpoint::from_unix(stream, self.config.clone())
    }

    /// Accept one connection if a client arrives within `timeout`.
    ///
    /// Returns `Ok(None)` when the wait elapsed, so callers can check a stop
    /// flag between attempts.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<Option<Endpoint>> {
        if !poll_fd(self.listener.as_raw_fd(), libc::POLLIN, Some(timeout))? {
            return Ok(None);
        }
        self.accept().map(Some)
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixDomainSocket {
    fn drop(&mut self) {
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Transport;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lpalink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("gw.sock");

        let listener = UnixDomainSocket::bind(&sock_path, TransportConfig::default()).unwrap();
        assert!(sock_path.exists());
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let path_clone = sock_path.clone();
        let client = std::thread::spawn(move || {
            let endpoint = Endpoint::connect_unix(&path_clone, TransportConfig::default()).unwrap();
            endpoint.write(b"hello").unwrap();
        });

        let server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        let mut got = 0;
        while got < buf.len() {
            got += server.read(&mut buf[got..]).unwrap();
        }
        assert_eq!(&buf, b"hello");
        client.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn accept_timeout_returns_none_without_client() {
        let dir = temp_dir("uds-timeout");
        let sock_path = dir.join("idle.sock");
        let listener = UnixDomainSocket::bind(&sock_path, TransportConfig::default()).unwrap();

        assert!(listener
            .accept_timeout(Duration::from_millis(10))
            .unwrap()
            .is_none());

        let _client = Endpoint::connect_unix(&sock_path, TransportConfig::default()).unwrap();
        let server = listener.accept_timeout(Duration::from_secs(1)).unwrap();
        assert!(server.is_some());

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixDomainSocket::bind(&long_path, TransportConfig::default());
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn bind_rejects_existing_regular_file() {
        let dir = temp_dir("uds-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixDomainSocket::bind(&sock_path, TransportConfig::default());
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert!(sock_path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
