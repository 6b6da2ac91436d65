//! Unix socket transport between the GUI and the manager process
//!
//! The GUI talks to the manager process with length-prefixed JSON over a
//! Unix domain socket. Replies and pushed notifications share one stream.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use crate::constants::ipc::{MAX_MESSAGE_SIZE, SOCKET};

pub mod handler;
mod messages;
pub use messages::{Notification, Request, Response, ServerMessage, UpdatedSettings};

/// Socket under the user's runtime dir, or the cache dir when there is none
pub fn default_socket_path() -> Result<PathBuf> {
    let base = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("No runtime or cache directory to place the IPC socket in")?;
    Ok(base.join(SOCKET))
}

/// Listening socket of the manager process. The socket file is removed
/// again when the server is dropped.
pub struct ManagerServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ManagerServer {
    /// Bind at `socket_path`, replacing a leftover socket file.
    /// Must be called inside a tokio runtime.
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        let dir = socket_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create socket directory {}", dir.display()))?;

        match fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "Removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove stale socket {}", socket_path.display()));
            }
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket at {}", socket_path.display()))?;
        fs::set_permissions(&socket_path, fs::Permissions::from_mode(0o700))
            .context("Failed to restrict socket to its owner")?;

        Ok(Self { listener, socket_path })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _) = self.listener.accept().await.context("Failed to accept GUI connection")?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ManagerServer {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.socket_path) {
            debug!(error = %e, "Socket already gone");
        }
    }
}

// Wire format: u32 little-endian payload length, then the JSON payload.

/// Serialize `msg` into one frame and write it
pub async fn write_message<T, W>(stream: &mut W, msg: &T) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).context("Failed to encode IPC message")?;
    let Some(len) = u32::try_from(payload.len()).ok().filter(|len| (*len as usize) <= MAX_MESSAGE_SIZE) else {
        bail!("IPC message of {} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit", payload.len());
    };

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    stream.write_all(&frame).await.context("Failed to write IPC frame")?;
    stream.flush().await.context("Failed to flush IPC stream")
}

/// Read one frame's payload. Errors mean the stream is unusable.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let len = stream.read_u32_le().await.context("Failed to read IPC frame length")? as usize;
    if len > MAX_MESSAGE_SIZE {
        bail!("IPC message of {len} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit");
    }

    let mut payload = vec![0; len];
    stream
        .read_exact(&mut payload)
        .await
        .context("Failed to read IPC frame payload")?;
    Ok(payload)
}

/// Read and decode one frame
#[cfg(test)]
pub async fn read_message<T, R>(stream: &mut R) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let payload = read_frame(stream).await?;
    serde_json::from_slice(&payload).context("Failed to decode IPC message")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_frames_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        write_message(&mut a, &Request::Ping).await.unwrap();
        let request: Request = read_message(&mut b).await.unwrap();

        assert_eq!(request, Request::Ping);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_server_replaces_stale_socket_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/manager.sock");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale").unwrap();

        let server = ManagerServer::bind_to(path.clone()).unwrap();
        let client = UnixStream::connect(&path).await;
        assert!(client.is_ok());
        assert!(server.accept().await.is_ok());

        drop(server);
        assert!(!path.exists());
    }
}
