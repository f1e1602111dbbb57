//! File mode: one framed upload per connection
//!
//! The upload lands at `upload_dir/<name>` with the name taken verbatim from
//! the wire. Names are not sanitized, so `../` escapes the directory.

use std::cmp::min;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::config::FileConfig;
use crate::protocol::FileHeader;
use crate::server::Shutdown;

/// Outcome of one upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub name: String,
    pub path: PathBuf,
    /// Size declared in the header
    pub expected: u64,
    /// Bytes actually written
    pub received: u64,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.received == self.expected
    }
}

/// Read one header and copy exactly `size` body bytes into the sink.
///
/// Header failures return an error before any file is created. A short body
/// is not an error: the report says how much arrived and the partial file
/// stays on disk.
pub async fn ingest<R>(
    reader: &mut R,
    upload_dir: &Path,
    chunk_size: usize,
) -> crate::Result<IngestReport>
where
    R: AsyncRead + Unpin,
{
    let header = FileHeader::read_from(reader).await?;
    let path = upload_dir.join(&header.name);
    tracing::info!(
        "File transfer started: {} ({} bytes) -> {}",
        header.name,
        header.size,
        path.display()
    );

    let mut file = tokio::fs::File::create(&path).await?;
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut received: u64 = 0;
    while received < header.size {
        let want = min(buf.len() as u64, header.size - received) as usize;
        let n = match reader.read(&mut buf[..want]).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Upload read failed after {} bytes: {}", received, e);
                break;
            }
        };
        file.write_all(&buf[..n]).await?;
        received += n as u64;
    }
    file.flush().await?;

    Ok(IngestReport {
        name: header.name,
        path,
        expected: header.size,
        received,
    })
}

/// Serve one file connection
pub async fn handle_upload<R>(
    config: &FileConfig,
    peer: SocketAddr,
    mut stream: R,
    shutdown: &Shutdown,
) -> Option<IngestReport>
where
    R: AsyncRead + Unpin,
{
    let result = tokio::select! {
        _ = shutdown.cancelled() => {
            tracing::info!("File transfer from {} interrupted by shutdown", peer);
            return None;
        }
        r = ingest(&mut stream, &config.upload_dir, config.chunk_size) => r,
    };

    match result {
        Ok(report) if report.is_complete() => {
            tracing::info!(
                "File received successfully from {}: {} ({} bytes)",
                peer,
                report.name,
                report.received
            );
            Some(report)
        }
        Ok(report) => {
            tracing::warn!(
                "File transfer incomplete from {}: {} ({}/{} bytes)",
                peer,
                report.name,
                report.received,
                report.expected
            );
            Some(report)
        }
        Err(e) => {
            tracing::error!("File transfer from {} rejected: {}", peer, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProtocolError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static SCRATCH: AtomicUsize = AtomicUsize::new(0);

    /// Temp directory removed on drop
    struct Scratch(PathBuf);

    impl std::ops::Deref for Scratch {
        type Target = Path;

        fn deref(&self) -> &Path {
            &self.0
        }
    }

    impl AsRef<Path> for Scratch {
        fn as_ref(&self) -> &Path {
            &self.0
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn scratch_dir() -> Scratch {
        let dir = std::env::temp_dir().join(format!(
            "lan-huddle-ingest-{}-{}",
            std::process::id(),
            SCRATCH.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        Scratch(dir)
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let scratch = scratch_dir();
        let dir = scratch.to_path_buf();
        std::fs::write(dir.join("leftover"), b"x").unwrap();
        drop(scratch);
        assert!(!dir.exists());
    }

    fn upload(name: &str, declared: u64, body: &[u8]) -> Vec<u8> {
        let mut wire = FileHeader::new(name, declared).encode().unwrap().to_vec();
        wire.extend_from_slice(body);
        wire
    }

    #[tokio::test]
    async fn test_complete_upload() {
        let dir = scratch_dir();
        let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let wire = upload("data.bin", body.len() as u64, &body);

        let report = ingest(&mut &wire[..], &dir, 4096).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.received, 10_000);
        assert_eq!(std::fs::read(dir.join("data.bin")).unwrap(), body);
    }

    #[tokio::test]
    async fn test_truncated_body_is_incomplete() {
        let dir = scratch_dir();
        let body = vec![7u8; 99];
        let wire = upload("short.bin", 100, &body);

        let report = ingest(&mut &wire[..], &dir, 16).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.received, 99);
        assert_eq!(std::fs::read(dir.join("short.bin")).unwrap().len(), 99);
    }

    #[tokio::test]
    async fn test_extra_bytes_not_consumed() {
        let dir = scratch_dir();
        let mut wire = upload("exact.txt", 3, b"abc");
        wire.extend_from_slice(b"trailing");
        let mut reader = &wire[..];

        let report = ingest(&mut reader, &dir, 4096).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(reader, b"trailing");
        assert_eq!(std::fs::read(dir.join("exact.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_empty_file() {
        let dir = scratch_dir();
        let wire = upload("empty", 0, b"");
        let report = ingest(&mut &wire[..], &dir, 4096).await.unwrap();
        assert!(report.is_complete());
        assert!(dir.join("empty").exists());
    }

    #[tokio::test]
    async fn test_bad_name_length_creates_nothing() {
        let dir = scratch_dir();
        for len in [0u32, 256] {
            let mut wire = len.to_be_bytes().to_vec();
            wire.extend_from_slice(&[b'z'; 8]);
            let err = ingest(&mut &wire[..], &dir, 4096).await.unwrap_err();
            assert!(matches!(
                err,
                Error::Protocol(ProtocolError::InvalidNameLength(n)) if n == len
            ));
        }
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_handle_upload_reports() {
        let dir = scratch_dir();
        let config = FileConfig {
            upload_dir: dir.to_path_buf(),
            chunk_size: 4096,
        };
        let wire = upload("note.txt", 5, b"hello");
        let report = handle_upload(
            &config,
            SocketAddr::from(([127, 0, 0, 1], 9)),
            &wire[..],
            &Shutdown::new(),
        )
        .await
        .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.path, dir.join("note.txt"));
    }
}
