//! Chat mode: an unframed byte relay between every connected member
//!
//! Whatever one member sends is copied, chunk by chunk, to all the others.
//! Chunk boundaries are whatever the reads happen to return.

pub mod roster;

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::Receiver;

use crate::error::ChatError;
use crate::server::{ConnId, Shutdown};

pub use roster::{BroadcastReport, ChatRoster};

/// Serve one chat connection until it disconnects or the server stops.
///
/// Admission happens before anything is read; a full roster drops the stream
/// straight away.
pub async fn handle_chat<S>(
    roster: Arc<ChatRoster>,
    id: ConnId,
    peer: SocketAddr,
    stream: S,
    recv_buffer: usize,
    shutdown: Shutdown,
) -> Result<(), ChatError>
where
    S: AsyncRead + AsyncWrite,
{
    let (outbox, inbox) = roster.outbox();
    match roster.join(id, peer, outbox) {
        Ok(size) => {
            tracing::info!("Chat client connected: {}", peer);
            tracing::info!("Chat clients connected: {}/{}", size, roster.capacity());
        }
        Err(e) => {
            tracing::error!("Rejecting chat client {}: {}", peer, e);
            return Err(e);
        }
    }

    let (reader, writer) = tokio::io::split(stream);
    let relay = async {
        read_loop(&roster, id, peer, reader, recv_buffer, &shutdown).await;
        // Dropping the roster's sender lets the writer drain and stop.
        if let Some(size) = roster.leave(id) {
            tracing::info!("Chat clients connected: {}", size);
        }
    };
    tokio::join!(relay, write_loop(peer, writer, inbox, &shutdown));

    tracing::info!("Chat client disconnected: {}", peer);
    Ok(())
}

async fn read_loop<S>(
    roster: &ChatRoster,
    id: ConnId,
    peer: SocketAddr,
    mut reader: ReadHalf<S>,
    recv_buffer: usize,
    shutdown: &Shutdown,
) where
    S: AsyncRead + AsyncWrite,
{
    let mut buf = vec![0u8; recv_buffer.max(1)];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = reader.read(&mut buf) => match r {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Chat read from {} failed: {}", peer, e);
                    return;
                }
            },
        };

        let chunk = Bytes::copy_from_slice(&buf[..n]);
        tracing::debug!("[Chat][{}] {}", peer, String::from_utf8_lossy(&chunk));
        let report = roster.broadcast(id, &chunk);
        if report.failed > 0 {
            tracing::debug!(
                "Chat chunk from {} reached {} of {} members",
                peer,
                report.delivered,
                report.delivered + report.failed
            );
        }
    }
}

/// Copy queued chunks to the socket. After the first write error the rest are
/// discarded; the member leaves only when its own read side fails.
async fn write_loop<S>(
    peer: SocketAddr,
    mut writer: WriteHalf<S>,
    mut inbox: Receiver<Bytes>,
    shutdown: &Shutdown,
) where
    S: AsyncRead + AsyncWrite,
{
    let mut broken = false;
    loop {
        let chunk = tokio::select! {
            _ = shutdown.cancelled() => break,
            chunk = inbox.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };
        if broken {
            continue;
        }
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = writer.write_all(&chunk) => r,
        };
        if let Err(e) = result {
            tracing::warn!("Chat write to {} failed: {}", peer, e);
            broken = true;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn spawn_member(
        roster: &Arc<ChatRoster>,
        id: ConnId,
        shutdown: &Shutdown,
    ) -> (DuplexStream, JoinHandle<Result<(), ChatError>>) {
        let (client, server) = duplex(4096);
        let handle = tokio::spawn(handle_chat(
            roster.clone(),
            id,
            peer(id as u16),
            server,
            1024,
            shutdown.clone(),
        ));
        (client, handle)
    }

    async fn wait_for_size(roster: &ChatRoster, size: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while roster.len() != size {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("roster size");
    }

    async fn read_n(stream: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut out))
            .await
            .expect("timed out")
            .expect("read");
        out
    }

    #[tokio::test]
    async fn test_relay_between_members() {
        let roster = Arc::new(ChatRoster::new(8, 16));
        let shutdown = Shutdown::new();
        let (mut a, _ha) = spawn_member(&roster, 1, &shutdown);
        let (mut b, _hb) = spawn_member(&roster, 2, &shutdown);
        let (mut c, _hc) = spawn_member(&roster, 3, &shutdown);
        wait_for_size(&roster, 3).await;

        a.write_all(b"hi from a").await.unwrap();
        assert_eq!(read_n(&mut b, 9).await, b"hi from a");
        assert_eq!(read_n(&mut c, 9).await, b"hi from a");

        c.write_all(b"back").await.unwrap();
        assert_eq!(read_n(&mut a, 4).await, b"back");
        assert_eq!(read_n(&mut b, 4).await, b"back");

        // a never sees its own bytes
        let mut buf = [0u8; 1];
        let echoed =
            tokio::time::timeout(Duration::from_millis(100), a.read(&mut buf)).await;
        assert!(echoed.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_roster() {
        let roster = Arc::new(ChatRoster::new(8, 16));
        let shutdown = Shutdown::new();
        let (a, ha) = spawn_member(&roster, 1, &shutdown);
        let (_b, _hb) = spawn_member(&roster, 2, &shutdown);
        wait_for_size(&roster, 2).await;

        drop(a);
        ha.await.unwrap().unwrap();
        assert_eq!(roster.len(), 1);
        assert!(!roster.contains(1));
    }

    #[tokio::test]
    async fn test_full_roster_rejects_before_read() {
        let roster = Arc::new(ChatRoster::new(1, 16));
        let shutdown = Shutdown::new();
        let (_a, _ha) = spawn_member(&roster, 1, &shutdown);
        wait_for_size(&roster, 1).await;

        let (mut late, hl) = spawn_member(&roster, 2, &shutdown);
        assert_eq!(
            hl.await.unwrap(),
            Err(ChatError::RosterFull { capacity: 1 })
        );
        let mut buf = [0u8; 1];
        assert_eq!(late.read(&mut buf).await.unwrap(), 0);
        assert_eq!(roster.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_handlers() {
        let roster = Arc::new(ChatRoster::new(8, 16));
        let shutdown = Shutdown::new();
        let (_a, ha) = spawn_member(&roster, 1, &shutdown);
        wait_for_size(&roster, 1).await;

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), ha)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(roster.is_empty());
    }

    #[tokio::test]
    async fn test_silent_member_does_not_stall_sender() {
        let roster = Arc::new(ChatRoster::new(8, 4));
        let shutdown = Shutdown::new();
        let (mut talker, _ht) = spawn_member(&roster, 1, &shutdown);
        // small pipe, never read: its writer blocks and its outbox fills up
        let (silent, server) = duplex(64);
        let _hs = tokio::spawn(handle_chat(
            roster.clone(),
            2,
            peer(2),
            server,
            1024,
            shutdown.clone(),
        ));
        wait_for_size(&roster, 2).await;

        let chunk = vec![b'x'; 1024];
        tokio::time::timeout(Duration::from_secs(2), async {
            for _ in 0..1024 {
                talker.write_all(&chunk).await.unwrap();
            }
        })
        .await
        .expect("sender stalled behind a silent member");

        assert!(roster.contains(2));
        drop(silent);
    }
}
