//! Accept loop and mode dispatch
//!
//! The accept loop only hands each stream to its own task. The task reads the
//! one-byte mode tag and becomes the chat, file or video handler.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::chat::handle_chat;
use crate::file::handle_upload;
use crate::protocol::Mode;
use crate::server::{ConnId, ServerContext};

/// Pause after a failed accept (e.g. out of descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Accept until shutdown. The listener is dropped on return.
pub async fn run_acceptor(ctx: Arc<ServerContext>, listener: TcpListener) {
    while ctx.shutdown.is_running() {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            r = listener.accept() => r,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::error!("Failed to accept TCP connection: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let id = ctx.next_conn_id();
        tracing::info!("New connection from {}", peer);
        let span = tracing::info_span!("conn", id, %peer);
        ctx.tracker
            .spawn(dispatch(ctx.clone(), id, peer, stream).instrument(span));
    }
    tracing::info!("TCP acceptor stopped");
}

/// Read the mode tag and run the matching handler
async fn dispatch(ctx: Arc<ServerContext>, id: ConnId, peer: SocketAddr, mut stream: TcpStream) {
    let tag = tokio::select! {
        _ = ctx.shutdown.cancelled() => return,
        r = stream.read_u8() => match r {
            Ok(tag) => tag,
            Err(e) => {
                tracing::debug!("{} closed before sending a mode: {}", peer, e);
                return;
            }
        },
    };

    let mode = match Mode::try_from(tag) {
        Ok(mode) => mode,
        Err(e) => {
            tracing::warn!("Closing {}: {}", peer, e);
            return;
        }
    };
    tracing::debug!("{} selected {} mode", peer, mode);

    match mode {
        Mode::Chat => {
            // Rejections are logged by the handler
            let _ = handle_chat(
                ctx.roster.clone(),
                id,
                peer,
                stream,
                ctx.config.chat.recv_buffer,
                ctx.shutdown.clone(),
            )
            .await;
        }
        Mode::File => {
            handle_upload(&ctx.config.file, peer, stream, &ctx.shutdown).await;
        }
        Mode::Video => {
            if ctx
                .video
                .start(id, peer, stream, &ctx.tracker, &ctx.shutdown)
                .await
                .is_none()
            {
                tracing::debug!("Video connection from {} dropped during shutdown", peer);
            }
        }
    }
}
