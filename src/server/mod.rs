//! Session server: owns every piece of shared state and the spawned tasks
//!
//! Nothing lives in process statics. Each [`Server`] carries its own
//! [`ServerContext`], so several can run side by side (the integration tests
//! do exactly that on ephemeral ports).

pub mod acceptor;
pub mod shutdown;

pub use shutdown::Shutdown;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::task::TaskTracker;

use crate::chat::ChatRoster;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::network::{bind_tcp_listener, bind_udp_socket};
use crate::video::{FrameQueue, VideoRelay};
use crate::voice::{AudioDevice, Playback, VoiceRelay, VoiceStats};

/// Connection identifier, unique per server
pub type ConnId = u64;

/// State shared by the acceptor, every handler and the voice relay
pub struct ServerContext {
    pub config: ServerConfig,
    pub roster: Arc<ChatRoster>,
    pub video: Arc<VideoRelay>,
    pub voice: Arc<VoiceStats>,
    pub shutdown: Shutdown,
    pub tracker: TaskTracker,
    next_id: AtomicU64,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            roster: Arc::new(ChatRoster::new(
                config.chat.max_clients,
                config.chat.outbox_depth,
            )),
            video: Arc::new(VideoRelay::new(config.video.clone())),
            voice: Arc::new(VoiceStats::new()),
            shutdown: Shutdown::new(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(0),
            config,
        }
    }

    /// Allocate the next connection id, starting at 1
    pub fn next_conn_id(&self) -> ConnId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frame_queue(&self) -> &Arc<FrameQueue> {
        self.video.queue()
    }
}

/// Bound but not yet serving
pub struct Server {
    context: Arc<ServerContext>,
    listener: TcpListener,
    udp: UdpSocket,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
}

impl Server {
    /// Bind the TCP listener and the voice UDP socket.
    ///
    /// Port 0 picks an ephemeral port; the real one is reported by
    /// [`Server::local_tcp_addr`] and [`Server::local_udp_addr`].
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = bind_tcp_listener(config.network.tcp_addr(), config.network.listen_backlog)?;
        let udp = bind_udp_socket(config.network.udp_addr())?;
        let tcp_addr = listener.local_addr()?;
        let udp_addr = udp.local_addr()?;

        Ok(Self {
            context: Arc::new(ServerContext::new(config)),
            listener,
            udp,
            tcp_addr,
            udp_addr,
        })
    }

    pub fn local_tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn local_udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Start the acceptor and the voice relay, playing voice into `audio`
    pub fn run(self, audio: Box<dyn AudioDevice>) -> Result<ServerHandle> {
        let Server {
            context,
            listener,
            udp,
            tcp_addr,
            udp_addr,
        } = self;

        let playback = Playback::start(audio, context.config.voice.playback_queue)?;
        let voice = VoiceRelay::new(
            udp,
            context.config.voice.clone(),
            playback,
            context.voice.clone(),
            context.shutdown.clone(),
        );

        tracing::info!("TCP server listening on {}", tcp_addr);
        context.tracker.spawn(voice.run());
        context
            .tracker
            .spawn(acceptor::run_acceptor(context.clone(), listener));

        Ok(ServerHandle {
            context,
            tcp_addr,
            udp_addr,
        })
    }
}

/// Handle to a running server
pub struct ServerHandle {
    context: Arc<ServerContext>,
    tcp_addr: SocketAddr,
    udp_addr: SocketAddr,
}

impl ServerHandle {
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Queue the display side pulls from
    pub fn frame_queue(&self) -> Arc<FrameQueue> {
        self.context.frame_queue().clone()
    }

    pub fn voice_stats(&self) -> Arc<VoiceStats> {
        self.context.voice.clone()
    }

    pub fn roster(&self) -> &Arc<ChatRoster> {
        &self.context.roster
    }

    pub fn is_running(&self) -> bool {
        self.context.shutdown.is_running()
    }

    /// Stop every loop, close the listener and wait for all tasks to exit
    pub async fn shutdown(&self) {
        self.context.shutdown.trigger();
        self.context.frame_queue().close();
        self.context.tracker.close();
        self.context.tracker.wait().await;
        tracing::info!("Server on {} stopped", self.tcp_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::voice::NullDevice;

    fn ephemeral() -> ServerConfig {
        ServerConfig {
            network: NetworkConfig::ephemeral(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_conn_ids_are_monotonic() {
        let ctx = ServerContext::new(ServerConfig::default());
        assert_eq!(ctx.next_conn_id(), 1);
        assert_eq!(ctx.next_conn_id(), 2);
        assert_eq!(ctx.next_conn_id(), 3);
    }

    #[tokio::test]
    async fn test_bind_reports_real_ports() {
        let server = Server::bind(ephemeral()).await.unwrap();
        assert_ne!(server.local_tcp_addr().port(), 0);
        assert_ne!(server.local_udp_addr().port(), 0);
        assert_eq!(server.context().roster.capacity(), 50);
    }

    #[tokio::test]
    async fn test_two_servers_are_independent() {
        let a = Server::bind(ephemeral()).await.unwrap();
        let b = Server::bind(ephemeral()).await.unwrap();
        assert_ne!(a.local_tcp_addr(), b.local_tcp_addr());

        let a = a.run(Box::new(NullDevice)).unwrap();
        let b = b.run(Box::new(NullDevice)).unwrap();
        a.shutdown().await;
        assert!(!a.is_running());
        assert!(b.is_running());
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_frame_queue() {
        let handle = Server::bind(ephemeral())
            .await
            .unwrap()
            .run(Box::new(NullDevice))
            .unwrap();
        let queue = handle.frame_queue();
        handle.shutdown().await;
        assert!(queue.is_closed());
        assert!(handle.context().tracker.is_empty());
    }
}
