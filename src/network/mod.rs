//! Socket setup for the listening ports

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::{TcpListener, UdpSocket};

use crate::error::NetworkError;

/// Bind the multiplexed TCP listener with `SO_REUSEADDR` and the given backlog.
///
/// Must be called inside a tokio runtime.
pub fn bind_tcp_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, NetworkError> {
    let bind_failed = |source| NetworkError::BindFailed { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;
    socket
        .listen(i32::try_from(backlog).unwrap_or(i32::MAX))
        .map_err(bind_failed)?;

    TcpListener::from_std(socket.into()).map_err(bind_failed)
}

/// Bind the voice UDP socket.
///
/// Must be called inside a tokio runtime.
pub fn bind_udp_socket(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let bind_failed = |source| NetworkError::BindFailed { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(bind_failed)?;
    socket.set_reuse_address(true).map_err(bind_failed)?;
    socket.set_nonblocking(true).map_err(bind_failed)?;
    socket.bind(&addr.into()).map_err(bind_failed)?;

    UdpSocket::from_std(socket.into()).map_err(bind_failed)
}
