use crate::udp::config::MulticastReceiveConfig;
use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// This is an abstraction for receiving datagrams with a bounded wait, introduced to facilitate
///  mocking the I/O part away for testing the receive loops
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSource: Send {
    /// Returns `Ok(None)` if no datagram arrived within `timeout`
    async fn recv_datagram(&mut self, timeout: Duration) -> anyhow::Result<Option<(Bytes, SocketAddr)>>;
}

/// A UDP socket that is a member of an IPV4 multicast group for its lifetime. It leaves the
///  group when it is dropped.
pub struct MulticastSocket {
    socket: UdpSocket,
    group: Ipv4Addr,
    interface: Ipv4Addr,
    buf: BytesMut,
    buffer_size: usize,
}

impl MulticastSocket {
    /// Creates the socket, binds it and joins the multicast group. This must be called from
    ///  inside a Tokio runtime.
    pub fn bind(config: &MulticastReceiveConfig) -> anyhow::Result<MulticastSocket> {
        config.validate()?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("failed to create UDP socket")?;
        socket.set_reuse_address(true)
            .context("failed to set reuse address")?;
        socket.set_nonblocking(true)
            .context("failed to set non-blocking mode")?;
        socket.bind(&config.bind_addr.into())
            .with_context(|| format!("failed to bind UDP socket to {:?}", config.bind_addr))?;
        socket.join_multicast_v4(&config.multicast_group, &config.multicast_interface)
            .with_context(|| format!("failed to join multicast group {} on interface {}", config.multicast_group, config.multicast_interface))?;

        let socket = UdpSocket::from_std(socket.into())
            .context("failed to register UDP socket with the runtime")?;

        info!("bound multicast receive socket to {:?}, joined group {} on interface {}", config.bind_addr, config.multicast_group, config.multicast_interface);

        Ok(MulticastSocket {
            socket,
            group: config.multicast_group,
            interface: config.multicast_interface,
            buf: BytesMut::with_capacity(config.buffer_size),
            buffer_size: config.buffer_size,
        })
    }
}

#[async_trait]
impl DatagramSource for MulticastSocket {
    async fn recv_datagram(&mut self, timeout: Duration) -> anyhow::Result<Option<(Bytes, SocketAddr)>> {
        recv_limited(&self.socket, &mut self.buf, self.buffer_size, timeout).await
    }
}

/// Receives at most `max_len` bytes of a single datagram; the OS discards the rest of a longer
///  datagram.
async fn recv_limited(socket: &UdpSocket, buf: &mut BytesMut, max_len: usize, timeout: Duration) -> anyhow::Result<Option<(Bytes, SocketAddr)>> {
    buf.clear();
    buf.reserve(max_len);

    let mut limited = (&mut *buf).limit(max_len);
    let received = tokio::time::timeout(timeout, socket.recv_buf_from(&mut limited)).await;
    match received {
        Err(_) => Ok(None),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok((_, from))) => Ok(Some((buf.split().freeze(), from))),
    }
}

impl Drop for MulticastSocket {
    fn drop(&mut self) {
        match self.socket.leave_multicast_v4(self.group, self.interface) {
            Ok(_) => debug!("left multicast group {}", self.group),
            Err(e) => warn!("failed to leave multicast group {} on interface {}: {}", self.group, self.interface, e),
        }
    }
}
