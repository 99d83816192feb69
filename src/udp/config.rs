use anyhow::bail;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub struct MulticastReceiveConfig {
    /// The local address and port the receive socket binds to. This is typically the wildcard
    ///  address with the multicast group's port.
    pub bind_addr: SocketAddr,
    pub multicast_group: Ipv4Addr,
    /// The local interface address used for the multicast join request
    pub multicast_interface: Ipv4Addr,

    /// Upper bound for a single receive wait. The receive loop checks the stop signal and the
    ///  measurement window end after every wait, so this bounds shutdown latency.
    pub socket_timeout: Duration,
    /// Maximum number of bytes read from a single datagram. Longer datagrams are truncated.
    pub buffer_size: usize,
}

impl MulticastReceiveConfig {
    pub fn new(bind_addr: SocketAddr, multicast_group: Ipv4Addr, multicast_interface: Ipv4Addr) -> MulticastReceiveConfig {
        MulticastReceiveConfig {
            bind_addr,
            multicast_group,
            multicast_interface,
            socket_timeout: Duration::from_secs(1),
            buffer_size: 4096,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.bind_addr.is_ipv4() {
            bail!("multicast receive is only supported for IPV4, bind address was {:?}", self.bind_addr);
        }
        if !self.multicast_group.is_multicast() {
            bail!("{} is not a multicast address", self.multicast_group);
        }
        if self.socket_timeout.is_zero() {
            bail!("socket timeout must be positive");
        }
        if self.buffer_size == 0 {
            bail!("receive buffer size must be positive");
        }
        Ok(())
    }
}

pub struct SendConfig {
    pub target_addr: SocketAddr,

    /// Polling interval while waiting for an acknowledgement flag, which bounds the send loop's
    ///  shutdown latency
    pub ack_wait_interval: Duration,

    /// Acknowledgement flags beyond this number that are not picked up by the send loop are
    ///  dropped
    pub ack_channel_capacity: usize,
}

impl SendConfig {
    pub fn new(target_addr: SocketAddr) -> SendConfig {
        SendConfig {
            target_addr,
            ack_wait_interval: Duration::from_millis(200),
            ack_channel_capacity: 16,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ack_wait_interval.is_zero() {
            bail!("ack wait interval must be positive");
        }
        if self.ack_channel_capacity == 0 {
            bail!("ack channel capacity must be positive");
        }
        Ok(())
    }
}
