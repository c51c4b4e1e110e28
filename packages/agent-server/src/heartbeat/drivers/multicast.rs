//! Multicast UDP heartbeat driver (§4.4, §6 default group
//! `224.3.29.71:10000`). One datagram per heartbeat; payloads above the
//! 64KiB datagram ceiling (60KiB with headroom) are rejected rather than
//! fragmented, matching the spec's multicast size policy.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use agent_core::DriverError;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::{HbDriver, InboundFrame};

/// Multicast datagrams larger than this are rejected before sending (§6:
/// 64KiB hard ceiling).
pub const MAX_DATAGRAM_BYTES: usize = 64 * 1024;
/// Conservative fallback threshold below the hard ceiling, leaving
/// headroom for IP/UDP framing overhead.
pub const SAFE_DATAGRAM_BYTES: usize = 60 * 1024;

pub struct MulticastDriver {
    socket: UdpSocket,
    group: SocketAddr,
}

impl MulticastDriver {
    /// Joins `group` (e.g. `224.3.29.71:10000`) on the given local
    /// interface and binds for both send and receive.
    ///
    /// # Errors
    /// Returns an I/O error if the socket cannot be created, bound, or
    /// joined to the multicast group.
    pub fn join(group: SocketAddrV4, local_iface: Ipv4Addr) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr: SocketAddr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port()).into();
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(group.ip(), &local_iface)?;
        let socket = UdpSocket::from_std(socket.into())?;
        Ok(Self { socket, group: group.into() })
    }

    #[must_use]
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl HbDriver for MulticastDriver {
    fn name(&self) -> &'static str {
        "multicast"
    }

    async fn send(&self, _peer: &str, payload: &[u8]) -> Result<(), DriverError> {
        if payload.len() > MAX_DATAGRAM_BYTES {
            return Err(DriverError { driver: "multicast".into(), rid: "group".into(), reason: format!("datagram of {} bytes exceeds {MAX_DATAGRAM_BYTES}-byte ceiling", payload.len()) });
        }
        self.socket
            .send_to(payload, self.group)
            .await
            .map(|_| ())
            .map_err(|e| DriverError { driver: "multicast".into(), rid: "group".into(), reason: e.to_string() })
    }

    async fn recv(&self) -> Result<InboundFrame, DriverError> {
        let mut buf = vec![0_u8; MAX_DATAGRAM_BYTES];
        let (n, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| DriverError { driver: "multicast".into(), rid: "group".into(), reason: e.to_string() })?;
        buf.truncate(n);
        Ok(InboundFrame { peer: from.to_string(), payload: buf })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_datagram_is_rejected_before_send() {
        let group = SocketAddrV4::new(Ipv4Addr::new(239, 1, 1, 1), 0);
        let Ok(driver) = MulticastDriver::join(group, Ipv4Addr::UNSPECIFIED) else {
            return;
        };
        let payload = vec![0_u8; MAX_DATAGRAM_BYTES + 1];
        let err = driver.send("anyone", &payload).await.unwrap_err();
        assert_eq!(err.driver, "multicast");
    }
}
