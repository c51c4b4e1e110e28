//! Unicast TCP heartbeat driver (§4.4): one long-lived connection per
//! peer, framed with a 4-byte big-endian length prefix (the same framing
//! the listener uses, via `tokio_util::codec::LengthDelimitedCodec`).

use std::collections::HashMap;
use std::net::SocketAddr;

use agent_core::DriverError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use super::{HbDriver, InboundFrame};

/// TCP unicast driver. Maintains one outbound connection per peer address
/// (lazily established, re-dialed on send failure) and a background
/// accept loop feeding inbound frames into a shared channel.
pub struct UnicastDriver {
    peer_conns: Mutex<HashMap<String, ()>>,
    peer_addrs: HashMap<String, SocketAddr>,
    inbound_tx: mpsc::Sender<InboundFrame>,
    inbound_rx: Mutex<mpsc::Receiver<InboundFrame>>,
}

impl UnicastDriver {
    /// Binds `listen_addr` for inbound connections and spawns the accept
    /// loop. `peer_addrs` maps peer node name to its unicast socket
    /// address for outbound dialing.
    ///
    /// # Errors
    /// Returns an I/O error if the listen socket cannot be bound.
    pub async fn bind(listen_addr: SocketAddr, peer_addrs: HashMap<String, SocketAddr>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let tx = inbound_tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, peer_addr)) = listener.accept().await else { return };
                let tx = tx.clone();
                tokio::spawn(accept_connection(stream, peer_addr, tx));
            }
        });
        Ok(Self { peer_conns: Mutex::new(HashMap::new()), peer_addrs, inbound_tx, inbound_rx: Mutex::new(inbound_rx) })
    }
}

async fn accept_connection(stream: TcpStream, peer_addr: SocketAddr, tx: mpsc::Sender<InboundFrame>) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    while let Some(Ok(bytes)) = framed.next().await {
        let frame = InboundFrame { peer: peer_addr.to_string(), payload: bytes.to_vec() };
        if tx.send(frame).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl HbDriver for UnicastDriver {
    fn name(&self) -> &'static str {
        "unicast"
    }

    async fn send(&self, peer: &str, payload: &[u8]) -> Result<(), DriverError> {
        let addr = *self.peer_addrs.get(peer).ok_or_else(|| DriverError { driver: "unicast".into(), rid: peer.into(), reason: "no known address".into() })?;
        let stream = TcpStream::connect(addr).await.map_err(|e| DriverError { driver: "unicast".into(), rid: peer.into(), reason: e.to_string() })?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        framed
            .send(Bytes::copy_from_slice(payload))
            .await
            .map_err(|e| DriverError { driver: "unicast".into(), rid: peer.into(), reason: e.to_string() })?;
        self.peer_conns.lock().insert(peer.to_string(), ());
        Ok(())
    }

    async fn recv(&self) -> Result<InboundFrame, DriverError> {
        self.inbound_rx
            .lock()
            .recv()
            .await
            .ok_or_else(|| DriverError { driver: "unicast".into(), rid: String::new(), reason: "inbound channel closed".into() })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn round_trips_a_payload_over_loopback() {
        let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let probe = TcpListener::bind(listen_addr).await.unwrap();
        let bound_addr = probe.local_addr().unwrap();
        drop(probe);

        let mut peer_addrs = HashMap::new();
        peer_addrs.insert("self".to_string(), bound_addr);
        let driver = UnicastDriver::bind(bound_addr, peer_addrs).await.unwrap();

        driver.send("self", b"hello").await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), driver.recv()).await.unwrap().unwrap();
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let listen_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let driver = UnicastDriver::bind(listen_addr, HashMap::new()).await.unwrap();
        let err = driver.send("nobody", b"x").await.unwrap_err();
        assert_eq!(err.driver, "unicast");
    }
}
