//! Heartbeat transport drivers (C4, §4.4): unicast TCP, multicast UDP,
//! shared-disk slots, and an HTTP relay for split clusters, all behind one
//! `HbDriver` trait so the supervisor (C5) doesn't care which is active.

pub mod disk;
pub mod multicast;
pub mod relay;
pub mod unicast;

use agent_core::DriverError;
use async_trait::async_trait;

/// One inbound heartbeat frame as raw envelope bytes plus the peer that
/// (claims to have) sent it.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub peer: String,
    pub payload: Vec<u8>,
}

/// A transport capable of carrying heartbeat envelopes between peers.
/// Implementations own their own connection/socket state; `send`/`recv`
/// are independent so a driver can both push and poll concurrently.
#[async_trait]
pub trait HbDriver: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    /// Returns `DriverError` if the transport cannot deliver the payload.
    async fn send(&self, peer: &str, payload: &[u8]) -> Result<(), DriverError>;

    /// Blocks until the next inbound frame is available.
    ///
    /// # Errors
    /// Returns `DriverError` if the transport fails irrecoverably.
    async fn recv(&self) -> Result<InboundFrame, DriverError>;
}
