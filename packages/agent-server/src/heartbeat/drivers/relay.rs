//! HTTP relay heartbeat driver (§4.4, §6): for nodes that can't reach each
//! other directly (split clusters, cross-DC DR), heartbeats are POSTed to
//! a shared relay URL and polled back with GET, keyed by node name.

use agent_core::DriverError;
use async_trait::async_trait;
use reqwest::Client;

use super::{HbDriver, InboundFrame};

pub struct RelayDriver {
    client: Client,
    base_url: String,
    nodename: String,
    peers: Vec<String>,
}

impl RelayDriver {
    #[must_use]
    pub fn new(base_url: impl Into<String>, nodename: impl Into<String>, peers: Vec<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), nodename: nodename.into(), peers }
    }

    fn put_url(&self, node: &str) -> String {
        format!("{}/{node}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl HbDriver for RelayDriver {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn send(&self, _peer: &str, payload: &[u8]) -> Result<(), DriverError> {
        let url = self.put_url(&self.nodename);
        let response = self
            .client
            .post(&url)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| DriverError { driver: "relay".into(), rid: self.nodename.clone(), reason: e.to_string() })?;
        if !response.status().is_success() {
            return Err(DriverError { driver: "relay".into(), rid: self.nodename.clone(), reason: format!("relay returned {}", response.status()) });
        }
        Ok(())
    }

    /// Round-robins GET requests across known peers until one returns a
    /// body; the relay protocol has no long-poll, so this is a simple
    /// polling loop with a short pause between full sweeps.
    async fn recv(&self) -> Result<InboundFrame, DriverError> {
        loop {
            for peer in &self.peers {
                let url = self.put_url(peer);
                let response = self.client.get(&url).send().await.map_err(|e| DriverError { driver: "relay".into(), rid: peer.clone(), reason: e.to_string() })?;
                if response.status().is_success() {
                    let bytes = response.bytes().await.map_err(|e| DriverError { driver: "relay".into(), rid: peer.clone(), reason: e.to_string() })?;
                    if !bytes.is_empty() {
                        return Ok(InboundFrame { peer: peer.clone(), payload: bytes.to_vec() });
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_url_strips_trailing_slash() {
        let driver = RelayDriver::new("https://relay.example/hb/", "n1", vec!["n2".into()]);
        assert_eq!(driver.put_url("n1"), "https://relay.example/hb/n1");
    }
}
