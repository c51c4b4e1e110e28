//! Shared-disk heartbeat driver (§4.4, §6): each node owns a fixed-size
//! slot (1MiB plus 1MiB per peer, per the spec's sizing rule) inside a
//! shared file or block device, writes its own slot, and reads every
//! other node's slot on each poll. Each slot is `[u32 len][u32
//! crc32][payload]`; a CRC mismatch means a write was observed mid-flight
//! and the slot is treated as empty rather than corrupt.

use std::collections::HashMap;
use std::io::SeekFrom;

use agent_core::DriverError;
use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{HbDriver, InboundFrame};

const SLOT_SIZE_BASE: u64 = 1024 * 1024;
const HEADER_LEN: u64 = 8;

/// Computes the per-slot size for a cluster of `peer_count` other nodes
/// (§6: `1MiB + 1MiB per peer`).
#[must_use]
pub fn slot_size(peer_count: usize) -> u64 {
    SLOT_SIZE_BASE + SLOT_SIZE_BASE * peer_count as u64
}

pub struct DiskDriver {
    file: Mutex<File>,
    own_slot: u64,
    peer_slots: HashMap<String, u64>,
    slot_size: u64,
}

impl DiskDriver {
    /// Opens `path` for read+write, assigning `own_index`'s slot to this
    /// node and the remaining slots (by index order in `peers`) to peers.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be opened or sized.
    pub async fn open(path: &std::path::Path, own_index: u64, peers: &[(String, u64)]) -> std::io::Result<Self> {
        let slot_size = slot_size(peers.len());
        let file = tokio::fs::OpenOptions::new().read(true).write(true).create(true).open(path).await?;
        let total_size = slot_size * (peers.len() as u64 + 1);
        file.set_len(total_size.max(slot_size)).await?;
        let peer_slots = peers.iter().map(|(name, idx)| (name.clone(), *idx)).collect();
        Ok(Self { file: Mutex::new(file), own_slot: own_index, peer_slots, slot_size })
    }

    async fn write_slot(&self, slot_index: u64, payload: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        let crc = crc32fast::hash(payload);
        let mut buf = Vec::with_capacity(HEADER_LEN as usize + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(payload);
        file.seek(SeekFrom::Start(slot_index * self.slot_size)).await?;
        file.write_all(&buf).await?;
        file.flush().await
    }

    async fn read_slot(&self, slot_index: u64) -> std::io::Result<Option<Vec<u8>>> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(slot_index * self.slot_size)).await?;
        let mut header = [0_u8; HEADER_LEN as usize];
        file.read_exact(&mut header).await?;
        let len = u32::from_be_bytes(header[0..4].try_into().unwrap()) as usize;
        let expected_crc = u32::from_be_bytes(header[4..8].try_into().unwrap());
        if len == 0 || (len as u64) > self.slot_size - HEADER_LEN {
            return Ok(None);
        }
        let mut payload = vec![0_u8; len];
        file.read_exact(&mut payload).await?;
        if crc32fast::hash(&payload) != expected_crc {
            return Ok(None);
        }
        Ok(Some(payload))
    }
}

#[async_trait]
impl HbDriver for DiskDriver {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn send(&self, _peer: &str, payload: &[u8]) -> Result<(), DriverError> {
        self.write_slot(self.own_slot, payload).await.map_err(|e| DriverError { driver: "disk".into(), rid: "own-slot".into(), reason: e.to_string() })
    }

    /// Polls peer slots round-robin for the first one with a valid,
    /// changed payload. Callers drive this in a loop; there is no
    /// blocking "wait for write" primitive on a shared file.
    async fn recv(&self) -> Result<InboundFrame, DriverError> {
        loop {
            for (peer, slot_index) in &self.peer_slots {
                if let Some(payload) = self.read_slot(*slot_index).await.map_err(|e| DriverError { driver: "disk".into(), rid: peer.clone(), reason: e.to_string() })? {
                    return Ok(InboundFrame { peer: peer.clone(), payload });
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn write_then_read_own_slot_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hb.slots");
        let peers = vec![("n2".to_string(), 1)];
        let driver = DiskDriver::open(&path, 0, &peers).await.unwrap();
        driver.write_slot(0, b"payload").await.unwrap();
        let back = driver.read_slot(0).await.unwrap().unwrap();
        assert_eq!(back, b"payload");
    }

    #[tokio::test]
    async fn empty_slot_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hb.slots");
        let driver = DiskDriver::open(&path, 0, &[("n2".to_string(), 1)]).await.unwrap();
        assert!(driver.read_slot(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slot_size_grows_with_peer_count() {
        assert_eq!(slot_size(0), 1024 * 1024);
        assert_eq!(slot_size(2), 3 * 1024 * 1024);
    }
}
