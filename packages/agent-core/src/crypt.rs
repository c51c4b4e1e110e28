//! Symmetric authenticated(-ish) encryption envelope for all peer and
//! relay traffic (C3).
//!
//! Wire shape is fixed by the external interface: a JSON object with
//! base64 `iv`/`data`, plus the sender's `clustername`/`nodename` in the
//! clear so a receiver can reject cross-cluster traffic before spending a
//! decrypt. `cluster_name = "join"` is the one literal allowed to bypass
//! the cluster-name check, used for join requests from a node that does
//! not yet know the cluster's name.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

pub const JOIN_CLUSTER_NAME: &str = "join";
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A 256-bit key derived from the cluster secret.
#[derive(Clone)]
pub struct ClusterKey([u8; 32]);

impl ClusterKey {
    /// Derive the AES key from a cluster secret by SHA-256 (truncated to 32
    /// bytes, which for SHA-256 is simply its whole digest).
    #[must_use]
    pub fn derive(cluster_secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(cluster_secret);
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self(key)
    }
}

/// The on-wire envelope. Field order and names are normative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub iv: String,
    pub data: String,
    pub clustername: String,
    pub nodename: String,
}

/// Encrypt `payload` (already-serialized JSON bytes) into an envelope
/// addressed as `nodename` in cluster `cluster_name`.
pub fn encrypt(
    key: &ClusterKey,
    cluster_name: &str,
    nodename: &str,
    payload: &[u8],
) -> Result<Envelope, AuthError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(AuthError::PayloadTooLarge { size: payload.len(), max: MAX_PAYLOAD_BYTES });
    }
    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(&key.0.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(payload);
    Ok(Envelope {
        iv: BASE64.encode(iv),
        data: BASE64.encode(ciphertext),
        clustername: cluster_name.to_string(),
        nodename: nodename.to_string(),
    })
}

/// Decrypt an envelope, enforcing the cluster-name check and the size cap.
/// `expected_cluster_name` is the receiver's own cluster name; the
/// `"join"` literal is accepted regardless, as join requests precede
/// cluster-name agreement.
pub fn decrypt(
    key: &ClusterKey,
    expected_cluster_name: &str,
    envelope: &Envelope,
) -> Result<Vec<u8>, AuthError> {
    if envelope.clustername != expected_cluster_name && envelope.clustername != JOIN_CLUSTER_NAME {
        return Err(AuthError::ClusterNameMismatch);
    }
    let iv = BASE64
        .decode(&envelope.iv)
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    let ciphertext = BASE64
        .decode(&envelope.data)
        .map_err(|e| AuthError::Malformed(e.to_string()))?;
    if ciphertext.len() > MAX_PAYLOAD_BYTES + 16 {
        return Err(AuthError::PayloadTooLarge { size: ciphertext.len(), max: MAX_PAYLOAD_BYTES });
    }
    let iv: [u8; 16] = iv.as_slice().try_into().map_err(|_| AuthError::BadCiphertext)?;
    let mut buf = ciphertext;
    let plaintext = Aes256CbcDec::new(&key.0.into(), &iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| AuthError::BadCiphertext)?;
    if plaintext.len() > MAX_PAYLOAD_BYTES {
        return Err(AuthError::PayloadTooLarge { size: plaintext.len(), max: MAX_PAYLOAD_BYTES });
    }
    Ok(plaintext.to_vec())
}
