//! Peer identity.
//!
//! An identity is an Ed25519 key pair generated once at process start. Its
//! public half is the iroh [`NodeId`] other peers dial, and it is what the
//! QUIC handshake authenticates.

use iroh::{NodeId, SecretKey};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{ChatError, ChatResult};

/// Number of hash bytes shown in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// The local peer's key pair.
#[derive(Clone)]
pub struct Identity {
    secret_key: SecretKey,
}

impl Identity {
    /// Generates a fresh identity from the given entropy source.
    ///
    /// Fails with [`ChatError::KeyGeneration`] if the source cannot supply
    /// enough bytes.
    pub fn generate<R>(rng: &mut R) -> ChatResult<Self>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let mut seed = [0u8; 32];
        rng.try_fill_bytes(&mut seed)
            .map_err(|e| ChatError::KeyGeneration(e.to_string()))?;

        let secret_key = SecretKey::from_bytes(&seed);
        Ok(Self { secret_key })
    }

    /// Wraps an existing secret key.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        Self { secret_key }
    }

    /// Returns the public node id of this identity.
    pub fn node_id(&self) -> NodeId {
        self.secret_key.public()
    }

    /// Returns the secret key, for handing to the endpoint.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    /// Human-readable fingerprint of the public key.
    ///
    /// Formatted as groups of 4 hex characters separated by colons, for
    /// example: `a1b2:c3d4:e5f6:7890:1234:5678:9abc:def0`
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.node_id())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("node_id", &self.node_id())
            .finish_non_exhaustive()
    }
}

/// Fingerprint of any node id, see [`Identity::fingerprint`].
pub fn fingerprint(node_id: &NodeId) -> String {
    let hash = Sha256::digest(node_id.as_bytes());
    hex::encode(&hash[..FINGERPRINT_BYTES])
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}
