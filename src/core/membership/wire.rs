// src/core/membership/wire.rs

//! Sealing of gossip datagrams.
//!
//! With an encryption key configured, every datagram is AES-GCM sealed with
//! a random 96-bit nonce prepended to the ciphertext; without one, frames
//! travel in the clear. Key lengths other than 16, 24 or 32 bytes are
//! rejected at configuration load.

use crate::core::errors::ClusterError;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, U12>;

const NONCE_LEN: usize = 12;

enum Cipher {
    Plaintext,
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// Seals and opens gossip datagrams with the cluster-wide symmetric key.
pub struct Sealer {
    cipher: Cipher,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.cipher {
            Cipher::Plaintext => "plaintext",
            Cipher::Aes128(_) => "aes-128-gcm",
            Cipher::Aes192(_) => "aes-192-gcm",
            Cipher::Aes256(_) => "aes-256-gcm",
        };
        f.debug_struct("Sealer").field("mode", &mode).finish()
    }
}

impl Sealer {
    /// A sealer that passes frames through unchanged.
    pub fn plaintext() -> Self {
        Self {
            cipher: Cipher::Plaintext,
        }
    }

    /// Builds a sealer from the base64-encoded cluster gossip key.
    pub fn from_base64(key_b64: &str) -> Result<Self, ClusterError> {
        let key = BASE64
            .decode(key_b64.trim())
            .map_err(|e| ClusterError::Config(format!("gossip encrypt key is not valid base64: {e}")))?;
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(&key)
                    .map_err(|e| ClusterError::Config(format!("bad AES-128 key: {e}")))?,
            )),
            24 => Cipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(&key)
                    .map_err(|e| ClusterError::Config(format!("bad AES-192 key: {e}")))?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(&key)
                    .map_err(|e| ClusterError::Config(format!("bad AES-256 key: {e}")))?,
            )),
            n => {
                return Err(ClusterError::Config(format!(
                    "gossip encrypt key must be 16, 24 or 32 bytes, got {n}"
                )));
            }
        };
        Ok(Self { cipher })
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self.cipher, Cipher::Plaintext)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ClusterError> {
        if let Cipher::Plaintext = self.cipher {
            return Ok(plaintext.to_vec());
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce_bytes)
            .map_err(|e| ClusterError::Internal(format!("failed to generate nonce: {e}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes192(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext),
            Cipher::Plaintext => unreachable!(),
        }
        .map_err(|_| ClusterError::Transport("failed to seal gossip datagram".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, ClusterError> {
        if let Cipher::Plaintext = self.cipher {
            return Ok(data.to_vec());
        }

        if data.len() <= NONCE_LEN {
            return Err(ClusterError::Transport("sealed datagram too short".into()));
        }
        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        let ciphertext = &data[NONCE_LEN..];

        match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes192(c) => c.decrypt(nonce, ciphertext),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext),
            Cipher::Plaintext => unreachable!(),
        }
        .map_err(|_| ClusterError::Transport("failed to open sealed gossip datagram".into()))
    }
}
