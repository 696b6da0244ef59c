// src/core/identity.rs

//! The long-lived cryptographic identity of a node.
//!
//! Every agent owns one Ed25519 keypair, generated on first start and
//! persisted with owner-only permissions. The Base58 encoding of the public
//! key is the node ID used everywhere else in the cluster. The overlay key
//! is deterministically derived from the signing seed, so re-provisioning a
//! node keeps its overlay address stable as long as the identity survives.

use crate::core::errors::ClusterError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Domain separator mixed into the overlay key derivation.
const OVERLAY_KEY_CONTEXT: &[u8] = b"overlay-key-derivation";

/// The on-disk representation of an identity file.
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    /// The 64-byte Ed25519 keypair (seed followed by public key), base64.
    private_key: String,
    /// The 32-byte Ed25519 public key, base64.
    public_key: String,
    /// Base58 encoding of the public key.
    node_id: String,
}

/// A node's signing identity and derived node ID.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    node_id: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material is deliberately not printed.
        f.debug_struct("Identity")
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl Identity {
    /// Creates a fresh identity with a newly generated Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let node_id = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();
        Self {
            signing_key,
            node_id,
        }
    }

    /// The stable node ID: Base58 of the Ed25519 public key.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signs an arbitrary message with the node's signing key.
    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }

    /// Verifies a signature made by `pubkey` over `msg`.
    pub fn verify(pubkey: &VerifyingKey, msg: &[u8], sig: &Signature) -> bool {
        pubkey.verify(msg, sig).is_ok()
    }

    /// Derives the 32-byte overlay private key:
    /// BLAKE2b-256 of the derivation context followed by the signing seed.
    pub fn derive_overlay_key(&self) -> [u8; 32] {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(OVERLAY_KEY_CONTEXT);
        hasher.update(self.signing_key.to_bytes());
        hasher.finalize().into()
    }

    /// The overlay public key: X25519 scalar-base-mult of the clamped
    /// derived key, base64-encoded.
    pub fn overlay_public_key(&self) -> String {
        let secret = x25519_dalek::StaticSecret::from(self.derive_overlay_key());
        let public = x25519_dalek::PublicKey::from(&secret);
        BASE64.encode(public.as_bytes())
    }

    /// Persists the identity atomically with owner-only permissions
    /// (0600 file inside a 0700 directory).
    pub fn save(&self, path: &Path) -> Result<(), ClusterError> {
        self.check_consistency()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        let file = IdentityFile {
            private_key: BASE64.encode(self.signing_key.to_keypair_bytes()),
            public_key: BASE64.encode(self.signing_key.verifying_key().as_bytes()),
            node_id: self.node_id.clone(),
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        // Write-temp-then-rename so a crash mid-write never clobbers the
        // canonical file.
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &contents)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp_path, path)?;

        debug!("Identity for node {} saved to {}", self.node_id, path.display());
        Ok(())
    }

    /// Re-reads a persisted identity and verifies its internal consistency.
    pub fn load(path: &Path) -> Result<Self, ClusterError> {
        let contents = std::fs::read(path)?;
        let file: IdentityFile = serde_json::from_slice(&contents)
            .map_err(|e| ClusterError::CorruptIdentity(format!("unparsable identity file: {e}")))?;

        let keypair_bytes: [u8; 64] = BASE64
            .decode(&file.private_key)
            .map_err(|e| ClusterError::CorruptIdentity(format!("bad private key encoding: {e}")))?
            .try_into()
            .map_err(|_| ClusterError::CorruptIdentity("private key is not 64 bytes".into()))?;
        let signing_key = SigningKey::from_keypair_bytes(&keypair_bytes)
            .map_err(|e| ClusterError::CorruptIdentity(format!("invalid keypair: {e}")))?;

        let public_bytes = BASE64
            .decode(&file.public_key)
            .map_err(|e| ClusterError::CorruptIdentity(format!("bad public key encoding: {e}")))?;
        if public_bytes != signing_key.verifying_key().as_bytes() {
            return Err(ClusterError::CorruptIdentity(
                "public key does not match private key".into(),
            ));
        }

        let expected_id = bs58::encode(signing_key.verifying_key().as_bytes()).into_string();
        if file.node_id != expected_id {
            return Err(ClusterError::CorruptIdentity(
                "node_id does not match public key".into(),
            ));
        }

        Ok(Self {
            signing_key,
            node_id: file.node_id,
        })
    }

    /// Loads an identity from `path`, generating and persisting a fresh one
    /// if none exists. Returns the identity and whether it was newly created.
    pub fn load_or_generate(path: &Path) -> Result<(Self, bool), ClusterError> {
        match Self::load(path) {
            Ok(identity) => {
                debug!("Loaded existing identity: node {}", identity.node_id);
                Ok((identity, false))
            }
            Err(ClusterError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                let identity = Self::generate();
                identity.save(path)?;
                info!(
                    "Generated new node identity {} at {}",
                    identity.node_id,
                    path.display()
                );
                Ok((identity, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Removes a persisted identity. Removing an absent file is not an error.
    pub fn delete(path: &Path) -> Result<(), ClusterError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn check_consistency(&self) -> Result<(), ClusterError> {
        let expected_id = bs58::encode(self.signing_key.verifying_key().as_bytes()).into_string();
        if self.node_id != expected_id {
            return Err(ClusterError::InvalidKey(
                "node_id does not match public key".into(),
            ));
        }
        Ok(())
    }
}
