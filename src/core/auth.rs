// src/core/auth.rs

//! Join-token issuance and verification against the shared cluster secret.
//!
//! A join token proves possession of the cluster secret for a given node ID.
//! Any holder of the secret can mint tokens, so they gate participation
//! rather than authenticate individual peers; replay within the validity
//! window by another secret-holder is explicitly not defended against.

use crate::core::errors::ClusterError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Minimum acceptable length of the decoded cluster secret.
const MIN_SECRET_LEN: usize = 32;
/// Tokens older than this are rejected.
const MAX_TOKEN_AGE_MINS: i64 = 5;
/// Tokens from further in the future than this are rejected.
const MAX_TOKEN_SKEW_MINS: i64 = 1;

/// The signed portion of a join token. Field order is the canonical
/// serialization order and must not change.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Challenge {
    nonce: String,
    timestamp: DateTime<Utc>,
    node_id: String,
}

/// The full token: a challenge plus its HMAC under the cluster secret.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct JoinToken {
    challenge: Challenge,
    signature: String,
}

/// Issues and verifies join tokens under the shared cluster secret.
#[derive(Clone)]
pub struct ClusterAuth {
    cluster_key: Vec<u8>,
}

impl std::fmt::Debug for ClusterAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterAuth").finish_non_exhaustive()
    }
}

impl ClusterAuth {
    /// Decodes the base64 cluster secret. Secrets shorter than 32 bytes are
    /// rejected at load.
    pub fn new(shared_key_b64: &str) -> Result<Self, ClusterError> {
        let cluster_key = BASE64
            .decode(shared_key_b64.trim())
            .map_err(|e| ClusterError::Config(format!("cluster auth key is not valid base64: {e}")))?;
        if cluster_key.len() < MIN_SECRET_LEN {
            return Err(ClusterError::Config(format!(
                "cluster auth key must be at least {MIN_SECRET_LEN} bytes, got {}",
                cluster_key.len()
            )));
        }
        Ok(Self { cluster_key })
    }

    /// Mints a token binding `node_id` to a fresh nonce and the current time.
    pub fn create_join_token(&self, node_id: &str) -> Result<String, ClusterError> {
        let mut nonce = [0u8; 32];
        getrandom::fill(&mut nonce)
            .map_err(|e| ClusterError::Internal(format!("failed to generate nonce: {e}")))?;

        let challenge = Challenge {
            nonce: BASE64.encode(nonce),
            timestamp: Utc::now(),
            node_id: node_id.to_string(),
        };
        let signature = self.sign_challenge(&challenge)?;

        let token = JoinToken {
            challenge,
            signature: BASE64.encode(signature),
        };
        Ok(BASE64.encode(serde_json::to_vec(&token)?))
    }

    /// Verifies a token and returns the node ID embedded in its challenge.
    pub fn verify_join_token(&self, token: &str) -> Result<String, ClusterError> {
        let raw = BASE64
            .decode(token.trim())
            .map_err(|e| ClusterError::AuthMalformed(format!("not base64: {e}")))?;
        let token: JoinToken = serde_json::from_slice(&raw)
            .map_err(|e| ClusterError::AuthMalformed(format!("not a join token: {e}")))?;

        let claimed = BASE64
            .decode(&token.signature)
            .map_err(|e| ClusterError::AuthMalformed(format!("bad signature encoding: {e}")))?;
        let expected = self.sign_challenge(&token.challenge)?;
        if expected.ct_eq(claimed.as_slice()).unwrap_u8() != 1 {
            return Err(ClusterError::AuthBadSignature);
        }

        // The window is checked only after the signature so the error tells
        // apart a stale cluster member from an outsider.
        let now = Utc::now();
        let age = now.signed_duration_since(token.challenge.timestamp);
        if age > Duration::minutes(MAX_TOKEN_AGE_MINS) {
            return Err(ClusterError::AuthExpired);
        }
        if age < -Duration::minutes(MAX_TOKEN_SKEW_MINS) {
            return Err(ClusterError::AuthSkew);
        }

        Ok(token.challenge.node_id)
    }

    fn sign_challenge(&self, challenge: &Challenge) -> Result<Vec<u8>, ClusterError> {
        let canonical = serde_json::to_vec(challenge)?;
        let mut mac = HmacSha256::new_from_slice(&self.cluster_key)
            .map_err(|e| ClusterError::Internal(format!("failed to create HMAC: {e}")))?;
        mac.update(&canonical);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
