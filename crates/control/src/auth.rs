// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pairing-token and challenge/signature authentication.
//!
//! A pairing token is issued once (by an operator) and bound to the
//! first public key that presents it. Authenticated connections then
//! prove key possession by signing a fresh 32-byte challenge; each
//! challenge lives for a short TTL and is consumed exactly once.

use crate::error::ControlError;
use crate::session::Permissions;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const CHALLENGE_TTL_MS: u64 = 60_000;

/// One pairing record in the credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub token_id: String,
    /// Bound on first use; a pairing without a key is still claimable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    pub permissions: Permissions,
    pub created_at_ms: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    pairings: Vec<Pairing>,
}

struct Challenge {
    bytes: [u8; 32],
    issued_at_ms: u64,
}

/// Issues challenges and verifies signatures against paired keys.
pub struct AuthService {
    path: PathBuf,
    pairings: Mutex<Vec<Pairing>>,
    challenges: Mutex<HashMap<u64, Challenge>>,
    challenge_ttl_ms: u64,
}

impl AuthService {
    /// Load (or initialize) the credentials file.
    pub fn open(path: PathBuf) -> Result<Self, ControlError> {
        let pairings = match std::fs::read(&path) {
            Ok(bytes) => {
                let file: CredentialsFile = serde_json::from_slice(&bytes)
                    .map_err(|e| ControlError::Auth(format!("credentials file corrupt: {e}")))?;
                file.pairings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            pairings: Mutex::new(pairings),
            challenges: Mutex::new(HashMap::new()),
            challenge_ttl_ms: CHALLENGE_TTL_MS,
        })
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.challenge_ttl_ms = ttl_ms;
        self
    }

    /// Mint a pairing token carrying the given permissions.
    pub fn issue_pairing_token(
        &self,
        permissions: Permissions,
        now_ms: u64,
    ) -> Result<String, ControlError> {
        let mut token = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut token);
        let token_id = BASE64.encode(token);
        {
            let mut pairings = self.pairings.lock();
            pairings.push(Pairing {
                token_id: token_id.clone(),
                public_key: None,
                permissions,
                created_at_ms: now_ms,
            });
            self.persist(&pairings)?;
        }
        Ok(token_id)
    }

    /// Bind a public key to an unclaimed pairing token.
    pub fn complete_pairing(
        &self,
        token_id: &str,
        public_key_b64: &str,
    ) -> Result<Permissions, ControlError> {
        decode_verifying_key(public_key_b64)?;
        let mut pairings = self.pairings.lock();
        let pairing = pairings
            .iter_mut()
            .find(|p| p.token_id == token_id)
            .ok_or_else(|| ControlError::Auth("unknown pairing token".to_string()))?;
        if pairing.public_key.is_some() {
            return Err(ControlError::Auth("pairing token already used".to_string()));
        }
        pairing.public_key = Some(public_key_b64.to_string());
        let permissions = pairing.permissions;
        self.persist(&pairings)?;
        Ok(permissions)
    }

    /// Issue a fresh challenge for a connection.
    pub fn issue_challenge(&self, conn_id: u64, now_ms: u64) -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        self.challenges.lock().insert(conn_id, Challenge { bytes, issued_at_ms: now_ms });
        BASE64.encode(bytes)
    }

    /// Verify a signature over the connection's outstanding challenge.
    ///
    /// The challenge is consumed regardless of the verdict.
    pub fn verify(
        &self,
        conn_id: u64,
        public_key_b64: &str,
        signature_b64: &str,
        now_ms: u64,
    ) -> Result<Permissions, ControlError> {
        let challenge = self
            .challenges
            .lock()
            .remove(&conn_id)
            .ok_or_else(|| ControlError::Auth("no outstanding challenge".to_string()))?;
        if now_ms.saturating_sub(challenge.issued_at_ms) > self.challenge_ttl_ms {
            return Err(ControlError::Auth("challenge expired".to_string()));
        }

        let permissions = {
            let pairings = self.pairings.lock();
            pairings
                .iter()
                .find(|p| p.public_key.as_deref() == Some(public_key_b64))
                .map(|p| p.permissions)
                .ok_or_else(|| ControlError::Auth("unknown public key".to_string()))?
        };

        let key = decode_verifying_key(public_key_b64)?;
        let signature_bytes = BASE64
            .decode(signature_b64)
            .map_err(|_| ControlError::Auth("signature is not base64".to_string()))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| ControlError::Auth("malformed signature".to_string()))?;
        key.verify(&challenge.bytes, &signature)
            .map_err(|_| ControlError::Auth("signature verification failed".to_string()))?;

        Ok(permissions)
    }

    /// Drop a connection's outstanding challenge (connection closed).
    pub fn forget_challenge(&self, conn_id: u64) {
        self.challenges.lock().remove(&conn_id);
    }

    fn persist(&self, pairings: &[Pairing]) -> Result<(), ControlError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = CredentialsFile { pairings: pairings.to_vec() };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| ControlError::Auth(format!("encode credentials: {e}")))?;
        std::fs::write(&self.path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn decode_verifying_key(public_key_b64: &str) -> Result<VerifyingKey, ControlError> {
    let bytes = BASE64
        .decode(public_key_b64)
        .map_err(|_| ControlError::Auth("public key is not base64".to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ControlError::Auth("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| ControlError::Auth("invalid ed25519 public key".to_string()))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
