//! CSRF state for the authorize/callback round trip.
//!
//! The state is an encrypted JSON blob rather than a server-side entry, so
//! the callback needs no storage and survives restarts. Authenticated
//! encryption means a forged or altered state fails to decrypt.

use crate::crypto::SecretCipher;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
    pub environment_id: String,
    pub user_id: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
}

impl OAuthState {
    pub fn new(environment_id: &str, user_id: &str) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = bytes.iter().map(|b| format!("{:02x}", b)).collect();

        Self {
            environment_id: environment_id.to_string(),
            user_id: user_id.to_string(),
            nonce,
            issued_at: Utc::now(),
        }
    }

    pub fn encode(&self, cipher: &SecretCipher) -> Result<String> {
        let json = serde_json::to_string(self).context("Failed to serialize OAuth state")?;
        Ok(cipher.encrypt(&json)?)
    }

    /// Decrypts a state and rejects it once older than `ttl_seconds`
    pub fn decode(
        token: &str,
        cipher: &SecretCipher,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let json = cipher.decrypt(token).context("Invalid OAuth state")?;
        let state: OAuthState =
            serde_json::from_str(&json).context("Malformed OAuth state")?;

        if now - state.issued_at > Duration::seconds(ttl_seconds) {
            bail!("OAuth state expired");
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_secret("state-test-secret-0123456789").unwrap()
    }

    #[test]
    fn test_state_round_trip() {
        let cipher = cipher();
        let state = OAuthState::new("env-1", "user-1");
        let token = state.encode(&cipher).unwrap();

        assert!(!token.contains("env-1"));
        let decoded = OAuthState::decode(&token, &cipher, 600, Utc::now()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.nonce.len(), 32);
    }

    #[test]
    fn test_nonce_differs_per_state() {
        let a = OAuthState::new("env-1", "user-1");
        let b = OAuthState::new("env-1", "user-1");
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_expired_state_rejected() {
        let cipher = cipher();
        let token = OAuthState::new("env-1", "user-1").encode(&cipher).unwrap();

        let later = Utc::now() + Duration::seconds(601);
        let err = OAuthState::decode(&token, &cipher, 600, later).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_foreign_state_rejected() {
        let token = OAuthState::new("env-1", "user-1").encode(&cipher()).unwrap();
        let other = SecretCipher::from_secret("another-secret-0123456789").unwrap();

        assert!(OAuthState::decode(&token, &other, 600, Utc::now()).is_err());
        assert!(OAuthState::decode("not-a-state", &cipher(), 600, Utc::now()).is_err());
    }
}
