use std::fmt;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub verified: bool,
    /// Expiry in unix milliseconds.
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    BadSignature,
    Expired,
    Unverified,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            TokenError::Malformed => "malformed token",
            TokenError::BadSignature => "token signature mismatch",
            TokenError::Expired => "token expired",
            TokenError::Unverified => "token not verified",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for TokenError {}

/// Issues and checks `payload.signature` tokens, both parts base64url, the
/// signature being HMAC-SHA256 over the encoded payload.
#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// Random per-process key; tokens stop verifying after a restart.
    pub fn ephemeral() -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    pub fn issue(&self, email: &str, now: DateTime<Utc>) -> Result<String> {
        let exp = now + Duration::hours(TOKEN_TTL_HOURS);
        self.sign(&AccessClaims {
            email: email.to_string(),
            verified: true,
            exp: exp.timestamp_millis(),
        })
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String> {
        let payload = serde_json::to_vec(claims).context("serialize token claims")?;
        let payload = B64.encode(payload);
        let sig = self.mac(payload.as_bytes())?;
        Ok(format!("{payload}.{}", B64.encode(sig)))
    }

    /// An expired token is rejected no matter what else it claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let (payload, sig) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let sig = B64.decode(sig).map_err(|_| TokenError::Malformed)?;

        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| TokenError::BadSignature)?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::BadSignature)?;

        let raw = B64.decode(payload).map_err(|_| TokenError::Malformed)?;
        let claims: AccessClaims =
            serde_json::from_slice(&raw).map_err(|_| TokenError::Malformed)?;

        if claims.exp < now.timestamp_millis() {
            return Err(TokenError::Expired);
        }
        if !claims.verified {
            return Err(TokenError::Unverified);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| anyhow!("hmac key: {e}"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
