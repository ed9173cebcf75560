//! Signed public share tokens.
//!
//! Format: `v1.<payload>.<sig>` where `payload` is base64url (no padding) of
//! the JSON `{set_id, issued_at}` and `sig` is base64url HMAC-SHA256 over
//! the payload text. The signature is checked before the payload is even
//! decoded, so any edit to the embedded set id is `Invalid`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use hudson_core::{LiveError, SetId};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_VERSION_V1: &str = "v1";
const MAX_TOKEN_LEN: usize = 512;
/// Tolerated clock skew for tokens stamped in the future.
const MAX_FUTURE_SKEW_SECS: u64 = 300;

/// 90 days.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareError {
    #[error("share token expired")]
    Expired,
    #[error("share token invalid")]
    Invalid,
}

impl From<ShareError> for LiveError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::Expired => LiveError::Expired,
            ShareError::Invalid => LiveError::Invalid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct SharePayload {
    set_id: SetId,
    /// Seconds since the Unix epoch
    issued_at: u64,
}

/// Issues and verifies share tokens with one application secret.
#[derive(Clone)]
pub struct ShareSigner {
    secret: Vec<u8>,
    max_age: Duration,
}

impl std::fmt::Debug for ShareSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareSigner")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl ShareSigner {
    /// An empty secret is rejected.
    pub fn new(secret: &[u8]) -> Result<Self, ShareError> {
        if secret.is_empty() {
            return Err(ShareError::Invalid);
        }
        Ok(Self {
            secret: secret.to_vec(),
            max_age: DEFAULT_MAX_AGE,
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn issue(&self, set_id: SetId) -> Result<String, ShareError> {
        self.issue_at(set_id, SystemTime::now())
    }

    pub fn issue_at(&self, set_id: SetId, now: SystemTime) -> Result<String, ShareError> {
        let payload = SharePayload {
            set_id,
            issued_at: unix_secs(now),
        };
        let payload_bytes = serde_json::to_vec(&payload).map_err(|_| ShareError::Invalid)?;
        let payload_part = URL_SAFE_NO_PAD.encode(payload_bytes);
        let sig_part = URL_SAFE_NO_PAD.encode(self.sign(&payload_part)?);
        Ok(format!("{TOKEN_VERSION_V1}.{payload_part}.{sig_part}"))
    }

    pub fn verify(&self, token: &str) -> Result<SetId, ShareError> {
        self.verify_at(token, SystemTime::now())
    }

    pub fn verify_at(&self, token: &str, now: SystemTime) -> Result<SetId, ShareError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(ShareError::Invalid);
        }
        let (payload_part, sig_part) = parse_token_parts(token)?;

        let expected = URL_SAFE_NO_PAD
            .decode(sig_part)
            .map_err(|_| ShareError::Invalid)?;
        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&expected).map_err(|_| ShareError::Invalid)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_part)
            .map_err(|_| ShareError::Invalid)?;
        let payload: SharePayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| ShareError::Invalid)?;

        let now = unix_secs(now);
        if payload.issued_at > now + MAX_FUTURE_SKEW_SECS {
            return Err(ShareError::Invalid);
        }
        if now.saturating_sub(payload.issued_at) > self.max_age.as_secs() {
            return Err(ShareError::Expired);
        }
        Ok(payload.set_id)
    }

    fn mac(&self) -> Result<HmacSha256, ShareError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| ShareError::Invalid)
    }

    fn sign(&self, payload_part: &str) -> Result<Vec<u8>, ShareError> {
        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn parse_token_parts(token: &str) -> Result<(&str, &str), ShareError> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [version, payload, sig] if *version == TOKEN_VERSION_V1 => Ok((payload, sig)),
        _ => Err(ShareError::Invalid),
    }
}

fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> ShareSigner {
        ShareSigner::new(b"test-secret").unwrap()
    }

    #[test]
    fn test_issue_then_verify() {
        let signer = signer();
        let set_id = SetId::new();
        let token = signer.issue(set_id).unwrap();
        assert!(token.starts_with("v1."));
        assert_eq!(signer.verify(&token).unwrap(), set_id);
    }

    #[test]
    fn test_expired_after_max_age() {
        let signer = signer();
        let issued = SystemTime::now();
        let token = signer.issue_at(SetId::new(), issued).unwrap();

        let just_inside = issued + DEFAULT_MAX_AGE;
        assert!(signer.verify_at(&token, just_inside).is_ok());

        let past = issued + DEFAULT_MAX_AGE + Duration::from_secs(1);
        assert_eq!(signer.verify_at(&token, past), Err(ShareError::Expired));
    }

    #[test]
    fn test_any_single_char_change_is_invalid() {
        let signer = signer();
        let token = signer.issue(SetId::new()).unwrap();

        for idx in 0..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                signer.verify(&tampered),
                Err(ShareError::Invalid),
                "change at {idx} was accepted"
            );
        }
    }

    #[test]
    fn test_swapped_set_id_is_invalid() {
        let signer = signer();
        let token = signer.issue(SetId::new()).unwrap();
        let other = signer.issue(SetId::new()).unwrap();

        let sig = token.rsplit('.').next().unwrap();
        let other_payload = other.split('.').nth(1).unwrap();
        let forged = format!("v1.{other_payload}.{sig}");
        assert_eq!(signer.verify(&forged), Err(ShareError::Invalid));
    }

    #[test]
    fn test_other_secret_is_invalid() {
        let token = signer().issue(SetId::new()).unwrap();
        let other = ShareSigner::new(b"another-secret").unwrap();
        assert_eq!(other.verify(&token), Err(ShareError::Invalid));
    }

    #[test]
    fn test_future_token_is_invalid() {
        let signer = signer();
        let now = SystemTime::now();
        let token = signer.issue_at(SetId::new(), now + Duration::from_secs(3600)).unwrap();
        assert_eq!(signer.verify_at(&token, now), Err(ShareError::Invalid));
    }

    #[test]
    fn test_malformed_tokens() {
        let signer = signer();
        assert_eq!(signer.verify(""), Err(ShareError::Invalid));
        assert_eq!(signer.verify("v1.abc"), Err(ShareError::Invalid));
        assert_eq!(signer.verify("v2.abc.def"), Err(ShareError::Invalid));
        assert_eq!(signer.verify(&"x".repeat(1000)), Err(ShareError::Invalid));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(ShareSigner::new(b"").is_err());
    }

    #[test]
    fn test_share_error_into_live_error() {
        assert_eq!(LiveError::from(ShareError::Expired), LiveError::Expired);
        assert_eq!(LiveError::from(ShareError::Invalid), LiveError::Invalid);
    }
}
