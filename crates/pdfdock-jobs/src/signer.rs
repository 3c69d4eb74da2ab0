//! Capability tokens for downloads.
//!
//! A token binds exactly one `(job_id, filename)` pair. It is
//! `base64url(payload) "." base64url(hmac)` where the MAC is HMAC-SHA256 over
//! a fixed salt and the payload bytes. Tokens are not encrypted and carry no
//! expiry; they stop working in practice once the job's workspace is removed.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const SALT: &[u8] = b"pdfdock-download";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    job_id: String,
    filename: String,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Malformed,
    BadSignature,
    Mismatch,
}

/// Result of presenting a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redemption {
    Authorized,
    Denied(DenyReason),
}

impl Redemption {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }
}

/// Issues and verifies download tokens with a server-side secret.
#[derive(Clone)]
pub struct DownloadSigner {
    secret: Vec<u8>,
}

impl DownloadSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Issue a token for one file of one job.
    pub fn issue(&self, job_id: &str, filename: &str) -> String {
        let claims = Claims {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
        };
        // Serializing two strings cannot fail.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let signature = self.sign(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// Check a token against the job id and filename taken from the request.
    pub fn redeem(&self, job_id: &str, filename: &str, token: &str) -> Redemption {
        let Some((payload_b64, signature_b64)) = token.split_once('.') else {
            return Redemption::Denied(DenyReason::Malformed);
        };
        let (Ok(payload), Ok(signature)) = (
            URL_SAFE_NO_PAD.decode(payload_b64),
            URL_SAFE_NO_PAD.decode(signature_b64),
        ) else {
            return Redemption::Denied(DenyReason::Malformed);
        };

        let mut mac = self.mac();
        mac.update(&payload);
        if mac.verify_slice(&signature).is_err() {
            return Redemption::Denied(DenyReason::BadSignature);
        }

        let Ok(claims) = serde_json::from_slice::<Claims>(&payload) else {
            return Redemption::Denied(DenyReason::Malformed);
        };
        if claims.job_id != job_id || claims.filename != filename {
            return Redemption::Denied(DenyReason::Mismatch);
        }
        Redemption::Authorized
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn mac(&self) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(SALT);
        mac
    }
}

impl fmt::Debug for DownloadSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadSigner").field("secret", &"***").finish()
    }
}
