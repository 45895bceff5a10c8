//! Token Verifier — stateless bearer-credential validation.
//!
//! DESIGN
//! ======
//! Editor clients present a three-part HMAC-SHA256 signed token
//! (`header.claims.signature`, base64url without padding) as the
//! `access_token` query parameter on the websocket upgrade. Verification is
//! purely local: check the algorithm, check the signature in constant time,
//! check expiry, and surface the embedded identity. Token issuance belongs
//! to the account surface, not this process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::frame::Sender;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// TYPES
// =============================================================================

/// Validated identity extracted from a bearer token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub organization_id: Uuid,
}

impl Identity {
    /// The sender tuple attached to fan-out frames.
    #[must_use]
    pub fn sender(&self) -> Sender {
        Sender {
            id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm: {0}")]
    Algorithm(String),
    #[error("token signature mismatch")]
    Signature,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    username: String,
    email: String,
    role: String,
    organization_id: Uuid,
    exp: i64,
}

// =============================================================================
// VERIFIER
// =============================================================================

#[derive(Clone)]
pub struct TokenVerifier {
    key: Vec<u8>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(key: &str) -> Self {
        Self { key: key.as_bytes().to_vec() }
    }

    /// Validate a bearer token and extract the identity it carries.
    ///
    /// # Errors
    ///
    /// Any structural defect is `Malformed`; a wrong key or tampered body is
    /// `Signature`; a past `exp` is `Expired`.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let mut parts = token.split('.');
        let (Some(head), Some(body), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header_bytes = URL_SAFE_NO_PAD.decode(head).map_err(|_| AuthError::Malformed)?;
        let header: Header =
            serde_json::from_slice(&header_bytes).map_err(|_| AuthError::Malformed)?;
        if header.alg != "HS256" {
            return Err(AuthError::Algorithm(header.alg));
        }

        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| AuthError::Malformed)?;
        mac.update(head.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        let signature = URL_SAFE_NO_PAD.decode(sig).map_err(|_| AuthError::Malformed)?;
        mac.verify_slice(&signature).map_err(|_| AuthError::Signature)?;

        let claims_bytes = URL_SAFE_NO_PAD.decode(body).map_err(|_| AuthError::Malformed)?;
        let claims: Claims =
            serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::Malformed)?;
        if claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(AuthError::Expired);
        }

        Ok(Identity {
            user_id: claims.sub,
            username: claims.username,
            email: claims.email,
            role: claims.role,
            organization_id: claims.organization_id,
        })
    }
}

// =============================================================================
// TEST SIGNER
// =============================================================================

/// Sign a token for tests. Issuance is out of scope for the hub process,
/// so this never ships in the binary.
#[cfg(test)]
pub(crate) fn mint_token(key: &str, identity: &Identity, exp: i64) -> String {
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let claims = Claims {
        sub: identity.user_id,
        username: identity.username.clone(),
        email: identity.email.clone(),
        role: identity.role.clone(),
        organization_id: identity.organization_id,
        exp,
    };

    let head = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).expect("header serializes"));
    let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).expect("claims serialize"));
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("any key length works");
    mac.update(head.as_bytes());
    mac.update(b".");
    mac.update(body.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{head}.{body}.{sig}")
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
