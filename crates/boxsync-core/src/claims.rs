//! # Session Claims
//!
//! Claims carried by the bearer token a box presents to the hub.
//!
//! ## Token Flow
//! ```text
//! ┌──────────────┐  sign(key)   ┌──────────────┐  verify(key, iss, aud)  ┌──────────────┐
//! │ DeviceIdentity│────────────►│ bearer token │────────────────────────►│  sync-hub    │
//! │ (edge)        │             │  (HS256)     │                          │ PracticeId → │
//! └──────────────┘              └──────────────┘                          │ tenant group │
//!                                                                          └──────────────┘
//! ```
//!
//! Expiry is also tracked client-side from the moment of issuance; the edge
//! never decodes its own token to find out when it expires.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::identity::DeviceIdentity;

/// Claim name holding the practice (tenant) id.
pub const PRACTICE_CLAIM: &str = "PracticeId";

/// Practice claim value used by administrative (portal) connections.
pub const ADMIN_TENANT: &str = "PORTAL";

/// JWT claims structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (doctor email)
    pub sub: String,

    /// Doctor id
    #[serde(rename = "DoctorId", default)]
    pub doctor_id: String,

    /// Practice id; absent on administrative tokens
    #[serde(
        rename = "PracticeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub practice_id: Option<String>,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration (Unix timestamp)
    pub exp: i64,

    /// JWT ID (unique identifier for this token)
    pub jti: String,
}

impl SessionClaims {
    /// Builds the claims for a box identity.
    pub fn for_identity(
        identity: &DeviceIdentity,
        issuer: &str,
        audience: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        identity.validate()?;

        Ok(SessionClaims {
            sub: identity.doctor_email.clone(),
            doctor_id: identity.doctor_id.clone(),
            practice_id: Some(identity.practice_id.clone()),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// Signs the claims with an HS256 shared key.
    pub fn encode(&self, key: &[u8]) -> CoreResult<String> {
        encode(&Header::default(), self, &EncodingKey::from_secret(key))
            .map_err(|e| CoreError::TokenSigning(e.to_string()))
    }

    /// Verifies signature, issuer, audience and expiry (no leeway).
    pub fn decode(token: &str, key: &[u8], issuer: &str, audience: &str) -> CoreResult<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.leeway = 0;

        decode::<SessionClaims>(token, &DecodingKey::from_secret(key), &validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::InvalidToken(e.to_string()))
    }

    /// The tenant group this token belongs to, if any.
    ///
    /// Returns `None` for tokens without a practice claim and for the
    /// administrative sentinel.
    pub fn tenant(&self) -> Option<&str> {
        match self.practice_id.as_deref() {
            Some(id) if !id.is_empty() && id != ADMIN_TENANT => Some(id),
            _ => None,
        }
    }

    /// True for administrative (portal) tokens.
    pub fn is_admin(&self) -> bool {
        self.practice_id.as_deref() == Some(ADMIN_TENANT)
    }
}
