//! # Session Tokens
//!
//! Bearer tokens presented to the hub. Tokens live only in memory; the
//! expiry is recorded at issuance and never re-read from the token.

use boxsync_core::{DeviceIdentity, SessionClaims};
use chrono::{DateTime, Duration, Utc};

use crate::config::EdgeConfig;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Session Token
// =============================================================================

/// A signed bearer token and the instant it stops being valid.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl SessionToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        SessionToken {
            value: value.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while `now` is strictly before the expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

// Keep the token value out of logs.
impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Token Signer
// =============================================================================

/// Produces signed token strings for an identity.
pub trait TokenSigner: Send + Sync {
    /// Signs a token valid from `issued_at` until `expires_at`.
    fn sign(
        &self,
        identity: &DeviceIdentity,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<String>;

    /// How long a freshly issued token stays valid.
    fn validity(&self) -> Duration;
}

/// HS256 signer using the configured issuer, audience and shared key.
pub struct JwtSigner {
    issuer: String,
    audience: String,
    key: Vec<u8>,
    validity: Duration,
}

impl JwtSigner {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        key: impl AsRef<[u8]>,
        validity: Duration,
    ) -> Self {
        JwtSigner {
            issuer: issuer.into(),
            audience: audience.into(),
            key: key.as_ref().to_vec(),
            validity,
        }
    }

    pub fn from_config(config: &EdgeConfig) -> SyncResult<Self> {
        let validity = Duration::try_days(config.auth.expire_days).ok_or_else(|| {
            SyncError::InvalidConfig(format!(
                "auth.expire_days out of range: {}",
                config.auth.expire_days
            ))
        })?;

        Ok(Self::new(
            config.auth.issuer.clone(),
            config.audience(),
            config.auth.key.as_bytes(),
            validity,
        ))
    }
}

impl TokenSigner for JwtSigner {
    fn sign(
        &self,
        identity: &DeviceIdentity,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> SyncResult<String> {
        if self.key.is_empty() {
            return Err(SyncError::TokenUnavailable("signing key is empty".into()));
        }

        let claims = SessionClaims::for_identity(
            identity,
            &self.issuer,
            &self.audience,
            issued_at,
            expires_at,
        )?;
        Ok(claims.encode(&self.key)?)
    }

    fn validity(&self) -> Duration {
        self.validity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new(None, "P1", "d-1", "dr@example.com")
    }

    #[test]
    fn test_token_validity_window() {
        let now = Utc::now();
        let token = SessionToken::new("abc", now + Duration::seconds(10));

        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(10)));
        assert_eq!(token.bearer(), "Bearer abc");
        assert!(!format!("{:?}", token).contains("abc"));
    }

    #[test]
    fn test_jwt_signer_produces_verifiable_token() {
        let signer = JwtSigner::new("boxsync", "boxsync", "k3y", Duration::days(7));
        let now = Utc::now();

        let value = signer
            .sign(&identity(), now, now + signer.validity())
            .unwrap();
        let claims = SessionClaims::decode(&value, b"k3y", "boxsync", "boxsync").unwrap();

        assert_eq!(claims.tenant(), Some("P1"));
        assert_eq!(claims.exp, (now + Duration::days(7)).timestamp());
    }

    #[test]
    fn test_empty_key_is_token_unavailable() {
        let signer = JwtSigner::new("boxsync", "boxsync", "", Duration::days(7));
        let now = Utc::now();

        let err = signer.sign(&identity(), now, now).unwrap_err();
        assert!(matches!(err, SyncError::TokenUnavailable(_)));
    }

    #[test]
    fn test_from_config_rejects_unrepresentable_window() {
        let mut config = EdgeConfig::default();
        config.auth.key = "k3y".into();
        assert_eq!(
            JwtSigner::from_config(&config).unwrap().validity(),
            Duration::days(7)
        );

        config.auth.expire_days = i64::MAX;
        let err = JwtSigner::from_config(&config).err().unwrap();
        assert!(err.is_config_error());
    }
}
