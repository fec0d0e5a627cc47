//! Credential capability consumed by the connection manager.
//!
//! Token issuance lives elsewhere; this module only asks whether the current
//! credential is still good, asks for a refresh when it is not, and reads the
//! bearer value to attach to the upgrade request.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use courierlink_core::error::{LinkError, Result};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// True when a credential exists and stays valid for at least `threshold`.
    fn is_credential_valid(&self, threshold: Duration) -> bool;

    /// Refresh if needed. `Ok(false)` means no usable credential could be
    /// obtained without an error being raised.
    async fn refresh_if_needed(&self) -> Result<bool>;

    fn current_credential(&self) -> Option<String>;
}

/// Validate (refreshing if needed) and return the bearer token to use.
///
/// Any failure here is an auth failure and must not be retried by the caller.
pub async fn ensure_credential(
    provider: &dyn CredentialProvider,
    threshold: Duration,
) -> Result<String> {
    if !provider.is_credential_valid(threshold) {
        match provider.refresh_if_needed().await {
            Ok(true) => {}
            Ok(false) => return Err(LinkError::AuthFailed("credential refresh declined".into())),
            Err(e) => return Err(LinkError::AuthFailed(format!("credential refresh failed: {e}"))),
        }
    }
    provider
        .current_credential()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| LinkError::AuthFailed("no credential available".into()))
}

#[derive(Debug, Clone)]
struct Token {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Fixed token with an optional expiry. Refresh cannot mint a new token, so
/// it succeeds only while the current one is still valid.
#[derive(Debug)]
pub struct StaticCredentials {
    token: RwLock<Option<Token>>,
}

impl StaticCredentials {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: RwLock::new(Some(Token {
                value: value.into(),
                expires_at,
            })),
        }
    }

    pub fn empty() -> Self {
        Self {
            token: RwLock::new(None),
        }
    }

    /// Replace the token (e.g. after the app logged in again).
    pub fn set(&self, value: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let mut g = self.token.write().unwrap_or_else(|e| e.into_inner());
        *g = Some(Token {
            value: value.into(),
            expires_at,
        });
    }

    pub fn revoke(&self) {
        let mut g = self.token.write().unwrap_or_else(|e| e.into_inner());
        *g = None;
    }

    fn read(&self) -> Option<Token> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    fn is_credential_valid(&self, threshold: Duration) -> bool {
        let Some(token) = self.read() else {
            return false;
        };
        match token.expires_at {
            None => true,
            Some(exp) => {
                let margin = chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::days(365));
                Utc::now().checked_add_signed(margin).map_or(false, |t| t < exp)
            }
        }
    }

    async fn refresh_if_needed(&self) -> Result<bool> {
        match self.read() {
            None => Err(LinkError::AuthFailed("no credential to refresh".into())),
            Some(t) => Ok(t.expires_at.map_or(true, |exp| Utc::now() < exp)),
        }
    }

    fn current_credential(&self) -> Option<String> {
        self.read().map(|t| t.value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let creds = StaticCredentials::new("t0", None);
        let tok = ensure_credential(&creds, Duration::from_secs(60)).await.unwrap();
        assert_eq!(tok, "t0");
    }

    #[tokio::test]
    async fn expired_token_is_an_auth_failure() {
        let creds = StaticCredentials::new("t0", Some(Utc::now() - chrono::Duration::seconds(5)));
        let err = ensure_credential(&creds, Duration::from_secs(60)).await.unwrap_err();
        assert!(err.is_auth());
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn near_expiry_refreshes_and_still_uses_token() {
        let creds = StaticCredentials::new("t0", Some(Utc::now() + chrono::Duration::seconds(30)));
        assert!(!creds.is_credential_valid(Duration::from_secs(60)));
        let tok = ensure_credential(&creds, Duration::from_secs(60)).await.unwrap();
        assert_eq!(tok, "t0");
    }

    #[tokio::test]
    async fn revoked_token_fails() {
        let creds = StaticCredentials::new("t0", None);
        creds.revoke();
        assert!(ensure_credential(&creds, Duration::ZERO).await.unwrap_err().is_auth());
    }
}
