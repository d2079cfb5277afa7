use dropbox_core::{OAuthClient, OAuthError};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::AppCredentials;
use crate::storage::{CredentialStore, StoreError};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no refresh token stored for {0}")]
    NotAuthorized(String),
    #[error("refresh token for {0} was rejected as invalid or revoked")]
    Revoked(String),
    #[error("oauth refresh failed: {0}")]
    Refresh(#[source] OAuthError),
    #[error("credential lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Short-lived access token, valid for one download run.
#[derive(Clone)]
pub struct AccessCredential {
    pub access_token: String,
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessCredential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Turns a stored refresh token into a fresh access token. Never writes back
/// to the store and never retries.
pub struct TokenBroker {
    oauth_client: OAuthClient,
    store: CredentialStore,
}

impl TokenBroker {
    pub fn new(app: &AppCredentials, store: CredentialStore) -> Result<Self, OAuthError> {
        Ok(Self::with_client(app.oauth_client()?, store))
    }

    pub fn with_client(oauth_client: OAuthClient, store: CredentialStore) -> Self {
        Self {
            oauth_client,
            store,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub async fn obtain_access_credential(
        &self,
        identity: &str,
    ) -> Result<AccessCredential, BrokerError> {
        tracing::debug!(identity, "looking up stored credential");
        let record = self
            .store
            .find(identity)
            .await?
            .filter(|record| record.has_refresh_token());
        let Some(refresh_token) = record.and_then(|record| record.refresh_token) else {
            tracing::warn!(identity, "no refresh token on file");
            return Err(BrokerError::NotAuthorized(identity.to_string()));
        };

        let token = self
            .oauth_client
            .refresh_token(&refresh_token)
            .await
            .map_err(|err| {
                if err.is_invalid_grant() {
                    tracing::warn!(identity, "refresh token rejected: invalid grant");
                    BrokerError::Revoked(identity.to_string())
                } else {
                    tracing::error!(identity, error = %err, "access token refresh failed");
                    BrokerError::Refresh(err)
                }
            })?;

        tracing::info!(identity, "access token refreshed");
        Ok(AccessCredential {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| now_unix().saturating_add(secs as i64)),
        })
    }
}

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
