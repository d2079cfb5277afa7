//! One-time consent flow that stores a user's refresh token.

use dropbox_core::{DropboxError, OAuthClient, OAuthError};
use thiserror::Error;
use url::Url;

use crate::config::{AppCredentials, DownloadConfig};
use crate::storage::{CredentialRecord, CredentialStore, StoreError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("account lookup failed: {0}")]
    Account(#[from] DropboxError),
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode token payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("DROPBOX_REDIRECT_URL is not configured")]
    MissingRedirectUrl,
    #[error("token response did not include a refresh token")]
    MissingRefreshToken,
    #[error("authorization code missing in redirect")]
    MissingCode,
}

pub struct Provisioner {
    oauth_client: OAuthClient,
    redirect_url: Option<String>,
    download: DownloadConfig,
    store: CredentialStore,
}

impl Provisioner {
    pub fn new(
        app: &AppCredentials,
        download: DownloadConfig,
        store: CredentialStore,
    ) -> Result<Self, OAuthError> {
        Ok(Self::with_client(
            app.oauth_client()?,
            app.redirect_url.clone(),
            download,
            store,
        ))
    }

    pub fn with_client(
        oauth_client: OAuthClient,
        redirect_url: Option<String>,
        download: DownloadConfig,
        store: CredentialStore,
    ) -> Self {
        Self {
            oauth_client,
            redirect_url,
            download,
            store,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn authorize_url(&self, state: Option<&str>) -> Result<Url, ProvisionError> {
        let redirect_url = self
            .redirect_url
            .as_deref()
            .ok_or(ProvisionError::MissingRedirectUrl)?;
        Ok(self.oauth_client.authorize_url(redirect_url, state)?)
    }

    /// Exchanges an authorization code and stores the resulting refresh token
    /// under the account's e-mail.
    pub async fn complete(&self, code: &str) -> Result<CredentialRecord, ProvisionError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ProvisionError::MissingCode);
        }

        let token = self
            .oauth_client
            .exchange_code(code, self.redirect_url.as_deref())
            .await
            .inspect_err(|err| tracing::error!(error = %err, "authorization code exchange failed"))?;
        let Some(refresh_token) = token.refresh_token.clone() else {
            tracing::error!("token response has no refresh token; was offline access requested?");
            return Err(ProvisionError::MissingRefreshToken);
        };

        let account = self
            .download
            .remote_client(&token.access_token)?
            .get_current_account()
            .await?;
        tracing::info!(identity = %account.email, "storing Dropbox credential");

        let mut record = CredentialRecord::new(account.email, refresh_token);
        record.access_token = Some(token.access_token.clone());
        record.payload = Some(serde_json::to_value(&token)?);
        self.store.upsert(&record).await?;
        Ok(record)
    }
}
