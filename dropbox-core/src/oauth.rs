use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_AUTHORIZE_BASE_URL: &str = "https://www.dropbox.com";
const DEFAULT_TOKEN_BASE_URL: &str = "https://api.dropboxapi.com";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        error: Option<String>,
        body: String,
    },
}

impl OAuthError {
    /// True when the token endpoint rejected the grant itself (revoked or
    /// malformed refresh token, reused authorization code).
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, OAuthError::Api { error: Some(code), .. } if code == "invalid_grant")
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct OAuthClient {
    http: Client,
    authorize_base: Url,
    token_base: Url,
    app_key: String,
    app_secret: String,
}

impl OAuthClient {
    pub fn new(
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        Ok(Self {
            http: Client::new(),
            authorize_base: Url::parse(DEFAULT_AUTHORIZE_BASE_URL)?,
            token_base: Url::parse(DEFAULT_TOKEN_BASE_URL)?,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        })
    }

    /// Points both the consent page and the token endpoint at `base_url`.
    pub fn with_base_url(
        base_url: &str,
        app_key: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> Result<Self, OAuthError> {
        let base = Url::parse(base_url)?;
        Ok(Self {
            http: Client::new(),
            authorize_base: base.clone(),
            token_base: base,
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        state: Option<&str>,
    ) -> Result<Url, OAuthError> {
        let mut url = self.authorize_base.join("/oauth2/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", self.app_key.as_str());
            query.append_pair("redirect_uri", redirect_uri);
            query.append_pair("token_access_type", "offline");
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<OAuthToken, OAuthError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.app_key.as_str()),
            ("client_secret", self.app_secret.as_str()),
        ];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri", redirect_uri));
        }
        self.post_token_form(&form).await
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthToken, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.app_key.as_str()),
            ("client_secret", self.app_secret.as_str()),
        ];
        self.post_token_form(&form).await
    }

    async fn post_token_form(&self, form: &[(&str, &str)]) -> Result<OAuthToken, OAuthError> {
        let url = self.token_base.join("/oauth2/token")?;
        let response = self.http.post(url).form(form).send().await?;
        if response.status().is_success() {
            Ok(response.json::<OAuthToken>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<OAuthErrorBody>(&body)
                .ok()
                .map(|parsed| parsed.error);
            Err(OAuthError::Api {
                status,
                error,
                body,
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}
