use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use dropbox_core::{DropboxClient, DropboxError, OAuthClient, OAuthError};

const DEFAULT_API_BASE_URL: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_BASE_URL: &str = "https://content.dropboxapi.com";
const DEFAULT_UPLOADS_ROOT: &str = "uploads/dropbox_downloads";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LIST_LIMIT: u64 = 2000;

/// Dropbox app registration used for every token exchange.
#[derive(Clone, Debug)]
pub struct AppCredentials {
    pub app_key: String,
    pub app_secret: String,
    pub redirect_url: Option<String>,
    pub oauth_base_url: Option<String>,
    pub request_timeout: Duration,
}

impl AppCredentials {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
            redirect_url: None,
            oauth_base_url: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_oauth_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.oauth_base_url = Some(base_url.into());
        self
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = Some(redirect_url.into());
        self
    }

    pub fn oauth_client(&self) -> Result<OAuthClient, OAuthError> {
        let client = match &self.oauth_base_url {
            Some(base_url) => OAuthClient::with_base_url(base_url, &self.app_key, &self.app_secret)?,
            None => OAuthClient::new(&self.app_key, &self.app_secret)?,
        };
        Ok(client.with_http(http_client(self.request_timeout)?))
    }
}

/// Where the Dropbox RPC and content hosts live.
#[derive(Clone, Debug)]
pub struct RemoteEndpoints {
    pub api_base_url: String,
    pub content_base_url: String,
}

impl Default for RemoteEndpoints {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            content_base_url: DEFAULT_CONTENT_BASE_URL.to_string(),
        }
    }
}

impl RemoteEndpoints {
    pub fn single(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            api_base_url: base_url.clone(),
            content_base_url: base_url,
        }
    }
}

/// Settings for one download run.
#[derive(Clone, Debug)]
pub struct DownloadConfig {
    pub endpoints: RemoteEndpoints,
    pub uploads_root: PathBuf,
    pub request_timeout: Duration,
    pub list_limit: u32,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            endpoints: RemoteEndpoints::default(),
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_ROOT),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            list_limit: DEFAULT_LIST_LIMIT as u32,
        }
    }
}

impl DownloadConfig {
    /// Builds a client for one run; every call inherits the request timeout.
    pub fn remote_client(&self, access_token: &str) -> Result<DropboxClient, DropboxError> {
        let client = DropboxClient::with_base_urls(
            &self.endpoints.api_base_url,
            &self.endpoints.content_base_url,
            access_token,
        )?;
        Ok(client.with_http(http_client(self.request_timeout)?))
    }
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub app: AppCredentials,
    pub download: DownloadConfig,
    pub database_url: Option<String>,
    pub listen_addr: SocketAddr,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let app_key = std::env::var("DROPBOX_APP_KEY").context("DROPBOX_APP_KEY is not set")?;
        let app_secret =
            std::env::var("DROPBOX_APP_SECRET").context("DROPBOX_APP_SECRET is not set")?;
        let request_timeout = Duration::from_secs(read_u64_env(
            "DROPBOX_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        ));

        let app = AppCredentials {
            app_key,
            app_secret,
            redirect_url: read_string_env("DROPBOX_REDIRECT_URL"),
            oauth_base_url: read_string_env("DROPBOX_OAUTH_BASE_URL"),
            request_timeout,
        };

        let defaults = RemoteEndpoints::default();
        let endpoints = RemoteEndpoints {
            api_base_url: read_string_env("DROPBOX_API_BASE_URL")
                .unwrap_or(defaults.api_base_url),
            content_base_url: read_string_env("DROPBOX_CONTENT_BASE_URL")
                .unwrap_or(defaults.content_base_url),
        };
        let uploads_root = read_string_env("DROPBOX_UPLOADS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_ROOT));
        let list_limit = u32::try_from(read_u64_env("DROPBOX_LIST_LIMIT", DEFAULT_LIST_LIMIT))
            .context("DROPBOX_LIST_LIMIT is out of range")?;

        let listen_addr = read_string_env("DROPBOX_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid DROPBOX_LISTEN_ADDR: {listen_addr}"))?;

        Ok(Self {
            app,
            download: DownloadConfig {
                endpoints,
                uploads_root,
                request_timeout,
                list_limit,
            },
            database_url: read_string_env("DROPBOX_DATABASE_URL"),
            listen_addr,
        })
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_config_defaults() {
        let config = DownloadConfig::default();
        assert_eq!(config.uploads_root, PathBuf::from("uploads/dropbox_downloads"));
        assert_eq!(config.list_limit, 2000);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.endpoints.api_base_url, "https://api.dropboxapi.com");
    }

    #[test]
    fn single_endpoint_serves_both_hosts() {
        let endpoints = RemoteEndpoints::single("http://127.0.0.1:9000");
        assert_eq!(endpoints.api_base_url, endpoints.content_base_url);
    }

    #[test]
    fn read_u64_env_ignores_zero_and_garbage() {
        assert_eq!(read_u64_env("DROPBOXD_TEST_UNSET_VALUE", 7), 7);
    }
}
