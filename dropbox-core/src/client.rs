use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_API_BASE_URL: &str = "https://api.dropboxapi.com";
const DEFAULT_CONTENT_BASE_URL: &str = "https://content.dropboxapi.com";
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

#[derive(Debug, Error)]
pub enum DropboxError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to encode request argument: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        summary: Option<String>,
        body: String,
    },
}

#[derive(Clone)]
pub struct DropboxClient {
    http: Client,
    api_base: Url,
    content_base: Url,
    token: String,
}

impl DropboxClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DropboxError> {
        Self::with_base_urls(DEFAULT_API_BASE_URL, DEFAULT_CONTENT_BASE_URL, token)
    }

    pub fn with_base_urls(
        api_base: &str,
        content_base: &str,
        token: impl Into<String>,
    ) -> Result<Self, DropboxError> {
        Ok(Self {
            http: Client::new(),
            api_base: Url::parse(api_base)?,
            content_base: Url::parse(content_base)?,
            token: token.into(),
        })
    }

    pub fn with_http(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub async fn get_metadata(&self, path: &str) -> Result<Metadata, DropboxError> {
        self.rpc("/2/files/get_metadata", &PathArg { path }).await
    }

    pub async fn get_shared_link_metadata(&self, url: &str) -> Result<Metadata, DropboxError> {
        self.rpc(
            "/2/sharing/get_shared_link_metadata",
            &SharedLinkFileArg { url, path: None },
        )
        .await
    }

    pub async fn list_folder(&self, arg: &ListFolderArg) -> Result<ListFolderResult, DropboxError> {
        self.rpc("/2/files/list_folder", arg).await
    }

    pub async fn list_folder_continue(
        &self,
        cursor: &str,
    ) -> Result<ListFolderResult, DropboxError> {
        self.rpc("/2/files/list_folder/continue", &CursorArg { cursor })
            .await
    }

    pub async fn download(&self, path: &str) -> Result<Bytes, DropboxError> {
        self.content("/2/files/download", &PathArg { path }).await
    }

    /// Downloads a file reachable through a shared link. `path` is relative to
    /// the linked folder; `None` fetches the linked file itself.
    pub async fn get_shared_link_file(
        &self,
        url: &str,
        path: Option<&str>,
    ) -> Result<Bytes, DropboxError> {
        self.content(
            "/2/sharing/get_shared_link_file",
            &SharedLinkFileArg { url, path },
        )
        .await
    }

    pub async fn get_current_account(&self) -> Result<Account, DropboxError> {
        self.rpc("/2/users/get_current_account", &()).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn rpc<A, T>(&self, route: &str, arg: &A) -> Result<T, DropboxError>
    where
        A: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.api_base.join(route)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(arg)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn content<A>(&self, route: &str, arg: &A) -> Result<Bytes, DropboxError>
    where
        A: Serialize + ?Sized,
    {
        let url = self.content_base.join(route)?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header(API_ARG_HEADER, header_safe_json(arg)?)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.bytes().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> DropboxError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let summary = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .map(|parsed| parsed.error_summary);
        DropboxError::Api {
            status,
            summary,
            body,
        }
    }
}

/// HTTP header values must be visible ASCII, so DEL and non-ASCII
/// characters in the argument JSON are written as `\uXXXX` escapes.
fn header_safe_json<A: Serialize + ?Sized>(arg: &A) -> Result<String, DropboxError> {
    let raw = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(out)
}

impl DropboxError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DropboxError::Request(err) if err.is_timeout())
    }

    /// Checks the `error_summary` Dropbox attaches to endpoint-specific
    /// failures, e.g. `path/not_found/..`.
    pub fn summary_contains(&self, needle: &str) -> bool {
        matches!(self, DropboxError::Api { summary: Some(summary), .. } if summary.contains(needle))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_summary: String,
}

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct CursorArg<'a> {
    cursor: &'a str,
}

#[derive(Serialize)]
struct SharedLinkFileArg<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SharedLinkArg {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ListFolderArg {
    pub path: String,
    pub recursive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_link: Option<SharedLinkArg>,
}

impl ListFolderArg {
    pub fn path(path: impl Into<String>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
            limit: None,
            shared_link: None,
        }
    }

    /// Lists `path` inside the folder behind a shared link; `""` is the link root.
    pub fn shared_link(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            recursive: false,
            limit: None,
            shared_link: Some(SharedLinkArg { url: url.into() }),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = ".tag", rename_all = "lowercase")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FileMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FolderMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub path_lower: Option<String>,
    #[serde(default)]
    pub path_display: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListFolderResult {
    pub entries: Vec<Metadata>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Account {
    pub account_id: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}
