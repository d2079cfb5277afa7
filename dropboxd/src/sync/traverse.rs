//! Paginated folder traversal shared by both addressing modes.
//!
//! A [`Traversal`] keeps exactly one listing cursor open. Recursive
//! strategies produce a single cursor chain; non-recursive ones queue every
//! discovered subfolder and list it once the current chain is exhausted.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use dropbox_core::{DropboxClient, DropboxError, ListFolderArg, ListFolderResult, Metadata};
use thiserror::Error;

use super::paths::{PathError, join_remote, relative_remote_path};

#[derive(Debug, Error)]
pub enum TraversalError {
    #[error("remote listing failed: {0}")]
    Remote(#[from] DropboxError),
    #[error("listing entry has neither a path nor a name")]
    UnnamedEntry,
    #[error("unsafe remote path: {0}")]
    Path(#[from] PathError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// How a single entry is fetched from Dropbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(String),
    SharedLink { url: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub kind: EntryKind,
    pub name: String,
    /// Path below the local root, without a leading separator.
    pub relative_path: String,
    pub locator: Locator,
    pub content_hash: Option<String>,
}

/// Addressing-mode capability driven by [`Traversal`].
#[async_trait]
pub trait ListingStrategy: Send + Sync {
    /// Whether one listing already enumerates every descendant.
    fn is_recursive(&self) -> bool;

    /// Fetches one page of `folder`. `cursor` is `None` for the first page.
    async fn list_page(
        &self,
        folder: &str,
        cursor: Option<&str>,
    ) -> Result<ListFolderResult, DropboxError>;

    /// Converts a listing entry of `folder`; `None` skips it.
    fn resolve_entry(
        &self,
        folder: &str,
        metadata: Metadata,
    ) -> Result<Option<RemoteEntry>, TraversalError>;

    async fn download_entry(&self, entry: &RemoteEntry) -> Result<Bytes, DropboxError>;
}

/// Private Dropbox path, listed recursively in one cursor chain.
pub struct PrivatePathStrategy {
    client: DropboxClient,
    limit: u32,
}

impl PrivatePathStrategy {
    pub fn new(client: DropboxClient, limit: u32) -> Self {
        Self { client, limit }
    }
}

#[async_trait]
impl ListingStrategy for PrivatePathStrategy {
    fn is_recursive(&self) -> bool {
        true
    }

    async fn list_page(
        &self,
        folder: &str,
        cursor: Option<&str>,
    ) -> Result<ListFolderResult, DropboxError> {
        match cursor {
            Some(cursor) => self.client.list_folder_continue(cursor).await,
            None => {
                let arg = ListFolderArg::path(folder, true).with_limit(self.limit);
                self.client.list_folder(&arg).await
            }
        }
    }

    fn resolve_entry(
        &self,
        _folder: &str,
        metadata: Metadata,
    ) -> Result<Option<RemoteEntry>, TraversalError> {
        let (kind, name, path_lower, path_display, content_hash) = match metadata {
            Metadata::File(file) => (
                EntryKind::File,
                file.name,
                file.path_lower,
                file.path_display,
                file.content_hash,
            ),
            Metadata::Folder(folder) => (
                EntryKind::Folder,
                folder.name,
                folder.path_lower,
                folder.path_display,
                None,
            ),
            Metadata::Other => return Ok(None),
        };

        let display = first_usable([path_display.as_deref(), path_lower.as_deref(), Some(&name)])
            .ok_or(TraversalError::UnnamedEntry)?;
        let relative_path = relative_remote_path(display)?;
        let locator = first_usable([path_lower.as_deref(), path_display.as_deref()])
            .map(str::to_string)
            .unwrap_or_else(|| format!("/{relative_path}"));

        Ok(Some(RemoteEntry {
            kind,
            name,
            relative_path,
            locator: Locator::Path(locator),
            content_hash,
        }))
    }

    async fn download_entry(&self, entry: &RemoteEntry) -> Result<Bytes, DropboxError> {
        match &entry.locator {
            Locator::Path(path) => self.client.download(path).await,
            Locator::SharedLink { url, path } => {
                self.client.get_shared_link_file(url, Some(path)).await
            }
        }
    }
}

/// Folder behind a shared link. Dropbox refuses recursive listings of shared
/// links, so every subfolder is listed on its own; paths are relative to the
/// link root.
pub struct SharedLinkStrategy {
    client: DropboxClient,
    url: String,
    limit: u32,
}

impl SharedLinkStrategy {
    pub fn new(client: DropboxClient, url: impl Into<String>, limit: u32) -> Self {
        Self {
            client,
            url: url.into(),
            limit,
        }
    }
}

#[async_trait]
impl ListingStrategy for SharedLinkStrategy {
    fn is_recursive(&self) -> bool {
        false
    }

    async fn list_page(
        &self,
        folder: &str,
        cursor: Option<&str>,
    ) -> Result<ListFolderResult, DropboxError> {
        match cursor {
            Some(cursor) => self.client.list_folder_continue(cursor).await,
            None => {
                let arg = ListFolderArg::shared_link(&self.url, folder).with_limit(self.limit);
                self.client.list_folder(&arg).await
            }
        }
    }

    fn resolve_entry(
        &self,
        folder: &str,
        metadata: Metadata,
    ) -> Result<Option<RemoteEntry>, TraversalError> {
        let (kind, name, path_lower, path_display, content_hash) = match metadata {
            Metadata::File(file) => (
                EntryKind::File,
                file.name,
                file.path_lower,
                file.path_display,
                file.content_hash,
            ),
            Metadata::Folder(folder) => (
                EntryKind::Folder,
                folder.name,
                folder.path_lower,
                folder.path_display,
                None,
            ),
            Metadata::Other => return Ok(None),
        };
        let name = [Some(name.as_str()), path_display.as_deref(), path_lower.as_deref()]
            .into_iter()
            .flatten()
            .find_map(last_component)
            .ok_or(TraversalError::UnnamedEntry)?;

        let link_path = join_remote(folder, &name);
        let relative_path = relative_remote_path(&link_path)?;
        Ok(Some(RemoteEntry {
            kind,
            name,
            relative_path,
            locator: Locator::SharedLink {
                url: self.url.clone(),
                path: link_path,
            },
            content_hash,
        }))
    }

    async fn download_entry(&self, entry: &RemoteEntry) -> Result<Bytes, DropboxError> {
        match &entry.locator {
            Locator::SharedLink { url, path } => {
                self.client.get_shared_link_file(url, Some(path)).await
            }
            Locator::Path(path) => self.client.download(path).await,
        }
    }
}

/// Lazy, single-use walk over the files below a folder.
pub struct Traversal<'a> {
    strategy: &'a dyn ListingStrategy,
    pending_folders: VecDeque<String>,
    current_folder: String,
    cursor: Option<String>,
    buffered: VecDeque<RemoteEntry>,
    pages_fetched: usize,
}

impl<'a> Traversal<'a> {
    pub fn new(strategy: &'a dyn ListingStrategy, root: impl Into<String>) -> Self {
        Self {
            strategy,
            pending_folders: VecDeque::from([root.into()]),
            current_folder: String::new(),
            cursor: None,
            buffered: VecDeque::new(),
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next file in listing order, or `None` once every cursor chain and
    /// queued folder has been consumed.
    pub async fn next_file(&mut self) -> Result<Option<RemoteEntry>, TraversalError> {
        loop {
            if let Some(entry) = self.buffered.pop_front() {
                return Ok(Some(entry));
            }
            if !self.fetch_next_page().await? {
                return Ok(None);
            }
        }
    }

    async fn fetch_next_page(&mut self) -> Result<bool, TraversalError> {
        let cursor = match self.cursor.take() {
            Some(cursor) => Some(cursor),
            None => match self.pending_folders.pop_front() {
                Some(folder) => {
                    self.current_folder = folder;
                    None
                }
                None => return Ok(false),
            },
        };

        let page = self
            .strategy
            .list_page(&self.current_folder, cursor.as_deref())
            .await?;
        self.pages_fetched += 1;
        tracing::debug!(
            folder = %self.current_folder,
            entries = page.entries.len(),
            has_more = page.has_more,
            "fetched listing page"
        );

        for metadata in page.entries {
            let Some(entry) = self.strategy.resolve_entry(&self.current_folder, metadata)? else {
                continue;
            };
            match entry.kind {
                EntryKind::File => self.buffered.push_back(entry),
                EntryKind::Folder if !self.strategy.is_recursive() => {
                    if let Locator::SharedLink { path, .. } = entry.locator {
                        self.pending_folders.push_back(path);
                    } else {
                        self.pending_folders.push_back(format!("/{}", entry.relative_path));
                    }
                }
                EntryKind::Folder => {}
            }
        }

        if page.has_more {
            self.cursor = Some(page.cursor);
        }
        Ok(true)
    }
}

fn last_component(path: &str) -> Option<String> {
    path.rsplit('/')
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

fn first_usable<const N: usize>(candidates: [Option<&str>; N]) -> Option<&str> {
    candidates
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> DropboxClient {
        DropboxClient::with_base_urls(&server.uri(), &server.uri(), "test-token").unwrap()
    }

    async fn collect(traversal: &mut Traversal<'_>) -> Vec<RemoteEntry> {
        let mut out = Vec::new();
        while let Some(entry) = traversal.next_file().await.unwrap() {
            out.push(entry);
        }
        out
    }

    #[tokio::test]
    async fn private_path_follows_cursor_chain_until_has_more_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({ "path": "/Photos", "recursive": true, "limit": 2 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "folder", "name": "Photos", "path_lower": "/photos", "path_display": "/Photos" },
                    { ".tag": "file", "name": "a.jpg", "path_lower": "/photos/a.jpg", "path_display": "/Photos/a.jpg" }
                ],
                "cursor": "c1",
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder/continue"))
            .and(body_json(json!({ "cursor": "c1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "folder", "name": "2024", "path_lower": "/photos/2024", "path_display": "/Photos/2024" },
                    { ".tag": "file", "name": "b.jpg", "path_lower": "/photos/2024/b.jpg", "path_display": "/Photos/2024/b.jpg" }
                ],
                "cursor": "c2",
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder/continue"))
            .and(body_json(json!({ "cursor": "c2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "file", "name": "c.jpg", "path_lower": "/photos/2024/c.jpg", "path_display": "/Photos/2024/c.jpg" }
                ],
                "cursor": "c3",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = PrivatePathStrategy::new(client_for(&server), 2);
        let mut traversal = Traversal::new(&strategy, "/Photos");
        let files = collect(&mut traversal).await;

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, ["Photos/a.jpg", "Photos/2024/b.jpg", "Photos/2024/c.jpg"]);
        assert_eq!(traversal.pages_fetched(), 3);
        assert_eq!(
            files[1].locator,
            Locator::Path("/photos/2024/b.jpg".to_string())
        );
        assert!(traversal.next_file().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_link_lists_subfolders_from_a_work_queue() {
        let server = MockServer::start().await;
        let url = "https://www.dropbox.com/scl/fo/abc";
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({
                "path": "",
                "recursive": false,
                "limit": 2000,
                "shared_link": { "url": url }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "folder", "name": "sub" },
                    { ".tag": "file", "name": "top.txt" }
                ],
                "cursor": "root-1",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({
                "path": "/sub",
                "recursive": false,
                "limit": 2000,
                "shared_link": { "url": url }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [
                    { ".tag": "file", "name": "inner.txt", "content_hash": "h" }
                ],
                "cursor": "sub-1",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = SharedLinkStrategy::new(client_for(&server), url, 2000);
        let mut traversal = Traversal::new(&strategy, "");
        let files = collect(&mut traversal).await;

        let paths: Vec<_> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, ["top.txt", "sub/inner.txt"]);
        assert_eq!(
            files[1].locator,
            Locator::SharedLink {
                url: url.to_string(),
                path: "/sub/inner.txt".to_string()
            }
        );
        assert_eq!(files[1].content_hash.as_deref(), Some("h"));
        assert_eq!(traversal.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn shared_link_finishes_cursor_chain_before_queued_subfolder() {
        let server = MockServer::start().await;
        let url = "https://www.dropbox.com/scl/fo/abc";
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({
                "path": "",
                "recursive": false,
                "limit": 1,
                "shared_link": { "url": url }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [{ ".tag": "folder", "name": "sub" }],
                "cursor": "r1",
                "has_more": true
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder/continue"))
            .and(body_json(json!({ "cursor": "r1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [{ ".tag": "file", "name": "top.txt" }],
                "cursor": "r2",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/list_folder"))
            .and(body_json(json!({
                "path": "/sub",
                "recursive": false,
                "limit": 1,
                "shared_link": { "url": url }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": [{ ".tag": "file", "name": "in.txt" }],
                "cursor": "s1",
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = SharedLinkStrategy::new(client_for(&server), url, 1);
        let mut traversal = Traversal::new(&strategy, "");

        let first = traversal.next_file().await.unwrap().unwrap();
        assert_eq!(first.relative_path, "top.txt");
        assert_eq!(traversal.pages_fetched(), 2);

        let second = traversal.next_file().await.unwrap().unwrap();
        assert_eq!(second.relative_path, "sub/in.txt");
        assert_eq!(traversal.pages_fetched(), 3);
        assert!(traversal.next_file().await.unwrap().is_none());

        let requests = server.received_requests().await.unwrap();
        let routes: Vec<_> = requests.iter().map(|r| r.url.path()).collect();
        assert_eq!(
            routes,
            [
                "/2/files/list_folder",
                "/2/files/list_folder/continue",
                "/2/files/list_folder"
            ]
        );
    }

    #[test]
    fn shared_entry_without_name_uses_last_path_component() {
        let strategy =
            SharedLinkStrategy::new(DropboxClient::new("unused").unwrap(), "https://x", 10);

        let entry = strategy
            .resolve_entry(
                "/docs",
                serde_json::from_value(json!({
                    ".tag": "file", "name": "", "path_display": "/Docs/Guide.md"
                }))
                .unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "Guide.md");
        assert_eq!(entry.relative_path, "docs/Guide.md");

        let entry = strategy
            .resolve_entry(
                "",
                serde_json::from_value(json!({
                    ".tag": "folder", "name": " ", "path_lower": "/docs/sub"
                }))
                .unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "sub");

        let err = strategy
            .resolve_entry(
                "",
                serde_json::from_value(json!({ ".tag": "file", "name": "", "path_lower": "/" }))
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, TraversalError::UnnamedEntry));
    }

    #[test]
    fn private_entries_fall_back_to_lower_path_then_name() {
        let server_free = DropboxClient::new("unused").unwrap();
        let strategy = PrivatePathStrategy::new(server_free, 10);

        let entry = strategy
            .resolve_entry(
                "/Docs",
                serde_json::from_value(json!({
                    ".tag": "file", "name": "A.txt", "path_lower": "/docs/a.txt"
                }))
                .unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.relative_path, "docs/a.txt");

        let entry = strategy
            .resolve_entry(
                "/Docs",
                serde_json::from_value(json!({ ".tag": "file", "name": "only-name.txt" }))
                    .unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.relative_path, "only-name.txt");
        assert_eq!(entry.locator, Locator::Path("/only-name.txt".to_string()));
    }

    #[test]
    fn entry_without_path_or_name_is_an_error() {
        let strategy = PrivatePathStrategy::new(DropboxClient::new("unused").unwrap(), 10);
        let err = strategy
            .resolve_entry(
                "/Docs",
                serde_json::from_value(json!({ ".tag": "file", "name": "" })).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, TraversalError::UnnamedEntry));
    }

    #[test]
    fn parent_components_in_listing_are_rejected() {
        let strategy = PrivatePathStrategy::new(DropboxClient::new("unused").unwrap(), 10);
        let err = strategy
            .resolve_entry(
                "/Docs",
                serde_json::from_value(json!({
                    ".tag": "file", "name": "x", "path_display": "/../x"
                }))
                .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, TraversalError::Path(_)));
    }

    #[test]
    fn leading_separator_never_escapes_root() {
        let strategy = PrivatePathStrategy::new(DropboxClient::new("unused").unwrap(), 10);
        let entry = strategy
            .resolve_entry(
                "",
                serde_json::from_value(json!({
                    ".tag": "file", "name": "passwd", "path_display": "//etc/passwd"
                }))
                .unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(entry.relative_path, "etc/passwd");
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let strategy = PrivatePathStrategy::new(DropboxClient::new("unused").unwrap(), 10);
        let entry = strategy
            .resolve_entry(
                "/Docs",
                serde_json::from_value(json!({ ".tag": "deleted", "name": "gone" })).unwrap(),
            )
            .unwrap();
        assert!(entry.is_none());
    }
}
