//! Top-level download run: credential, classification, traversal, mirror.

use std::path::{Path, PathBuf};

use dropbox_core::{DropboxClient, DropboxError, Metadata};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::config::DownloadConfig;
use crate::error::DownloadError;
use crate::sync::mirror::{DownloadedFile, Mirror, MirrorError};
use crate::sync::traverse::{
    ListingStrategy, PrivatePathStrategy, SharedLinkStrategy, Traversal, TraversalError,
};
use crate::token_broker::{BrokerError, TokenBroker};

const SHARED_LINK_PREFIX: &str = "https://www.dropbox.com";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default, alias = "remoteTarget")]
    pub dropbox_link: Option<String>,
    #[serde(default)]
    pub user_identity: Option<String>,
    #[serde(default)]
    pub destination_folder: Option<String>,
}

impl DownloadRequest {
    pub fn new(dropbox_link: impl Into<String>, user_identity: impl Into<String>) -> Self {
        Self {
            dropbox_link: Some(dropbox_link.into()),
            user_identity: Some(user_identity.into()),
            destination_folder: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination_folder = Some(destination.into());
        self
    }

    fn validated(&self) -> Result<(&str, &str), DownloadError> {
        let target = non_blank(self.dropbox_link.as_deref());
        let identity = non_blank(self.user_identity.as_deref());
        match (target, identity) {
            (Some(target), Some(identity)) => Ok((target, identity)),
            _ => Err(DownloadError::InvalidRequest),
        }
    }
}

/// Everything written by one successful run, in listing order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadManifest {
    pub downloaded_files: Vec<DownloadedFile>,
    pub destination_folder: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTarget<'a> {
    SharedLink(&'a str),
    PrivatePath(&'a str),
}

impl<'a> RemoteTarget<'a> {
    pub fn classify(target: &'a str) -> Self {
        if target.starts_with(SHARED_LINK_PREFIX) {
            RemoteTarget::SharedLink(target)
        } else {
            RemoteTarget::PrivatePath(target)
        }
    }
}

/// Failures below the orchestrator, before translation.
#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Remote(#[from] DropboxError),
    #[error(transparent)]
    Traversal(#[from] TraversalError),
    #[error(transparent)]
    Mirror(#[from] MirrorError),
    #[error("unsupported metadata type for {0}")]
    UnknownEntryType(String),
}

pub struct DownloadService {
    broker: TokenBroker,
    config: DownloadConfig,
}

impl DownloadService {
    pub fn new(broker: TokenBroker, config: DownloadConfig) -> Self {
        Self { broker, config }
    }

    pub fn broker(&self) -> &TokenBroker {
        &self.broker
    }

    pub async fn run(&self, request: DownloadRequest) -> Result<DownloadManifest, DownloadError> {
        let (target, identity) = request.validated().inspect_err(|_| {
            tracing::warn!("download request is missing dropboxLink or userIdentity");
        })?;
        tracing::info!(identity, target, "starting download");

        let credential = self
            .broker
            .obtain_access_credential(identity)
            .await
            .map_err(translate_broker_error)?;

        let local_root = self
            .prepare_local_root(request.destination_folder.as_deref())
            .await?;
        let client = self
            .config
            .remote_client(&credential.access_token)
            .map_err(|err| translate(RunError::Remote(err)))?;

        let mut mirror = Mirror::new(&local_root);
        let mut files = Vec::new();
        if let Err(err) = self
            .mirror_target(&client, RemoteTarget::classify(target), &mut mirror, &mut files)
            .await
        {
            if !files.is_empty() {
                tracing::warn!(
                    written = files.len(),
                    root = %local_root.display(),
                    "download aborted; files already written are left in place"
                );
            }
            return Err(translate(err));
        }

        tracing::info!(
            files = files.len(),
            root = %local_root.display(),
            "download complete"
        );
        Ok(DownloadManifest {
            downloaded_files: files,
            destination_folder: local_root,
        })
    }

    async fn prepare_local_root(&self, destination: Option<&str>) -> Result<PathBuf, DownloadError> {
        let root = match non_blank(destination) {
            Some(destination) => PathBuf::from(destination),
            None => default_root(&self.config.uploads_root),
        };
        let create = async {
            let root = std::path::absolute(&root)?;
            tokio::fs::create_dir_all(&root).await?;
            Ok::<_, std::io::Error>(root)
        };
        create.await.map_err(|err| {
            tracing::error!(root = %root.display(), error = %err, "failed to create destination folder");
            DownloadError::IoWriteFailed
        })
    }

    async fn mirror_target(
        &self,
        client: &DropboxClient,
        target: RemoteTarget<'_>,
        mirror: &mut Mirror,
        files: &mut Vec<DownloadedFile>,
    ) -> Result<(), RunError> {
        let metadata = match target {
            RemoteTarget::SharedLink(url) => {
                tracing::debug!("detected shared Dropbox link");
                client.get_shared_link_metadata(url).await?
            }
            RemoteTarget::PrivatePath(path) => {
                tracing::debug!("detected private Dropbox path");
                client.get_metadata(path).await?
            }
        };

        match metadata {
            Metadata::File(file) => {
                let name = non_blank(Some(file.name.as_str()))
                    .map(str::to_string)
                    .or_else(|| last_segment(target))
                    .ok_or(TraversalError::UnnamedEntry)?;
                tracing::info!(name = %name, "downloading single file");
                let bytes = match target {
                    RemoteTarget::SharedLink(url) => client.get_shared_link_file(url, None).await?,
                    RemoteTarget::PrivatePath(path) => client.download(path).await?,
                };
                files.push(mirror.materialize_single(&name, &bytes).await?);
            }
            Metadata::Folder(folder) => {
                tracing::info!(name = %folder.name, "downloading folder");
                let (strategy, root): (Box<dyn ListingStrategy>, &str) = match target {
                    RemoteTarget::SharedLink(url) => (
                        Box::new(SharedLinkStrategy::new(
                            client.clone(),
                            url,
                            self.config.list_limit,
                        )),
                        "",
                    ),
                    RemoteTarget::PrivatePath(path) => (
                        Box::new(PrivatePathStrategy::new(
                            client.clone(),
                            self.config.list_limit,
                        )),
                        path,
                    ),
                };
                let mut traversal = Traversal::new(strategy.as_ref(), root);
                while let Some(entry) = traversal.next_file().await? {
                    tracing::debug!(name = %entry.name, path = %entry.relative_path, "downloading file");
                    let bytes = strategy.download_entry(&entry).await?;
                    files.push(mirror.materialize(&entry, &bytes).await?);
                }
            }
            Metadata::Other => {
                let target = match target {
                    RemoteTarget::SharedLink(value) | RemoteTarget::PrivatePath(value) => value,
                };
                return Err(RunError::UnknownEntryType(target.to_string()));
            }
        }
        Ok(())
    }
}

fn translate_broker_error(err: BrokerError) -> DownloadError {
    match err {
        BrokerError::NotAuthorized(_) | BrokerError::Revoked(_) => DownloadError::UserNotAuthorized,
        BrokerError::Refresh(_) => DownloadError::TokenRefreshFailed,
        BrokerError::Store(err) => {
            tracing::error!(error = %err, "credential lookup failed");
            DownloadError::UserNotFound
        }
    }
}

/// Single point where remote, traversal and filesystem failures become
/// public categories.
fn translate(err: RunError) -> DownloadError {
    tracing::error!(error = %err, "download failed");
    match err {
        RunError::Remote(err) | RunError::Traversal(TraversalError::Remote(err)) => {
            translate_remote(&err)
        }
        RunError::Traversal(_) => DownloadError::UnexpectedDownloadError,
        RunError::Mirror(MirrorError::Io { .. }) => DownloadError::IoWriteFailed,
        RunError::Mirror(_) => DownloadError::UnexpectedDownloadError,
        RunError::UnknownEntryType(_) => DownloadError::UnknownRemoteEntryType,
    }
}

fn translate_remote(err: &DropboxError) -> DownloadError {
    if err.summary_contains("access_denied") {
        DownloadError::AccessDenied
    } else if err.summary_contains("not_found") {
        DownloadError::RemoteTargetNotFound
    } else {
        if err.is_timeout() {
            tracing::warn!("remote call timed out");
        }
        DownloadError::UnexpectedDownloadError
    }
}

fn default_root(uploads_root: &Path) -> PathBuf {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    uploads_root.join(millis.to_string())
}

fn last_segment(target: RemoteTarget<'_>) -> Option<String> {
    match target {
        RemoteTarget::PrivatePath(path) => path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string),
        RemoteTarget::SharedLink(_) => None,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
