mod client;
mod oauth;

pub use client::{
    Account, DropboxClient, DropboxError, FileMetadata, FolderMetadata,
    ListFolderArg, ListFolderResult, Metadata, SharedLinkArg,
};
pub use oauth::{OAuthClient, OAuthError, OAuthToken};
