use thiserror::Error;

pub const NOT_AUTHORIZED_MESSAGE: &str = "Dropbox access not authorized for this user. Please ensure the user has pre-authorized your application.";

/// Externally visible failure categories of a download run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("'dropboxLink' and 'userIdentity' are required")]
    InvalidRequest,
    #[error("{}", NOT_AUTHORIZED_MESSAGE)]
    UserNotAuthorized,
    #[error("User not found")]
    UserNotFound,
    #[error("Access denied to the Dropbox link")]
    AccessDenied,
    #[error("Dropbox link not found")]
    RemoteTargetNotFound,
    #[error("Failed to refresh access token")]
    TokenRefreshFailed,
    #[error("Failed to write downloaded file")]
    IoWriteFailed,
    #[error("Unknown Dropbox metadata type")]
    UnknownRemoteEntryType,
    #[error("An unexpected error occurred")]
    UnexpectedDownloadError,
}

impl DownloadError {
    /// HTTP status equivalent of the category.
    pub fn status_code(&self) -> u16 {
        match self {
            DownloadError::InvalidRequest => 400,
            DownloadError::UserNotAuthorized => 401,
            DownloadError::AccessDenied => 403,
            DownloadError::UserNotFound | DownloadError::RemoteTargetNotFound => 404,
            DownloadError::TokenRefreshFailed
            | DownloadError::IoWriteFailed
            | DownloadError::UnknownRemoteEntryType
            | DownloadError::UnexpectedDownloadError => 500,
        }
    }
}
