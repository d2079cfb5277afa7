use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("remote path is empty")]
    Empty,
    #[error("remote path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Normalizes a remote path ("/Docs/A.txt") into a relative one
/// ("Docs/A.txt"). Leading separators and `.` are dropped; `..` and
/// platform prefixes are rejected so the result can never leave a root.
pub fn relative_remote_path(remote_path: &str) -> Result<String, PathError> {
    let mut parts = Vec::new();
    for component in Path::new(remote_path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(remote_path.to_string()));
            }
        }
    }
    if parts.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(parts.join("/"))
}

/// Maps a remote path under `root`.
pub fn local_path_for(root: &Path, remote_path: &str) -> Result<PathBuf, PathError> {
    let relative = relative_remote_path(remote_path)?;
    let mut out = root.to_path_buf();
    for part in relative.split('/') {
        out.push(part);
    }
    Ok(out)
}

/// Joins a child name onto a remote folder path ("" is the root).
pub fn join_remote(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}
