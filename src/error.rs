use std::fmt;

use thiserror::Error;

/// Startup-only failure: missing credentials or an unusable config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required; set it in the environment or a .env file")]
    MissingCredential { var: &'static str },
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
}

/// Which uniqueness constraint an insert tripped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    UniqueMediaId,
    AssignedFilename,
}

impl fmt::Display for DuplicateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniqueMediaId => f.write_str("unique_media_id"),
            Self::AssignedFilename => f.write_str("assigned_filename"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists for owner {owner_id} ({field})")]
    Duplicate { owner_id: i64, field: DuplicateField },
    #[error("record store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("record store io failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("io failure while writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Every way `archive` can fail. Losing an insert race for the same object
/// is not a failure and never ends up here.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_error_names_the_constraint() {
        let err = StoreError::Duplicate {
            owner_id: 7,
            field: DuplicateField::AssignedFilename,
        };
        assert_eq!(
            err.to_string(),
            "record already exists for owner 7 (assigned_filename)"
        );
    }

    #[test]
    fn archive_error_wraps_download_message() {
        let err = ArchiveError::from(DownloadError::Transport("timed out".into()));
        assert_eq!(err.to_string(), "download failed: transport failure: timed out");
    }
}
