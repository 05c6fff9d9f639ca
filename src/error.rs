use std::io;
use std::path::PathBuf;

/// Structural problems with a folder name.
///
/// Scans recover from these locally by skipping the entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The leading category token is missing, not a digit, out of range, or
    /// not followed by a space.
    #[error("invalid category prefix in folder name {0:?}")]
    InvalidCategory(String),
    /// Nothing usable is left once the prefix is removed.
    #[error("folder name {0:?} has no name part")]
    MissingName(String),
    /// No leading date token matched any known format.
    #[error("folder name {0:?} does not start with a date")]
    MissingDate(String),
    /// A name part that would not survive a round trip through a folder name.
    #[error("name part {0:?} cannot be encoded in a folder name")]
    InvalidName(String),
    /// The path has no usable base name.
    #[error("invalid folder path: {0}")]
    InvalidFolderPath(PathBuf),
}

/// Errors reading or writing a sidecar attribute file.
///
/// A missing sidecar is never an error; it is created on first sight.
#[derive(Debug, thiserror::Error)]
pub enum SidecarError {
    #[error("sidecar I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("sidecar encoding error at {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The primary error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The managed root folder itself could not be listed.
    #[error("root folder {path} is unreadable: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Sidecar(#[from] SidecarError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Rename target already exists or the new id belongs to another entity.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// A type alias for `Result<T, EngineError>`, used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    /// Converts an `Option<T>` to a `Result<T, EngineError>`.
    ///
    /// # Arguments
    ///
    /// * `entity` - A string describing the entity that was not found.
    fn ok_or_not_found(self, entity: &str) -> EngineResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> EngineResult<T> {
        self.ok_or_else(|| EngineError::NotFound(format!("{} not found", entity)))
    }
}

/// Helpers for validating names that are about to hit the filesystem.
pub mod validation {
    use super::*;

    /// Validates a single folder name.
    ///
    /// Rejects empty names, `.`/`..`, path separators and NUL characters.
    pub fn validate_folder_name(name: &str) -> EngineResult<()> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidInput("folder name cannot be empty".to_string()));
        }
        if name == "." || name == ".." {
            return Err(EngineError::InvalidInput(format!("folder name {:?} is reserved", name)));
        }
        if name.contains('\0') {
            return Err(EngineError::InvalidInput("folder name contains null characters".to_string()));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(EngineError::InvalidInput(format!(
                "folder name {:?} contains a path separator",
                name
            )));
        }
        Ok(())
    }
}
