//! Error types shared by every archive operation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::zip::FormatError;

/// Failure kinds surfaced by the builder, writer, inspector and editor.
///
/// Every variant carries the offending path or entry name so callers can
/// report which input caused the failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("primary file not found: {}", .0.display())]
    PrimaryNotFound(PathBuf),

    #[error("corrupt archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("entry escapes the destination directory: {0}")]
    PathTraversal(String),

    #[error("duplicate entry name: {0}")]
    DuplicateEntryName(String),

    #[error("failed to edit {}: {source}", path.display())]
    EditFailed {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("i/o failure on {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip codec: {0}")]
    Codec(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Error::IoFailure {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Maps a failure to open an archive, keeping "not found" distinct.
    pub(crate) fn open_archive(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Error::SourceNotFound(path.to_path_buf())
        } else {
            Error::io(path, source)
        }
    }

    /// Attaches an archive path to a low-level parser failure.
    pub(crate) fn format(path: &Path, err: FormatError) -> Self {
        match err {
            FormatError::Io(source)
                if !matches!(
                    source.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                Error::io(path, source)
            }
            other => Error::CorruptArchive {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn edit_failed(path: &Path, source: Error) -> Self {
        match source {
            already @ Error::EditFailed { .. } => already,
            source => Error::EditFailed {
                path: path.to_path_buf(),
                source: Box::new(source),
            },
        }
    }
}

/// Adds the path being operated on to raw `io::Error`s.
pub(crate) trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
