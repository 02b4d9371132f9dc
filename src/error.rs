use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, CurationError>;

/// Fatal conditions only. Findings about the dataset itself are
/// `Discrepancy` values, not errors.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CurationError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest table error: {0}")]
    Table(#[from] csv::Error),

    /// A manifest still needs schema sanitization after one rewrite-and-reload
    /// cycle. The conflict cannot be resolved automatically.
    #[error("bad manifest '{}': column names conflict with the expected schema", .0.display())]
    BadManifest(PathBuf),

    /// Raised before any repair is attempted in a directory the tool cannot
    /// write to; every subsequent fix there would fail the same way.
    #[error("no write access to annotation directory '{}'", .0.display())]
    NoWriteAccess(PathBuf),
}
