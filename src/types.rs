//! Role tags and typed discrepancies shared across the crate.
//!
//! Role tags are MIME-like string constants recorded in the manifest's
//! "additional types" column. The closed `RoleTag` enum carries the
//! parent/child adjacency (metadata -> view -> thumbnail, context info
//! hanging off the metadata file) so relationship checks never compare raw
//! strings.

use std::fmt;
use std::path::{Path, PathBuf};

// ── Tag vocabulary ──────────────────────────────────────────────────────

pub(crate) const METADATA_TAG: &str = "application/x.vnd.abi.scaffold.meta+json";
pub(crate) const VIEW_TAG: &str = "application/x.vnd.abi.scaffold.view+json";
pub(crate) const THUMBNAIL_TAG: &str = "image/x.vnd.abi.scaffold.thumbnail";
pub(crate) const DIRECTORY_TAG: &str = "inode/vnd.abi.scaffold";
pub(crate) const CONTEXT_INFO_TAG: &str = "application/x.vnd.abi.context-information+json";
pub(crate) const PLOT_CSV_TAG: &str = "text/x.vnd.abi.plot+csv";
pub(crate) const PLOT_TSV_TAG: &str = "text/x.vnd.abi.plot+tab-separated-values";

/// Retired tag spellings. Rows still carrying one are reported as
/// OldAnnotation; the fix clears the cell.
pub(crate) const DEPRECATED_TAGS: &[&str] = &[
    "inode/vnd.abi.scaffold+directory",
    "inode/vnd.abi.scaffold+file",
    "inode/vnd.abi.scaffold+thumbnail",
];

/// Sentinel `id` value identifying a context-info descriptor file.
pub(crate) const CONTEXT_INFO_ID: &str = "sparc.science.context_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum RoleTag {
    Metadata,
    View,
    Thumbnail,
    /// Annotating a directory is never valid; kept in the vocabulary so the
    /// reconciler can flag it.
    Directory,
    ContextInfo,
}

impl RoleTag {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => METADATA_TAG,
            Self::View => VIEW_TAG,
            Self::Thumbnail => THUMBNAIL_TAG,
            Self::Directory => DIRECTORY_TAG,
            Self::ContextInfo => CONTEXT_INFO_TAG,
        }
    }

    pub(crate) fn parse(tag: &str) -> Option<Self> {
        match tag {
            METADATA_TAG => Some(Self::Metadata),
            VIEW_TAG => Some(Self::View),
            THUMBNAIL_TAG => Some(Self::Thumbnail),
            DIRECTORY_TAG => Some(Self::Directory),
            CONTEXT_INFO_TAG => Some(Self::ContextInfo),
            _ => None,
        }
    }

    /// Human word used in finding messages.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::View => "view",
            Self::Thumbnail => "thumbnail",
            Self::Directory => "directory",
            Self::ContextInfo => "context info",
        }
    }

    /// Role this role must be derived from, if any.
    pub(crate) fn parent_role(&self) -> Option<RoleTag> {
        match self {
            Self::View => Some(Self::Metadata),
            Self::Thumbnail => Some(Self::View),
            Self::ContextInfo => Some(Self::Metadata),
            Self::Metadata | Self::Directory => None,
        }
    }

    /// Role of the children this role is a source of, if any.
    pub(crate) fn child_role(&self) -> Option<RoleTag> {
        match self {
            Self::Metadata => Some(Self::View),
            Self::View => Some(Self::Thumbnail),
            Self::Thumbnail | Self::Directory | Self::ContextInfo => None,
        }
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Discrepancies ───────────────────────────────────────────────────────

/// A detected mismatch between manifest declarations and on-disk reality.
/// Pure derived values: recomputed from scratch each reconciliation pass and
/// never mutated. `Ord` so a pass's output can be compared as a set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Discrepancy {
    /// A row annotated with a retired tag, regardless of disk state.
    OldAnnotation { location: PathBuf, tag: String },
    /// A classified disk file with no same-identity annotation of its role.
    NotAnnotated { location: PathBuf, role: RoleTag },
    /// An annotated location the disk no longer backs in that role.
    IncorrectAnnotation { location: PathBuf, role: RoleTag },
    /// A derived-from declaration that is missing, ambiguous, or points
    /// outside the expected parent set. `targets` is the repair candidate
    /// pool.
    IncorrectDerivedFrom {
        location: PathBuf,
        role: RoleTag,
        targets: Vec<PathBuf>,
    },
    /// A source-of declaration that is missing, names an incompatible role,
    /// or points at a file that does not exist.
    IncorrectSourceOf {
        location: PathBuf,
        role: RoleTag,
        targets: Vec<PathBuf>,
    },
}

impl Discrepancy {
    pub(crate) fn location(&self) -> &Path {
        match self {
            Self::OldAnnotation { location, .. }
            | Self::NotAnnotated { location, .. }
            | Self::IncorrectAnnotation { location, .. }
            | Self::IncorrectDerivedFrom { location, .. }
            | Self::IncorrectSourceOf { location, .. } => location,
        }
    }

    pub(crate) fn message(&self) -> String {
        match self {
            Self::OldAnnotation { location, tag } => {
                format!(
                    "Error: '{}' is annotated with the retired tag '{tag}'.",
                    location.display()
                )
            }
            Self::NotAnnotated { location, role } => {
                format!(
                    "Error: found scaffold '{}' file that is not annotated '{}'.",
                    role.label(),
                    location.display()
                )
            }
            Self::IncorrectAnnotation { location, role } => {
                format!(
                    "Error: file '{}' either does not exist or is not a scaffold '{}' file.",
                    location.display(),
                    role.label()
                )
            }
            Self::IncorrectDerivedFrom { location, role, .. } => {
                let parent = role
                    .parent_role()
                    .map(|r| r.label())
                    .unwrap_or("unknown");
                format!(
                    "Error: '{}' file '{}' either has no derived-from file or it is not derived from a scaffold '{parent}' file.",
                    role.label(),
                    location.display()
                )
            }
            Self::IncorrectSourceOf { location, role, .. } => {
                let child = role.child_role().map(|r| r.label()).unwrap_or("unknown");
                format!(
                    "Error: '{}' file '{}' either has no '{child}' file or it is annotated to an incorrect file.",
                    role.label(),
                    location.display()
                )
            }
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}
