//! Domain view over manifest rows that carry a recognized role tag.

use std::path::{Path, PathBuf};

use crate::types::RoleTag;
use crate::util::{is_same_file, normalize_path};

/// A manifest row with a recognized role tag. Declared derived-from and
/// source-of filenames are resolved to absolute locations by joining them
/// with the row's own manifest directory. Never mutated; rebuilt from the
/// store after every change.
#[derive(Debug, Clone)]
pub(crate) struct Annotation {
    location: PathBuf,
    role: RoleTag,
    parents: Vec<PathBuf>,
    children: Vec<PathBuf>,
}

impl Annotation {
    pub(crate) fn from_row(
        manifest_dir: &Path,
        filename: &str,
        role: RoleTag,
        derived_from: &str,
        source_of: &str,
    ) -> Annotation {
        let resolve = |cell: &str| -> Vec<PathBuf> {
            cell.lines()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| normalize_path(&manifest_dir.join(name)))
                .collect()
        };
        Annotation {
            location: normalize_path(&manifest_dir.join(filename)),
            role,
            parents: resolve(derived_from),
            children: resolve(source_of),
        }
    }

    pub(crate) fn location(&self) -> &Path {
        &self.location
    }

    pub(crate) fn role(&self) -> RoleTag {
        self.role
    }

    /// The declared parent, when exactly one is declared.
    pub(crate) fn parent(&self) -> Option<&Path> {
        match self.parents.as_slice() {
            [single] => Some(single.as_path()),
            _ => None,
        }
    }

    /// Every declared parent. The model treats more than one as invalid;
    /// the reconciler decides what to do about it.
    pub(crate) fn parents(&self) -> &[PathBuf] {
        &self.parents
    }

    pub(crate) fn children(&self) -> &[PathBuf] {
        &self.children
    }
}

/// Two annotations are the same entity when their locations are the same
/// file, regardless of spelling.
impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        is_same_file(&self.location, &other.location)
    }
}
