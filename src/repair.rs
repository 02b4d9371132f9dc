//! Repair driver: applies one fix at a time and re-derives the discrepancy
//! list until a fixed point.
//!
//! Discrepancies are not independent (writing a derived-from cell can clear
//! a complementary source-of finding), so a one-pass apply-all strategy is
//! unsafe. After every single mutation the store is reloaded from disk and
//! the whole list recomputed. A fix that changes nothing advances a cursor
//! instead; once the cursor has walked the entire list without progress the
//! run ends in `Stuck`. That bounds the loop at O(|E|^2) fix attempts.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::classify::DiskInventory;
use crate::error::Result;
use crate::manifest::{
    ManifestStore, ADDITIONAL_TYPES_COLUMN, DERIVED_FROM_COLUMN, SOURCE_OF_COLUMN,
};
use crate::reconcile::collect_discrepancies;
use crate::types::{Discrepancy, RoleTag};
use crate::util::{common_prefix_len, is_same_file};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RepairOutcome {
    /// The discrepancy list reached empty.
    Converged,
    /// Every remaining discrepancy was tried without progress. Repairs made
    /// along the way stay persisted; the remaining findings are carried.
    Stuck(Vec<Discrepancy>),
}

#[derive(Debug)]
pub(crate) struct RepairReport {
    pub(crate) outcome: RepairOutcome,
    /// Individual fix applications, for the termination bound.
    pub(crate) attempts: usize,
}

/// Run the fixed-point loop. The disk inventory stays valid throughout:
/// fixes only ever mutate manifest tables, never classified files.
pub(crate) fn run_repair(
    inventory: &DiskInventory,
    store: &mut ManifestStore,
) -> Result<RepairReport> {
    let mut errors = collect_discrepancies(inventory, store);
    let mut index = 0;
    let mut attempts = 0;

    while !errors.is_empty() {
        let current = errors[index].clone();
        debug!(finding = %current, "applying fix");
        apply_fix(store, &current)?;
        attempts += 1;
        store.reload()?;

        let next = collect_discrepancies(inventory, store);
        if same_set(&errors, &next) {
            // No observable difference: try the next finding, give up once
            // every one of them has been tried.
            index += 1;
            if index >= errors.len() {
                info!(remaining = next.len(), attempts, "repair stuck");
                return Ok(RepairReport {
                    outcome: RepairOutcome::Stuck(next),
                    attempts,
                });
            }
        } else {
            errors = next;
            index = 0;
        }
    }

    info!(attempts, "repair converged");
    Ok(RepairReport {
        outcome: RepairOutcome::Converged,
        attempts,
    })
}

/// Order-independent comparison of two discrepancy lists.
fn same_set(a: &[Discrepancy], b: &[Discrepancy]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

/// One fix for one finding. Old and incorrect annotations clear the tag,
/// missing annotations set it, relationship findings rewrite the cell from
/// the finding's candidate pool. Write access is verified first so a
/// read-only directory fails the run before half the batch is applied.
fn apply_fix(store: &mut ManifestStore, finding: &Discrepancy) -> Result<()> {
    store.check_write_access(finding.location())?;
    match finding {
        Discrepancy::OldAnnotation { location, .. }
        | Discrepancy::IncorrectAnnotation { location, .. } => {
            store.update_column(location, ADDITIONAL_TYPES_COLUMN, "")
        }
        Discrepancy::NotAnnotated { location, role } => {
            store.update_column(location, ADDITIONAL_TYPES_COLUMN, role.as_str())
        }
        Discrepancy::IncorrectDerivedFrom {
            location, targets, ..
        } => {
            // A file has at most one valid parent: always collapse to the
            // single best candidate.
            let names = candidate_names(store, location, targets);
            let value = pick_best(store, location, names);
            store.update_column(location, DERIVED_FROM_COLUMN, &value)
        }
        Discrepancy::IncorrectSourceOf {
            location,
            role,
            targets,
        } => {
            let names = candidate_names(store, location, targets);
            let value = match role {
                // Metadata legitimately has many children.
                RoleTag::Metadata => names.join("\n"),
                // A view has exactly one thumbnail.
                _ => pick_best(store, location, names),
            };
            store.update_column(location, SOURCE_OF_COLUMN, &value)
        }
    }
}

/// Restrict a candidate pool to files answering to the same manifest as the
/// subject and map them to manifest-relative filenames. Unannotated disk
/// candidates fall back to their plain file name when they live in the
/// subject's directory.
fn candidate_names(store: &ManifestStore, location: &Path, targets: &[PathBuf]) -> Vec<String> {
    let source_dir = store
        .manifest_dir_of(location)
        .or_else(|| location.parent().map(Path::to_path_buf));
    let Some(source_dir) = source_dir else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for target in targets {
        if let Some(dir) = store.manifest_dir_of(target) {
            if is_same_file(&dir, &source_dir) {
                if let Some(name) = store.filename_of(target) {
                    names.push(name);
                    continue;
                }
            } else {
                continue;
            }
        }
        let co_located = target
            .parent()
            .map(|dir| is_same_file(dir, &source_dir))
            .unwrap_or(false);
        if co_located {
            if let Some(name) = target.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Prefix tie-break against the subject's own filename when more than one
/// candidate remains.
fn pick_best(store: &ManifestStore, location: &Path, names: Vec<String>) -> String {
    if names.len() <= 1 {
        return names.into_iter().next().unwrap_or_default();
    }
    let reference = store.filename_of(location).unwrap_or_else(|| {
        location
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let mut best: Option<(usize, &String)> = None;
    for name in &names {
        let score = common_prefix_len(name, &reference);
        if best.map(|(s, _)| score > s).unwrap_or(true) {
            best = Some((score, name));
        }
    }
    best.map(|(_, name)| name.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEPRECATED_TAGS, METADATA_TAG, VIEW_TAG};
    use std::fs;
    use std::path::Path;

    const METADATA_JSON: &str = r#"[
        {"URL": "scene.obj", "Type": "Surfaces"},
        {"URL": "scene_view.json", "Type": "View"}
    ]"#;
    const VIEW_JSON: &str = r#"{
        "farPlane": 10.0, "nearPlane": 0.1,
        "upVector": [0, 1, 0], "targetPosition": [0, 0, 0], "eyePosition": [0, 0, 5]
    }"#;

    fn scaffold_dataset() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let derivative = root.path().join("derivative");
        fs::create_dir_all(&derivative).unwrap();
        fs::write(derivative.join("scene.json"), METADATA_JSON).unwrap();
        fs::write(derivative.join("scene_view.json"), VIEW_JSON).unwrap();
        fs::write(derivative.join("scene_view_thumbnail.png"), b"png").unwrap();
        root
    }

    fn write_manifest(dir: &Path, content: &str) {
        fs::write(dir.join("manifest.csv"), content).unwrap();
    }

    #[test]
    fn test_unannotated_dataset_converges() {
        let root = scaffold_dataset();
        write_manifest(&root.path().join("derivative"), "filename\n");
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();

        let report = run_repair(&inventory, &mut store).unwrap();
        assert_eq!(report.outcome, RepairOutcome::Converged);
        assert!(collect_discrepancies(&inventory, &store).is_empty());

        // Converged repair is idempotent: a second run changes nothing.
        let second = run_repair(&inventory, &mut store).unwrap();
        assert_eq!(second.outcome, RepairOutcome::Converged);
        assert_eq!(second.attempts, 0);
    }

    #[test]
    fn test_repair_without_any_manifest_creates_one() {
        let root = scaffold_dataset();
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();
        let report = run_repair(&inventory, &mut store).unwrap();
        assert_eq!(report.outcome, RepairOutcome::Converged);
        assert!(root
            .path()
            .join("derivative")
            .join("manifest.csv")
            .is_file());
    }

    #[test]
    fn test_deprecated_tag_cleared_then_reannotated() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            &format!("filename,additional types\nscene.json,{}\n", DEPRECATED_TAGS[0]),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();

        let before = collect_discrepancies(&inventory, &store);
        assert_eq!(
            before
                .iter()
                .filter(|e| matches!(e, Discrepancy::OldAnnotation { .. }))
                .count(),
            1
        );

        let report = run_repair(&inventory, &mut store).unwrap();
        assert_eq!(report.outcome, RepairOutcome::Converged);
        // The file ended up annotated with the current metadata tag.
        assert_eq!(
            store.get_matching("filename", "scene.json", ADDITIONAL_TYPES_COLUMN),
            vec![METADATA_TAG.to_string()]
        );
    }

    #[test]
    fn test_unfixable_findings_end_stuck_within_bound() {
        let root = tempfile::tempdir().unwrap();
        let derivative = root.path().join("derivative");
        fs::create_dir_all(&derivative).unwrap();
        // Two views annotated, no metadata anywhere on disk: their
        // derived-from findings have an empty candidate pool, so every fix
        // writes the same empty cell and makes no progress.
        fs::write(derivative.join("a_view.json"), VIEW_JSON).unwrap();
        fs::write(derivative.join("b_view.json"), VIEW_JSON).unwrap();
        write_manifest(
            &derivative,
            &format!(
                "filename,additional types,isDerivedFrom,isSourceOf\n\
                 a_view.json,{VIEW_TAG},gone.json,a_view_thumbnail.png\n\
                 b_view.json,{VIEW_TAG},gone.json,b_view_thumbnail.png\n\
                 a_view_thumbnail.png,,a_view.json,\n\
                 b_view_thumbnail.png,,b_view.json,\n"
            ),
        );
        fs::write(derivative.join("a_view_thumbnail.png"), b"png").unwrap();
        fs::write(derivative.join("b_view_thumbnail.png"), b"png").unwrap();

        let inventory = DiskInventory::scan(root.path(), 1024 * 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();
        let total = collect_discrepancies(&inventory, &store).len();
        assert!(total > 0);

        let report = run_repair(&inventory, &mut store).unwrap();
        match report.outcome {
            RepairOutcome::Stuck(remaining) => assert!(!remaining.is_empty()),
            other => panic!("expected stuck repair, got {other:?}"),
        }
        assert!(report.attempts <= total * total + total);
    }

    #[test]
    fn test_fix_fails_fast_without_write_access() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let root = scaffold_dataset();
            let derivative = root.path().join("derivative");
            write_manifest(&derivative, "filename\n");
            let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
            let mut store = ManifestStore::load(root.path()).unwrap();
            fs::set_permissions(&derivative, fs::Permissions::from_mode(0o555)).unwrap();

            let err = run_repair(&inventory, &mut store).unwrap_err();
            assert!(matches!(err, crate::error::CurationError::NoWriteAccess(_)));

            fs::set_permissions(&derivative, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    #[test]
    fn test_source_of_fix_prefers_prefix_match() {
        let root = tempfile::tempdir().unwrap();
        let derivative = root.path().join("derivative");
        fs::create_dir_all(&derivative).unwrap();
        fs::write(derivative.join("foo_view.json"), VIEW_JSON).unwrap();
        fs::write(derivative.join("foo_view_thumb.png"), b"png").unwrap();
        fs::write(derivative.join("bar_view_thumb.png"), b"png").unwrap();
        write_manifest(
            &derivative,
            &format!(
                "filename,additional types\n\
                 foo_view.json,{VIEW_TAG}\n\
                 foo_view_thumb.png,\n\
                 bar_view_thumb.png,\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 1024 * 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();
        let finding = Discrepancy::IncorrectSourceOf {
            location: inventory.views[0].clone(),
            role: RoleTag::View,
            targets: inventory.thumbnails.clone(),
        };
        apply_fix(&mut store, &finding).unwrap();
        store.reload().unwrap();
        assert_eq!(
            store.get_matching("filename", "foo_view.json", SOURCE_OF_COLUMN),
            vec!["foo_view_thumb.png".to_string()]
        );
    }
}
