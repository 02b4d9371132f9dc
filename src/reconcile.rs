//! Reconciliation engine: compares the disk classifier's candidate sets
//! against the manifest's annotation entities and produces an ordered list
//! of typed discrepancies.
//!
//! Every pass is a pure function of the current inventory and store. Nothing
//! here mutates state; fixes live in `repair`.

use std::path::PathBuf;

use crate::classify::DiskInventory;
use crate::manifest::ManifestStore;
use crate::types::{Discrepancy, RoleTag, DEPRECATED_TAGS, THUMBNAIL_TAG, VIEW_TAG};
use crate::util::{best_prefix_match, contains_file};

/// The full reconciliation pass. Order matters for the repair cursor:
/// retired tags first, then missing annotations, wrong annotations,
/// complementary view/thumbnail agreement, and finally the relationship
/// checks. Duplicate findings (the complementary pass can re-propose a
/// thumbnail the missing pass already reported) are dropped, first
/// occurrence wins.
pub(crate) fn collect_discrepancies(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut all = Vec::new();
    all.extend(old_annotations(store));
    all.extend(missing_annotations(inventory, store));
    all.extend(incorrect_annotations(inventory, store));
    all.extend(complementary(inventory, store));
    all.extend(incorrect_derived_from(inventory, store));
    all.extend(incorrect_source_of(inventory, store));

    let mut unique: Vec<Discrepancy> = Vec::with_capacity(all.len());
    for finding in all {
        if !unique.contains(&finding) {
            unique.push(finding);
        }
    }
    unique
}

/// Rows still carrying a retired tag, regardless of disk state.
pub(crate) fn old_annotations(store: &ManifestStore) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    for tag in DEPRECATED_TAGS {
        for location in store.locations_with_tag(tag) {
            errors.push(Discrepancy::OldAnnotation {
                location,
                tag: tag.to_string(),
            });
        }
    }
    errors
}

/// Disk candidates with no same-identity annotation of their role.
pub(crate) fn missing_annotations(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    for (role, disk_set) in [
        (RoleTag::Metadata, &inventory.metadata),
        (RoleTag::View, &inventory.views),
        (RoleTag::Thumbnail, &inventory.thumbnails),
    ] {
        let annotated = store.locations_with_tag(role.as_str());
        for file in disk_set {
            if !contains_file(&annotated, file) {
                errors.push(Discrepancy::NotAnnotated {
                    location: file.clone(),
                    role,
                });
            }
        }
    }
    errors
}

/// Annotated locations the disk no longer backs in that role. Thumbnails
/// additionally accept the plot-thumbnail set; the directory tag is always
/// wrong.
pub(crate) fn incorrect_annotations(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    for (role, disk_set) in [
        (RoleTag::Metadata, &inventory.metadata),
        (RoleTag::View, &inventory.views),
    ] {
        for location in store.locations_with_tag(role.as_str()) {
            if !contains_file(disk_set, &location) {
                errors.push(Discrepancy::IncorrectAnnotation { location, role });
            }
        }
    }
    for location in store.locations_with_tag(THUMBNAIL_TAG) {
        if !contains_file(&inventory.thumbnails, &location)
            && !contains_file(&inventory.plot_thumbnails, &location)
        {
            errors.push(Discrepancy::IncorrectAnnotation {
                location,
                role: RoleTag::Thumbnail,
            });
        }
    }
    for location in store.locations_with_tag(RoleTag::Directory.as_str()) {
        errors.push(Discrepancy::IncorrectAnnotation {
            location,
            role: RoleTag::Directory,
        });
    }
    errors
}

/// Derived-from validation for roles with a required parent. Zero declared
/// parents, a single parent outside the expected disk set, or an ambiguous
/// multi-parent declaration all report with the full parent disk set as the
/// repair pool.
pub(crate) fn incorrect_derived_from(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    for annotation in store.annotations() {
        let (disk_set, parent_set) = match annotation.role() {
            RoleTag::View => (&inventory.views, &inventory.metadata),
            RoleTag::Thumbnail => (&inventory.thumbnails, &inventory.views),
            _ => continue,
        };
        let report = match annotation.parents() {
            [] => true,
            [parent] => {
                contains_file(disk_set, annotation.location())
                    && !contains_file(parent_set, parent)
            }
            // Ambiguous: more than one declared parent is rejected outright
            // so the fix can rewrite it to a single candidate.
            _ => true,
        };
        if report {
            errors.push(Discrepancy::IncorrectDerivedFrom {
                location: annotation.location().to_path_buf(),
                role: annotation.role(),
                targets: parent_set.clone(),
            });
        }
    }
    errors
}

/// Source-of validation, walked from the disk side: every on-disk metadata
/// file must declare its views (and context-info descriptors), every
/// on-disk view its thumbnail.
pub(crate) fn incorrect_source_of(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    let metadata_children: Vec<PathBuf> = inventory
        .views
        .iter()
        .chain(inventory.context_info.iter())
        .cloned()
        .collect();
    errors.extend(source_of_for_role(
        store,
        &inventory.metadata,
        RoleTag::Metadata,
        &metadata_children,
    ));
    errors.extend(source_of_for_role(
        store,
        &inventory.views,
        RoleTag::View,
        &inventory.thumbnails,
    ));
    errors
}

fn source_of_for_role(
    store: &ManifestStore,
    disk_files: &[PathBuf],
    role: RoleTag,
    disk_children: &[PathBuf],
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    for file in disk_files {
        let declared: Vec<String> = store
            .source_of_cells(file)
            .iter()
            .flat_map(|cell| cell.lines())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if declared.is_empty() {
            errors.push(Discrepancy::IncorrectSourceOf {
                location: file.clone(),
                role,
                targets: disk_children.to_vec(),
            });
            continue;
        }
        for child in &declared {
            let compatible = store
                .tags_of_filename(child)
                .first()
                .and_then(|tag| RoleTag::parse(tag.trim()))
                .and_then(|child_role| child_role.parent_role())
                .map(|parent_role| parent_role == role)
                .unwrap_or(false);
            if compatible {
                let exists = store
                    .locations_of_filename(child)
                    .first()
                    .map(|location| location.is_file())
                    .unwrap_or(false);
                if !exists {
                    errors.push(Discrepancy::IncorrectSourceOf {
                        location: file.clone(),
                        role,
                        targets: disk_children.to_vec(),
                    });
                }
            } else {
                // Drop the bad entry, offer everything found on disk.
                let mut corrected: Vec<PathBuf> = declared
                    .iter()
                    .filter(|name| *name != child)
                    .map(PathBuf::from)
                    .collect();
                corrected.extend(disk_children.iter().cloned());
                errors.push(Discrepancy::IncorrectSourceOf {
                    location: file.clone(),
                    role,
                    targets: corrected,
                });
            }
        }
    }

    if errors.is_empty() {
        // Walk backward from the children: every declared parent must list
        // the child in its own source-of cell, catching one-sided edits.
        for child in disk_children {
            let Some(child_filename) = store.filename_of(child) else {
                continue;
            };
            for cell in store.derived_from_cells(child) {
                for parent_name in cell.lines().map(str::trim).filter(|n| !n.is_empty()) {
                    let parent_locations = store.locations_of_filename(parent_name);
                    let Some(parent_location) = parent_locations.first() else {
                        continue;
                    };
                    let listed = store
                        .source_of_cells(parent_location)
                        .iter()
                        .flat_map(|cell| cell.lines())
                        .any(|name| name.trim() == child_filename);
                    if !listed {
                        errors.push(Discrepancy::IncorrectSourceOf {
                            location: parent_location.clone(),
                            role,
                            targets: disk_children.to_vec(),
                        });
                    }
                }
            }
        }
    }
    errors
}

/// View/thumbnail agreement pass. A view with no source-of declaration gets
/// the best prefix-matched thumbnail proposed as NotAnnotated; a declared
/// child is verified for its own tag and a non-empty derived-from.
pub(crate) fn complementary(
    inventory: &DiskInventory,
    store: &ManifestStore,
) -> Vec<Discrepancy> {
    let mut errors = Vec::new();
    let mut derived_errors = Vec::new();
    for view in store.locations_with_tag(VIEW_TAG) {
        let declared: Vec<String> = store
            .source_of_cells(&view)
            .iter()
            .flat_map(|cell| cell.lines())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        if declared.is_empty() {
            let reference = view.to_string_lossy();
            if let Some(best) = best_prefix_match(&inventory.thumbnails, &reference) {
                errors.push(Discrepancy::NotAnnotated {
                    location: best.clone(),
                    role: RoleTag::Thumbnail,
                });
            }
            continue;
        }

        for name in &declared {
            let tag_is_thumbnail = store
                .tags_of_filename(name)
                .first()
                .map(|tag| tag.trim() == THUMBNAIL_TAG)
                .unwrap_or(false);
            for child_location in store.locations_of_filename(name) {
                if !tag_is_thumbnail {
                    errors.push(Discrepancy::NotAnnotated {
                        location: child_location.clone(),
                        role: RoleTag::Thumbnail,
                    });
                }
                let has_parent = store
                    .derived_from_cells(&child_location)
                    .iter()
                    .any(|cell| !cell.trim().is_empty());
                if !has_parent {
                    derived_errors.push(Discrepancy::IncorrectDerivedFrom {
                        location: child_location,
                        role: RoleTag::Thumbnail,
                        targets: vec![view.clone()],
                    });
                }
            }
        }
    }
    errors.extend(derived_errors);
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::METADATA_TAG;
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

    fn count_not_annotated(errors: &[Discrepancy]) -> usize {
        errors
            .iter()
            .filter(|e| matches!(e, Discrepancy::NotAnnotated { .. }))
            .count()
    }

    #[test]
    fn test_unannotated_dataset_reports_three_missing() {
        let root = scaffold_dataset();
        write_manifest(&root.path().join("derivative"), "filename\n");
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = collect_discrepancies(&inventory, &store);
        assert_eq!(count_not_annotated(&errors), 3);
    }

    #[test]
    fn test_deprecated_tag_reports_old_annotation() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            "filename,additional types\nscene.json,inode/vnd.abi.scaffold+file\n",
        );
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = old_annotations(&store);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Discrepancy::OldAnnotation { .. }));
    }

    #[test]
    fn test_annotation_without_backing_file_is_incorrect() {
        let root = tempfile::tempdir().unwrap();
        let derivative = root.path().join("derivative");
        fs::create_dir_all(&derivative).unwrap();
        write_manifest(
            &derivative,
            &format!("filename,additional types\ngone.json,{METADATA_TAG}\n"),
        );
        let inventory = DiskInventory::scan(root.path(), 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_annotations(&inventory, &store);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            Discrepancy::IncorrectAnnotation {
                role: RoleTag::Metadata,
                ..
            }
        ));
    }

    #[test]
    fn test_directory_tag_is_always_incorrect() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            "filename,additional types\nscene.json,inode/vnd.abi.scaffold\n",
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_annotations(&inventory, &store);
        assert!(errors
            .iter()
            .any(|e| matches!(e, Discrepancy::IncorrectAnnotation {
                role: RoleTag::Directory,
                ..
            })));
    }

    #[test]
    fn test_identity_matching_across_spellings() {
        let root = scaffold_dataset();
        // Annotated through a ./ spelling; must still count as annotated.
        write_manifest(
            &root.path().join("derivative"),
            &format!(
                "filename,additional types\n./scene.json,{METADATA_TAG}\n\
                 scene_view.json,{VIEW_TAG}\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = missing_annotations(&inventory, &store);
        // Only the thumbnail is unannotated.
        assert_eq!(count_not_annotated(&errors), 1);
    }

    #[test]
    fn test_view_without_parent_reports_derived_from() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            &format!(
                "filename,additional types\nscene.json,{METADATA_TAG}\n\
                 scene_view.json,{VIEW_TAG}\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_derived_from(&inventory, &store);
        let view_error = errors
            .iter()
            .find(|e| matches!(e, Discrepancy::IncorrectDerivedFrom { role: RoleTag::View, .. }))
            .unwrap();
        // The repair pool is the on-disk metadata set.
        match view_error {
            Discrepancy::IncorrectDerivedFrom { targets, .. } => {
                assert_eq!(targets, &inventory.metadata);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_multiple_declared_parents_are_rejected() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            &format!(
                "filename,additional types,isDerivedFrom\n\
                 scene_view.json,{VIEW_TAG},\"scene.json\nother.json\"\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_derived_from(&inventory, &store);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_complementary_proposes_best_prefix_thumbnail() {
        let root = tempfile::tempdir().unwrap();
        let derivative = root.path().join("derivative");
        fs::create_dir_all(&derivative).unwrap();
        fs::write(derivative.join("foo_view.json"), VIEW_JSON).unwrap();
        fs::write(derivative.join("foo_view_thumb.png"), b"png").unwrap();
        fs::write(derivative.join("bar_view_thumb.png"), b"png").unwrap();
        write_manifest(
            &derivative,
            &format!("filename,additional types\nfoo_view.json,{VIEW_TAG}\n"),
        );
        let inventory = DiskInventory::scan(root.path(), 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = complementary(&inventory, &store);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Discrepancy::NotAnnotated { location, role } => {
                assert_eq!(*role, RoleTag::Thumbnail);
                assert!(location.ends_with("foo_view_thumb.png"));
            }
            other => panic!("unexpected finding: {other:?}"),
        }
    }

    #[test]
    fn test_source_of_missing_declaration_reports_disk_children() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            &format!(
                "filename,additional types\nscene.json,{METADATA_TAG}\n\
                 scene_view.json,{VIEW_TAG}\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_source_of(&inventory, &store);
        // Both the metadata file and the view lack a source-of declaration.
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_fully_linked_dataset_is_clean() {
        let root = scaffold_dataset();
        write_manifest(
            &root.path().join("derivative"),
            &format!(
                "filename,additional types,isDerivedFrom,isSourceOf\n\
                 scene.json,{METADATA_TAG},,scene_view.json\n\
                 scene_view.json,{VIEW_TAG},scene.json,scene_view_thumbnail.png\n\
                 scene_view_thumbnail.png,{THUMBNAIL_TAG},scene_view.json,\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        assert!(collect_discrepancies(&inventory, &store).is_empty());
    }

    #[test]
    fn test_backward_pass_catches_one_sided_relationship() {
        let root = scaffold_dataset();
        let derivative = root.path().join("derivative");
        // A context-info file that declares scene.json as its parent, while
        // scene.json's source-of only lists the view. The forward pass is
        // clean; only the backward walk notices the one-sided edit.
        fs::write(
            derivative.join("context.json"),
            r#"{"version": "0.2.0", "id": "sparc.science.context_data"}"#,
        )
        .unwrap();
        write_manifest(
            &derivative,
            &format!(
                "filename,additional types,isDerivedFrom,isSourceOf\n\
                 scene.json,{METADATA_TAG},,scene_view.json\n\
                 scene_view.json,{VIEW_TAG},scene.json,scene_view_thumbnail.png\n\
                 scene_view_thumbnail.png,{THUMBNAIL_TAG},scene_view.json,\n\
                 context.json,,scene.json,\n"
            ),
        );
        let inventory = DiskInventory::scan(root.path(), 2 * 1024 * 1024);
        let store = ManifestStore::load(root.path()).unwrap();
        let errors = incorrect_source_of(&inventory, &store);
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            Discrepancy::IncorrectSourceOf { location, role, .. } => {
                assert!(location.ends_with("scene.json"));
                assert_eq!(*role, RoleTag::Metadata);
            }
            other => panic!("unexpected finding: {other:?}"),
        }
    }
}
