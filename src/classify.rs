//! Disk classifier: walks the dataset tree and sniffs file content into
//! typed candidate sets. Knows nothing about manifests.
//!
//! Classification never fails a scan. Oversized, unreadable, or malformed
//! files simply stay unclassified.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::plots;
use crate::util::absolute_path;

/// Scaffold artifacts live under this subtree.
pub(crate) const DERIVATIVE_DIR: &str = "derivative";
/// Plot source files live under this subtree.
pub(crate) const PRIMARY_DIR: &str = "primary";

/// Renderable graphics primitive names accepted in metadata entries,
/// compared case-insensitively.
const GRAPHICS_TYPES: &[&str] = &["points", "lines", "surfaces", "contours", "streamlines"];

/// Camera keys that must all be present in a view file.
const VIEW_KEYS: &[&str] = &[
    "farPlane",
    "nearPlane",
    "upVector",
    "targetPosition",
    "eyePosition",
];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpeg", "jpg"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DiskInventory {
    pub(crate) metadata: Vec<PathBuf>,
    pub(crate) views: Vec<PathBuf>,
    pub(crate) thumbnails: Vec<PathBuf>,
    pub(crate) context_info: Vec<PathBuf>,
    pub(crate) plots: Vec<PathBuf>,
    /// Images sitting next to plot files; accepted as thumbnails so
    /// plot-generated images are not flagged as bad annotations.
    pub(crate) plot_thumbnails: Vec<PathBuf>,
}

impl DiskInventory {
    /// Classify every file under `dataset_root`. Files at or above
    /// `max_file_size` are skipped without being opened.
    pub(crate) fn scan(dataset_root: &Path, max_file_size: u64) -> DiskInventory {
        let mut inventory = DiskInventory::default();
        let derivative = dataset_root.join(DERIVATIVE_DIR);

        let mut images = Vec::new();
        for entry in WalkDir::new(&derivative).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = absolute_path(entry.path());
            if is_image_like(&path) {
                images.push(path.clone());
            }
            let Some(json) = read_json_guarded(&path, max_file_size) else {
                continue;
            };
            if is_metadata(&json) {
                inventory.metadata.push(path);
            } else if is_view(&json) {
                inventory.views.push(path);
            } else if is_context_info(&json) {
                inventory.context_info.push(path);
            }
        }

        // A thumbnail is only a thumbnail when it sits beside a view file.
        let view_dirs: Vec<PathBuf> = inventory
            .views
            .iter()
            .filter_map(|v| v.parent().map(Path::to_path_buf))
            .collect();
        inventory.thumbnails = images
            .iter()
            .filter(|image| {
                image
                    .parent()
                    .map(|dir| view_dirs.iter().any(|v| v == dir))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let (plots, plot_thumbnails) = scan_plots(&dataset_root.join(PRIMARY_DIR));
        inventory.plots = plots;
        inventory.plot_thumbnails = plot_thumbnails;

        for set in [
            &mut inventory.metadata,
            &mut inventory.views,
            &mut inventory.thumbnails,
            &mut inventory.context_info,
            &mut inventory.plots,
            &mut inventory.plot_thumbnails,
        ] {
            set.sort();
            set.dedup();
        }
        inventory
    }
}

/// Delimited plot sources under the primary subtree. Legacy instrument logs
/// (`.txt`) are transcoded to a sibling csv before joining the set.
fn scan_plots(primary: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut plots = Vec::new();
    let mut images = Vec::new();
    for entry in WalkDir::new(primary).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = absolute_path(entry.path());
        if is_image_like(&path) {
            images.push(path.clone());
        }
        match extension_of(&path).as_deref() {
            Some("csv") | Some("tsv") => plots.push(path),
            Some("txt") => {
                if let Some(transcoded) = plots::transcode_instrument_log(&path) {
                    plots.push(transcoded);
                }
            }
            _ => {}
        }
    }

    let plot_dirs: Vec<PathBuf> = plots
        .iter()
        .filter_map(|p| p.parent().map(Path::to_path_buf))
        .collect();
    let plot_thumbnails = images
        .into_iter()
        .filter(|image| {
            image
                .parent()
                .map(|dir| plot_dirs.iter().any(|p| p == dir))
                .unwrap_or(false)
        })
        .collect();
    (plots, plot_thumbnails)
}

// ── Content sniffing ────────────────────────────────────────────────────

fn read_json_guarded(path: &Path, max_file_size: u64) -> Option<Value> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    if meta.len() >= max_file_size {
        debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
        return None;
    }
    let bytes = fs::read(path).ok()?;
    let text = std::str::from_utf8(&bytes).ok()?;
    serde_json::from_str(text).ok()
}

fn entry_type<'a>(entry: &'a Value) -> Option<&'a str> {
    if entry.get("URL").is_none() {
        return None;
    }
    entry.get("Type").and_then(Value::as_str)
}

fn is_graphics_entry(entry: &Value) -> bool {
    entry_type(entry)
        .map(|t| {
            let lowered = t.to_ascii_lowercase();
            GRAPHICS_TYPES.contains(&lowered.as_str())
        })
        .unwrap_or(false)
}

fn is_view_entry(entry: &Value) -> bool {
    entry_type(entry)
        .map(|t| t.eq_ignore_ascii_case("view"))
        .unwrap_or(false)
}

/// Metadata is a list carrying at least one renderable graphics entry and at
/// least one view reference. Both are required.
fn is_metadata(json: &Value) -> bool {
    let Some(entries) = json.as_array() else {
        return false;
    };
    entries.iter().any(is_graphics_entry) && entries.iter().any(is_view_entry)
}

fn is_view(json: &Value) -> bool {
    let Some(object) = json.as_object() else {
        return false;
    };
    VIEW_KEYS.iter().all(|key| object.contains_key(*key))
}

fn is_context_info(json: &Value) -> bool {
    let Some(object) = json.as_object() else {
        return false;
    };
    object.contains_key("version")
        && object
            .get("id")
            .and_then(Value::as_str)
            .map(|id| id == crate::types::CONTEXT_INFO_ID)
            .unwrap_or(false)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn is_image_like(path: &Path) -> bool {
    let name_matches = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains("thumbnail"))
        .unwrap_or(false);
    let ext_matches = extension_of(path)
        .map(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false);
    name_matches || ext_matches
}
