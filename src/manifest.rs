//! Manifest store: every manifest table under the dataset root, loaded into
//! one logical table and written back a file at a time.
//!
//! A manifest table is a `manifest.csv` beside the files it describes. One
//! file is one sheet: plain `manifest.csv` is the sheet `main`, the spelling
//! `manifest.<name>.csv` names its sheet. Rows are tagged with their source
//! directory and sheet at load time; a `location` is derived for every row
//! with a non-empty filename. Unknown columns ride along untouched so a
//! rewrite never loses data.
//!
//! Every mutation is flushed to disk before it returns. Consumers must
//! re-read the store after any mutation instead of caching entity lists;
//! stale lists are the primary source of bad repair decisions.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::annotations::Annotation;
use crate::error::{CurationError, Result};
use crate::types::RoleTag;
use crate::util::{absolute_path, is_same_file, normalize_path};

// Canonical column names (case-sensitive).
pub(crate) const FILENAME_COLUMN: &str = "filename";
pub(crate) const ADDITIONAL_TYPES_COLUMN: &str = "additional types";
pub(crate) const DERIVED_FROM_COLUMN: &str = "isDerivedFrom";
pub(crate) const SOURCE_OF_COLUMN: &str = "isSourceOf";
pub(crate) const SUPPLEMENTAL_JSON_COLUMN: &str = "supplemental json metadata";

// Virtual columns attached at load time, never persisted.
pub(crate) const LOCATION_COLUMN: &str = "location";
pub(crate) const MANIFEST_DIR_COLUMN: &str = "manifest_dir";
pub(crate) const SHEET_COLUMN: &str = "sheet";

const MANIFEST_FILENAME: &str = "manifest.csv";
const DEFAULT_SHEET: &str = "main";

// ── One table file ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ManifestTable {
    path: PathBuf,
    dir: PathBuf,
    sheet: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ManifestTable {
    fn read(path: &Path) -> Result<ManifestTable> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        let path = absolute_path(path);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let sheet = sheet_name(&path);
        Ok(ManifestTable {
            path,
            dir,
            sheet,
            headers,
            rows,
        })
    }

    /// Full rewrite of the owning file, scoped to this sheet only.
    fn write(&self) -> Result<()> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            let mut padded = row.clone();
            padded.resize(self.headers.len(), String::new());
            writer.write_record(&padded)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(index) = self.column_index(name) {
            return index;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.resize(self.headers.len(), String::new());
        }
        self.headers.len() - 1
    }

    fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        Some(self.rows[row].get(index).map(String::as_str).unwrap_or(""))
    }

    fn set_cell(&mut self, row: usize, column: &str, value: &str) {
        let index = self.ensure_column(column);
        let cells = &mut self.rows[row];
        if cells.len() <= index {
            cells.resize(index + 1, String::new());
        }
        cells[index] = value.to_string();
    }

    fn location(&self, row: usize) -> Option<PathBuf> {
        let filename = self.cell(row, FILENAME_COLUMN)?.trim();
        if filename.is_empty() {
            return None;
        }
        Some(normalize_path(&self.dir.join(filename)))
    }
}

fn sheet_name(path: &Path) -> String {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return DEFAULT_SHEET.to_string();
    };
    match stem.strip_prefix("manifest.") {
        Some(sheet) if !sheet.is_empty() => sheet.to_string(),
        _ => DEFAULT_SHEET.to_string(),
    }
}

fn is_manifest_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name == MANIFEST_FILENAME || (name.starts_with("manifest.") && name.ends_with(".csv"))
}

// ── The store ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct ManifestStore {
    dataset_root: PathBuf,
    tables: Vec<ManifestTable>,
}

impl ManifestStore {
    /// Load every manifest table under `dataset_root`. Column-name drift on
    /// the derived-from column is repaired once and the store reloaded; a
    /// second sanitization requirement is a fatal bad-manifest condition.
    pub(crate) fn load(dataset_root: &Path) -> Result<ManifestStore> {
        let dataset_root = absolute_path(dataset_root);
        let mut tables = read_tables(&dataset_root)?;
        if first_unsanitized(&tables).is_some() {
            sanitize_derived_from(&mut tables)?;
            tables = read_tables(&dataset_root)?;
            if let Some(bad) = first_unsanitized(&tables) {
                return Err(CurationError::BadManifest(bad));
            }
        }
        Ok(ManifestStore {
            dataset_root,
            tables,
        })
    }

    /// Re-read every table from disk. Called after each repair so no
    /// consumer ever sees a stale row.
    pub(crate) fn reload(&mut self) -> Result<()> {
        let root = self.dataset_root.clone();
        *self = ManifestStore::load(&root)?;
        Ok(())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.rows.is_empty())
    }

    /// All values of `output_column` for rows where `column` equals `value`.
    /// Matching is exact cell equality, except on the location column where
    /// file identity is used because relative spellings vary.
    pub(crate) fn get_matching(
        &self,
        column: &str,
        value: &str,
        output_column: &str,
    ) -> Vec<String> {
        let mut out = Vec::new();
        for table in &self.tables {
            for row in 0..table.rows.len() {
                if self.row_matches(table, row, column, value) {
                    if let Some(cell) = virtual_or_cell(table, row, output_column) {
                        out.push(cell);
                    }
                }
            }
        }
        out
    }

    fn row_matches(&self, table: &ManifestTable, row: usize, column: &str, value: &str) -> bool {
        if column == LOCATION_COLUMN {
            return table
                .location(row)
                .map(|loc| is_same_file(&loc, Path::new(value)))
                .unwrap_or(false);
        }
        virtual_or_cell(table, row, column)
            .map(|cell| cell == value)
            .unwrap_or(false)
    }

    /// Set `column` to `new_value` for every row owning `location`,
    /// creating the column (and, when no row exists yet, the row and even
    /// the manifest file) as needed. Each affected table is persisted
    /// before this returns.
    pub(crate) fn update_column(
        &mut self,
        location: &Path,
        column: &str,
        new_value: &str,
    ) -> Result<()> {
        let mut matches = self.find_rows(location);
        if matches.is_empty() {
            matches = vec![self.append_row(location)?];
        }
        for (table_index, row) in matches {
            let table = &mut self.tables[table_index];
            table.set_cell(row, column, new_value);
            table.write()?;
        }
        Ok(())
    }

    /// Fail fast when the directory owning `location` cannot be written;
    /// every fix in it would fail identically.
    pub(crate) fn check_write_access(&self, location: &Path) -> Result<()> {
        let dir = location
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let meta = std::fs::metadata(&dir)?;
        if meta.permissions().readonly() {
            return Err(CurationError::NoWriteAccess(dir));
        }
        Ok(())
    }

    fn find_rows(&self, location: &Path) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (table_index, table) in self.tables.iter().enumerate() {
            for row in 0..table.rows.len() {
                if table
                    .location(row)
                    .map(|loc| is_same_file(&loc, location))
                    .unwrap_or(false)
                {
                    out.push((table_index, row));
                }
            }
        }
        out
    }

    /// No manifest row describes `location`: append one to the manifest in
    /// the file's own directory, creating the manifest file if the
    /// directory has none.
    fn append_row(&mut self, location: &Path) -> Result<(usize, usize)> {
        let dir = location
            .parent()
            .map(absolute_path)
            .unwrap_or_else(|| PathBuf::from("."));
        let filename = location
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let table_index = match self
            .tables
            .iter()
            .position(|table| is_same_file(&table.dir, &dir))
        {
            Some(index) => index,
            None => {
                self.tables.push(ManifestTable {
                    path: dir.join(MANIFEST_FILENAME),
                    dir: dir.clone(),
                    sheet: DEFAULT_SHEET.to_string(),
                    headers: vec![FILENAME_COLUMN.to_string()],
                    rows: Vec::new(),
                });
                self.tables.len() - 1
            }
        };

        let table = &mut self.tables[table_index];
        let width = table.headers.len();
        table.rows.push(vec![String::new(); width]);
        let row = table.rows.len() - 1;
        table.set_cell(row, FILENAME_COLUMN, &filename);
        table.write()?;
        Ok((table_index, row))
    }

    // ── Typed accessors over the logical table ──────────────────────

    /// Rows whose role-tag cell parses as a recognized tag, wrapped as
    /// annotation entities.
    pub(crate) fn annotations(&self) -> Vec<Annotation> {
        let mut out = Vec::new();
        for table in &self.tables {
            for row in 0..table.rows.len() {
                let Some(tag) = table.cell(row, ADDITIONAL_TYPES_COLUMN) else {
                    continue;
                };
                let Some(role) = RoleTag::parse(tag.trim()) else {
                    continue;
                };
                let Some(filename) = table.cell(row, FILENAME_COLUMN) else {
                    continue;
                };
                if filename.trim().is_empty() {
                    continue;
                }
                out.push(Annotation::from_row(
                    &table.dir,
                    filename.trim(),
                    role,
                    table.cell(row, DERIVED_FROM_COLUMN).unwrap_or(""),
                    table.cell(row, SOURCE_OF_COLUMN).unwrap_or(""),
                ));
            }
        }
        out
    }

    /// Locations of rows whose role-tag cell equals `tag` exactly.
    pub(crate) fn locations_with_tag(&self, tag: &str) -> Vec<PathBuf> {
        self.get_matching(ADDITIONAL_TYPES_COLUMN, tag, LOCATION_COLUMN)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub(crate) fn source_of_cells(&self, location: &Path) -> Vec<String> {
        self.get_matching(
            LOCATION_COLUMN,
            &location.to_string_lossy(),
            SOURCE_OF_COLUMN,
        )
    }

    pub(crate) fn derived_from_cells(&self, location: &Path) -> Vec<String> {
        self.get_matching(
            LOCATION_COLUMN,
            &location.to_string_lossy(),
            DERIVED_FROM_COLUMN,
        )
    }

    pub(crate) fn tags_of_filename(&self, filename: &str) -> Vec<String> {
        self.get_matching(FILENAME_COLUMN, filename, ADDITIONAL_TYPES_COLUMN)
    }

    pub(crate) fn locations_of_filename(&self, filename: &str) -> Vec<PathBuf> {
        self.get_matching(FILENAME_COLUMN, filename, LOCATION_COLUMN)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }

    pub(crate) fn filename_of(&self, location: &Path) -> Option<String> {
        self.get_matching(
            LOCATION_COLUMN,
            &location.to_string_lossy(),
            FILENAME_COLUMN,
        )
        .into_iter()
        .next()
    }

    pub(crate) fn manifest_dir_of(&self, location: &Path) -> Option<PathBuf> {
        self.get_matching(
            LOCATION_COLUMN,
            &location.to_string_lossy(),
            MANIFEST_DIR_COLUMN,
        )
        .into_iter()
        .next()
        .map(PathBuf::from)
    }
}

fn virtual_or_cell(table: &ManifestTable, row: usize, column: &str) -> Option<String> {
    match column {
        LOCATION_COLUMN => table.location(row).map(|l| l.to_string_lossy().to_string()),
        MANIFEST_DIR_COLUMN => Some(table.dir.to_string_lossy().to_string()),
        SHEET_COLUMN => Some(table.sheet.clone()),
        _ => table.cell(row, column).map(str::to_string),
    }
}

fn read_tables(dataset_root: &Path) -> Result<Vec<ManifestTable>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dataset_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_manifest_file(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    let mut tables = Vec::new();
    for path in paths {
        tables.push(ManifestTable::read(&path)?);
    }
    Ok(tables)
}

/// Rename case-drifted spellings of the derived-from column to the
/// canonical name and rewrite the owning files. A drifted spelling beside
/// an existing canonical column cannot be merged automatically and is left
/// in place for the reload check to reject.
fn sanitize_derived_from(tables: &mut [ManifestTable]) -> Result<()> {
    for table in tables.iter_mut() {
        if table.column_index(DERIVED_FROM_COLUMN).is_some() {
            continue;
        }
        let mut dirty = false;
        for header in &mut table.headers {
            if header != DERIVED_FROM_COLUMN && header.eq_ignore_ascii_case(DERIVED_FROM_COLUMN) {
                warn!(
                    manifest = %table.path.display(),
                    found = %header,
                    "renaming drifted derived-from column"
                );
                *header = DERIVED_FROM_COLUMN.to_string();
                dirty = true;
            }
        }
        if dirty {
            table.write()?;
        }
    }
    Ok(())
}

fn first_unsanitized(tables: &[ManifestTable]) -> Option<PathBuf> {
    for table in tables {
        let drifted = table
            .headers
            .iter()
            .any(|h| h != DERIVED_FROM_COLUMN && h.eq_ignore_ascii_case(DERIVED_FROM_COLUMN));
        if drifted {
            return Some(table.path.clone());
        }
    }
    None
}
