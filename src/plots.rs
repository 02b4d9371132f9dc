//! Plot handling: kind inference for delimited files under the primary
//! subtree, transcoding of a legacy instrument-log text format, and the
//! manifest annotation payload. Rendering thumbnails from plot data is a
//! different tool's job.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::classify::DiskInventory;
use crate::error::Result;
use crate::manifest::{ManifestStore, ADDITIONAL_TYPES_COLUMN, SUPPLEMENTAL_JSON_COLUMN};
use crate::types::{PLOT_CSV_TAG, PLOT_TSV_TAG};

const PLOT_ANNOTATION_VERSION: &str = "1.2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlotKind {
    Timeseries,
    Heatmap,
}

impl PlotKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Timeseries => "timeseries",
            Self::Heatmap => "heatmap",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Plot {
    pub(crate) location: PathBuf,
    pub(crate) kind: PlotKind,
    pub(crate) tab_delimited: bool,
    pub(crate) x_column: usize,
    pub(crate) y_columns: Vec<usize>,
    pub(crate) has_header: bool,
}

/// Infer a plot model from a delimited file. A `time` column whose values
/// strictly increase makes a headered timeseries; otherwise the first three
/// columns of the headerless reading are probed for a strictly increasing
/// one; anything else is treated as a heatmap. Returns None when the file
/// cannot be read at all.
pub(crate) fn infer_plot(path: &Path) -> Option<Plot> {
    let tab_delimited = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tsv"))
        .unwrap_or(false);
    let delimiter = if tab_delimited { b'\t' } else { b',' };

    let (headers, rows) = read_table(path, delimiter, true)?;
    let lowered: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();

    if let Some(x) = lowered.iter().position(|h| h == "time") {
        let kind = if column_strictly_increases(&rows, x) {
            PlotKind::Timeseries
        } else {
            PlotKind::Heatmap
        };
        let y_columns = if kind == PlotKind::Timeseries && x != 0 {
            (x + 1..headers.len()).collect()
        } else {
            Vec::new()
        };
        return Some(Plot {
            location: path.to_path_buf(),
            kind,
            tab_delimited,
            x_column: x,
            y_columns,
            has_header: true,
        });
    }

    // No time header: re-read with the header line as data and probe the
    // first columns for a monotonic axis.
    let (headers, rows) = read_table(path, delimiter, false)?;
    for x in 0..headers.len().min(3) {
        if column_strictly_increases(&rows, x) {
            let y_columns = if x != 0 {
                (x + 1..headers.len()).collect()
            } else {
                Vec::new()
            };
            return Some(Plot {
                location: path.to_path_buf(),
                kind: PlotKind::Timeseries,
                tab_delimited,
                x_column: x,
                y_columns,
                has_header: false,
            });
        }
    }
    Some(Plot {
        location: path.to_path_buf(),
        kind: PlotKind::Heatmap,
        tab_delimited,
        x_column: 0,
        y_columns: Vec::new(),
        has_header: false,
    })
}

/// Read a delimited file into (headers, data rows). With `has_headers`
/// false the first line is data and headers are synthesized as indices.
fn read_table(path: &Path, delimiter: u8, has_headers: bool) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .flexible(true)
        .from_path(path)
        .ok()?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.ok()?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    let headers = if has_headers {
        reader
            .headers()
            .ok()?
            .iter()
            .map(str::to_string)
            .collect()
    } else {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        (0..width).map(|i| i.to_string()).collect()
    };
    Some((headers, rows))
}

/// Strictly increasing numeric column (monotonic and unique).
fn column_strictly_increases(rows: &[Vec<String>], column: usize) -> bool {
    let mut previous: Option<f64> = None;
    if rows.is_empty() {
        return false;
    }
    for row in rows {
        let Some(cell) = row.get(column) else {
            return false;
        };
        let Ok(value) = cell.trim().parse::<f64>() else {
            return false;
        };
        if let Some(prev) = previous {
            if value <= prev {
                return false;
            }
        }
        previous = Some(value);
    }
    true
}

// ── Legacy instrument logs ──────────────────────────────────────────────

/// Transcode a legacy instrument log (`EIT STARTING` ... `+Fin` with
/// `D`-prefixed comma-packed samples) into a sibling csv. Returns the csv
/// path when the log yielded data rows, None otherwise.
pub(crate) fn transcode_instrument_log(path: &Path) -> Option<PathBuf> {
    let text = std::fs::read_to_string(path).ok()?;
    let mut started = false;
    let mut rows: Vec<Vec<String>> = Vec::new();
    for line in text.lines() {
        if line.contains("+Fin") {
            break;
        }
        if !started {
            started = line.contains("EIT STARTING");
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let &[time, data] = tokens.as_slice() else {
            continue;
        };
        let Some(values) = data.strip_prefix('D') else {
            continue;
        };
        let time = time.strip_suffix('s').unwrap_or(time);
        let mut row = vec![time.to_string()];
        row.extend(values.split(',').map(str::to_string));
        rows.push(row);
    }
    if rows.is_empty() {
        return None;
    }

    let csv_path = path.with_extension("csv");
    let result = (|| -> Result<()> {
        // Sample rows carry one value column per electrode; the writer must
        // not reject rows wider than the two-field header.
        let mut writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_path(&csv_path)?;
        writer.write_record(["Time", "V"])?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    })();
    match result {
        Ok(()) => Some(csv_path),
        Err(err) => {
            debug!(path = %path.display(), %err, "failed to transcode instrument log");
            None
        }
    }
}

// ── Annotation payload ──────────────────────────────────────────────────

#[derive(Serialize)]
struct PlotAttrs {
    style: &'static str,
    #[serde(rename = "x-axis", skip_serializing_if = "Option::is_none")]
    x_axis: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delimiter: Option<&'static str>,
    #[serde(rename = "y-axes-columns", skip_serializing_if = "Vec::is_empty")]
    y_axes_columns: Vec<usize>,
    #[serde(rename = "no-header", skip_serializing_if = "std::ops::Not::not")]
    no_header: bool,
}

#[derive(Serialize)]
struct PlotAnnotation {
    version: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
    attrs: PlotAttrs,
}

/// JSON payload recorded in the supplemental-json column; only non-default
/// attributes are included.
pub(crate) fn annotation_payload(plot: &Plot) -> String {
    let annotation = PlotAnnotation {
        version: PLOT_ANNOTATION_VERSION,
        kind: "plot",
        attrs: PlotAttrs {
            style: plot.kind.as_str(),
            x_axis: (plot.x_column != 0).then_some(plot.x_column),
            delimiter: plot.tab_delimited.then_some("tab"),
            y_axes_columns: plot.y_columns.clone(),
            no_header: !plot.has_header,
        },
    };
    serde_json::to_string(&annotation).unwrap_or_default()
}

/// Annotate every classified plot candidate: role tag by flavor plus the
/// inferred model payload. Returns how many files were annotated.
pub(crate) fn annotate_plots(
    inventory: &DiskInventory,
    store: &mut ManifestStore,
) -> Result<usize> {
    let mut annotated = 0;
    for path in &inventory.plots {
        let Some(plot) = infer_plot(path) else {
            continue;
        };
        store.check_write_access(path)?;
        let tag = if plot.tab_delimited {
            PLOT_TSV_TAG
        } else {
            PLOT_CSV_TAG
        };
        store.update_column(path, ADDITIONAL_TYPES_COLUMN, tag)?;
        store.update_column(path, SUPPLEMENTAL_JSON_COLUMN, &annotation_payload(&plot))?;
        annotated += 1;
    }
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_headered_time_column_is_timeseries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        fs::write(&path, "Time,v1,v2\n0,5,6\n1,7,8\n2,9,10\n").unwrap();
        let plot = infer_plot(&path).unwrap();
        assert_eq!(plot.kind, PlotKind::Timeseries);
        assert!(plot.has_header);
        assert_eq!(plot.x_column, 0);
        assert!(plot.y_columns.is_empty());
    }

    #[test]
    fn test_shuffled_time_column_is_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        fs::write(&path, "time,v\n3,1\n1,2\n2,3\n").unwrap();
        let plot = infer_plot(&path).unwrap();
        assert_eq!(plot.kind, PlotKind::Heatmap);
    }

    #[test]
    fn test_headerless_monotonic_column_is_timeseries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.tsv");
        fs::write(&path, "0\t5\n1\t6\n2\t7\n").unwrap();
        let plot = infer_plot(&path).unwrap();
        assert_eq!(plot.kind, PlotKind::Timeseries);
        assert!(!plot.has_header);
        assert!(plot.tab_delimited);
    }

    #[test]
    fn test_payload_includes_only_non_defaults() {
        let plot = Plot {
            location: PathBuf::from("/p/trace.csv"),
            kind: PlotKind::Timeseries,
            tab_delimited: false,
            x_column: 0,
            y_columns: Vec::new(),
            has_header: true,
        };
        let payload = annotation_payload(&plot);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["version"], "1.2.0");
        assert_eq!(value["type"], "plot");
        assert_eq!(value["attrs"]["style"], "timeseries");
        assert!(value["attrs"].get("x-axis").is_none());
        assert!(value["attrs"].get("delimiter").is_none());
        assert!(value["attrs"].get("no-header").is_none());
    }

    #[test]
    fn test_instrument_log_transcodes_to_sibling_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.txt");
        fs::write(
            &path,
            "preamble\nEIT STARTING\n0.5s D1,2,3\n1.0s D4,5,6\n+Fin\ntrailing\n",
        )
        .unwrap();
        let csv_path = transcode_instrument_log(&path).unwrap();
        assert_eq!(csv_path, dir.path().join("capture.csv"));
        let text = fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Time,V"));
        assert_eq!(lines.next(), Some("0.5,1,2,3"));
        assert_eq!(lines.next(), Some("1.0,4,5,6"));
    }

    #[test]
    fn test_plain_text_is_not_an_instrument_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just some notes\nnothing to see\n").unwrap();
        assert!(transcode_instrument_log(&path).is_none());
    }

    #[test]
    fn test_annotate_plots_tags_and_records_payload() {
        let root = tempfile::tempdir().unwrap();
        let primary = root.path().join("primary");
        fs::create_dir_all(&primary).unwrap();
        fs::write(primary.join("trace.csv"), "time,v\n0,1\n1,2\n").unwrap();
        let inventory = DiskInventory::scan(root.path(), 1024);
        let mut store = ManifestStore::load(root.path()).unwrap();
        let annotated = annotate_plots(&inventory, &mut store).unwrap();
        assert_eq!(annotated, 1);

        store.reload().unwrap();
        assert_eq!(
            store.get_matching("filename", "trace.csv", ADDITIONAL_TYPES_COLUMN),
            vec![PLOT_CSV_TAG.to_string()]
        );
        let payloads = store.get_matching("filename", "trace.csv", SUPPLEMENTAL_JSON_COLUMN);
        assert!(payloads[0].contains("timeseries"));
    }
}
