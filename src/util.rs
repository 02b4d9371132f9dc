use std::path::{Component, Path, PathBuf};

// ── Size strings ────────────────────────────────────────────────────────

/// Unit table for human-readable sizes; index is the power of 1024.
pub(crate) const SIZE_UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Parse a size string such as `400B` or `2MiB` into a byte count.
/// Units are case-sensitive and fractional values are rejected.
pub(crate) fn parse_size(text: &str) -> Result<u64, String> {
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let invalid =
        || format!("'{text}' is not a valid size. Expected forms like '5MiB', '3KiB', '400B'.");
    if digits.is_empty() || unit.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let power = SIZE_UNITS
        .iter()
        .position(|u| *u == unit)
        .ok_or_else(invalid)?;
    value
        .checked_mul(1024u64.pow(power as u32))
        .ok_or_else(invalid)
}

// ── Paths and file identity ─────────────────────────────────────────────

/// Lexical normalization: strips `.` components and folds `..` where a
/// preceding component exists. No filesystem access.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute form of `path`: canonicalized (symlinks resolved) when the file
/// exists, otherwise joined onto the current directory and normalized.
pub(crate) fn absolute_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return resolved;
    }
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize_path(&joined)
}

/// File-system identity (device + inode). Annotations reach the same file
/// through different relative spellings, so string comparison alone is not
/// enough; when either path does not exist yet, fall back to comparing the
/// normalized spellings.
pub(crate) fn is_same_file(a: &Path, b: &Path) -> bool {
    match same_file::is_same_file(a, b) {
        Ok(same) => same,
        Err(_) => {
            !a.as_os_str().is_empty()
                && !b.as_os_str().is_empty()
                && normalize_path(a) == normalize_path(b)
        }
    }
}

/// Membership test over a candidate set, by file identity.
pub(crate) fn contains_file(set: &[PathBuf], path: &Path) -> bool {
    set.iter().any(|candidate| is_same_file(candidate, path))
}

// ── Prefix matching ─────────────────────────────────────────────────────

/// Length of the longest common prefix of two strings, character by
/// character from index 0.
pub(crate) fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}

/// The candidate whose path shares the longest prefix with `reference`;
/// first maximum wins on ties. Approximates "files that share a naming stem
/// belong together".
pub(crate) fn best_prefix_match<'a>(
    candidates: &'a [PathBuf],
    reference: &str,
) -> Option<&'a PathBuf> {
    let mut best: Option<(&PathBuf, usize)> = None;
    for candidate in candidates {
        let score = common_prefix_len(&candidate.to_string_lossy(), reference);
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}
