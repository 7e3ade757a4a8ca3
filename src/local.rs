//! Local-state inspection: what does the cached copy of a target currently
//! look like on disk? Everything here is recomputed on every call; the
//! filesystem itself is the only cache.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::catalog::TargetSpec;
use crate::store::Store;

/// Chunk files are list-generation artifacts, not per-item records.
const CHUNK_PREFIXES: [&str; 3] = ["dataset_chunk_", "template_chunk_", "instrument_chunk_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Complete,
    Partial,
    Missing,
}

/// Snapshot of a target's local representation, recomputed per inspection.
#[derive(Debug, Clone, Serialize)]
pub struct LocalStatus {
    pub status: StatusKind,
    pub list_count: Option<usize>,
    pub file_count: Option<usize>,
}

/// The `*.json` item files of a directory, excluding `summary.json`,
/// `.backup` leftovers, and chunk files. Sorted by name for stable output.
pub fn item_json_files(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Ok(entries) = fs::read_dir(dir.as_std_path()) else {
        return Vec::new();
    };

    let mut files: Vec<Utf8PathBuf> = entries
        .flatten()
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
        .filter(|path| path.is_file())
        .filter(|path| path.extension() == Some("json"))
        .filter(|path| {
            let name = path.file_name().unwrap_or_default();
            name != "summary.json"
                && !name.ends_with(".backup")
                && !CHUNK_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        })
        .collect();
    files.sort();
    files
}

/// Modification time of a path as UTC, `None` when the path does not exist.
pub fn mtime_utc(path: &Utf8Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path.as_std_path()).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Maximum modification time across a target's existing list files and
/// qualifying item files.
pub fn latest_local_timestamp(spec: &TargetSpec) -> Option<DateTime<Utc>> {
    let mut latest: Option<DateTime<Utc>> = None;

    for path in &spec.list_paths {
        if let Some(ts) = mtime_utc(path) {
            latest = Some(latest.map_or(ts, |prev| prev.max(ts)));
        }
    }
    for dir in &spec.dir_paths {
        for file in item_json_files(dir) {
            if let Some(ts) = mtime_utc(&file) {
                latest = Some(latest.map_or(ts, |prev| prev.max(ts)));
            }
        }
    }

    latest
}

/// Number of elements in a list document: the array length, the `data`
/// array length, or the `included` array length; a lone object counts as
/// one element. I/O or parse failures yield `None` — "unknown" is not zero.
pub fn count_list_elements(path: &Utf8Path) -> Option<usize> {
    let content = fs::read_to_string(path.as_std_path()).ok()?;
    let payload: Value = serde_json::from_str(&content).ok()?;

    match &payload {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => {
            if let Some(Value::Array(data)) = map.get("data") {
                Some(data.len())
            } else if let Some(Value::Array(included)) = map.get("included") {
                Some(included.len())
            } else {
                Some(1)
            }
        }
        _ => Some(1),
    }
}

/// Per-path existence flags: Complete iff every flag is true, Missing iff
/// none is, Partial otherwise. A directory counts as present only when it
/// holds at least one qualifying item file.
pub fn compute_local_status(spec: &TargetSpec) -> LocalStatus {
    let list_count = spec
        .primary_list_path
        .as_deref()
        .and_then(count_list_elements);

    let file_count = if spec.dir_paths.is_empty() {
        None
    } else {
        Some(
            spec.dir_paths
                .iter()
                .map(|dir| item_json_files(dir).len())
                .sum(),
        )
    };

    let mut flags = Vec::new();
    for path in &spec.list_paths {
        flags.push(path.as_std_path().is_file());
    }
    for dir in &spec.dir_paths {
        flags.push(dir.as_std_path().is_dir() && !item_json_files(dir).is_empty());
    }

    let status = if !flags.is_empty() && flags.iter().all(|flag| *flag) {
        StatusKind::Complete
    } else if flags.iter().any(|flag| *flag) {
        StatusKind::Partial
    } else {
        StatusKind::Missing
    };

    LocalStatus {
        status,
        list_count,
        file_count,
    }
}

/// The single path chosen to represent a target's freshness: the primary
/// list document when it has one, else the newest qualifying item file,
/// else the first item directory as a last resort.
pub fn resolve_anchor(spec: &TargetSpec) -> Option<Utf8PathBuf> {
    if let Some(primary) = &spec.primary_list_path {
        return Some(primary.clone());
    }

    for dir in &spec.dir_paths {
        let newest = item_json_files(dir)
            .into_iter()
            .filter_map(|file| mtime_utc(&file).map(|ts| (ts, file)))
            .max_by_key(|(ts, _)| *ts);
        if let Some((_, file)) = newest {
            return Some(file);
        }
    }

    spec.dir_paths.first().cloned()
}

/// Existence for staleness decisions: a file anchor must exist as a file; a
/// directory anchor must exist and contain at least one qualifying item file.
pub fn anchor_exists(anchor: &Utf8Path) -> bool {
    let std_path = anchor.as_std_path();
    if std_path.is_file() {
        return true;
    }
    std_path.is_dir() && !item_json_files(anchor).is_empty()
}

/// Whether every subgroup id listed in `subGroup.json` has its detail file
/// under `subGroupDetails/`. False when the list cannot be read or names no
/// subgroups at all.
pub fn subgroup_details_complete(store: &Store) -> bool {
    let Ok(content) = fs::read_to_string(store.subgroup_json_path().as_std_path()) else {
        return false;
    };
    let Ok(payload) = serde_json::from_str::<Value>(&content) else {
        return false;
    };

    let ids: Vec<&str> = payload
        .get("included")
        .and_then(Value::as_array)
        .map(|included| {
            included
                .iter()
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("group"))
                .filter_map(|item| item.get("id").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if ids.is_empty() {
        return false;
    }

    let details_dir = store.subgroup_details_dir();
    ids.iter()
        .all(|id| details_dir.join(format!("{id}.json")).as_std_path().is_file())
}
