//! On-disk snapshot of normalized repositories.
//!
//! One pretty-printed JSON file per repository. A new snapshot is written
//! into a staging directory beside the target and swapped into place, so a
//! failed write leaves the previous snapshot untouched.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::StarpilotError;
use crate::models::NormalizedRepoRecord;

/// Replace the contents of `dir` with one file per record.
///
/// Returns the number of files written.
pub fn write_records(dir: &Path, records: &[NormalizedRepoRecord]) -> Result<usize> {
    let staging = staging_dir(dir)?;

    if let Err(e) = write_into(&staging, records) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    replace_dir(&staging, dir)?;
    Ok(records.len())
}

fn write_into(staging: &Path, records: &[NormalizedRepoRecord]) -> Result<()> {
    let mut used: HashSet<String> = HashSet::new();

    for record in records {
        let file_name = file_name_for(record, &used);
        used.insert(file_name.to_lowercase());

        let json = serde_json::to_string_pretty(record)
            .with_context(|| format!("failed to serialize '{}'", record.full_name))?;

        std::fs::write(staging.join(&file_name), json).map_err(|source| {
            StarpilotError::Write {
                record: record.full_name.clone(),
                source,
            }
        })?;
    }

    Ok(())
}

/// `{name}.json`, or `{owner}__{name}.json` when the name is already taken,
/// with a numeric suffix if even that is taken.
///
/// `used` holds lowercased names so case-insensitive filesystems never see
/// two records map onto one file.
fn file_name_for(record: &NormalizedRepoRecord, used: &HashSet<String>) -> String {
    let name = sanitize(&record.name);
    let qualified = format!("{}__{}", sanitize(&record.owner), name);
    let free = |stem: &str| !used.contains(&format!("{}.json", stem).to_lowercase());

    if free(&name) {
        return format!("{}.json", name);
    }
    if free(&qualified) {
        return format!("{}.json", qualified);
    }
    (2u32..)
        .map(|n| format!("{}_{}", qualified, n))
        .find(|stem| free(stem))
        .map(|stem| format!("{}.json", stem))
        .unwrap_or_else(|| format!("{}.json", qualified))
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}

/// Load every `*.json` record in `dir`, sorted by file name.
///
/// Records are returned as raw JSON objects so that the document preparer
/// can sanitize whatever a hand-edited cache contains.
pub fn load_records(dir: &Path) -> Result<Vec<(String, Map<String, Value>)>> {
    if !dir.exists() {
        anyhow::bail!(
            "content cache {} does not exist; run `starpilot read <user>` first",
            dir.display()
        );
    }

    let mut records = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cached record: {}", path.display()))?;

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => records.push((file_name, map)),
            Ok(_) => tracing::warn!("skipping {}: not a JSON object", file_name),
            Err(e) => tracing::warn!("skipping {}: {}", file_name, e),
        }
    }

    Ok(records)
}

/// Create an empty sibling directory used to stage a replacement for `target`.
pub(crate) fn staging_dir(target: &Path) -> Result<PathBuf> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let base = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "starpilot".to_string());
    let staging = parent.join(format!(".{}.staging-{}", base, std::process::id()));

    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)
        .with_context(|| format!("Failed to create staging dir: {}", staging.display()))?;
    Ok(staging)
}

/// Swap a fully written staging directory into place of `target`.
pub(crate) fn replace_dir(staging: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)
            .with_context(|| format!("Failed to clear {}", target.display()))?;
    }
    std::fs::rename(staging, target).with_context(|| {
        format!(
            "Failed to move {} into place at {}",
            staging.display(),
            target.display()
        )
    })?;
    Ok(())
}
