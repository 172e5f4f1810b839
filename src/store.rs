//! Canonical file store and archive layout.
//!
//! Current `.pb` files live flat in the store root, keyed by file name.
//! Superseded or soft-deleted files move into UTC-stamped archive
//! subfolders (`YYYYMMDDTHHMMSSZ/`, or `replaced_YYYYMMDDTHHMMSSZ/` for
//! in-place content replacement), preserving their original file names.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Scan the store root for `.pb` files, sorted by file name for
/// deterministic processing order. The root is created if missing.
pub fn scan_store(root: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create store root: {}", root.display()))?;

    let include_set = build_globset(&["*.pb".to_string()])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_set.is_match(&name) {
            continue;
        }
        files.push(entry.path().to_path_buf());
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// UTC archive-folder stamp, second resolution.
pub fn archive_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Destination path for `file_name` in the canonical store.
pub fn store_path(root: &Path, file_name: &str) -> PathBuf {
    root.join(file_name)
}

/// Move `src` into `archive_dir/<stamp>/<original file name>` and return the
/// destination. `prefix` distinguishes supersession (`""`) from replacement
/// (`"replaced_"`) archives.
pub fn archive_file(
    archive_dir: &Path,
    prefix: &str,
    stamp: &str,
    src: &Path,
) -> Result<PathBuf> {
    let folder = archive_dir.join(format!("{}{}", prefix, stamp));
    std::fs::create_dir_all(&folder)
        .with_context(|| format!("Failed to create archive folder: {}", folder.display()))?;

    let name = src
        .file_name()
        .with_context(|| format!("Archive source has no file name: {}", src.display()))?;
    let dest = folder.join(name);
    move_file(src, &dest)?;
    Ok(dest)
}

/// Rename `src` to `dest`, falling back to copy-and-delete when rename
/// fails (e.g. across filesystems).
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(src, dest)
                .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
            std::fs::remove_file(src)
                .with_context(|| format!("Failed to remove {} after copy", src.display()))?;
            Ok(())
        }
    }
}

/// Modification time of `path` as unix seconds.
pub fn file_mtime(path: &Path) -> Result<i64> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    Ok(modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64)
}

/// Read a file into trimmed-newline lines.
pub fn read_file_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content.lines().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_scan_store_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pb"), "x").unwrap();
        std::fs::write(tmp.path().join("a.pb"), "x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub").join("c.pb"), "x").unwrap();

        let files = scan_store(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.pb", "b.pb"]);
    }

    #[test]
    fn test_scan_store_creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("store");
        let files = scan_store(&root).unwrap();
        assert!(files.is_empty());
        assert!(root.is_dir());
    }

    #[test]
    fn test_archive_preserves_file_name() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("Poland_Warszawa_2023.pb");
        std::fs::write(&src, "content").unwrap();
        let archive = tmp.path().join("archive");

        let dest = archive_file(&archive, "", "20240101T000000Z", &src).unwrap();
        assert!(!src.exists());
        assert!(dest.ends_with("20240101T000000Z/Poland_Warszawa_2023.pb"));
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "content");
    }

    #[test]
    fn test_archive_replaced_prefix() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("x.pb");
        std::fs::write(&src, "v1").unwrap();
        let dest = archive_file(&tmp.path().join("arch"), "replaced_", "20240101T000000Z", &src)
            .unwrap();
        assert!(dest
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("replaced_"));
    }

    #[test]
    fn test_archive_stamp_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(archive_stamp(ts), "20240309T140507Z");
    }

    #[test]
    fn test_move_file_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("f.pb");
        std::fs::write(&src, "data").unwrap();
        let dest = tmp.path().join("deep").join("er").join("f.pb");
        move_file(&src, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "data");
    }
}
