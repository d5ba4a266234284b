//! Output storage for finished recordings.
//!
//! Resolves the recordings directory, names output files, and removes
//! files the pipeline left unusable.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{ContainerFormat, StorageSettings};
use crate::error::StorageError;

/// Resolve the directory recordings are written to, creating it if missing.
///
/// Defaults to `<videos dir>/<subdirectory>`; the root can be overridden in
/// the storage settings.
pub fn resolve_output_dir(settings: &StorageSettings) -> Result<PathBuf, StorageError> {
    let root = match &settings.output_root {
        Some(root) => root.clone(),
        None => platform_videos_dir().ok_or(StorageError::NoVideosDir)?,
    };

    let dir = root.join(&settings.subdirectory);
    std::fs::create_dir_all(&dir).map_err(|source| StorageError::CreateDir {
        dir: dir.clone(),
        source,
    })?;

    debug!("Recording output directory: {:?}", dir);
    Ok(dir)
}

/// Check that the output directory can be written to.
///
/// This is the start-time storage probe; a denial aborts the recording
/// before any capture resources are touched.
pub fn ensure_writable(dir: &Path) -> Result<(), StorageError> {
    let metadata = std::fs::metadata(dir).map_err(|_| StorageError::NotWritable {
        dir: dir.to_path_buf(),
    })?;

    if !metadata.is_dir() || metadata.permissions().readonly() {
        return Err(StorageError::NotWritable {
            dir: dir.to_path_buf(),
        });
    }

    Ok(())
}

/// File name for a recording started at `at` with the given output
/// dimensions: `Screenshots-YYYYMMDD-HHMMSS-<w>x<h>.<ext>`.
pub fn output_file_name(
    at: DateTime<Local>,
    width: u32,
    height: u32,
    container: ContainerFormat,
) -> String {
    format!(
        "Screenshots-{}-{}x{}.{}",
        at.format("%Y%m%d-%H%M%S"),
        width,
        height,
        container.extension()
    )
}

/// Full output path for a recording starting now.
pub fn new_output_path(
    dir: &Path,
    width: u32,
    height: u32,
    container: ContainerFormat,
) -> PathBuf {
    dir.join(output_file_name(Local::now(), width, height, container))
}

/// Remove an unusable recording. Best effort; a missing file is fine.
pub fn delete_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Deleted unusable recording {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Recording {:?} already gone", path);
        }
        Err(e) => warn!("Failed to delete recording {:?}: {}", path, e),
    }
}

fn platform_videos_dir() -> Option<PathBuf> {
    directories::UserDirs::new().and_then(|dirs| dirs.video_dir().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_output_file_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 5, 7, 9, 2).unwrap();
        let name = output_file_name(at, 1920, 1080, ContainerFormat::Mp4);
        assert_eq!(name, "Screenshots-20240305-070902-1920x1080.mp4");
    }

    #[test]
    fn test_output_file_name_container_extension() {
        let at = Local.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let name = output_file_name(at, 1280, 720, ContainerFormat::Mkv);
        assert_eq!(name, "Screenshots-20241231-235959-1280x720.mkv");
    }

    #[test]
    fn test_resolve_creates_subdirectory() {
        let dir = tempdir().unwrap();
        let settings = StorageSettings {
            output_root: Some(dir.path().to_path_buf()),
            subdirectory: "Screenshots".to_string(),
        };

        let resolved = resolve_output_dir(&settings).unwrap();
        assert_eq!(resolved, dir.path().join("Screenshots"));
        assert!(resolved.is_dir());

        // Resolving again is a no-op
        let resolved_again = resolve_output_dir(&settings).unwrap();
        assert_eq!(resolved, resolved_again);
    }

    #[test]
    fn test_ensure_writable_on_fresh_dir() {
        let dir = tempdir().unwrap();
        ensure_writable(dir.path()).unwrap();
    }

    #[test]
    fn test_ensure_writable_rejects_missing_dir() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(ensure_writable(&missing).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_writable_rejects_readonly_dir() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ro");
        std::fs::create_dir(&target).unwrap();

        let mut perms = std::fs::metadata(&target).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&target, perms.clone()).unwrap();

        let result = ensure_writable(&target);

        // Restore so tempdir cleanup can remove it
        perms.set_readonly(false);
        std::fs::set_permissions(&target, perms).unwrap();

        assert!(result.is_err());
    }

    #[test]
    fn test_delete_output_removes_file_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Screenshots-20240305-070902-1920x1080.mp4");
        std::fs::write(&path, b"partial").unwrap();

        delete_output(&path);
        assert!(!path.exists());

        // Second delete is a no-op
        delete_output(&path);
    }
}
