//! Per-node output files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs::File;

use crate::error::JumpError;

/// Characters that cannot appear in a file name on common platforms.
static UNSAFE_FILE_CHARS: Lazy<Regex> = Lazy::new(|| match Regex::new(r#"[/\\:*?"<>|]"#) {
    Ok(re) => re,
    Err(err) => panic!("invalid UNSAFE_FILE_CHARS regex: {err}"),
});

/// `{node}_{DD-MM-YYYY_HHMMSS}.txt`
pub fn timestamped_name(node: &str, at: DateTime<Local>) -> String {
    let node = UNSAFE_FILE_CHARS.replace_all(node, "_");
    format!("{}_{}.txt", node, at.format("%d-%m-%Y_%H%M%S"))
}

/// Where the output of `node` goes: `explicit` when configured, otherwise a
/// timestamped name, both relative to `dir`.
pub fn output_path(dir: &Path, node: &str, explicit: Option<&str>) -> PathBuf {
    match explicit.filter(|name| !name.trim().is_empty()) {
        Some(name) => dir.join(name.trim()),
        None => dir.join(timestamped_name(node, Local::now())),
    }
}

/// Creates (or truncates) the output file at `path`.
pub async fn create_sink(path: &Path) -> Result<File, JumpError> {
    debug!("opening output file {}", path.display());
    File::create(path).await.map_err(|source| JumpError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Moves `paths` into `dir`. Does nothing when `dir` does not exist.
///
/// Returns the new locations of the files that were moved.
pub async fn archive(paths: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>, JumpError> {
    if !tokio::fs::metadata(dir).await.is_ok_and(|m| m.is_dir()) {
        debug!("{} does not exist, outputs stay in place", dir.display());
        return Ok(Vec::new());
    }
    let mut moved = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_name() else {
            warn!("{} has no file name, not archived", path.display());
            continue;
        };
        let target = dir.join(name);
        tokio::fs::rename(path, &target).await?;
        moved.push(target);
    }
    info!("moved {} output files to {}", moved.len(), dir.display());
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::io::AsyncWriteExt;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap()
    }

    #[test]
    fn name_uses_day_month_year_and_time() {
        assert_eq!(timestamped_name("rbs01", at()), "rbs01_07-03-2024_090502.txt");
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(
            timestamped_name("10.0.0.1:22/x", at()),
            "10.0.0.1_22_x_07-03-2024_090502.txt"
        );
    }

    #[test]
    fn explicit_log_file_wins() {
        let path = output_path(Path::new("out"), "a", Some("a.log"));
        assert_eq!(path, Path::new("out").join("a.log"));

        let path = output_path(Path::new("out"), "a", Some("  "));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("a_"));
    }

    #[tokio::test]
    async fn archive_moves_files_into_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a_01-01-2024_000000.txt");
        let mut file = create_sink(&source).await.unwrap();
        file.write_all(b"out").await.unwrap();
        file.shutdown().await.unwrap();
        let tmp = dir.path().join("tmp");
        tokio::fs::create_dir(&tmp).await.unwrap();

        let moved = archive(&[source.clone()], &tmp).await.unwrap();

        assert_eq!(moved, vec![tmp.join("a_01-01-2024_000000.txt")]);
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&moved[0]).unwrap(), "out");
    }

    #[tokio::test]
    async fn archive_skips_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, "x").unwrap();

        let moved = archive(&[source.clone()], &dir.path().join("nope"))
            .await
            .unwrap();

        assert!(moved.is_empty());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn unwritable_output_is_a_log_file_error() {
        let err = create_sink(Path::new("/nonexistent/dir/a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, JumpError::LogFile { .. }));
    }
}
