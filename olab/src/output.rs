//! Run directories and report files.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Create `<results_dir>/<prefix>_<YYYYmmdd_HHMMSS>`.
pub fn create_run_dir(results_dir: &Path, prefix: &str, at: DateTime<Local>) -> Result<PathBuf> {
    let dir = results_dir.join(format!("{prefix}_{}", at.format("%Y%m%d_%H%M%S")));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
    Ok(dir)
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_dir_name() {
        let tmp = tempfile::tempdir().unwrap();
        let at = Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let dir = create_run_dir(tmp.path(), "ospf_flap", at).unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.file_name().unwrap(), "ospf_flap_20260314_092653");
    }

    #[test]
    fn test_write_json_pretty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.json");
        write_json(&path, &serde_json::json!({"ok": true})).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"ok\": true"));
    }
}
