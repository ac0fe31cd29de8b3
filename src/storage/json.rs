//! JSON file store for detection reports.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::config::StorageSettings;
use crate::error_handling::StorageError;
use crate::models::DetectionReport;

/// Writes detection reports into a directory.
///
/// Files are written to a temporary sibling first and renamed into place, so
/// a crash never leaves a truncated report behind.
#[derive(Debug, Clone)]
pub struct JsonResultsStore {
    output_dir: PathBuf,
    output_file: String,
    append_timestamp: bool,
}

impl JsonResultsStore {
    pub fn new(output_dir: impl Into<PathBuf>, output_file: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            output_file: output_file.into(),
            append_timestamp: false,
        }
    }

    /// Inserts a `_YYYYmmdd_HHMMSS` suffix before the file extension.
    pub fn with_timestamp(mut self, append_timestamp: bool) -> Self {
        self.append_timestamp = append_timestamp;
        self
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(&settings.output_dir, &settings.output_file)
            .with_timestamp(settings.append_timestamp)
    }

    /// Path a report saved at `now` is written to.
    pub fn target_path(&self, now: DateTime<Local>) -> PathBuf {
        if !self.append_timestamp {
            return self.output_dir.join(&self.output_file);
        }
        let stamp = now.format("%Y%m%d_%H%M%S");
        let file = Path::new(&self.output_file);
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.output_file.clone());
        let name = match file.extension() {
            Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}_{}", stem, stamp),
        };
        self.output_dir.join(name)
    }

    /// Saves `report` and returns the path written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the directory or temporary file cannot be
    /// created, `StorageError::Serialization` if the report cannot be encoded,
    /// and `StorageError::Persist` if the final rename fails.
    pub fn save(&self, report: &DetectionReport) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.target_path(Local::now());

        let mut file = tempfile::NamedTempFile::new_in(&self.output_dir)?;
        serde_json::to_writer_pretty(&mut file, report)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| StorageError::Persist {
            path: path.clone(),
            reason: e.error.to_string(),
        })?;

        log::info!("Results saved to {}", path.display());
        Ok(path)
    }

    /// Reads a report written by [`JsonResultsStore::save`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the file cannot be read and
    /// `StorageError::Serialization` if it is not a valid report.
    pub fn load(path: &Path) -> Result<DetectionReport, StorageError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn empty_report() -> DetectionReport {
        DetectionReport {
            started_at: Utc::now(),
            sites: Vec::new(),
            failures: Vec::new(),
            output_path: None,
            elapsed_seconds: 1.5,
        }
    }

    #[test]
    fn test_target_path_with_timestamp() {
        let store = JsonResultsStore::new("out", "results.json").with_timestamp(true);
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            store.target_path(now),
            PathBuf::from("out/results_20240309_140507.json")
        );
    }

    #[test]
    fn test_target_path_without_timestamp() {
        let store = JsonResultsStore::new("out", "results.json");
        assert_eq!(store.target_path(Local::now()), PathBuf::from("out/results.json"));
    }

    #[test]
    fn test_save_creates_directory_and_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonResultsStore::new(dir.path().join("nested"), "report.json");

        let path = store.save(&empty_report()).expect("save");
        assert!(path.exists());
        let loaded = JsonResultsStore::load(&path).expect("load");
        assert_eq!(loaded.elapsed_seconds, 1.5);
        assert!(loaded.sites.is_empty());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            JsonResultsStore::load(&path),
            Err(StorageError::Serialization(_))
        ));
    }
}
