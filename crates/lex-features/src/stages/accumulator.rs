//! Shared accumulation target for per-entity workers.
//!
//! Workers append finished partitions to one CSV file under the stage's
//! resource directory. Appends are serialized by a mutex; the file is cleared
//! when the accumulator is created and removed when it is dropped, so only one
//! accumulation may run per resource directory at a time.

use parking_lot::Mutex;
use polars::prelude::*;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FeatureError, Result};

/// File name of the accumulation target inside the resource directory.
pub const ACCUMULATION_FILE: &str = "accumulated.csv";

pub struct Accumulator {
    path: PathBuf,
    /// Whether the header row has been written.
    started: Mutex<bool>,
}

impl Accumulator {
    /// Create the resource directory if needed and clear any stale file.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(ACCUMULATION_FILE);
        if path.exists() {
            debug!("Clearing stale accumulation target {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(Self {
            path,
            started: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one partition. Safe to call from many workers.
    pub fn append(&self, part: &mut DataFrame) -> Result<()> {
        let mut started = self.started.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        CsvWriter::new(&mut file)
            .include_header(!*started)
            .finish(part)
            .map_err(|e| self.failure(e))?;
        *started = true;
        Ok(())
    }

    /// Read every appended row back using `schema`, then remove the file.
    pub fn read_back(self, schema: Schema) -> Result<DataFrame> {
        if !*self.started.lock() {
            return Ok(DataFrame::empty_with_schema(&schema));
        }
        CsvReadOptions::default()
            .with_has_header(true)
            .with_schema(Some(Arc::new(schema)))
            .try_into_reader_with_file_path(Some(self.path.clone()))
            .and_then(|reader| reader.finish())
            .map_err(|e| self.failure(e))
    }

    fn failure(&self, e: PolarsError) -> FeatureError {
        FeatureError::Accumulation {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        if self.path.exists()
            && let Err(e) = fs::remove_file(&self.path)
        {
            warn!(
                "Failed to remove accumulation target {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::f64_values;

    fn schema_of(df: &DataFrame) -> Schema {
        df.get_columns()
            .iter()
            .map(|c| (c.name().clone(), c.dtype().clone()))
            .collect()
    }

    #[test]
    fn test_append_and_read_back_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let acc = Accumulator::create(dir.path()).unwrap();
        let path = acc.path().to_path_buf();

        let mut a = df!["id" => ["a"], "v" => [1.5]].unwrap();
        let mut b = df!["id" => ["b", "b"], "v" => [2.5, 3.5]].unwrap();
        let schema = schema_of(&a);
        acc.append(&mut a).unwrap();
        acc.append(&mut b).unwrap();
        assert!(path.exists());

        let out = acc.read_back(schema).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(
            f64_values(out.column("v").unwrap().as_materialized_series()).unwrap(),
            vec![Some(1.5), Some(2.5), Some(3.5)]
        );
        assert!(!path.exists());
    }

    #[test]
    fn test_create_clears_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(ACCUMULATION_FILE);
        fs::write(&stale, "garbage\n").unwrap();

        let acc = Accumulator::create(dir.path()).unwrap();
        assert!(!stale.exists());
        drop(acc);
    }

    #[test]
    fn test_read_back_failure_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let acc = Accumulator::create(dir.path()).unwrap();
        let path = acc.path().to_path_buf();

        let mut part = df!["id" => ["a"], "v" => [1.5]].unwrap();
        acc.append(&mut part).unwrap();

        // ids are strings, so reading them as integers cannot succeed
        let mismatched = schema_of(&df!["id" => [1i64], "v" => [1.0]].unwrap());
        let err = acc.read_back(mismatched).unwrap_err();

        assert_eq!(err.error_code(), "ACCUMULATION_FAILED");
        assert!(!path.exists());
        assert!(!dir.path().join(ACCUMULATION_FILE).exists());
    }

    #[test]
    fn test_read_back_without_rows_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let acc = Accumulator::create(dir.path()).unwrap();
        let schema = schema_of(&df!["v" => [1.0]].unwrap());
        let out = acc.read_back(schema).unwrap();
        assert_eq!(out.height(), 0);
        assert_eq!(out.width(), 1);
    }
}
