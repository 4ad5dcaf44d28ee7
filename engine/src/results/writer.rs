//! Run directory artifacts

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::metadata::RunMetadata;
use super::outcome::{CSV_HEADER, CsvRow, RequestRecord};
use super::summary::FairnessSummary;
use crate::error::EngineError;

pub const REQUESTS_CSV: &str = "requests.csv";
pub const META_JSON: &str = "meta.json";
pub const FAIRNESS_SUMMARY_JSON: &str = "fairness_summary.json";

/// Writes a run's artifacts into one directory
#[derive(Debug, Clone)]
pub struct RunWriter {
    dir: PathBuf,
}

impl RunWriter {
    /// Create the run directory (and parents) if needed
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `requests.csv`. The header is written even without rows.
    pub fn write_requests(&self, records: &[RequestRecord]) -> Result<PathBuf, EngineError> {
        let path = self.dir.join(REQUESTS_CSV);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)?;
        writer.write_record(CSV_HEADER)?;
        for record in records {
            writer.serialize(CsvRow::from(record))?;
        }
        writer.flush()?;
        info!("Wrote {} request rows to {:?}", records.len(), path);
        Ok(path)
    }

    pub fn write_metadata(&self, meta: &RunMetadata) -> Result<PathBuf, EngineError> {
        self.write_json(META_JSON, meta)
    }

    pub fn write_summary(&self, summary: &FairnessSummary) -> Result<PathBuf, EngineError> {
        self.write_json(FAIRNESS_SUMMARY_JSON, summary)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, EngineError> {
        let path = self.dir.join(name);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!("Wrote {:?}", path);
        Ok(path)
    }
}
