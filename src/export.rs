//! Batch result export
//!
//! Serializes step records, initial distributions and per-scenario summaries
//! to JSON for external reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::metrics::{HealthDistribution, StepRecord};
use crate::scenarios::{summarize, BatchResult, ScenarioSummary};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExport {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub summaries: Vec<ScenarioSummary>,
    pub distributions: Vec<HealthDistribution>,
    pub records: Vec<StepRecord>,
}

impl BatchExport {
    pub fn from_batch(batch: &BatchResult) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            generated_at: Utc::now(),
            summaries: summarize(&batch.records),
            distributions: batch.distributions.clone(),
            records: batch.records.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to `path`, creating parent directories.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ExportError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_err)
    }
}

/// `results/simulation_results_<timestamp>.json` under `dir`.
pub fn timestamped_path(dir: impl AsRef<Path>, at: DateTime<Utc>) -> PathBuf {
    dir.as_ref()
        .join(format!("simulation_results_{}.json", at.format("%Y%m%d_%H%M%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation::Simulation;

    fn small_batch() -> BatchResult {
        let config = SimulationConfig {
            num_vaults: 20,
            price_drop_duration: 0.5,
            recovery_duration: 0.5,
            ..SimulationConfig::default()
        };
        let run = Simulation::new(config, "tiny").run(0);
        BatchResult {
            records: run.records,
            distributions: vec![run.distribution],
            terminations: vec![("tiny".to_string(), 0, run.termination)],
        }
    }

    #[test]
    fn test_export_json_roundtrip() {
        let export = BatchExport::from_batch(&small_batch());
        let json = export.to_json().unwrap();
        let parsed: BatchExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.version, crate::VERSION);
        assert_eq!(parsed.records.len(), export.records.len());
        assert_eq!(parsed.records[0].phase, export.records[0].phase);
        assert_eq!(parsed.summaries.len(), 1);
    }

    #[test]
    fn test_record_fields_are_flat() {
        let export = BatchExport::from_batch(&small_batch());
        let value: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        let first = &value["records"][0];
        assert_eq!(first["phase"], "initial");
        assert!(first.get("total_debt").is_some());
        assert!(first.get("reserve_fund").is_some());
        assert!(first.get("metrics").is_none());
    }

    #[test]
    fn test_write_creates_directories() {
        let dir = std::env::temp_dir().join(format!("risk-sim-export-{}", std::process::id()));
        let path = dir.join("nested").join("out.json");
        BatchExport::from_batch(&small_batch())
            .write_to_file(&path)
            .unwrap();
        assert!(path.exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_timestamped_path() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:30:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = timestamped_path("results", at);
        assert_eq!(
            path,
            PathBuf::from("results/simulation_results_20240301_123005.json")
        );
    }
}
