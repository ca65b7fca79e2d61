use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use super::checkpoint::CheckpointStore;
use super::columnar::{read_mapping_rows, write_mapping_rows};
use super::errors::PipelineError;
use super::records::{LocationType, MappingRow};

/// Sanity counts over the merged table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub total_rows: usize,
    pub unique_cards: usize,
    pub residence_rows: usize,
    pub office_rows: usize,
}

impl MergeSummary {
    pub fn from_rows(rows: &[MappingRow]) -> Self {
        let unique_cards: HashSet<&str> = rows.iter().map(|r| r.card_id.as_str()).collect();
        let count = |lt: LocationType| rows.iter().filter(|r| r.location_type == lt).count();
        MergeSummary {
            total_rows: rows.len(),
            unique_cards: unique_cards.len(),
            residence_rows: count(LocationType::Residence),
            office_rows: count(LocationType::Office),
        }
    }
}

/// Concatenates every completed checkpoint in file-name order.
pub fn merge_checkpoints(store: &CheckpointStore) -> Result<Vec<MappingRow>, PipelineError> {
    let paths = store.list()?;
    info!("Merging {} checkpoint files", paths.len());
    let mut rows = Vec::new();
    for path in paths {
        rows.extend(read_mapping_rows(&path)?);
    }
    Ok(rows)
}

/// Destination for the merged mapping table.
pub trait MappingSink {
    fn write(&self, rows: &[MappingRow]) -> Result<(), PipelineError>;
}

pub struct ParquetSink {
    pub path: PathBuf,
}

impl MappingSink for ParquetSink {
    fn write(&self, rows: &[MappingRow]) -> Result<(), PipelineError> {
        info!("Writing {} rows to {}", rows.len(), self.path.display());
        write_mapping_rows(&self.path, rows)
    }
}

/// Header-first CSV suitable for a `COPY ... FROM ... CSV HEADER` bulk load.
pub struct CsvSink {
    pub path: PathBuf,
}

impl MappingSink for CsvSink {
    fn write(&self, rows: &[MappingRow]) -> Result<(), PipelineError> {
        info!("Writing {} rows to {}", rows.len(), self.path.display());
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_writer(fs_err::File::create(&self.path)?);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

pub fn log_summary(summary: &MergeSummary, path: &Path) {
    info!(
        total_rows = summary.total_rows,
        unique_cards = summary.unique_cards,
        residence_rows = summary.residence_rows,
        office_rows = summary.office_rows,
        "Merged mapping table written to {}",
        path.display()
    );
}
