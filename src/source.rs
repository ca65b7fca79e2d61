use std::collections::HashSet;
use std::path::PathBuf;

use tracing::info;

use super::columnar::read_candidates;
use super::config::Config;
use super::errors::PipelineError;
use super::records::{CandidateSample, CardId, LocationType};

/// Bulk loader for a batch's candidate history.
///
/// Called once per location type per batch, before the per-card loop.
pub trait CandidateSource {
    fn load(
        &self,
        location_type: LocationType,
        cards: &HashSet<CardId>,
    ) -> Result<Vec<CandidateSample>, PipelineError>;
}

/// Reads the per-month candidate parquet files written by the extract stage.
#[derive(Clone, Debug)]
pub struct ParquetCandidateSource {
    residence: Vec<PathBuf>,
    office: Vec<PathBuf>,
}

impl ParquetCandidateSource {
    pub fn new(config: &Config) -> Self {
        let paths = |location_type| {
            config
                .months
                .iter()
                .map(|month| config.candidates_path(month, location_type))
                .collect()
        };
        ParquetCandidateSource {
            residence: paths(LocationType::Residence),
            office: paths(LocationType::Office),
        }
    }

    fn paths(&self, location_type: LocationType) -> &[PathBuf] {
        match location_type {
            LocationType::Residence => &self.residence,
            LocationType::Office => &self.office,
        }
    }
}

impl CandidateSource for ParquetCandidateSource {
    fn load(
        &self,
        location_type: LocationType,
        cards: &HashSet<CardId>,
    ) -> Result<Vec<CandidateSample>, PipelineError> {
        let mut samples = Vec::new();
        for path in self.paths(location_type) {
            samples.extend(read_candidates(path, location_type, Some(cards))?);
        }
        info!(
            "Loaded {} {location_type} candidates for {} cards",
            samples.len(),
            cards.len()
        );
        Ok(samples)
    }
}
