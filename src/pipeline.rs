use std::collections::HashMap;
use tracing::{info, warn};

use super::candidates::extract_candidates;
use super::checkpoint::CheckpointStore;
use super::classifier::ClusterClassifier;
use super::columnar::{
    count_candidates_per_card, read_assignments, write_assignments, write_candidates,
    write_cleansed_stops,
};
use super::config::{Config, PipelineStage};
use super::coordinator::{BatchCoordinator, BatchOutcome};
use super::errors::PipelineError;
use super::merge::{CsvSink, MappingSink, MergeSummary, ParquetSink, log_summary, merge_checkpoints};
use super::partition::{Batch, from_assignments, partition, to_assignments};
use super::records::{CardId, LocationType, read_trips};
use super::source::ParquetCandidateSource;
use super::stops::{cleanse, create_lookup, read_stop_reference};
use super::utils::{Interrupt, write_json_file};

#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Cluster only this batch id. Every other stage is skipped, since
    /// several such processes may run side by side.
    pub only_batch: Option<u32>,
}

impl RunOptions {
    pub fn stages(&self, config: &Config) -> Vec<PipelineStage> {
        match self.only_batch {
            Some(_) => vec![PipelineStage::Cluster],
            None => config.stages.clone(),
        }
    }
}

pub fn run(config: &Config, options: &RunOptions, interrupt: &Interrupt) -> Result<(), PipelineError> {
    if let Some(id) = options.only_batch {
        info!("Clustering batch {id:02} only");
    }
    for stage in &options.stages(config) {
        interrupt.check()?;
        info!("=== Stage: {stage} ===");
        match stage {
            PipelineStage::Stations => run_stations(config, interrupt)?,
            PipelineStage::Extract => run_extract(config, interrupt)?,
            PipelineStage::Prepare => run_prepare(config)?,
            PipelineStage::Cluster => run_cluster(config, interrupt, options.only_batch)?,
            PipelineStage::Merge => {
                run_merge(config)?;
            }
        }
    }
    Ok(())
}

pub fn run_stations(config: &Config, interrupt: &Interrupt) -> Result<(), PipelineError> {
    for month in &config.months {
        interrupt.check()?;
        let output = config.stations_path(month);
        if output.exists() {
            info!("{} exists, skipping", output.display());
            continue;
        }
        let stops = read_stop_reference(&config.stop_reference_path(month))?;
        let cleansed = cleanse(stops);
        let missing_grid = cleansed.iter().filter(|s| s.grid_id.is_none()).count();
        if missing_grid > 0 {
            warn!(missing_grid, "Stops outside the projection domain");
        }
        write_cleansed_stops(&output, &cleansed)?;
        info!("Wrote {} stops to {}", cleansed.len(), output.display());
    }
    Ok(())
}

pub fn run_extract(config: &Config, interrupt: &Interrupt) -> Result<(), PipelineError> {
    for month in &config.months {
        interrupt.check()?;
        let pending: Vec<LocationType> = LocationType::ALL
            .into_iter()
            .filter(|lt| !config.candidates_path(month, *lt).exists())
            .collect();
        if pending.is_empty() {
            info!("Candidates for {month} exist, skipping");
            continue;
        }

        let stops = read_stop_reference(&config.stop_reference_path(month))?;
        let stop_lookup = create_lookup(&stops);
        let trips = read_trips(&config.trips_path(month), &stop_lookup)?;
        let candidates = extract_candidates(&trips, &config.windows);

        for location_type in pending {
            let path = config.candidates_path(month, location_type);
            let samples = candidates.get(location_type);
            write_candidates(&path, samples)?;
            info!("Wrote {} {location_type} candidates to {}", samples.len(), path.display());
        }
    }
    Ok(())
}

/// Cards with enough candidate points to be worth clustering.
pub fn select_valid_cards(
    counts: &HashMap<LocationType, HashMap<CardId, usize>>,
    min_samples: usize,
    require_both: bool,
) -> Vec<CardId> {
    let enough = |lt: LocationType, card: &CardId| {
        counts
            .get(&lt)
            .and_then(|per_card| per_card.get(card))
            .is_some_and(|n| *n >= min_samples)
    };
    let mut cards: Vec<CardId> = counts
        .values()
        .flat_map(|per_card| per_card.keys())
        .filter(|&card| {
            let residence = enough(LocationType::Residence, card);
            let office = enough(LocationType::Office, card);
            if require_both {
                residence && office
            } else {
                residence || office
            }
        })
        .cloned()
        .collect();
    cards.sort();
    cards.dedup();
    cards
}

pub fn run_prepare(config: &Config) -> Result<(), PipelineError> {
    let mut counts: HashMap<LocationType, HashMap<CardId, usize>> = HashMap::new();
    for location_type in LocationType::ALL {
        let per_card = counts.entry(location_type).or_default();
        for month in &config.months {
            let path = config.candidates_path(month, location_type);
            for (card, n) in count_candidates_per_card(&path)? {
                *per_card.entry(card).or_default() += n;
            }
        }
    }

    let valid = select_valid_cards(
        &counts,
        config.clustering.min_samples,
        config.cards.require_both,
    );
    info!("Valid cards: {}", valid.len());

    let batches = partition(&valid, &config.partition);
    for batch in &batches {
        info!("Batch {:02}: {} cards", batch.id, batch.card_ids.len());
    }
    write_assignments(&config.valid_cards_path(), &to_assignments(&batches))
}

pub fn run_cluster(
    config: &Config,
    interrupt: &Interrupt,
    only_batch: Option<u32>,
) -> Result<(), PipelineError> {
    let mut batches = from_assignments(read_assignments(&config.valid_cards_path())?);
    if let Some(id) = only_batch {
        batches.retain(|b| b.id == id);
        if batches.is_empty() {
            warn!("Batch {id:02} has no cards assigned");
            batches.push(Batch {
                id,
                card_ids: Vec::new(),
            });
        }
    }

    let coordinator = BatchCoordinator::new(
        ClusterClassifier::new(&config.clustering),
        CheckpointStore::new(&config.paths.checkpoint_dir)?,
        ParquetCandidateSource::new(config),
        interrupt.clone(),
    );
    let outcomes = coordinator.run_all(&batches)?;
    let skipped = outcomes
        .iter()
        .filter(|o| **o == BatchOutcome::Skipped)
        .count();
    info!(
        "Cluster stage finished: {} batches computed, {skipped} already checkpointed",
        outcomes.len() - skipped
    );
    Ok(())
}

pub fn run_merge(config: &Config) -> Result<MergeSummary, PipelineError> {
    let store = CheckpointStore::new(&config.paths.checkpoint_dir)?;
    let rows = merge_checkpoints(&store)?;

    ParquetSink {
        path: config.mapping_path(),
    }
    .write(&rows)?;
    if config.sinks.csv {
        CsvSink {
            path: config.mapping_csv_path(),
        }
        .write(&rows)?;
    }

    let summary = MergeSummary::from_rows(&rows);
    write_json_file(&config.summary_path(), &summary)?;
    log_summary(&summary, &config.mapping_path());
    Ok(summary)
}
