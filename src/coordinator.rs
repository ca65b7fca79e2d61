//! Drives the classifier over partitioned batches with checkpoint/resume.
//!
//! A batch is either skipped (its checkpoint exists) or computed in full and
//! written as a single artifact. Cards that fail to classify are logged and
//! skipped. An I/O failure stops that batch only, while an interrupt stops
//! the whole run.

use indicatif::ProgressIterator;
use std::collections::HashSet;
use tracing::{error, info, warn};

use super::candidates::group_by_card;
use super::checkpoint::CheckpointStore;
use super::classifier::ClusterClassifier;
use super::errors::PipelineError;
use super::partition::Batch;
use super::records::{CardId, ClusterResult, LocationType, MappingRow};
use super::source::CandidateSource;
use super::utils::{Interrupt, progress_bar_for_count};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Skipped,
    Completed {
        residence_rows: usize,
        office_rows: usize,
    },
}

pub struct BatchCoordinator<S> {
    classifier: ClusterClassifier,
    store: CheckpointStore,
    source: S,
    interrupt: Interrupt,
}

impl<S: CandidateSource> BatchCoordinator<S> {
    pub fn new(
        classifier: ClusterClassifier,
        store: CheckpointStore,
        source: S,
        interrupt: Interrupt,
    ) -> Self {
        BatchCoordinator {
            classifier,
            store,
            source,
            interrupt,
        }
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Classifies every card of one location type. Per-card failures are
    /// logged and skipped; only an interrupt aborts the loop.
    fn classify_all(
        &self,
        location_type: LocationType,
        cards: &HashSet<CardId>,
    ) -> Result<Vec<ClusterResult>, PipelineError> {
        let samples = self.source.load(location_type, cards)?;
        let grouped = group_by_card(samples);

        let progress = progress_bar_for_count(grouped.len());
        let mut results = Vec::new();
        for (card_id, card_samples) in grouped.iter().progress_with(progress) {
            self.interrupt.check()?;
            match self
                .classifier
                .classify(card_id, location_type, card_samples)
            {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(err) => error!(card_id = %card_id, "Skipping card: {err}"),
            }
        }
        Ok(results)
    }

    pub fn run_batch(&self, batch: &Batch) -> Result<BatchOutcome, PipelineError> {
        if self.store.exists(batch.id) {
            info!("Batch {:02} already checkpointed, skipping", batch.id);
            return Ok(BatchOutcome::Skipped);
        }
        info!("Batch {:02}: {} cards", batch.id, batch.card_ids.len());

        let cards: HashSet<CardId> = batch.card_ids.iter().cloned().collect();
        let mut rows: Vec<MappingRow> = Vec::new();
        let mut residence_rows = 0;
        let mut office_rows = 0;
        for location_type in LocationType::ALL {
            let before = rows.len();
            for result in self.classify_all(location_type, &cards)? {
                rows.extend(result.into_rows());
            }
            match location_type {
                LocationType::Residence => residence_rows = rows.len() - before,
                LocationType::Office => office_rows = rows.len() - before,
            }
        }

        let path = self.store.write(batch.id, &rows)?;
        info!(
            "Batch {:02} done: {} rows ({residence_rows} residence, {office_rows} office) -> {}",
            batch.id,
            rows.len(),
            path.display()
        );
        Ok(BatchOutcome::Completed {
            residence_rows,
            office_rows,
        })
    }

    /// Runs every batch in order. A failed batch does not stop the others,
    /// but the run still reports failure listing the failed batch ids.
    pub fn run_all(&self, batches: &[Batch]) -> Result<Vec<BatchOutcome>, PipelineError> {
        let mut outcomes = Vec::with_capacity(batches.len());
        let mut failed = Vec::new();
        for batch in batches {
            self.interrupt.check()?;
            match self.run_batch(batch) {
                Ok(outcome) => outcomes.push(outcome),
                Err(PipelineError::Interrupted) => {
                    warn!("Interrupted during batch {:02}", batch.id);
                    return Err(PipelineError::Interrupted);
                }
                Err(err) => {
                    error!("Batch {:02} failed: {err}", batch.id);
                    failed.push(batch.id);
                }
            }
        }
        if failed.is_empty() {
            Ok(outcomes)
        } else {
            Err(PipelineError::BatchesFailed(failed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::tests::{home_samples, sample};
    use crate::config::ClusteringConfig;
    use crate::records::CandidateSample;
    use std::cell::Cell;
    use std::path::PathBuf;

    /// In-memory source that counts how often it is queried.
    struct MemorySource {
        residence: Vec<CandidateSample>,
        office: Vec<CandidateSample>,
        loads: Cell<usize>,
        fail_for: Option<CardId>,
        interrupt_on_load: Option<Interrupt>,
    }

    impl MemorySource {
        fn new(residence: Vec<CandidateSample>, office: Vec<CandidateSample>) -> Self {
            MemorySource {
                residence,
                office,
                loads: Cell::new(0),
                fail_for: None,
                interrupt_on_load: None,
            }
        }
    }

    impl CandidateSource for MemorySource {
        fn load(
            &self,
            location_type: LocationType,
            cards: &HashSet<CardId>,
        ) -> Result<Vec<CandidateSample>, PipelineError> {
            self.loads.set(self.loads.get() + 1);
            if let Some(interrupt) = &self.interrupt_on_load {
                interrupt.trigger();
            }
            if let Some(card) = &self.fail_for {
                if cards.contains(card) {
                    return Err(PipelineError::MissingInput(PathBuf::from("upstream")));
                }
            }
            let all = match location_type {
                LocationType::Residence => &self.residence,
                LocationType::Office => &self.office,
            };
            Ok(all
                .iter()
                .filter(|s| cards.contains(&s.card_id))
                .cloned()
                .collect())
        }
    }

    fn office_samples(card: &str, n: usize) -> Vec<CandidateSample> {
        (0..n)
            .map(|_| {
                let mut s = sample(card, "office", 127.0276, 37.4979);
                s.location_type = LocationType::Office;
                s
            })
            .collect()
    }

    fn coordinator(
        dir: &std::path::Path,
        source: MemorySource,
        interrupt: Interrupt,
    ) -> BatchCoordinator<MemorySource> {
        BatchCoordinator::new(
            ClusterClassifier::new(&ClusteringConfig::default()),
            CheckpointStore::new(dir).unwrap(),
            source,
            interrupt,
        )
    }

    fn batch(id: u32, cards: &[&str]) -> Batch {
        Batch {
            id,
            card_ids: cards.iter().map(|c| CardId(c.to_string())).collect(),
        }
    }

    fn source() -> MemorySource {
        let mut residence = home_samples("c1", 10);
        residence.extend(home_samples("c2", 4));
        MemorySource::new(residence, office_samples("c1", 10))
    }

    #[test]
    fn test_batch_writes_rows_for_both_location_types() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), source(), Interrupt::new());

        let outcome = coordinator.run_batch(&batch(0, &["c1", "c2"])).unwrap();
        assert_eq!(
            outcome,
            BatchOutcome::Completed {
                residence_rows: 2,
                office_rows: 1
            }
        );
        let rows = coordinator.store().read(0).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.card_id == "c1"));
        assert!(rows.iter().all(|r| r.confidence > 0.0 && r.confidence <= 1.0));
    }

    #[test]
    fn test_second_run_skips_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let batches = vec![batch(0, &["c1"]), batch(1, &["c2"])];

        let first = coordinator(dir.path(), source(), Interrupt::new());
        first.run_all(&batches).unwrap();
        assert_eq!(first.source.loads.get(), 4);
        let first_rows: Vec<Vec<MappingRow>> =
            (0..2).map(|id| first.store().read(id).unwrap()).collect();

        let second = coordinator(dir.path(), source(), Interrupt::new());
        let outcomes = second.run_all(&batches).unwrap();
        assert_eq!(outcomes, vec![BatchOutcome::Skipped, BatchOutcome::Skipped]);
        assert_eq!(second.source.loads.get(), 0);
        let second_rows: Vec<Vec<MappingRow>> =
            (0..2).map(|id| second.store().read(id).unwrap()).collect();
        assert_eq!(first_rows, second_rows);
    }

    #[test]
    fn test_empty_batch_is_checkpointed() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path(), source(), Interrupt::new());
        coordinator.run_batch(&batch(7, &[])).unwrap();
        assert!(coordinator.store().exists(7));
        assert!(coordinator.store().read(7).unwrap().is_empty());
    }

    #[test]
    fn test_bad_card_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut residence = home_samples("c1", 10);
        let mut broken = home_samples("c2", 10);
        broken[0].stop.stop_id.clear();
        residence.extend(broken);
        let coordinator = coordinator(
            dir.path(),
            MemorySource::new(residence, Vec::new()),
            Interrupt::new(),
        );

        coordinator.run_batch(&batch(0, &["c1", "c2"])).unwrap();
        let rows = coordinator.store().read(0).unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.card_id == "c1"));
    }

    #[test]
    fn test_failed_batch_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut failing = source();
        failing.fail_for = Some(CardId("c2".to_string()));
        let coordinator = coordinator(dir.path(), failing, Interrupt::new());

        let err = coordinator
            .run_all(&[batch(0, &["c2"]), batch(1, &["c1"])])
            .unwrap_err();
        assert!(matches!(err, PipelineError::BatchesFailed(ref ids) if ids == &vec![0]));
        assert!(!coordinator.store().exists(0));
        assert!(coordinator.store().exists(1));
    }

    #[test]
    fn test_interrupt_stops_the_run_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let interrupt = Interrupt::new();
        let mut interrupting = source();
        interrupting.interrupt_on_load = Some(interrupt.clone());
        let coordinator = coordinator(dir.path(), interrupting, interrupt);

        let err = coordinator
            .run_all(&[batch(0, &["c1"]), batch(1, &["c2"])])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Interrupted));
        assert!(!coordinator.store().exists(0));
        assert!(!coordinator.store().exists(1));
    }

    #[test]
    fn test_interrupt_before_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let coordinator = coordinator(dir.path(), source(), interrupt);
        assert!(matches!(
            coordinator.run_all(&[batch(0, &["c1"])]),
            Err(PipelineError::Interrupted)
        ));
        assert_eq!(coordinator.source.loads.get(), 0);
    }
}
