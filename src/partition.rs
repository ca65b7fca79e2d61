use serde::Deserialize;
use std::collections::BTreeMap;

use super::records::CardId;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum PartitionStrategy {
    /// `batch_id = hash(card_id) % num_batches`
    Hash { num_batches: u32 },
    /// Contiguous chunks of the sorted card list.
    Size { batch_size: usize },
}

impl Default for PartitionStrategy {
    fn default() -> Self {
        PartitionStrategy::Hash { num_batches: 10 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub id: u32,
    pub card_ids: Vec<CardId>,
}

/// Stable across processes and runs, unlike the std hasher.
pub fn hash_batch_id(card_id: &CardId, num_batches: u32) -> u32 {
    (seahash::hash(card_id.0.as_bytes()) % u64::from(num_batches)) as u32
}

/// Every batch id in `0..num_batches` is returned, empty or not.
pub fn partition_by_hash(card_ids: &[CardId], num_batches: u32) -> Vec<Batch> {
    let mut batches: Vec<Batch> = (0..num_batches)
        .map(|id| Batch {
            id,
            card_ids: Vec::new(),
        })
        .collect();
    for card_id in card_ids {
        let id = hash_batch_id(card_id, num_batches);
        batches[id as usize].card_ids.push(card_id.clone());
    }
    batches
}

pub fn partition_by_size(card_ids: &[CardId], batch_size: usize) -> Vec<Batch> {
    card_ids
        .chunks(batch_size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            id: i as u32,
            card_ids: chunk.to_vec(),
        })
        .collect()
}

pub fn partition(card_ids: &[CardId], strategy: &PartitionStrategy) -> Vec<Batch> {
    match *strategy {
        PartitionStrategy::Hash { num_batches } => partition_by_hash(card_ids, num_batches),
        PartitionStrategy::Size { batch_size } => partition_by_size(card_ids, batch_size),
    }
}

/// Flattens batches into `(card_id, batch_id)` rows for persistence.
pub fn to_assignments(batches: &[Batch]) -> Vec<(CardId, u32)> {
    batches
        .iter()
        .flat_map(|b| b.card_ids.iter().map(move |c| (c.clone(), b.id)))
        .collect()
}

/// Rebuilds batches from persisted rows, ordered by batch id.
pub fn from_assignments(assignments: Vec<(CardId, u32)>) -> Vec<Batch> {
    let mut grouped: BTreeMap<u32, Vec<CardId>> = BTreeMap::new();
    for (card_id, batch_id) in assignments {
        grouped.entry(batch_id).or_default().push(card_id);
    }
    grouped
        .into_iter()
        .map(|(id, card_ids)| Batch { id, card_ids })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn cards(n: usize) -> Vec<CardId> {
        (0..n).map(|i| CardId(format!("card-{i:05}"))).collect()
    }

    #[test]
    fn test_hash_partition_is_complete_and_disjoint() {
        let ids = cards(1_000);
        let batches = partition_by_hash(&ids, 10);
        assert_eq!(batches.len(), 10);

        let total: usize = batches.iter().map(|b| b.card_ids.len()).sum();
        assert_eq!(total, ids.len());
        let union: HashSet<&CardId> = batches.iter().flat_map(|b| &b.card_ids).collect();
        assert_eq!(union.len(), ids.len());
        assert!(batches.iter().all(|b| !b.card_ids.is_empty()));
    }

    #[test]
    fn test_hash_batch_id_is_stable() {
        let card = CardId("ABC123".to_string());
        assert_eq!(hash_batch_id(&card, 10), hash_batch_id(&card, 10));
        assert_eq!(
            hash_batch_id(&card, 7),
            (seahash::hash(b"ABC123") % 7) as u32
        );
        assert_eq!(hash_batch_id(&card, 1), 0);
    }

    #[test]
    fn test_size_partition_chunks() {
        let ids = cards(25);
        let batches = partition_by_size(&ids, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.card_ids.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(batches.iter().map(|b| b.id).collect::<Vec<_>>(), vec![0, 1, 2]);
        let rebuilt: Vec<CardId> = batches.into_iter().flat_map(|b| b.card_ids).collect();
        assert_eq!(rebuilt, ids);
    }

    #[test]
    fn test_size_partition_of_empty_list() {
        assert!(partition_by_size(&[], 10).is_empty());
    }

    #[test]
    fn test_assignments_round_trip() {
        let ids = cards(40);
        let batches = partition(&ids, &PartitionStrategy::Hash { num_batches: 4 });
        let non_empty: Vec<Batch> = batches.into_iter().filter(|b| !b.card_ids.is_empty()).collect();
        let rebuilt = from_assignments(to_assignments(&non_empty));
        assert_eq!(rebuilt, non_empty);
    }
}
