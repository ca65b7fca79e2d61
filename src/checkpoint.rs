use std::path::PathBuf;

use super::columnar::write_mapping_rows;
use super::errors::PipelineError;
use super::records::MappingRow;

const PREFIX: &str = "batch_";
const SUFFIX: &str = ".parquet";

/// A batch is complete once its artifact exists under the final name.
/// Leftover `.tmp` files from a crashed write do not count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Complete,
}

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs_err::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    pub fn path_for(&self, batch_id: u32) -> PathBuf {
        self.dir.join(format!("{PREFIX}{batch_id:02}{SUFFIX}"))
    }

    pub fn state(&self, batch_id: u32) -> BatchState {
        if self.path_for(batch_id).is_file() {
            BatchState::Complete
        } else {
            BatchState::Pending
        }
    }

    pub fn exists(&self, batch_id: u32) -> bool {
        self.state(batch_id) == BatchState::Complete
    }

    pub fn write(&self, batch_id: u32, rows: &[MappingRow]) -> Result<PathBuf, PipelineError> {
        let path = self.path_for(batch_id);
        write_mapping_rows(&path, rows)?;
        Ok(path)
    }

    #[cfg(test)]
    pub fn read(&self, batch_id: u32) -> Result<Vec<MappingRow>, PipelineError> {
        super::columnar::read_mapping_rows(&self.path_for(batch_id))
    }

    /// Completed artifacts in file-name order.
    pub fn list(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let mut paths = Vec::new();
        for entry in fs_err::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_artifact = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX));
            if is_artifact && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columnar::tmp_path;
    use crate::records::LocationType;

    fn row(card: &str) -> MappingRow {
        MappingRow {
            card_id: card.to_string(),
            stop_id: "101".to_string(),
            stop_name: "City Hall".to_string(),
            region_code: "11".to_string(),
            transport_type: "B".to_string(),
            location_type: LocationType::Residence,
            confidence: 1.0,
            cluster_size: 10,
            total_trips: 10,
        }
    }

    #[test]
    fn test_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        assert_eq!(store.state(3), BatchState::Pending);

        let path = store.write(3, &[row("c1")]).unwrap();
        assert!(path.ends_with("batch_03.parquet"));
        assert_eq!(store.state(3), BatchState::Complete);
        assert_eq!(store.read(3).unwrap(), vec![row("c1")]);
        assert!(!store.exists(4));
    }

    #[test]
    fn test_tmp_file_is_not_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        fs_err::write(tmp_path(&store.path_for(1)), b"partial").unwrap();
        assert_eq!(store.state(1), BatchState::Pending);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        store.write(10, &[row("c10")]).unwrap();
        store.write(2, &[]).unwrap();
        fs_err::write(dir.path().join("notes.txt"), b"x").unwrap();

        let names: Vec<String> = store
            .list()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["batch_02.parquet", "batch_10.parquet"]);
    }
}
