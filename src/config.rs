//! Typed run configuration, loaded once from TOML and validated at startup.
//!
//! ```toml
//! months = ["202501", "202502"]
//! stages = ["stations", "extract", "prepare", "cluster", "merge"]
//!
//! [paths]
//! trips_dir = "import_data/trips"
//! stops_dir = "import_data/stops"
//! data_dir = "output/purpose_transport"
//! work_dir = "output/work_od"
//! checkpoint_dir = "output/work_od_batch"
//! output_dir = "output"
//!
//! [clustering]
//! eps = 800.0
//! min_samples = 10
//! metric = "euclidean"
//!
//! [partition]
//! strategy = "hash"
//! num_batches = 10
//! ```

use serde::Deserialize;
use std::{fmt, path::Path, path::PathBuf, str::FromStr};

use super::candidates::{CandidateWindows, TimeWindow};
use super::dbscan::DistanceMetric;
use super::errors::ConfigError;
use super::partition::PartitionStrategy;
use super::records::LocationType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Stations,
    Extract,
    Prepare,
    Cluster,
    Merge,
}

impl PipelineStage {
    /// Canonical execution order.
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Stations,
        PipelineStage::Extract,
        PipelineStage::Prepare,
        PipelineStage::Cluster,
        PipelineStage::Merge,
    ];
}

impl FromStr for PipelineStage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stations" => Ok(PipelineStage::Stations),
            "extract" => Ok(PipelineStage::Extract),
            "prepare" => Ok(PipelineStage::Prepare),
            "cluster" => Ok(PipelineStage::Cluster),
            "merge" => Ok(PipelineStage::Merge),
            _ => Err(ConfigError::UnknownStage(s.to_string())),
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Stations => "stations",
            PipelineStage::Extract => "extract",
            PipelineStage::Prepare => "prepare",
            PipelineStage::Cluster => "cluster",
            PipelineStage::Merge => "merge",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Paths {
    pub trips_dir: PathBuf,
    pub stops_dir: PathBuf,
    pub data_dir: PathBuf,
    pub work_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    pub eps: f64,
    pub min_samples: usize,
    pub metric: DistanceMetric,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        ClusteringConfig {
            eps: 800.0,
            min_samples: 10,
            metric: DistanceMetric::Euclidean,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CardFilterConfig {
    /// Only keep cards with enough points for both residence and office.
    pub require_both: bool,
}

impl Default for CardFilterConfig {
    fn default() -> Self {
        CardFilterConfig { require_both: true }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    /// Also export a COPY-ready CSV next to the merged parquet.
    pub csv: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    paths: Paths,
    months: Vec<String>,
    #[serde(default = "default_stages")]
    stages: Vec<String>,
    #[serde(default)]
    windows: CandidateWindows,
    #[serde(default)]
    clustering: ClusteringConfig,
    #[serde(default)]
    partition: PartitionStrategy,
    #[serde(default)]
    cards: CardFilterConfig,
    #[serde(default)]
    sinks: SinkConfig,
}

fn default_stages() -> Vec<String> {
    PipelineStage::ALL.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub paths: Paths,
    pub months: Vec<String>,
    /// Enabled stages, deduplicated and in canonical order.
    pub stages: Vec<PipelineStage>,
    pub windows: CandidateWindows,
    pub clustering: ClusteringConfig,
    pub partition: PartitionStrategy,
    pub cards: CardFilterConfig,
    pub sinks: SinkConfig,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn validate_window(field: &'static str, window: &TimeWindow) -> Result<(), ConfigError> {
    if window.end_hour > 23 || window.start_hour > window.end_hour {
        return Err(invalid(
            field,
            format!(
                "expected 0 <= start <= end <= 23, got {}..={}",
                window.start_hour, window.end_hour
            ),
        ));
    }
    Ok(())
}

impl Config {
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs_err::read_to_string(path)?;
        Config::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;

        let mut stages = raw
            .stages
            .iter()
            .map(|s| PipelineStage::from_str(s))
            .collect::<Result<Vec<_>, _>>()?;
        stages.sort();
        stages.dedup();

        let config = Config {
            paths: raw.paths,
            months: raw.months,
            stages,
            windows: raw.windows,
            clustering: raw.clustering,
            partition: raw.partition,
            cards: raw.cards,
            sinks: raw.sinks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.months.is_empty() {
            return Err(invalid("months", "at least one month is required"));
        }
        if let Some(bad) = self
            .months
            .iter()
            .find(|m| m.len() != 6 || !m.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid("months", format!("expected YYYYMM, got {bad:?}")));
        }
        if self.stages.is_empty() {
            return Err(invalid("stages", "at least one stage must be enabled"));
        }
        if !(self.clustering.eps.is_finite() && self.clustering.eps > 0.0) {
            return Err(invalid("clustering.eps", "must be a positive number"));
        }
        if self.clustering.min_samples == 0 {
            return Err(invalid("clustering.min_samples", "must be at least 1"));
        }
        validate_window("windows.morning", &self.windows.morning)?;
        validate_window("windows.evening", &self.windows.evening)?;
        match self.partition {
            PartitionStrategy::Hash { num_batches: 0 } => {
                Err(invalid("partition.num_batches", "must be at least 1"))
            }
            PartitionStrategy::Size { batch_size: 0 } => {
                Err(invalid("partition.batch_size", "must be at least 1"))
            }
            _ => Ok(()),
        }
    }

    pub fn trips_path(&self, month: &str) -> PathBuf {
        self.paths.trips_dir.join(format!("{month}_trips.csv"))
    }

    pub fn stop_reference_path(&self, month: &str) -> PathBuf {
        self.paths.stops_dir.join(format!("{month}_stops.csv"))
    }

    pub fn stations_path(&self, month: &str) -> PathBuf {
        self.paths
            .data_dir
            .join(month)
            .join(format!("{month}_station_cleansed.parquet"))
    }

    pub fn candidates_path(&self, month: &str, location_type: LocationType) -> PathBuf {
        self.paths
            .data_dir
            .join(month)
            .join(format!("{month}_{location_type}_candidates.parquet"))
    }

    pub fn valid_cards_path(&self) -> PathBuf {
        self.paths.work_dir.join("valid_cards.parquet")
    }

    pub fn mapping_path(&self) -> PathBuf {
        self.paths.output_dir.join("card_id_work_od_mapping.parquet")
    }

    pub fn mapping_csv_path(&self) -> PathBuf {
        self.paths.output_dir.join("card_id_work_od_mapping.csv")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.paths.output_dir.join("card_id_work_od_summary.json")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn config_toml(root: &Path) -> String {
        format!(
            r#"
months = ["202501"]

[paths]
trips_dir = "{root}/trips"
stops_dir = "{root}/stops"
data_dir = "{root}/data"
work_dir = "{root}/work"
checkpoint_dir = "{root}/checkpoints"
output_dir = "{root}/output"
"#,
            root = root.display()
        )
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str(&config_toml(Path::new("/tmp/x"))).unwrap();
        assert_eq!(config.clustering.eps, 800.0);
        assert_eq!(config.clustering.min_samples, 10);
        assert_eq!(config.partition, PartitionStrategy::Hash { num_batches: 10 });
        assert_eq!(config.windows.morning, TimeWindow::new(5, 10));
        assert_eq!(config.windows.evening, TimeWindow::new(16, 22));
        assert_eq!(config.stages, PipelineStage::ALL.to_vec());
        assert!(config.cards.require_both);
        assert!(!config.sinks.csv);
    }

    #[test]
    fn test_bundled_config_parses() {
        let config = Config::from_toml_str(include_str!("../config/pipeline.toml")).unwrap();
        assert_eq!(config.months, vec!["202501".to_string()]);
        assert_eq!(config.clustering, ClusteringConfig::default());
        assert_eq!(config.windows, CandidateWindows::default());
    }

    #[test]
    fn test_stages_are_sorted_and_deduplicated() {
        let text = format!(
            "stages = [\"merge\", \"cluster\", \"merge\"]\n{}",
            config_toml(Path::new("/tmp/x"))
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(
            config.stages,
            vec![PipelineStage::Cluster, PipelineStage::Merge]
        );
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let text = format!(
            "stages = [\"cluster\", \"upload\"]\n{}",
            config_toml(Path::new("/tmp/x"))
        );
        assert!(matches!(
            Config::from_toml_str(&text),
            Err(ConfigError::UnknownStage(s)) if s == "upload"
        ));
    }

    #[test]
    fn test_size_partition_and_manhattan_metric() {
        let text = format!(
            "{}\n[clustering]\nmetric = \"manhattan\"\n\n[partition]\nstrategy = \"size\"\nbatch_size = 500\n",
            config_toml(Path::new("/tmp/x"))
        );
        let config = Config::from_toml_str(&text).unwrap();
        assert_eq!(config.clustering.metric, DistanceMetric::Manhattan);
        assert_eq!(config.clustering.eps, 800.0);
        assert_eq!(config.partition, PartitionStrategy::Size { batch_size: 500 });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let base = config_toml(Path::new("/tmp/x"));
        for extra in [
            "\n[clustering]\neps = 0.0\n",
            "\n[clustering]\nmin_samples = 0\n",
            "\n[windows]\nmorning = { start_hour = 11, end_hour = 9 }\n",
            "\n[partition]\nstrategy = \"hash\"\nnum_batches = 0\n",
        ] {
            let text = format!("{base}{extra}");
            assert!(
                matches!(
                    Config::from_toml_str(&text),
                    Err(ConfigError::Invalid { .. })
                ),
                "{extra}"
            );
        }
        let bad_month = base.replace("202501", "2025-1");
        assert!(Config::from_toml_str(&bad_month).is_err());
    }

    #[test]
    fn test_paths() {
        let config = Config::from_toml_str(&config_toml(Path::new("/data"))).unwrap();
        assert_eq!(
            config.candidates_path("202501", LocationType::Office),
            PathBuf::from("/data/data/202501/202501_office_candidates.parquet")
        );
        assert_eq!(
            config.valid_cards_path(),
            PathBuf::from("/data/work/valid_cards.parquet")
        );
    }
}
