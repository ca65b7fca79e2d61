//! Parquet artifacts: candidate tables, cleansed stops, batch assignments
//! and mapping rows.
//!
//! Every writer goes through [`write_parquet_atomic`], which writes a
//! per-process `.tmp` sibling and renames it into place, so a reader never sees a
//! half-written file under the final name.

use arrow_array::{
    Array, ArrayRef, Float64Array, RecordBatch, StringArray, UInt32Array, UInt64Array,
};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::{ArrowWriter, ProjectionMask, arrow_reader::ParquetRecordBatchReaderBuilder};
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::{
    collections::{HashMap, HashSet},
    ffi::OsString,
    fs::File,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use super::errors::PipelineError;
use super::records::{CandidateSample, CardId, LocationType, MappingRow, StopKey};
use super::stops::CleansedStop;

/// Per-process sibling of `path`, so concurrent writers never share a file.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(format!(".{}.tmp", std::process::id()));
    PathBuf::from(name)
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build()
}

pub fn write_parquet_atomic(path: &Path, batch: &RecordBatch) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let file = fs_err::File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;
    fs_err::rename(&tmp, path)?;
    Ok(())
}

/// Reads the named columns of a parquet file.
pub fn read_parquet(path: &Path, columns: &[&'static str]) -> Result<Vec<RecordBatch>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema_descr = builder.metadata().file_metadata().schema_descr();
    let all_fields = schema_descr.columns();
    let projection_indices = columns
        .iter()
        .map(|name| {
            all_fields
                .iter()
                .position(|f| f.name() == *name)
                .ok_or_else(|| PipelineError::Column {
                    path: path.to_path_buf(),
                    column: *name,
                })
        })
        .collect::<Result<Vec<usize>, _>>()?;
    let mask = ProjectionMask::leaves(schema_descr, projection_indices);

    let reader = builder.with_projection(mask).build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    path: &Path,
    name: &'static str,
) -> Result<&'a T, PipelineError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| PipelineError::Column {
            path: path.to_path_buf(),
            column: name,
        })
}

fn optional_f64(array: &Float64Array, i: usize) -> Option<f64> {
    if array.is_null(i) {
        None
    } else {
        Some(array.value(i))
    }
}

fn utf8(name: &str, nullable: bool) -> Field {
    Field::new(name, DataType::Utf8, nullable)
}

// ---------------------------------------------------------------------------
// Candidate tables
// ---------------------------------------------------------------------------

const CANDIDATE_COLUMNS: [&str; 7] = [
    "card_id",
    "stop_id",
    "stop_name",
    "region_code",
    "transport_type",
    "x",
    "y",
];

pub fn write_candidates(path: &Path, samples: &[CandidateSample]) -> Result<(), PipelineError> {
    let schema = Schema::new(vec![
        utf8("card_id", false),
        utf8("stop_id", false),
        utf8("stop_name", false),
        utf8("region_code", false),
        utf8("transport_type", false),
        Field::new("x", DataType::Float64, true),
        Field::new("y", DataType::Float64, true),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(samples.iter().map(|s| s.card_id.0.as_str()))),
        Arc::new(StringArray::from_iter_values(samples.iter().map(|s| s.stop.stop_id.as_str()))),
        Arc::new(StringArray::from_iter_values(samples.iter().map(|s| s.stop_name.as_str()))),
        Arc::new(StringArray::from_iter_values(samples.iter().map(|s| s.stop.region_code.as_str()))),
        Arc::new(StringArray::from_iter_values(samples.iter().map(|s| s.stop.transport_type.as_str()))),
        Arc::new(Float64Array::from(samples.iter().map(|s| s.x).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(samples.iter().map(|s| s.y).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
    write_parquet_atomic(path, &batch)
}

/// Reads candidate samples, keeping only the listed cards when a filter is given.
pub fn read_candidates(
    path: &Path,
    location_type: LocationType,
    cards: Option<&HashSet<CardId>>,
) -> Result<Vec<CandidateSample>, PipelineError> {
    let mut samples = Vec::new();
    for batch in read_parquet(path, &CANDIDATE_COLUMNS)? {
        let card_id = column::<StringArray>(&batch, path, "card_id")?;
        let stop_id = column::<StringArray>(&batch, path, "stop_id")?;
        let stop_name = column::<StringArray>(&batch, path, "stop_name")?;
        let region_code = column::<StringArray>(&batch, path, "region_code")?;
        let transport_type = column::<StringArray>(&batch, path, "transport_type")?;
        let x = column::<Float64Array>(&batch, path, "x")?;
        let y = column::<Float64Array>(&batch, path, "y")?;

        for i in 0..batch.num_rows() {
            let card = card_id.value(i);
            if cards.is_some_and(|set| !set.contains(card)) {
                continue;
            }
            samples.push(CandidateSample {
                card_id: CardId(card.to_string()),
                location_type,
                stop: StopKey {
                    stop_id: stop_id.value(i).to_string(),
                    region_code: region_code.value(i).to_string(),
                    transport_type: transport_type.value(i).to_string(),
                },
                stop_name: stop_name.value(i).to_string(),
                x: optional_f64(x, i),
                y: optional_f64(y, i),
            });
        }
    }
    Ok(samples)
}

/// Number of candidate points per card, reading only the card column.
pub fn count_candidates_per_card(path: &Path) -> Result<HashMap<CardId, usize>, PipelineError> {
    let mut counts: HashMap<CardId, usize> = HashMap::new();
    for batch in read_parquet(path, &["card_id"])? {
        let card_id = column::<StringArray>(&batch, path, "card_id")?;
        for card in card_id.iter().flatten() {
            match counts.get_mut(card) {
                Some(count) => *count += 1,
                None => {
                    counts.insert(CardId(card.to_string()), 1);
                }
            }
        }
    }
    Ok(counts)
}

// ---------------------------------------------------------------------------
// Cleansed stops
// ---------------------------------------------------------------------------

pub fn write_cleansed_stops(path: &Path, stops: &[CleansedStop]) -> Result<(), PipelineError> {
    let schema = Schema::new(vec![
        utf8("stop_id", false),
        utf8("stop_name", false),
        utf8("region_code", false),
        utf8("transport_type", false),
        Field::new("x", DataType::Float64, false),
        Field::new("y", DataType::Float64, false),
        Field::new("x_5179", DataType::Float64, true),
        Field::new("y_5179", DataType::Float64, true),
        utf8("grid_id", true),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(stops.iter().map(|s| s.info.stop.stop_id.as_str()))),
        Arc::new(StringArray::from_iter_values(stops.iter().map(|s| s.info.stop_name.as_str()))),
        Arc::new(StringArray::from_iter_values(stops.iter().map(|s| s.info.stop.region_code.as_str()))),
        Arc::new(StringArray::from_iter_values(stops.iter().map(|s| s.info.stop.transport_type.as_str()))),
        Arc::new(Float64Array::from_iter_values(stops.iter().map(|s| s.info.lon))),
        Arc::new(Float64Array::from_iter_values(stops.iter().map(|s| s.info.lat))),
        Arc::new(Float64Array::from(stops.iter().map(|s| s.x_5179).collect::<Vec<_>>())),
        Arc::new(Float64Array::from(stops.iter().map(|s| s.y_5179).collect::<Vec<_>>())),
        Arc::new(StringArray::from(stops.iter().map(|s| s.grid_id.clone()).collect::<Vec<_>>())),
    ];
    let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
    write_parquet_atomic(path, &batch)
}

// ---------------------------------------------------------------------------
// Batch assignments
// ---------------------------------------------------------------------------

pub fn write_assignments(path: &Path, assignments: &[(CardId, u32)]) -> Result<(), PipelineError> {
    let schema = Schema::new(vec![
        utf8("card_id", false),
        Field::new("batch_id", DataType::UInt32, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(assignments.iter().map(|(c, _)| c.0.as_str()))),
        Arc::new(UInt32Array::from_iter_values(assignments.iter().map(|(_, b)| *b))),
    ];
    let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
    write_parquet_atomic(path, &batch)
}

pub fn read_assignments(path: &Path) -> Result<Vec<(CardId, u32)>, PipelineError> {
    let mut assignments = Vec::new();
    for batch in read_parquet(path, &["card_id", "batch_id"])? {
        let card_id = column::<StringArray>(&batch, path, "card_id")?;
        let batch_id = column::<UInt32Array>(&batch, path, "batch_id")?;
        for i in 0..batch.num_rows() {
            assignments.push((CardId(card_id.value(i).to_string()), batch_id.value(i)));
        }
    }
    Ok(assignments)
}

// ---------------------------------------------------------------------------
// Mapping rows
// ---------------------------------------------------------------------------

const MAPPING_COLUMNS: [&str; 9] = [
    "card_id",
    "stop_id",
    "stop_name",
    "region_code",
    "transport_type",
    "location_type",
    "confidence",
    "cluster_size",
    "total_trips",
];

pub fn mapping_rows_to_batch(rows: &[MappingRow]) -> Result<RecordBatch, PipelineError> {
    let schema = Schema::new(vec![
        utf8("card_id", false),
        utf8("stop_id", false),
        utf8("stop_name", false),
        utf8("region_code", false),
        utf8("transport_type", false),
        utf8("location_type", false),
        Field::new("confidence", DataType::Float64, false),
        Field::new("cluster_size", DataType::UInt64, false),
        Field::new("total_trips", DataType::UInt64, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.card_id.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.stop_id.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.stop_name.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.region_code.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.transport_type.as_str()))),
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.location_type.as_str()))),
        Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.confidence))),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.cluster_size))),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.total_trips))),
    ];
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

pub fn write_mapping_rows(path: &Path, rows: &[MappingRow]) -> Result<(), PipelineError> {
    write_parquet_atomic(path, &mapping_rows_to_batch(rows)?)
}

pub fn read_mapping_rows(path: &Path) -> Result<Vec<MappingRow>, PipelineError> {
    let mut rows = Vec::new();
    for batch in read_parquet(path, &MAPPING_COLUMNS)? {
        let card_id = column::<StringArray>(&batch, path, "card_id")?;
        let stop_id = column::<StringArray>(&batch, path, "stop_id")?;
        let stop_name = column::<StringArray>(&batch, path, "stop_name")?;
        let region_code = column::<StringArray>(&batch, path, "region_code")?;
        let transport_type = column::<StringArray>(&batch, path, "transport_type")?;
        let location_type = column::<StringArray>(&batch, path, "location_type")?;
        let confidence = column::<Float64Array>(&batch, path, "confidence")?;
        let cluster_size = column::<UInt64Array>(&batch, path, "cluster_size")?;
        let total_trips = column::<UInt64Array>(&batch, path, "total_trips")?;

        for i in 0..batch.num_rows() {
            let location_type = LocationType::from_str(location_type.value(i)).map_err(|_| {
                PipelineError::Column {
                    path: path.to_path_buf(),
                    column: "location_type",
                }
            })?;
            rows.push(MappingRow {
                card_id: card_id.value(i).to_string(),
                stop_id: stop_id.value(i).to_string(),
                stop_name: stop_name.value(i).to_string(),
                region_code: region_code.value(i).to_string(),
                transport_type: transport_type.value(i).to_string(),
                location_type,
                confidence: confidence.value(i),
                cluster_size: cluster_size.value(i),
                total_trips: total_trips.value(i),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stops::StopInfo;

    fn candidate(card: &str, x: Option<f64>) -> CandidateSample {
        CandidateSample {
            card_id: CardId(card.to_string()),
            location_type: LocationType::Office,
            stop: StopKey {
                stop_id: "101".to_string(),
                region_code: "11".to_string(),
                transport_type: "B".to_string(),
            },
            stop_name: "City Hall".to_string(),
            x,
            y: Some(37.5666),
        }
    }

    #[test]
    fn test_tmp_path_is_per_process() {
        let tmp = tmp_path(Path::new("/out/valid_cards.parquet"));
        assert_eq!(
            tmp,
            PathBuf::from(format!("/out/valid_cards.parquet.{}.tmp", std::process::id()))
        );
    }

    #[test]
    fn test_candidates_filter_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("202501").join("office.parquet");
        let samples = vec![
            candidate("c1", Some(126.9784)),
            candidate("c2", None),
            candidate("c1", None),
        ];
        write_candidates(&path, &samples).unwrap();
        assert!(!tmp_path(&path).exists());

        let all = read_candidates(&path, LocationType::Office, None).unwrap();
        assert_eq!(all, samples);

        let only_c1: HashSet<CardId> = [CardId("c1".to_string())].into_iter().collect();
        let filtered = read_candidates(&path, LocationType::Office, Some(&only_c1)).unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[1].x, None);

        let counts = count_candidates_per_card(&path).unwrap();
        assert_eq!(counts[&CardId("c1".to_string())], 2);
        assert_eq!(counts[&CardId("c2".to_string())], 1);
    }

    #[test]
    fn test_missing_file_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.parquet");
        assert!(matches!(
            read_parquet(&missing, &["card_id"]),
            Err(PipelineError::MissingInput(_))
        ));

        let path = dir.path().join("assignments.parquet");
        write_assignments(&path, &[(CardId("c1".to_string()), 3)]).unwrap();
        assert!(matches!(
            read_parquet(&path, &["x"]),
            Err(PipelineError::Column { column: "x", .. })
        ));
        assert_eq!(
            read_assignments(&path).unwrap(),
            vec![(CardId("c1".to_string()), 3)]
        );
    }

    #[test]
    fn test_mapping_rows_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.parquet");
        let rows = vec![MappingRow {
            card_id: "c1".to_string(),
            stop_id: "101".to_string(),
            stop_name: "City Hall".to_string(),
            region_code: "11".to_string(),
            transport_type: "B".to_string(),
            location_type: LocationType::Residence,
            confidence: 0.83,
            cluster_size: 10,
            total_trips: 12,
        }];
        write_mapping_rows(&path, &rows).unwrap();
        assert_eq!(read_mapping_rows(&path).unwrap(), rows);

        write_mapping_rows(&path, &[]).unwrap();
        assert!(read_mapping_rows(&path).unwrap().is_empty());
    }

    #[test]
    fn test_write_cleansed_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.parquet");
        let stop = CleansedStop {
            info: StopInfo {
                stop: StopKey {
                    stop_id: "101".to_string(),
                    region_code: "11".to_string(),
                    transport_type: "B".to_string(),
                },
                stop_name: "City Hall".to_string(),
                lon: 126.9784,
                lat: 37.5666,
            },
            x_5179: Some(953_912.0),
            y_5179: Some(1_952_031.0),
            grid_id: Some("CG5391252031".to_string()),
        };
        write_cleansed_stops(&path, &[stop]).unwrap();
        let batches = read_parquet(&path, &["grid_id"]).unwrap();
        let grid = column::<StringArray>(&batches[0], &path, "grid_id").unwrap();
        assert_eq!(grid.value(0), "CG5391252031");
    }
}
