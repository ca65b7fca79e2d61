use chrono::NaiveDateTime;
use indicatif::ProgressIterator;
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, collections::HashMap, fmt, path::Path, str::FromStr};
use tracing::{info, warn};

use super::errors::PipelineError;
use super::stops::StopInfo;
use super::utils::progress_bar_for_count;

/// Trip log timestamps, e.g. 20250115083000
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct CardId(pub String);

// Lets `HashSet<CardId>` be probed with a `&str` straight from a column.
impl Borrow<str> for CardId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stop is only unique within a region and transport type.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
pub struct StopKey {
    pub stop_id: String,
    pub region_code: String,
    pub transport_type: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Residence,
    Office,
}

impl LocationType {
    pub const ALL: [LocationType; 2] = [LocationType::Residence, LocationType::Office];

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::Residence => "residence",
            LocationType::Office => "office",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "residence" | "home" => Ok(LocationType::Residence),
            "office" | "work" | "school" => Ok(LocationType::Office),
            _ => Err(format!("Invalid location type: {}", s)),
        }
    }
}

/// One end of a trip: where and when the card touched in or out.
#[derive(Clone, Debug, PartialEq)]
pub struct StopVisit {
    pub stop: StopKey,
    pub stop_name: String,
    pub time: NaiveDateTime,
    /// Raw longitude/latitude from the stop reference, already axis-corrected.
    /// `None` when the stop is missing from the reference.
    pub lon: Option<f64>,
    pub lat: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TripRecord {
    pub card_id: CardId,
    pub board: StopVisit,
    pub alight: StopVisit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CandidateSample {
    pub card_id: CardId,
    pub location_type: LocationType,
    pub stop: StopKey,
    pub stop_name: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemberStop {
    pub stop: StopKey,
    pub stop_name: String,
}

/// Dominant-cluster outcome for one card and one location type.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterResult {
    pub card_id: CardId,
    pub location_type: LocationType,
    pub stops: Vec<MemberStop>,
    pub confidence: f64,
    pub cluster_size: u64,
    pub total_trips: u64,
}

impl ClusterResult {
    /// Explodes the result into one mapping row per member stop.
    pub fn into_rows(self) -> Vec<MappingRow> {
        let ClusterResult {
            card_id,
            location_type,
            stops,
            confidence,
            cluster_size,
            total_trips,
        } = self;
        stops
            .into_iter()
            .map(|member| MappingRow {
                card_id: card_id.0.clone(),
                stop_id: member.stop.stop_id,
                stop_name: member.stop_name,
                region_code: member.stop.region_code,
                transport_type: member.stop.transport_type,
                location_type,
                confidence,
                cluster_size,
                total_trips,
            })
            .collect()
    }
}

/// A row of the merged home/work mapping table.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MappingRow {
    pub card_id: String,
    pub stop_id: String,
    pub stop_name: String,
    pub region_code: String,
    pub transport_type: String,
    pub location_type: LocationType,
    pub confidence: f64,
    pub cluster_size: u64,
    pub total_trips: u64,
}

/// Trip log row as exported by the fare system.
#[derive(Debug, Deserialize)]
struct RawTripRow {
    card_id: String,
    board_stop_id: String,
    board_region_code: String,
    board_transport_type: String,
    board_time: String,
    alight_stop_id: String,
    alight_region_code: String,
    alight_transport_type: String,
    alight_time: String,
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT).ok()
}

fn visit(
    stop: StopKey,
    time: NaiveDateTime,
    stop_lookup: &HashMap<StopKey, StopInfo>,
) -> StopVisit {
    match stop_lookup.get(&stop) {
        Some(info) => StopVisit {
            stop,
            stop_name: info.stop_name.clone(),
            time,
            lon: Some(info.lon),
            lat: Some(info.lat),
        },
        None => StopVisit {
            stop,
            stop_name: String::new(),
            time,
            lon: None,
            lat: None,
        },
    }
}

impl RawTripRow {
    fn into_trip(self, stop_lookup: &HashMap<StopKey, StopInfo>) -> Option<TripRecord> {
        let board_time = parse_timestamp(&self.board_time)?;
        let alight_time = parse_timestamp(&self.alight_time)?;
        let board = StopKey {
            stop_id: self.board_stop_id.trim().to_string(),
            region_code: self.board_region_code.trim().to_string(),
            transport_type: self.board_transport_type.trim().to_string(),
        };
        let alight = StopKey {
            stop_id: self.alight_stop_id.trim().to_string(),
            region_code: self.alight_region_code.trim().to_string(),
            transport_type: self.alight_transport_type.trim().to_string(),
        };
        Some(TripRecord {
            card_id: CardId(self.card_id.trim().to_string()),
            board: visit(board, board_time, stop_lookup),
            alight: visit(alight, alight_time, stop_lookup),
        })
    }
}

/// Reads a month of trip logs and joins each end against the stop lookup.
/// Rows with unparseable timestamps are dropped and counted.
pub fn read_trips(
    path: &Path,
    stop_lookup: &HashMap<StopKey, StopInfo>,
) -> Result<Vec<TripRecord>, PipelineError> {
    info!("Reading trips from {}", path.display());
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<RawTripRow>()
        .collect::<Result<Vec<_>, _>>()?;

    let progress = progress_bar_for_count(rows.len());
    let total = rows.len();
    let trips: Vec<TripRecord> = rows
        .into_iter()
        .progress_with(progress)
        .filter_map(|row| row.into_trip(stop_lookup))
        .collect();

    let dropped = total - trips.len();
    if dropped > 0 {
        warn!(dropped, "Dropped trips with unparseable timestamps");
    }
    info!("Trips len: {}", trips.len());
    Ok(trips)
}
