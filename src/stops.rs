use indicatif::ProgressIterator;
use rayon::prelude::*;
use serde::Deserialize;
use std::{collections::HashMap, path::Path};
use tracing::info;

use super::errors::PipelineError;
use super::grid;
use super::projection::wgs84_to_korea2000;
use super::records::StopKey;
use super::utils::progress_bar_for_count;

/// Stop reference coordinates are plain degrees; anything this large is junk.
const MAX_RAW_COORDINATE: f64 = 1000.0;
/// Longitudes in Korea are above this, latitudes below.
const AXIS_PIVOT: f64 = 100.0;

#[derive(Clone, Debug, PartialEq)]
pub struct StopInfo {
    pub stop: StopKey,
    pub stop_name: String,
    pub lon: f64,
    pub lat: f64,
}

/// A stop reference row projected to EPSG:5179 with its grid code.
#[derive(Clone, Debug, PartialEq)]
pub struct CleansedStop {
    pub info: StopInfo,
    pub x_5179: Option<f64>,
    pub y_5179: Option<f64>,
    pub grid_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStopRow {
    region_code: String,
    transport_type: String,
    stop_id: String,
    stop_name: String,
    gps_x: Option<f64>,
    gps_y: Option<f64>,
}

/// Undoes swapped x/y columns in the stop reference.
pub fn correct_axes(x: f64, y: f64) -> (f64, f64) {
    let corrected_y = if y > AXIS_PIVOT { x } else { y };
    let corrected_x = if x < AXIS_PIVOT { y } else { x };
    (corrected_x, corrected_y)
}

/// Float-typed exports turn `1234` into `1234.0`.
fn normalise_stop_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed).to_string()
}

impl RawStopRow {
    fn into_stop(self) -> Option<StopInfo> {
        let (x, y) = (self.gps_x?, self.gps_y?);
        if !(x < MAX_RAW_COORDINATE && y < MAX_RAW_COORDINATE) {
            return None;
        }
        let (lon, lat) = correct_axes(x, y);
        Some(StopInfo {
            stop: StopKey {
                stop_id: normalise_stop_id(&self.stop_id),
                region_code: self.region_code.trim().to_string(),
                transport_type: self.transport_type.trim().to_string(),
            },
            stop_name: self.stop_name.trim().to_string(),
            lon,
            lat,
        })
    }
}

pub fn read_stop_reference(path: &Path) -> Result<Vec<StopInfo>, PipelineError> {
    info!("Reading stop reference from {}", path.display());
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize::<RawStopRow>()
        .collect::<Result<Vec<_>, _>>()?;
    let total = rows.len();
    let stops: Vec<StopInfo> = rows.into_iter().filter_map(RawStopRow::into_stop).collect();
    info!("Kept {} of {} stops with usable coordinates", stops.len(), total);
    Ok(stops)
}

pub fn create_lookup(stops: &[StopInfo]) -> HashMap<StopKey, StopInfo> {
    let mut stop_lookup: HashMap<StopKey, StopInfo> = HashMap::new();

    info!("Building stop lookup...");
    let progress = progress_bar_for_count(stops.len());
    for stop in stops.iter().progress_with(progress) {
        stop_lookup
            .entry(stop.stop.clone())
            .or_insert_with(|| stop.clone());
    }

    info!("Stop lookup len: {}", stop_lookup.len());
    stop_lookup
}

/// Projects every stop and attaches its grid code.
pub fn cleanse(stops: Vec<StopInfo>) -> Vec<CleansedStop> {
    let projected: Vec<_> = stops
        .par_iter()
        .map(|s| wgs84_to_korea2000(s.lon, s.lat))
        .collect();
    let xs: Vec<f64> = projected.iter().map(|p| p.map_or(f64::NAN, |p| p.x)).collect();
    let ys: Vec<f64> = projected.iter().map(|p| p.map_or(f64::NAN, |p| p.y)).collect();
    let grid_ids = grid::encode_many(&xs, &ys);

    stops
        .into_iter()
        .zip(projected)
        .zip(grid_ids)
        .map(|((info, point), grid_id)| CleansedStop {
            info,
            x_5179: point.map(|p| p.x),
            y_5179: point.map(|p| p.y),
            grid_id,
        })
        .collect()
}
