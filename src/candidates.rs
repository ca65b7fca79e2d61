use chrono::Timelike;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashMap;

use super::records::{CandidateSample, CardId, LocationType, StopVisit, TripRecord};

/// Inclusive range of hours of the day.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl TimeWindow {
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        TimeWindow {
            start_hour,
            end_hour,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.start_hour..=self.end_hour).contains(&hour)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CandidateWindows {
    pub morning: TimeWindow,
    pub evening: TimeWindow,
}

impl Default for CandidateWindows {
    fn default() -> Self {
        CandidateWindows {
            morning: TimeWindow::new(5, 10),
            evening: TimeWindow::new(16, 22),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct CandidateSets {
    pub residence: Vec<CandidateSample>,
    pub office: Vec<CandidateSample>,
}

impl CandidateSets {
    pub fn get(&self, location_type: LocationType) -> &[CandidateSample] {
        match location_type {
            LocationType::Residence => &self.residence,
            LocationType::Office => &self.office,
        }
    }
}

fn sample(card_id: &CardId, location_type: LocationType, visit: &StopVisit) -> CandidateSample {
    CandidateSample {
        card_id: card_id.clone(),
        location_type,
        stop: visit.stop.clone(),
        stop_name: visit.stop_name.clone(),
        x: visit.lon,
        y: visit.lat,
    }
}

/// Candidate points contributed by one trip. A trip can feed both sets.
fn trip_candidates(trip: &TripRecord, windows: &CandidateWindows) -> Vec<CandidateSample> {
    let board_hour = trip.board.time.hour();
    let alight_hour = trip.alight.time.hour();
    let mut samples = Vec::with_capacity(2);

    // Home: leave in the morning, come back in the evening
    if windows.morning.contains(board_hour) {
        samples.push(sample(&trip.card_id, LocationType::Residence, &trip.board));
    }
    if windows.evening.contains(alight_hour) {
        samples.push(sample(&trip.card_id, LocationType::Residence, &trip.alight));
    }
    // Work: arrive in the morning, leave in the evening
    if windows.morning.contains(alight_hour) {
        samples.push(sample(&trip.card_id, LocationType::Office, &trip.alight));
    }
    if windows.evening.contains(board_hour) {
        samples.push(sample(&trip.card_id, LocationType::Office, &trip.board));
    }
    samples
}

pub fn extract_candidates(trips: &[TripRecord], windows: &CandidateWindows) -> CandidateSets {
    let samples: Vec<CandidateSample> = trips
        .par_iter()
        .flat_map_iter(|trip| trip_candidates(trip, windows))
        .collect();

    let (residence, office): (Vec<_>, Vec<_>) = samples
        .into_iter()
        .partition(|s| s.location_type == LocationType::Residence);
    CandidateSets { residence, office }
}

/// Groups samples per card, keeping cards in order of first appearance.
pub fn group_by_card(samples: Vec<CandidateSample>) -> Vec<(CardId, Vec<CandidateSample>)> {
    let mut index: HashMap<CardId, usize> = HashMap::new();
    let mut groups: Vec<(CardId, Vec<CandidateSample>)> = Vec::new();
    for sample in samples {
        match index.get(&sample.card_id) {
            Some(&i) => groups[i].1.push(sample),
            None => {
                index.insert(sample.card_id.clone(), groups.len());
                groups.push((sample.card_id.clone(), vec![sample]));
            }
        }
    }
    groups
}
