use bellrock_shared::celltower::{CellTower, CoarseLocation};
use bellrock_shared::{Aid, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A precise WGS84 position, as reported by the observing device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub name: Option<String>,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            name: None,
        }
    }

    pub fn named(lat: f64, lon: f64, name: impl Into<String>) -> Self {
        Self {
            lat,
            lon,
            name: Some(name.into()),
        }
    }

    /// Project down to the ~10 m co-location quantum.
    pub fn to_coarse(&self) -> CoarseLocation {
        CoarseLocation::new(self.lat as f32, self.lon as f32)
    }
}

/// One heard AID: who heard it, when and where. `resolved` is back-filled by
/// the resolver once the sender has been identified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub observer: Uid,
    pub aid: Aid,
    pub resolved: Option<Uid>,
    pub time: DateTime<Utc>,
    pub location: Location,
}

impl Observation {
    pub fn new(observer: Uid, aid: Aid, time: DateTime<Utc>, location: Location) -> Self {
        Self {
            observer,
            aid,
            resolved: None,
            time,
            location,
        }
    }
}

/// Everything one observer heard since its last sync, in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub observer: Uid,
    pub observations: Vec<Observation>,
}

impl ObservationBatch {
    pub fn new(observer: Uid, observations: Vec<Observation>) -> Self {
        Self {
            observer,
            observations,
        }
    }

    pub fn first(&self) -> Option<&Observation> {
        self.observations.first()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// A time interval a user spent inside one coarse cell, as synced by the
/// client. The coarse position is derived from the cell tower when the
/// client did not supply it directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserLocation {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<CoarseLocation>,
    pub cell_tower: CellTower,
}

impl UserLocation {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: Option<CoarseLocation>,
        cell_tower: CellTower,
    ) -> Self {
        Self {
            start,
            end,
            location,
            cell_tower,
        }
    }

    /// True iff this interval intersects `[start, end]`. Touching endpoints
    /// count as overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && self.end >= start
    }

    /// True iff the whole interval ended before `time`.
    pub fn is_before(&self, time: DateTime<Utc>) -> bool {
        self.end < time
    }
}
