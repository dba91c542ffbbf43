//! GSM cell-tower identifiers and the tower → coarse-location lookup map.
//!
//! The map is built offline from an OpenCellID CSV dump and shipped as a
//! single bincode file (~10^7 entries, several hundred MB resident). It is
//! loaded whole at startup and never mutated afterwards.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CellMapError;

/// A GSM cell, identified by MCC/MNC/LAC/CID.
///
/// The packed 64-bit form, most significant bits first, is
/// MCC(10) | MNC(10) | LAC(16) | CID(28). This layout is part of the
/// persisted schema: the `locations` table stores the packed value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellTower {
    pub mcc: u16,
    pub mnc: u16,
    pub lac: u16,
    pub cid: u32,
}

impl CellTower {
    pub fn new(mcc: u16, mnc: u16, lac: u16, cid: u32) -> Self {
        Self { mcc, mnc, lac, cid }
    }

    pub fn pack(&self) -> u64 {
        (((self.mcc as u64) & 0x3FF) << 54)
            | (((self.mnc as u64) & 0x3FF) << 44)
            | ((self.lac as u64) << 28)
            | ((self.cid as u64) & 0x0FFF_FFFF)
    }

    pub fn unpack(packed: u64) -> Self {
        Self {
            mcc: ((packed >> 54) & 0x3FF) as u16,
            mnc: ((packed >> 44) & 0x3FF) as u16,
            lac: ((packed >> 28) & 0xFFFF) as u16,
            cid: (packed & 0x0FFF_FFFF) as u32,
        }
    }
}

/// A location quantized to f32 lat/lon, roughly 10 m of resolution. This is
/// the quantum used for co-location matching, so equality and hashing are
/// defined on the exact bit patterns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoarseLocation {
    pub lat: f32,
    pub lon: f32,
}

impl CoarseLocation {
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }
}

impl PartialEq for CoarseLocation {
    fn eq(&self, other: &Self) -> bool {
        self.lat.to_bits() == other.lat.to_bits() && self.lon.to_bits() == other.lon.to_bits()
    }
}

impl Eq for CoarseLocation {}

impl std::hash::Hash for CoarseLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.lat.to_bits().hash(state);
        self.lon.to_bits().hash(state);
    }
}

impl std::fmt::Display for CoarseLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Read-only map from packed cell identifiers to coarse locations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CellTowerMap {
    cells: HashMap<u64, CoarseLocation>,
}

impl CellTowerMap {
    /// An empty map. Lookups miss; useful when no map file is configured.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (CellTower, CoarseLocation)>) -> Self {
        Self {
            cells: entries
                .into_iter()
                .map(|(ct, loc)| (ct.pack(), loc))
                .collect(),
        }
    }

    /// Load the whole map from a bincode file written by [`save`] (the
    /// offline preprocessor's output).
    ///
    /// [`save`]: CellTowerMap::save
    pub fn load(path: &Path) -> Result<Self, CellMapError> {
        let file = File::open(path)?;
        let map: Self = bincode::deserialize_from(BufReader::new(file))?;
        tracing::info!(
            path = %path.display(),
            cells = map.cells.len(),
            "loaded cell tower map"
        );
        Ok(map)
    }

    pub fn save(&self, path: &Path) -> Result<(), CellMapError> {
        let file = File::create(path)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn get(&self, tower: &CellTower) -> Option<CoarseLocation> {
        self.cells.get(&tower.pack()).copied()
    }

    pub fn get_packed(&self, packed: u64) -> Option<CoarseLocation> {
        self.cells.get(&packed).copied()
    }

    /// All cells registered under the given Mobile Country Code.
    pub fn filter_by_country(&self, mcc: u16) -> Vec<CellTower> {
        self.cells
            .keys()
            .map(|&packed| CellTower::unpack(packed))
            .filter(|cell| cell.mcc == mcc)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
