// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-laser calibration lookup.
//!
//! The table is loaded once at startup from a JSON device description:
//!
//! ```json
//! {
//!   "lasers": [
//!     { "rot_correction": -4.52, "dist_correction": 1.12, "time_offset": 0.0 },
//!     ...
//!   ]
//! }
//! ```
//!
//! `rot_correction` is in degrees, `dist_correction` in meters and the
//! optional `time_offset` in microseconds after the block encoder sample.

use crate::{
    azimuth::{self, nominal_laser_time_offset},
    lidar::Error,
    packet::{LASER_COUNT, LASERS_PER_BLOCK, RANGE_RESOLUTION},
};
use serde::Deserialize;
use std::path::Path;

/// Correction constants for one laser.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct LaserCalibration {
    /// Rotational (azimuth) correction in degrees
    #[serde(default)]
    pub rot_correction: f64,
    /// Additive range correction in meters
    #[serde(default)]
    pub dist_correction: f64,
    /// Firing time after the block encoder sample in microseconds
    #[serde(default)]
    pub time_offset: Option<f64>,
}

#[derive(Deserialize)]
struct CalibrationFile {
    lasers: Vec<LaserCalibration>,
}

/// Read-only calibration table indexed by global laser id.
#[derive(Clone, Debug)]
pub struct Calibration {
    lasers: Vec<LaserCalibration>,
    time_offsets: [f64; LASER_COUNT],
}

impl Calibration {
    /// Calibration with zero corrections and nominal firing times.
    pub fn nominal() -> Self {
        let lasers = vec![
            LaserCalibration {
                rot_correction: 0.0,
                dist_correction: 0.0,
                time_offset: None,
            };
            LASER_COUNT
        ];
        Self::build(lasers)
    }

    /// Build a table from exactly [`LASER_COUNT`] entries.
    pub fn from_lasers(lasers: Vec<LaserCalibration>) -> Result<Self, Error> {
        if lasers.len() != LASER_COUNT {
            return Err(Error::Config(format!(
                "calibration must describe {} lasers, got {}",
                LASER_COUNT,
                lasers.len()
            )));
        }
        Ok(Self::build(lasers))
    }

    fn build(lasers: Vec<LaserCalibration>) -> Self {
        let mut time_offsets = [0.0; LASER_COUNT];
        for (id, laser) in lasers.iter().enumerate() {
            time_offsets[id] = laser
                .time_offset
                .unwrap_or_else(|| nominal_laser_time_offset(id % LASERS_PER_BLOCK));
        }

        Self {
            lasers,
            time_offsets,
        }
    }

    /// Parse a JSON calibration document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: CalibrationFile = serde_json::from_str(json)?;
        Self::from_lasers(file.lasers)
    }

    /// Load a JSON calibration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Transport(format!(
                "cannot read calibration {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    #[inline]
    pub fn laser(&self, id: usize) -> &LaserCalibration {
        &self.lasers[id]
    }

    /// Firing time of a laser after its block encoder sample.
    #[inline]
    pub fn time_offset(&self, id: usize) -> f64 {
        self.time_offsets[id]
    }

    /// Corrected azimuth of a return in degrees, `[0, 360)`.
    ///
    /// `rotation` is the block encoder reading in hundredths of a degree and
    /// `angular_speed` is in degrees per microsecond.
    #[inline]
    pub fn azimuth(&self, id: usize, rotation: u16, angular_speed: f64) -> f64 {
        let rotation_deg = rotation as f64 / 100.0;
        let a = azimuth::azimuth(rotation_deg, self.time_offsets[id], angular_speed);
        let correction = self.lasers[id].rot_correction;
        if correction == 0.0 {
            a
        } else {
            azimuth::normalize_degrees(a + correction)
        }
    }

    /// Corrected range of a return in meters.
    #[inline]
    pub fn range(&self, id: usize, raw: u16) -> f64 {
        raw as f64 * RANGE_RESOLUTION + self.lasers[id].dist_correction
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::nominal()
    }
}
