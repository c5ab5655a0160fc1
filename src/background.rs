// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Background subtraction strategies.
//!
//! All three strategies keep a learned value per (laser id, azimuth bucket)
//! cell in a dense [`Surface`] allocated once at construction. Updates are
//! O(1) and never allocate.
//!
//! - [`AgeBackground`]: a cell is background once its range has not changed
//!   by more than a threshold for longer than a given age. Only meaningful for
//!   a stationary sensor, where a bucket always sees the same scene point.
//! - [`MaxRangeBackground`]: a point is background if it is within epsilon of
//!   the farthest range ever seen in its cell.
//! - [`FixedBackground`]: same rule against a surface learned offline from a
//!   recorded capture and frozen afterwards.

use crate::{
    azimuth,
    calibration::Calibration,
    lidar::{Error, Timestamp},
    packet::{LASER_COUNT, Packet, PointMask},
    packet_source::PacketSource,
    thin::{Class, ThinContext, select},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::fmt;
use tracing::{debug, info};

/// Number of azimuth buckets per laser (0.1 degree resolution)
pub const AZIMUTH_BUCKETS: usize = 3600;

/// Bucket of an azimuth in degrees.
#[inline]
pub fn azimuth_bucket(azimuth: f64) -> usize {
    (azimuth * (AZIMUTH_BUCKETS as f64 / 360.0)) as usize % AZIMUTH_BUCKETS
}

/// Dense per-cell state indexed by laser id and azimuth bucket.
#[derive(Clone)]
pub struct Surface<T> {
    cells: Vec<T>,
}

impl<T: Copy> Surface<T> {
    /// Allocate a surface with every cell set to `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            cells: vec![initial; LASER_COUNT * AZIMUTH_BUCKETS],
        }
    }

    #[inline]
    pub fn get(&self, id: usize, bucket: usize) -> T {
        self.cells[id * AZIMUTH_BUCKETS + bucket]
    }

    #[inline]
    pub fn get_mut(&mut self, id: usize, bucket: usize) -> &mut T {
        &mut self.cells[id * AZIMUTH_BUCKETS + bucket]
    }

    pub fn cells(&self) -> &[T] {
        &self.cells
    }
}

impl<T> fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Surface({}x{})", LASER_COUNT, AZIMUTH_BUCKETS)
    }
}

/// Running maximum range per cell, in raw range units.
pub type RangeSurface = Surface<u16>;

impl RangeSurface {
    /// Empty surface, every maximum zero.
    pub fn empty() -> Self {
        Surface::new(0)
    }

    /// Raise the cell maximum to `range` if larger; returns the new maximum.
    #[inline]
    pub fn update(&mut self, id: usize, bucket: usize, range: u16) -> u16 {
        let cell = self.get_mut(id, bucket);
        if range > *cell {
            *cell = range;
        }
        *cell
    }

    /// Background if `range` is within `epsilon` of the cell maximum.
    #[inline]
    pub fn classify(&self, id: usize, bucket: usize, range: u16, epsilon: u16) -> Class {
        if range as u32 + epsilon as u32 >= self.get(id, bucket) as u32 {
            Class::Background
        } else {
            Class::Foreground
        }
    }

    /// Number of cells that have seen at least one return.
    pub fn populated(&self) -> usize {
        self.cells().iter().filter(|&&c| c != 0).count()
    }
}

/// Convert a distance in meters to raw range units, saturating.
pub fn meters_to_range_units(meters: f64) -> u16 {
    (meters / crate::packet::RANGE_RESOLUTION)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16
}

#[derive(Clone, Copy)]
struct AgeCell {
    /// Range at the last significant change
    range: u16,
    /// Time of the last significant change, nanoseconds
    changed: i64,
}

const NEVER: i64 = i64::MIN;

/// Age-based background subtraction.
#[derive(Debug)]
pub struct AgeBackground {
    age_nanos: i64,
    threshold: u16,
    foreground_rate: f32,
    background_rate: f32,
    surface: Surface<AgeCell>,
}

impl AgeBackground {
    /// `age` in seconds, `threshold` in raw range units.
    pub fn new(age: f64, threshold: u16, foreground_rate: f32, background_rate: f32) -> Self {
        Self {
            age_nanos: (age * 1e9) as i64,
            threshold,
            foreground_rate,
            background_rate,
            surface: Surface::new(AgeCell {
                range: 0,
                changed: NEVER,
            }),
        }
    }

    /// Record an observation and classify it.
    ///
    /// The first observation of a cell, or a range differing from the cell's
    /// reference by more than the threshold, becomes the new reference and
    /// restarts the cell's age.
    pub fn update(
        &mut self,
        id: usize,
        bucket: usize,
        range: u16,
        timestamp: Timestamp,
    ) -> Class {
        let cell = self.surface.get_mut(id, bucket);
        if cell.changed == NEVER || range.abs_diff(cell.range) > self.threshold {
            cell.range = range;
            cell.changed = timestamp.as_nanos();
        }
        if timestamp.as_nanos().saturating_sub(cell.changed) > self.age_nanos {
            Class::Background
        } else {
            Class::Foreground
        }
    }

    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        packet: &Packet,
        timestamp: Timestamp,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        select(packet, ctx, |ret, ctx| {
            let bucket = azimuth_bucket(ctx.azimuth(ret));
            match self.update(ret.id, bucket, ret.range, timestamp) {
                Class::Foreground => ctx.bernoulli(self.foreground_rate),
                Class::Background => ctx.bernoulli(self.background_rate),
            }
        })
    }
}

/// Running maximum-range background subtraction.
#[derive(Debug)]
pub struct MaxRangeBackground {
    epsilon: u16,
    foreground_rate: f32,
    background_rate: f32,
    surface: RangeSurface,
}

impl MaxRangeBackground {
    /// `epsilon` in raw range units.
    pub fn new(epsilon: u16, foreground_rate: f32, background_rate: f32) -> Self {
        Self {
            epsilon,
            foreground_rate,
            background_rate,
            surface: RangeSurface::empty(),
        }
    }

    /// Record an observation and classify it against the updated maximum.
    #[inline]
    pub fn update(&mut self, id: usize, bucket: usize, range: u16) -> Class {
        self.surface.update(id, bucket, range);
        self.surface.classify(id, bucket, range, self.epsilon)
    }

    /// Learned maximum of a cell.
    pub fn max_range(&self, id: usize, bucket: usize) -> u16 {
        self.surface.get(id, bucket)
    }

    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        packet: &Packet,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        select(packet, ctx, |ret, ctx| {
            let bucket = azimuth_bucket(ctx.azimuth(ret));
            match self.update(ret.id, bucket, ret.range) {
                Class::Foreground => ctx.bernoulli(self.foreground_rate),
                Class::Background => ctx.bernoulli(self.background_rate),
            }
        })
    }
}

/// Background subtraction against a surface learned offline.
///
/// Background points are dropped; foreground points are kept with `rate`.
#[derive(Debug)]
pub struct FixedBackground {
    rate: f32,
    epsilon: u16,
    surface: RangeSurface,
}

impl FixedBackground {
    /// Learn a maximum-range surface by replaying an entire source.
    ///
    /// Uses the same azimuth computation as [`FixedBackground::apply`], so
    /// replaying the learned capture classifies every point as background.
    pub fn learn<S: PacketSource + ?Sized>(
        source: &mut S,
        calibration: &Calibration,
        speed_override: Option<f64>,
    ) -> Result<RangeSurface, Error> {
        let mut surface = RangeSurface::empty();
        let mut packet = Packet::new();
        // learning draws no random numbers, the generator only fills the context
        let mut rng = StdRng::seed_from_u64(0);
        let mut packets = 0u64;

        while source.read(&mut packet)?.is_some() {
            let speed = azimuth::angular_speed(&packet, speed_override);
            let ctx = ThinContext::new(speed, calibration, &mut rng);
            for ret in packet.returns().filter(|r| r.range != 0) {
                let bucket = azimuth_bucket(ctx.azimuth(&ret));
                surface.update(ret.id, bucket, ret.range);
            }
            packets += 1;
        }

        info!(
            "learned background from {} packets, {} cells populated",
            packets,
            surface.populated()
        );
        Ok(surface)
    }

    /// Freeze a learned surface into a strategy.
    pub fn from_surface(surface: RangeSurface, rate: f32, epsilon: u16) -> Self {
        debug!("fixed background rate {} epsilon {}", rate, epsilon);
        Self {
            rate,
            epsilon,
            surface,
        }
    }

    #[inline]
    pub fn classify(&self, id: usize, bucket: usize, range: u16) -> Class {
        self.surface.classify(id, bucket, range, self.epsilon)
    }

    pub fn surface(&self) -> &RangeSurface {
        &self.surface
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        packet: &Packet,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        let rate = self.rate;
        select(packet, ctx, |ret, ctx| {
            let bucket = azimuth_bucket(ctx.azimuth(ret));
            match self.classify(ret.id, bucket, ret.range) {
                Class::Background => false,
                Class::Foreground => ctx.bernoulli(rate),
            }
        })
    }
}
