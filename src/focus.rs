// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Sector focus thinning.
//!
//! Points inside any configured sector are kept at an elevated rate, points
//! outside at a reduced one. With coverage `c` (fraction of the horizontal
//! field of view covered by sectors) and focus ratio `r`, a base rate `p` is
//! split as
//!
//! ```text
//! rate_in  = p * r / c
//! rate_out = p * (1 - r) / (1 - c)
//! ```
//!
//! so that `c * rate_in + (1 - c) * rate_out == p` for points spread evenly
//! around the rotation. Both rates are capped at 1.

use crate::{
    packet::{Packet, PointMask},
    thin::{ThinContext, select},
};
use rand::Rng;

/// Angular sector with a range limit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sector {
    /// Center bearing in degrees
    pub bearing: f64,
    /// Angular half-width in degrees
    pub ken: f64,
    /// Maximum range in meters
    pub range: f64,
}

impl Sector {
    pub fn new(bearing: f64, ken: f64, range: f64) -> Self {
        Self {
            bearing,
            ken,
            range,
        }
    }

    /// True if a point at `range` meters and `azimuth` degrees lies inside.
    pub fn contains(&self, range: f64, azimuth: f64) -> bool {
        if range > self.range {
            return false;
        }
        angular_distance(azimuth, self.bearing) <= self.ken
    }

    /// Fraction of a full rotation covered by this sector.
    pub fn coverage(&self) -> f64 {
        (2.0 * self.ken / 360.0).min(1.0)
    }
}

/// Smallest absolute difference between two bearings, `[0, 180]`.
fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    if d > 180.0 { 360.0 - d } else { d }
}

/// Sector focus strategy.
#[derive(Clone, Debug)]
pub struct Focus {
    rate: f64,
    ratio: f64,
    sectors: Vec<Sector>,
    rate_in_focus: f64,
    rate_out_of_focus: f64,
}

impl Focus {
    /// Create a focus with base `rate` and in-focus share `ratio`.
    pub fn new(rate: f64, ratio: f64) -> Self {
        let mut focus = Self {
            rate,
            ratio,
            sectors: Vec::new(),
            rate_in_focus: 0.0,
            rate_out_of_focus: 0.0,
        };
        focus.update();
        focus
    }

    /// Add a sector and recompute the rates.
    pub fn insert(&mut self, sector: Sector) {
        self.sectors.push(sector);
        self.update();
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Retention probability for points inside a sector.
    pub fn rate_in_focus(&self) -> f64 {
        self.rate_in_focus
    }

    /// Retention probability for points outside every sector.
    pub fn rate_out_of_focus(&self) -> f64 {
        self.rate_out_of_focus
    }

    /// Fraction of the field of view covered by sectors, capped at 1.
    pub fn coverage(&self) -> f64 {
        self.sectors
            .iter()
            .map(Sector::coverage)
            .sum::<f64>()
            .min(1.0)
    }

    /// True if a point lies in any sector.
    pub fn contains(&self, range: f64, azimuth: f64) -> bool {
        self.sectors.iter().any(|s| s.contains(range, azimuth))
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        packet: &Packet,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        let rate_in = self.rate_in_focus as f32;
        let rate_out = self.rate_out_of_focus as f32;
        select(packet, ctx, |ret, ctx| {
            let azimuth = ctx.azimuth(ret);
            let range = ctx.range(ret);
            if self.contains(range, azimuth) {
                ctx.bernoulli(rate_in)
            } else {
                ctx.bernoulli(rate_out)
            }
        })
    }

    fn update(&mut self) {
        let c = self.coverage();
        self.rate_in_focus = if c > 0.0 {
            (self.rate * self.ratio / c).min(1.0)
        } else {
            0.0
        };
        self.rate_out_of_focus = if c >= 1.0 {
            0.0
        } else {
            (self.rate * (1.0 - self.ratio) / (1.0 - c)).min(1.0)
        };
    }
}
