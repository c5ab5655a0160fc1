// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Point thinning strategies.
//!
//! Exactly one [`Strategy`] is active per run. Every strategy visits each
//! laser return with a non-zero range, computes its azimuth through the
//! [`ThinContext`] and decides whether to keep it. Decisions are returned as a
//! [`PointMask`]; the packet bytes are never modified.
//!
//! | strategy | state | decision |
//! |----------|-------|----------|
//! | [`UniformRate`] | none | keep with probability `p` |
//! | [`Focus`] | sector geometry | in-focus / out-of-focus rate |
//! | [`AgeBackground`] | last change time per cell | foreground / background rate |
//! | [`MaxRangeBackground`] | running max range per cell | foreground / background rate |
//! | [`FixedBackground`] | learned max range per cell | drop background, rate otherwise |

use crate::{
    background::{AgeBackground, FixedBackground, MaxRangeBackground},
    calibration::Calibration,
    focus::Focus,
    lidar::Timestamp,
    packet::{LaserReturn, Packet, PointMask},
};
use rand::Rng;

/// Per-packet inputs shared by all strategies.
pub struct ThinContext<'a, R: ?Sized> {
    /// Rotor speed in degrees per microsecond
    pub angular_speed: f64,
    pub calibration: &'a Calibration,
    pub rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> ThinContext<'a, R> {
    pub fn new(angular_speed: f64, calibration: &'a Calibration, rng: &'a mut R) -> Self {
        Self {
            angular_speed,
            calibration,
            rng,
        }
    }

    /// Corrected azimuth of a return in degrees.
    #[inline]
    pub fn azimuth(&self, ret: &LaserReturn) -> f64 {
        self.calibration
            .azimuth(ret.id, ret.rotation, self.angular_speed)
    }

    /// Corrected range of a return in meters.
    #[inline]
    pub fn range(&self, ret: &LaserReturn) -> f64 {
        self.calibration.range(ret.id, ret.range)
    }

    /// One Bernoulli trial with success probability `p`.
    #[inline]
    pub fn bernoulli(&mut self, p: f32) -> bool {
        self.rng.r#gen::<f32>() < p
    }
}

/// Build a mask by asking `keep` about every return that has a range.
pub(crate) fn select<'a, R, F>(
    packet: &Packet,
    ctx: &mut ThinContext<'a, R>,
    mut keep: F,
) -> PointMask
where
    R: Rng + ?Sized,
    F: FnMut(&LaserReturn, &mut ThinContext<'a, R>) -> bool,
{
    let mut mask = PointMask::none();
    for ret in packet.returns() {
        if ret.range == 0 {
            continue;
        }
        if keep(&ret, ctx) {
            mask.keep(ret.index());
        }
    }
    mask
}

/// Foreground/background classification of a return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Foreground,
    Background,
}

/// Keep each point independently with a fixed probability.
#[derive(Clone, Copy, Debug)]
pub struct UniformRate {
    rate: f32,
}

impl UniformRate {
    pub fn new(rate: f32) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn apply<R: Rng + ?Sized>(
        &self,
        packet: &Packet,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        let rate = self.rate;
        select(packet, ctx, |_, ctx| ctx.bernoulli(rate))
    }
}

/// The active point thinning policy.
#[derive(Debug)]
pub enum Strategy {
    UniformRate(UniformRate),
    SectorFocus(Focus),
    AgeBackground(AgeBackground),
    MaxRangeBackground(MaxRangeBackground),
    FixedBackground(FixedBackground),
}

impl Strategy {
    /// Decide which points of `packet` survive.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        packet: &Packet,
        timestamp: Timestamp,
        ctx: &mut ThinContext<'_, R>,
    ) -> PointMask {
        match self {
            Strategy::UniformRate(s) => s.apply(packet, ctx),
            Strategy::SectorFocus(s) => s.apply(packet, ctx),
            Strategy::AgeBackground(s) => s.apply(packet, timestamp, ctx),
            Strategy::MaxRangeBackground(s) => s.apply(packet, ctx),
            Strategy::FixedBackground(s) => s.apply(packet, ctx),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::UniformRate(_) => "uniform-rate",
            Strategy::SectorFocus(_) => "sector-focus",
            Strategy::AgeBackground(_) => "age-background",
            Strategy::MaxRangeBackground(_) => "max-range-background",
            Strategy::FixedBackground(_) => "fixed-background",
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::packet::{BLOCKS_PER_PACKET, LASERS_PER_BLOCK, POINTS_PER_PACKET};
    use rand::{SeedableRng, rngs::StdRng};

    /// Packet with every return set to `range` and rotations starting at
    /// `rotation`, advancing 0.17 degrees per block pair.
    pub(crate) fn filled_packet(rotation: u16, range: u16) -> Packet {
        let mut packet = Packet::new();
        for block in 0..BLOCKS_PER_PACKET {
            let r = (rotation as u32 + (block / 2) as u32 * 17) % 36000;
            packet.set_rotation(block, r as u16);
            for laser in 0..LASERS_PER_BLOCK {
                packet.set_return(block, laser, range, 100);
            }
        }
        packet
    }

    #[test]
    fn test_uniform_rate_convergence() {
        let db = Calibration::nominal();
        let mut rng = StdRng::seed_from_u64(3);
        let strategy = UniformRate::new(0.25);
        let packet = filled_packet(0, 1000);

        let mut kept = 0;
        let packets = 500;
        for _ in 0..packets {
            let mut ctx = ThinContext::new(0.0036, &db, &mut rng);
            kept += strategy.apply(&packet, &mut ctx).count();
        }
        let fraction = kept as f64 / (packets * POINTS_PER_PACKET) as f64;
        assert!((fraction - 0.25).abs() < 0.01, "fraction {}", fraction);
    }

    #[test]
    fn test_uniform_rate_extremes() {
        let db = Calibration::nominal();
        let mut rng = StdRng::seed_from_u64(3);
        let packet = filled_packet(0, 1000);

        let mut ctx = ThinContext::new(0.0036, &db, &mut rng);
        assert_eq!(UniformRate::new(0.0).apply(&packet, &mut ctx).count(), 0);
        assert_eq!(
            UniformRate::new(1.0).apply(&packet, &mut ctx).count(),
            POINTS_PER_PACKET
        );
    }

    #[test]
    fn test_empty_returns_are_never_kept() {
        let db = Calibration::nominal();
        let mut rng = StdRng::seed_from_u64(3);
        let mut packet = filled_packet(0, 1000);
        packet.set_return(4, 9, 0, 0);

        let mut ctx = ThinContext::new(0.0036, &db, &mut rng);
        let mask = UniformRate::new(1.0).apply(&packet, &mut ctx);
        assert!(!mask.is_kept(4 * LASERS_PER_BLOCK + 9));
        assert_eq!(mask.count(), POINTS_PER_PACKET - 1);
    }

    #[test]
    fn test_strategy_dispatch() {
        let db = Calibration::nominal();
        let mut rng = StdRng::seed_from_u64(3);
        let packet = filled_packet(0, 1000);
        let mut strategy = Strategy::UniformRate(UniformRate::new(0.0));
        assert_eq!(strategy.name(), "uniform-rate");

        let mut ctx = ThinContext::new(0.0036, &db, &mut rng);
        let mask = strategy.apply(&packet, Timestamp::ZERO, &mut ctx);
        assert_eq!(mask.count(), 0);
    }
}
