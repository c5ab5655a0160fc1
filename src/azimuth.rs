// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Rotor speed estimation and per-return azimuth interpolation.
//!
//! Each block carries a single encoder sample, taken when its first laser
//! fires. The remaining lasers fire at fixed offsets afterwards, so their
//! azimuth is extrapolated from the block sample using the rotor speed
//! estimated across the packet.

use crate::packet::{BLOCKS_PER_PACKET, Packet, ROTATION_RANGE};

/// Time between consecutive upper/lower block pairs in microseconds
pub const BLOCK_PAIR_INTERVAL_US: f64 = 48.0;

/// Nominal time between consecutive laser firings within a block
pub const LASER_FIRING_INTERVAL_US: f64 = 1.5;

/// Nominal acquisition time of a block relative to the first block.
///
/// Upper and lower blocks of a pair fire simultaneously.
#[inline]
pub fn block_time_offset(block: usize) -> f64 {
    (block / 2) as f64 * BLOCK_PAIR_INTERVAL_US
}

/// Nominal acquisition time of a laser relative to its block sample.
#[inline]
pub fn nominal_laser_time_offset(laser: usize) -> f64 {
    laser as f64 * LASER_FIRING_INTERVAL_US
}

/// Time between the first and last block encoder samples.
#[inline]
pub fn packet_span_us() -> f64 {
    block_time_offset(BLOCKS_PER_PACKET - 1) - block_time_offset(0)
}

/// Rotor angular speed in degrees per microsecond.
///
/// Returns `speed_override` when configured, otherwise the encoder advance
/// between the first and last block (modulo a full rotation) over their
/// nominal time difference.
pub fn angular_speed(packet: &Packet, speed_override: Option<f64>) -> f64 {
    if let Some(speed) = speed_override {
        return speed;
    }
    let first = packet.block(0).rotation();
    let last = packet.block(BLOCKS_PER_PACKET - 1).rotation();
    let steps = rotation_delta(first, last);
    steps as f64 / 100.0 / packet_span_us()
}

/// Forward encoder advance from `from` to `to` in hundredths of a degree.
#[inline]
pub fn rotation_delta(from: u16, to: u16) -> u16 {
    let range = ROTATION_RANGE as i32;
    (to as i32 - from as i32).rem_euclid(range) as u16
}

/// Azimuth in degrees, in `[0, 360)`, of a laser fired `time_offset_us`
/// after its block's encoder sample `rotation_deg`.
///
/// A zero or non-finite speed yields the block azimuth unmodified.
#[inline]
pub fn azimuth(rotation_deg: f64, time_offset_us: f64, angular_speed: f64) -> f64 {
    if angular_speed == 0.0 || !angular_speed.is_finite() {
        return rotation_deg;
    }
    normalize_degrees(rotation_deg + angular_speed * time_offset_us)
}

/// Wrap an angle into `[0, 360)`.
#[inline]
pub fn normalize_degrees(angle: f64) -> f64 {
    let a = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if a >= 360.0 { 0.0 } else { a }
}
