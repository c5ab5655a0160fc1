// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Whole-scan thinning.
//!
//! A scan starts whenever the block encoder wraps around (drops by more than
//! half a rotation). At each scan start one Bernoulli trial decides whether
//! the entire scan is forwarded, and the decision holds until the next scan
//! start.

use crate::packet::{Packet, ROTATION_RANGE};
use rand::Rng;

/// Latching scan-level packet filter.
#[derive(Clone, Debug)]
pub struct ScanThinner {
    rate: f64,
    previous: Option<u16>,
    forward: bool,
    scans: u64,
    forwarded: u64,
}

impl ScanThinner {
    /// Create a thinner forwarding a fraction `rate` of scans.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            previous: None,
            forward: true,
            scans: 0,
            forwarded: 0,
        }
    }

    /// Configured fraction of scans to forward.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Update the scan state with a packet.
    ///
    /// Returns `true` if the packet belongs to a forwarded scan.
    pub fn thin<R: Rng + ?Sized>(&mut self, packet: &Packet, rng: &mut R) -> bool {
        for block in packet.blocks() {
            let rotation = block.rotation();
            if self.is_scan_start(rotation) {
                self.start_scan(rng);
            }
            self.previous = Some(rotation);
        }
        self.forward
    }

    /// Current latch state.
    pub fn is_forwarding(&self) -> bool {
        self.forward
    }

    /// Number of scan starts seen so far.
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Number of scans forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn is_scan_start(&self, rotation: u16) -> bool {
        match self.previous {
            None => true,
            Some(previous) => {
                rotation < previous && previous - rotation > ROTATION_RANGE / 2
            }
        }
    }

    fn start_scan<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.forward = rng.r#gen::<f64>() < self.rate;
        self.scans += 1;
        if self.forward {
            self.forwarded += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::BLOCKS_PER_PACKET;
    use rand::{SeedableRng, rngs::StdRng};

    /// Packets covering `scans` full rotations, 100 packets per rotation.
    fn rotation_packets(scans: usize) -> Vec<Packet> {
        let step = ROTATION_RANGE as usize / (100 * BLOCKS_PER_PACKET / 2);
        let mut packets = Vec::new();
        let mut rotation = 0usize;
        for _ in 0..scans * 100 {
            let mut packet = Packet::new();
            for block in 0..BLOCKS_PER_PACKET {
                packet.set_rotation(block, rotation as u16);
                if block % 2 == 1 {
                    rotation = (rotation + step) % ROTATION_RANGE as usize;
                }
            }
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_wraparound_detection() {
        let mut thinner = ScanThinner::new(1.0);
        let mut rng = StdRng::seed_from_u64(1);
        for packet in rotation_packets(3) {
            assert!(thinner.thin(&packet, &mut rng));
        }
        // first packet plus two wraparounds
        assert_eq!(thinner.scans(), 3);
        assert_eq!(thinner.forwarded(), 3);
    }

    #[test]
    fn test_small_backwards_jitter_is_not_a_scan() {
        let mut thinner = ScanThinner::new(1.0);
        let mut rng = StdRng::seed_from_u64(1);
        let mut packet = Packet::new();
        for block in 0..BLOCKS_PER_PACKET {
            packet.set_rotation(block, 20000 - (block as u16) * 10);
        }
        thinner.thin(&packet, &mut rng);
        assert_eq!(thinner.scans(), 1);
    }

    #[test]
    fn test_latch_holds_within_scan() {
        let mut thinner = ScanThinner::new(0.5);
        let mut rng = StdRng::seed_from_u64(7);
        let packets = rotation_packets(20);
        for scan in packets.chunks(100) {
            // a scan's first packet carries the wraparound
            let first = thinner.thin(&scan[0], &mut rng);
            for packet in &scan[1..] {
                assert_eq!(thinner.thin(packet, &mut rng), first);
            }
        }
    }

    #[test]
    fn test_scan_rate_convergence() {
        let rate = 0.3;
        let mut thinner = ScanThinner::new(rate);
        let mut rng = StdRng::seed_from_u64(42);
        for packet in rotation_packets(2000) {
            thinner.thin(&packet, &mut rng);
        }
        assert_eq!(thinner.scans(), 2000);
        let fraction = thinner.forwarded() as f64 / thinner.scans() as f64;
        assert!(
            (fraction - rate).abs() < 0.04,
            "forwarded fraction {} too far from {}",
            fraction,
            rate
        );
    }
}
