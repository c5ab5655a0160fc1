// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne HDL-64E data packet model.
//!
//! # Packet Structure
//!
//! 1206 bytes, little-endian:
//! - Data: 12 blocks × 100 bytes = 1200 bytes
//!   - Block id: 2 bytes (0xEEFF upper lasers, 0xDDFF lower lasers)
//!   - Rotation: 2 bytes, hundredths of a degree (0–35999)
//!   - 32 laser returns × 3 bytes (range in 2mm units + intensity)
//! - Status: 6 bytes (GPS time and status byte pair), carried verbatim
//!
//! Blocks alternate between the upper and lower laser groups, so the laser id
//! of a return is `(block % 2) * 32 + laser`.

use std::fmt;

/// Number of rotation blocks per packet
pub const BLOCKS_PER_PACKET: usize = 12;

/// Number of laser returns per block
pub const LASERS_PER_BLOCK: usize = 32;

/// Number of distinct laser ids (upper and lower groups)
pub const LASER_COUNT: usize = 2 * LASERS_PER_BLOCK;

/// Number of laser returns per packet
pub const POINTS_PER_PACKET: usize = BLOCKS_PER_PACKET * LASERS_PER_BLOCK;

/// Size of a single laser return in bytes
const RETURN_SIZE: usize = 3;

/// Size of each data block in bytes
pub const BLOCK_SIZE: usize = 4 + LASERS_PER_BLOCK * RETURN_SIZE;

/// Size of the trailing status field
const STATUS_SIZE: usize = 6;

/// Packet total size in bytes
pub const PACKET_SIZE: usize = BLOCKS_PER_PACKET * BLOCK_SIZE + STATUS_SIZE;

/// Encoder steps per full rotation (hundredths of a degree)
pub const ROTATION_RANGE: u16 = 36000;

/// Range resolution in meters (2mm)
pub const RANGE_RESOLUTION: f64 = 0.002;

/// Block id of the upper laser group
pub const UPPER_BLOCK_ID: u16 = 0xeeff;

/// Block id of the lower laser group
pub const LOWER_BLOCK_ID: u16 = 0xddff;

/// One fixed-size sensor packet.
///
/// The buffer is owned by the pipeline and overwritten by each read; all
/// accessors decode directly from the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: [u8; PACKET_SIZE],
}

impl Packet {
    /// Create a packet with block ids set and no returns.
    pub fn new() -> Self {
        let mut packet = Self {
            data: [0u8; PACKET_SIZE],
        };
        for block in 0..BLOCKS_PER_PACKET {
            let id = if block % 2 == 0 {
                UPPER_BLOCK_ID
            } else {
                LOWER_BLOCK_ID
            };
            packet.set_block_id(block, id);
        }
        packet
    }

    /// Wrap an exact-size byte array.
    pub fn from_bytes(data: [u8; PACKET_SIZE]) -> Self {
        Self { data }
    }

    /// Fixed wire size of a packet.
    #[inline]
    pub const fn size() -> usize {
        PACKET_SIZE
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.data
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PACKET_SIZE] {
        &mut self.data
    }

    /// Access a block by index.
    ///
    /// # Panics
    /// If `index >= BLOCKS_PER_PACKET`.
    #[inline]
    pub fn block(&self, index: usize) -> Block<'_> {
        let start = index * BLOCK_SIZE;
        Block {
            index,
            bytes: &self.data[start..start + BLOCK_SIZE],
        }
    }

    /// Iterate over the rotation blocks in wire order.
    pub fn blocks(&self) -> impl ExactSizeIterator<Item = Block<'_>> + '_ {
        (0..BLOCKS_PER_PACKET).map(move |i| self.block(i))
    }

    /// Iterate over every laser return in wire order.
    pub fn returns(&self) -> impl Iterator<Item = LaserReturn> + '_ {
        self.blocks().flat_map(|block| {
            let rotation = block.rotation();
            let index = block.index();
            (0..LASERS_PER_BLOCK).map(move |laser| LaserReturn {
                block: index,
                laser,
                id: laser_id(index, laser),
                rotation,
                range: block.range(laser),
                intensity: block.intensity(laser),
            })
        })
    }

    /// Set the rotation encoder value of a block.
    pub fn set_rotation(&mut self, block: usize, rotation: u16) {
        let start = block * BLOCK_SIZE + 2;
        self.data[start..start + 2].copy_from_slice(&rotation.to_le_bytes());
    }

    /// Set the block id marker of a block.
    pub fn set_block_id(&mut self, block: usize, id: u16) {
        let start = block * BLOCK_SIZE;
        self.data[start..start + 2].copy_from_slice(&id.to_le_bytes());
    }

    /// Set range and intensity of one return.
    pub fn set_return(&mut self, block: usize, laser: usize, range: u16, intensity: u8) {
        let start = return_offset(block, laser);
        self.data[start..start + 2].copy_from_slice(&range.to_le_bytes());
        self.data[start + 2] = intensity;
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Packet")
            .field("first_rotation", &self.block(0).rotation())
            .field(
                "last_rotation",
                &self.block(BLOCKS_PER_PACKET - 1).rotation(),
            )
            .finish()
    }
}

/// Borrowed view of one rotation block.
#[derive(Clone, Copy)]
pub struct Block<'a> {
    index: usize,
    bytes: &'a [u8],
}

impl<'a> Block<'a> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw block id marker (not validated).
    #[inline]
    pub fn id(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    /// True for blocks carrying the upper laser group.
    #[inline]
    pub fn is_upper(&self) -> bool {
        self.index % 2 == 0
    }

    /// Encoder reading in hundredths of a degree.
    #[inline]
    pub fn rotation(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    /// Raw range of a laser return in 2mm units; 0 means no return.
    #[inline]
    pub fn range(&self, laser: usize) -> u16 {
        let start = 4 + laser * RETURN_SIZE;
        u16::from_le_bytes([self.bytes[start], self.bytes[start + 1]])
    }

    #[inline]
    pub fn intensity(&self, laser: usize) -> u8 {
        self.bytes[4 + laser * RETURN_SIZE + 2]
    }
}

/// One decoded laser return with its addressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaserReturn {
    /// Block index within the packet
    pub block: usize,
    /// Laser index within the block
    pub laser: usize,
    /// Global laser id (0..64)
    pub id: usize,
    /// Encoder reading of the block
    pub rotation: u16,
    /// Raw range (2mm units)
    pub range: u16,
    pub intensity: u8,
}

impl LaserReturn {
    /// Position of this return in [`PointMask`] order.
    #[inline]
    pub fn index(&self) -> usize {
        self.block * LASERS_PER_BLOCK + self.laser
    }
}

/// Global laser id of a return.
#[inline]
pub const fn laser_id(block: usize, laser: usize) -> usize {
    (block % 2) * LASERS_PER_BLOCK + laser
}

#[inline]
const fn return_offset(block: usize, laser: usize) -> usize {
    block * BLOCK_SIZE + 4 + laser * RETURN_SIZE
}

const MASK_WORDS: usize = POINTS_PER_PACKET.div_ceil(64);

/// Per-point keep flags for one packet, in block-major order.
///
/// Thinning strategies clear bits; the compact serializer emits only the
/// points whose bit is still set and whose range is non-zero.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PointMask {
    bits: [u64; MASK_WORDS],
}

impl PointMask {
    /// All points kept.
    pub fn all() -> Self {
        let mut bits = [u64::MAX; MASK_WORDS];
        let tail = POINTS_PER_PACKET % 64;
        if tail != 0 {
            bits[MASK_WORDS - 1] = (1u64 << tail) - 1;
        }
        Self { bits }
    }

    /// No points kept.
    pub fn none() -> Self {
        Self {
            bits: [0; MASK_WORDS],
        }
    }

    #[inline]
    pub fn is_kept(&self, index: usize) -> bool {
        self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    #[inline]
    pub fn keep(&mut self, index: usize) {
        self.bits[index / 64] |= 1 << (index % 64);
    }

    #[inline]
    pub fn drop_point(&mut self, index: usize) {
        self.bits[index / 64] &= !(1 << (index % 64));
    }

    #[inline]
    pub fn set(&mut self, index: usize, keep: bool) {
        if keep {
            self.keep(index)
        } else {
            self.drop_point(index)
        }
    }

    /// Number of kept flags.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Keep flags of one block as a 32-bit laser mask.
    #[inline]
    pub fn block_bits(&self, block: usize) -> u32 {
        let start = block * LASERS_PER_BLOCK;
        // LASERS_PER_BLOCK divides 64, so a block never straddles two words
        (self.bits[start / 64] >> (start % 64)) as u32
    }
}

impl Default for PointMask {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for PointMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PointMask({}/{})", self.count(), POINTS_PER_PACKET)
    }
}
