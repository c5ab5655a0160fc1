// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Output record formats.
//!
//! Two record formats are supported, one per run. All integers are
//! little-endian.
//!
//! ## Compact record (thinned points only)
//! ```text
//! ┌──────────┬─────────────┬─────────────┬──────────────────────────────┐
//! │ size:u16 │ seconds:i64 │ nanos:i32   │ payload                      │
//! │ 2B       │ 8B          │ 4B          │ variable                     │
//! └──────────┴─────────────┴─────────────┴──────────────────────────────┘
//! payload:
//! ┌────────────────┬──────────────────────────────────────────────────────┐
//! │ block_mask:u16 │ per present block:                                   │
//! │                │   rotation:u16, laser_mask:u32,                      │
//! │                │   per present laser: range:u16, intensity:u8         │
//! └────────────────┴──────────────────────────────────────────────────────┘
//! ```
//! `size` counts the bytes following it (timestamp and payload).
//!
//! ## Raw record (untouched packet)
//! ```text
//! ┌────────┬──────────┬─────────────┬───────────┬─────────────┬──────┬────────┐
//! │ 0xB255 │ reserved │ seconds:i64 │ nanos:i32 │ packet      │ rsvd │ 0x759F │
//! │ 2B     │ 14B      │ 8B          │ 4B        │ 1206B       │ 2B   │ 2B     │
//! └────────┴──────────┴─────────────┴───────────┴─────────────┴──────┴────────┘
//! ```
//! The raw record is also the record format of proprietary log files.

use crate::{
    lidar::{Error, Timestamp},
    packet::{BLOCKS_PER_PACKET, LASERS_PER_BLOCK, PACKET_SIZE, Packet, PointMask},
};

/// Size of the seconds + nanoseconds timestamp
pub const TIMESTAMP_SIZE: usize = 12;

/// Size of the compact record length prefix
pub const SIZE_PREFIX: usize = 2;

/// Upper bound of a compact payload (every point of every block present)
pub const MAX_COMPACT_PAYLOAD: usize =
    2 + BLOCKS_PER_PACKET * (2 + 4 + LASERS_PER_BLOCK * 3);

/// Upper bound of a whole compact record
pub const MAX_COMPACT_RECORD: usize = SIZE_PREFIX + TIMESTAMP_SIZE + MAX_COMPACT_PAYLOAD;

/// Raw record start delimiter
pub const RAW_START: [u8; 2] = [0xb2, 0x55];

/// Raw record end delimiter
pub const RAW_END: [u8; 2] = [0x75, 0x9f];

/// Raw record header size (delimiter + reserved)
pub const RAW_HEADER_SIZE: usize = 16;

/// Raw record footer size (reserved + delimiter)
pub const RAW_FOOTER_SIZE: usize = 4;

/// Offset of the packet inside a raw record
pub const RAW_PACKET_OFFSET: usize = RAW_HEADER_SIZE + TIMESTAMP_SIZE;

/// Raw record total size
pub const RAW_RECORD_SIZE: usize = RAW_PACKET_OFFSET + PACKET_SIZE + RAW_FOOTER_SIZE;

/// Output record format selected at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Variable-length record with surviving points only
    #[default]
    Compact,
    /// Fixed-length framed record with the untouched packet
    Raw,
}

fn push_timestamp(buf: &mut Vec<u8>, timestamp: Timestamp) {
    buf.extend_from_slice(&timestamp.seconds().to_le_bytes());
    buf.extend_from_slice(&timestamp.nanoseconds().to_le_bytes());
}

/// Append the compact payload of the kept, non-empty returns of `packet`.
///
/// Returns the number of points written.
pub fn write_compact_payload(packet: &Packet, mask: &PointMask, buf: &mut Vec<u8>) -> usize {
    let mask_pos = buf.len();
    buf.extend_from_slice(&[0, 0]);

    let mut block_mask = 0u16;
    let mut points = 0;
    for block in packet.blocks() {
        let mut lasers = mask.block_bits(block.index());
        for laser in 0..LASERS_PER_BLOCK {
            if block.range(laser) == 0 {
                lasers &= !(1 << laser);
            }
        }
        if lasers == 0 {
            continue;
        }

        block_mask |= 1 << block.index();
        buf.extend_from_slice(&block.rotation().to_le_bytes());
        buf.extend_from_slice(&lasers.to_le_bytes());
        for laser in 0..LASERS_PER_BLOCK {
            if lasers & (1 << laser) != 0 {
                buf.extend_from_slice(&block.range(laser).to_le_bytes());
                buf.push(block.intensity(laser));
                points += 1;
            }
        }
    }

    buf[mask_pos..mask_pos + 2].copy_from_slice(&block_mask.to_le_bytes());
    points
}

/// Serialize a thinned packet into a compact record, replacing `buf`.
///
/// Returns the number of points written.
pub fn serialize_compact(
    packet: &Packet,
    mask: &PointMask,
    timestamp: Timestamp,
    buf: &mut Vec<u8>,
) -> usize {
    buf.clear();
    buf.extend_from_slice(&[0, 0]);
    push_timestamp(buf, timestamp);
    let points = write_compact_payload(packet, mask, buf);

    // bounded by MAX_COMPACT_RECORD, which fits in u16
    let size = (buf.len() - SIZE_PREFIX) as u16;
    buf[..SIZE_PREFIX].copy_from_slice(&size.to_le_bytes());
    points
}

/// Serialize an untouched packet into a raw record, replacing `buf`.
pub fn serialize_raw(packet: &Packet, timestamp: Timestamp, buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(&RAW_START);
    buf.resize(RAW_HEADER_SIZE, 0);
    push_timestamp(buf, timestamp);
    buf.extend_from_slice(packet.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf.extend_from_slice(&RAW_END);
}

/// One point recovered from a compact record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactPoint {
    pub block: usize,
    pub laser: usize,
    pub rotation: u16,
    pub range: u16,
    pub intensity: u8,
}

/// Decoded compact record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactRecord {
    pub timestamp: Timestamp,
    pub points: Vec<CompactPoint>,
}

impl CompactRecord {
    /// Decode one compact record from the start of `data`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), Error> {
        let mut reader = Reader::new(data);
        let size = reader.u16()? as usize;
        let total = SIZE_PREFIX + size;
        if data.len() < total {
            return Err(Error::Decode(format!(
                "record needs {} bytes, got {}",
                total,
                data.len()
            )));
        }

        let mut reader = Reader::new(&data[SIZE_PREFIX..total]);
        let seconds = reader.i64()?;
        let nanoseconds = reader.i32()?;
        let block_mask = reader.u16()?;

        let mut points = Vec::new();
        for block in 0..BLOCKS_PER_PACKET {
            if block_mask & (1 << block) == 0 {
                continue;
            }
            let rotation = reader.u16()?;
            let lasers = reader.u32()?;
            for laser in 0..LASERS_PER_BLOCK {
                if lasers & (1 << laser) != 0 {
                    points.push(CompactPoint {
                        block,
                        laser,
                        rotation,
                        range: reader.u16()?,
                        intensity: reader.u8()?,
                    });
                }
            }
        }

        if !reader.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes in compact record",
                reader.remaining()
            )));
        }

        let timestamp = Timestamp::checked_from_parts(seconds, nanoseconds).ok_or_else(|| {
            Error::Decode(format!(
                "invalid compact record timestamp {}s {}ns",
                seconds, nanoseconds
            ))
        })?;
        let record = CompactRecord { timestamp, points };
        Ok((record, total))
    }
}

/// Decoded raw record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub timestamp: Timestamp,
    pub packet: Packet,
}

impl RawRecord {
    /// Decode one raw record of exactly [`RAW_RECORD_SIZE`] bytes.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut packet = Packet::new();
        let timestamp = Self::decode_into(data, &mut packet)?;
        Ok(Self { timestamp, packet })
    }

    /// Decode a raw record, writing its packet into `packet`.
    pub fn decode_into(data: &[u8], packet: &mut Packet) -> Result<Timestamp, Error> {
        if data.len() != RAW_RECORD_SIZE {
            return Err(Error::Framing(format!(
                "raw record of {} bytes, expected {}",
                data.len(),
                RAW_RECORD_SIZE
            )));
        }
        if data[..2] != RAW_START {
            return Err(Error::Framing(format!(
                "bad start delimiter {:02x}{:02x}",
                data[0], data[1]
            )));
        }
        if data[RAW_RECORD_SIZE - 2..] != RAW_END {
            return Err(Error::Framing(format!(
                "bad end delimiter {:02x}{:02x}",
                data[RAW_RECORD_SIZE - 2],
                data[RAW_RECORD_SIZE - 1]
            )));
        }

        let mut reader = Reader::new(&data[RAW_HEADER_SIZE..RAW_PACKET_OFFSET]);
        let seconds = reader.i64()?;
        let nanoseconds = reader.i32()?;
        packet
            .as_bytes_mut()
            .copy_from_slice(&data[RAW_PACKET_OFFSET..RAW_PACKET_OFFSET + PACKET_SIZE]);
        Timestamp::checked_from_parts(seconds, nanoseconds).ok_or_else(|| {
            Error::Framing(format!(
                "invalid raw record timestamp {}s {}ns",
                seconds, nanoseconds
            ))
        })
    }
}

/// Little-endian cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let end = self.pos + N;
        if end > self.data.len() {
            return Err(Error::Decode(format!(
                "unexpected end of record at {} bytes",
                self.data.len()
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32, Error> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn i64(&mut self) -> Result<i64, Error> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::POINTS_PER_PACKET;

    fn sample_packet() -> Packet {
        let mut packet = Packet::new();
        for block in 0..BLOCKS_PER_PACKET {
            packet.set_rotation(block, 1000 + block as u16 * 9);
            for laser in 0..LASERS_PER_BLOCK {
                let range = 500 + (block * LASERS_PER_BLOCK + laser) as u16;
                packet.set_return(block, laser, range, laser as u8);
            }
        }
        packet
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(MAX_COMPACT_PAYLOAD, 1226);
        assert_eq!(MAX_COMPACT_RECORD, 1240);
        assert_eq!(RAW_RECORD_SIZE, 1238);
    }

    #[test]
    fn test_compact_round_trip_with_drops() {
        let packet = sample_packet();
        let mut mask = PointMask::all();
        // drop every third point and the whole of block 4
        for i in (0..POINTS_PER_PACKET).step_by(3) {
            mask.drop_point(i);
        }
        for laser in 0..LASERS_PER_BLOCK {
            mask.drop_point(4 * LASERS_PER_BLOCK + laser);
        }
        let timestamp = Timestamp::from_parts(1_600_000_123, 987_654_321);

        let mut buf = Vec::new();
        let written = serialize_compact(&packet, &mask, timestamp, &mut buf);
        let (record, consumed) = CompactRecord::decode(&buf).unwrap();

        assert_eq!(consumed, buf.len());
        assert_eq!(record.timestamp, timestamp);
        assert_eq!(record.points.len(), written);
        assert_eq!(written, mask.count());

        let expected: Vec<_> = packet
            .returns()
            .filter(|r| mask.is_kept(r.index()))
            .collect();
        for (point, ret) in record.points.iter().zip(&expected) {
            assert_eq!(point.block, ret.block);
            assert_eq!(point.laser, ret.laser);
            assert_eq!(point.rotation, ret.rotation);
            assert_eq!(point.range, ret.range);
            assert_eq!(point.intensity, ret.intensity);
        }
        assert!(record.points.iter().all(|p| p.block != 4));
    }

    #[test]
    fn test_compact_full_packet_is_max_size() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        serialize_compact(&packet, &PointMask::all(), Timestamp::ZERO, &mut buf);
        assert_eq!(buf.len(), MAX_COMPACT_RECORD);
        let size = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        assert_eq!(size, MAX_COMPACT_RECORD - SIZE_PREFIX);
    }

    #[test]
    fn test_compact_empty_payload() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        let timestamp = Timestamp::from_parts(10, 20);
        let written = serialize_compact(&packet, &PointMask::none(), timestamp, &mut buf);

        assert_eq!(written, 0);
        assert_eq!(buf.len(), SIZE_PREFIX + TIMESTAMP_SIZE + 2);
        let (record, _) = CompactRecord::decode(&buf).unwrap();
        assert_eq!(record.timestamp, timestamp);
        assert!(record.points.is_empty());
    }

    #[test]
    fn test_compact_skips_empty_returns() {
        let mut packet = sample_packet();
        packet.set_return(2, 5, 0, 77);
        let mut buf = Vec::new();
        let written = serialize_compact(&packet, &PointMask::all(), Timestamp::ZERO, &mut buf);
        assert_eq!(written, POINTS_PER_PACKET - 1);
    }

    #[test]
    fn test_compact_decode_truncated() {
        let packet = sample_packet();
        let mut buf = Vec::new();
        serialize_compact(&packet, &PointMask::all(), Timestamp::ZERO, &mut buf);
        assert!(CompactRecord::decode(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_compact_decode_bad_timestamp() {
        let mut buf = Vec::new();
        serialize_compact(&sample_packet(), &PointMask::none(), Timestamp::ZERO, &mut buf);
        buf[SIZE_PREFIX..SIZE_PREFIX + 8].copy_from_slice(&10_000_000_000i64.to_le_bytes());
        assert!(matches!(CompactRecord::decode(&buf), Err(Error::Decode(_))));
    }

    #[test]
    fn test_raw_round_trip() {
        let packet = sample_packet();
        let timestamp = Timestamp::from_parts(1_700_000_000, 5);
        let mut buf = Vec::new();
        serialize_raw(&packet, timestamp, &mut buf);

        assert_eq!(buf.len(), RAW_RECORD_SIZE);
        assert_eq!(buf[..2], RAW_START);
        assert_eq!(buf[RAW_RECORD_SIZE - 2..], RAW_END);
        assert!(buf[2..RAW_HEADER_SIZE].iter().all(|&b| b == 0));

        let record = RawRecord::decode(&buf).unwrap();
        assert_eq!(record.timestamp, timestamp);
        assert_eq!(record.packet, packet);
    }

    #[test]
    fn test_raw_bad_delimiter() {
        let mut buf = Vec::new();
        serialize_raw(&sample_packet(), Timestamp::ZERO, &mut buf);
        buf[0] = 0;
        assert!(matches!(RawRecord::decode(&buf), Err(Error::Framing(_))));
    }

    #[test]
    fn test_raw_bad_timestamp() {
        let mut buf = Vec::new();
        serialize_raw(&sample_packet(), Timestamp::ZERO, &mut buf);
        buf[RAW_HEADER_SIZE..RAW_HEADER_SIZE + 8]
            .copy_from_slice(&10_000_000_000i64.to_le_bytes());
        assert!(matches!(RawRecord::decode(&buf), Err(Error::Framing(_))));

        buf[RAW_HEADER_SIZE..RAW_HEADER_SIZE + 8].copy_from_slice(&1i64.to_le_bytes());
        buf[RAW_HEADER_SIZE + 8..RAW_PACKET_OFFSET].copy_from_slice(&(-5i32).to_le_bytes());
        assert!(matches!(RawRecord::decode(&buf), Err(Error::Framing(_))));
    }
}
