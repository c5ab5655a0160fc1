// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! PCAP file packet source for offline replay.
//!
//! This module provides [`PcapSource`], a [`PacketSource`] implementation that
//! reads sensor datagrams from PCAP/PCAPNG captures together with their
//! recorded capture times.
//!
//! # Example
//!
//! ```ignore
//! use velodyne_thin::{Packet, PcapSource, packet_source::PacketSource};
//!
//! // Load PCAP file, filtering by the sensor data port
//! let mut source = PcapSource::from_file("drive.pcap", Some(2368))?;
//!
//! let mut packet = Packet::new();
//! while let Some(timestamp) = source.read(&mut packet)? {
//!     // Process packet captured at timestamp
//! }
//! ```

use crate::{
    lidar::{Error, Timestamp},
    packet::{PACKET_SIZE, Packet},
    packet_source::PacketSource,
};
use pcap_parser::traits::PcapReaderIterator;
use std::path::Path;
use tracing::debug;

/// Legacy pcap magic numbers announcing nanosecond timestamps
const NANOSECOND_MAGIC: [u32; 2] = [0xa1b2_3c4d, 0x4d3c_b2a1];

/// Extracted UDP payload with its capture time.
#[derive(Clone)]
struct ExtractedPacket {
    payload: Vec<u8>,
    timestamp: Timestamp,
}

/// PCAP file packet source.
///
/// Loads the entire capture into memory and provides packets via the
/// [`PacketSource`] trait. Supports both legacy PCAP and PCAPNG formats.
pub struct PcapSource {
    /// Pre-extracted UDP payloads
    packets: Vec<ExtractedPacket>,
    /// Current packet index
    index: usize,
}

impl PcapSource {
    /// Load a capture from disk, optionally filtering by port.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to PCAP or PCAPNG file
    /// * `port` - Optional port filter (matches source OR destination)
    pub fn from_file<P: AsRef<Path>>(path: P, port: Option<u16>) -> Result<Self, Error> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::Transport(format!("open {}: {}", path.display(), e)))?;
        let source = Self::from_bytes(&data, port)?;
        debug!(
            "pcap {} yielded {} packets (port filter {:?})",
            path.display(),
            source.len(),
            port
        );
        Ok(source)
    }

    /// Load a capture from bytes, optionally filtering by port.
    pub fn from_bytes(data: &[u8], port: Option<u16>) -> Result<Self, Error> {
        let packets = Self::extract_packets(data, port)?;
        Ok(Self { packets, index: 0 })
    }

    /// Extract UDP packets from PCAP data.
    fn extract_packets(data: &[u8], port: Option<u16>) -> Result<Vec<ExtractedPacket>, Error> {
        let mut packets = Vec::new();

        // PCAPNG starts with a Section Header Block
        if data.len() >= 4 && data[0..4] == [0x0a, 0x0d, 0x0d, 0x0a] {
            Self::extract_pcapng(data, port, &mut packets)?;
        } else {
            Self::extract_legacy_pcap(data, port, &mut packets)?;
        }

        Ok(packets)
    }

    /// Extract packets from legacy PCAP format.
    fn extract_legacy_pcap(
        data: &[u8],
        port: Option<u16>,
        packets: &mut Vec<ExtractedPacket>,
    ) -> Result<(), Error> {
        use pcap_parser::*;

        // Buffer size must be at least as large as the data to avoid Incomplete errors
        let mut reader = LegacyPcapReader::new(data.len().max(65536), data)
            .map_err(|e| Error::Transport(format!("failed to create PCAP reader: {:?}", e)))?;
        let mut nanosecond = false;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::Legacy(packet) => {
                            let fraction = if nanosecond {
                                packet.ts_usec as i64
                            } else {
                                packet.ts_usec as i64 * 1000
                            };
                            let timestamp = Timestamp::from_nanos(
                                packet.ts_sec as i64 * 1_000_000_000 + fraction,
                            );
                            if let Some(payload) = Self::extract_udp_payload(packet.data, port) {
                                packets.push(ExtractedPacket { payload, timestamp });
                            }
                        }
                        PcapBlockOwned::LegacyHeader(header) => {
                            nanosecond = NANOSECOND_MAGIC.contains(&header.magic_number);
                        }
                        _ => {}
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                // everything is loaded, a partial trailing record is dropped
                Err(PcapError::Incomplete(_)) => break,
                Err(e) => {
                    return Err(Error::Transport(format!("PCAP parse error: {:?}", e)));
                }
            }
        }

        Ok(())
    }

    /// Extract packets from PCAPNG format.
    ///
    /// Enhanced packet timestamps are read in microseconds. Simple packet
    /// blocks carry no timestamp and inherit the previous one.
    fn extract_pcapng(
        data: &[u8],
        port: Option<u16>,
        packets: &mut Vec<ExtractedPacket>,
    ) -> Result<(), Error> {
        use pcap_parser::*;

        let mut reader = PcapNGReader::new(data.len().max(65536), data)
            .map_err(|e| Error::Transport(format!("failed to create PCAPNG reader: {:?}", e)))?;
        let mut timestamp = Timestamp::ZERO;

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let micros = ((epb.ts_high as u64) << 32) | epb.ts_low as u64;
                            timestamp = Timestamp::from_micros(micros as i64);
                            if let Some(payload) = Self::extract_udp_payload(epb.data, port) {
                                packets.push(ExtractedPacket { payload, timestamp });
                            }
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            if let Some(payload) = Self::extract_udp_payload(spb.data, port) {
                                packets.push(ExtractedPacket { payload, timestamp });
                            }
                        }
                        _ => {
                            // Skip other block types (SHB, IDB, etc.)
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => break,
                Err(e) => {
                    return Err(Error::Transport(format!("PCAPNG parse error: {:?}", e)));
                }
            }
        }

        Ok(())
    }

    /// Extract UDP payload from raw frame data.
    ///
    /// Uses etherparse to handle Ethernet/IP/UDP headers.
    fn extract_udp_payload(data: &[u8], port: Option<u16>) -> Option<Vec<u8>> {
        use etherparse::SlicedPacket;

        let packet = SlicedPacket::from_ethernet(data).ok()?;

        let udp = match packet.transport {
            Some(etherparse::TransportSlice::Udp(udp)) => udp,
            _ => return None,
        };

        if let Some(filter_port) = port {
            let src_port = udp.source_port();
            let dst_port = udp.destination_port();
            if src_port != filter_port && dst_port != filter_port {
                return None;
            }
        }

        let payload = udp.payload();
        if payload.is_empty() {
            return None;
        }

        Some(payload.to_vec())
    }

    /// Reset source to beginning for replay.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Get the total number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if the source contains no packets.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Get remaining packet count.
    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }
}

impl PacketSource for PcapSource {
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error> {
        let Some(next) = self.packets.get(self.index) else {
            return Ok(None);
        };
        if next.payload.len() != PACKET_SIZE {
            return Err(Error::Framing(format!(
                "pcap packet {} has {} bytes, expected {}",
                self.index,
                next.payload.len(),
                PACKET_SIZE
            )));
        }
        packet.as_bytes_mut().copy_from_slice(&next.payload);
        self.index += 1;
        Ok(Some(next.timestamp))
    }
}
