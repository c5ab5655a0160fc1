// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Integration tests replaying pcap captures through the pipeline.
//!
//! Captures are synthesized into temporary files: Ethernet/IPv4/UDP frames
//! carrying sensor packets on the data port, interleaved with position
//! packets on another port.

#![cfg(feature = "pcap")]

use clap::Parser;
use std::{io::Write, sync::atomic::AtomicBool};
use velodyne_thin::{
    Config, Packet, Pipeline, Termination, Timestamp,
    args::Args,
    formats::CompactRecord,
    packet::{BLOCKS_PER_PACKET, LASERS_PER_BLOCK, POINTS_PER_PACKET},
    packet_source::PacketSource,
    pcap_source::PcapSource,
    sink::WriterSink,
};

/// Sensor data port
const DATA_PORT: u16 = 2368;

/// Sensor position (GPS) port
const POSITION_PORT: u16 = 8308;

// Legacy PCAP header, little-endian, microsecond precision, Ethernet
const PCAP_HEADER: [u8; 24] = [
    0xd4, 0xc3, 0xb2, 0xa1, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
];

fn udp_frame(port: u16, payload: &[u8]) -> Vec<u8> {
    let udp_len = 8 + payload.len();
    let ip_len = 20 + udp_len;
    let mut frame = Vec::with_capacity(14 + ip_len);
    frame.extend_from_slice(&[0xff; 6]);
    frame.extend_from_slice(&[0x60, 0x76, 0x88, 0x00, 0x00, 0x01]);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(&[0x45, 0x00]);
    frame.extend_from_slice(&(ip_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00]);
    frame.extend_from_slice(&[192, 168, 3, 43]);
    frame.extend_from_slice(&[255, 255, 255, 255]);
    frame.extend_from_slice(&port.to_be_bytes());
    frame.extend_from_slice(&port.to_be_bytes());
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

fn pcap_record(frame: &[u8], ts_sec: u32, ts_usec: u32) -> Vec<u8> {
    let len = frame.len() as u32;
    let mut record = Vec::new();
    record.extend_from_slice(&ts_sec.to_le_bytes());
    record.extend_from_slice(&ts_usec.to_le_bytes());
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(&len.to_le_bytes());
    record.extend_from_slice(frame);
    record
}

fn sensor_packet(index: usize) -> Packet {
    let mut packet = Packet::new();
    for block in 0..BLOCKS_PER_PACKET {
        packet.set_rotation(block, ((index * 6 + block / 2) * 20 % 36000) as u16);
        for laser in 0..LASERS_PER_BLOCK {
            packet.set_return(block, laser, 3000 + laser as u16, 50);
        }
    }
    packet
}

/// Capture with `count` sensor packets 600 µs apart, each followed by a
/// position packet.
fn capture(count: usize) -> (tempfile::NamedTempFile, Vec<(Packet, Timestamp)>) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&PCAP_HEADER).unwrap();
    let mut expected = Vec::new();
    for i in 0..count {
        let packet = sensor_packet(i);
        let usec = 100_000 + i as u32 * 600;
        let data = udp_frame(DATA_PORT, packet.as_bytes());
        let position = udp_frame(POSITION_PORT, b"$GPRMC,...");
        file.write_all(&pcap_record(&data, 1_500_000_000, usec))
            .unwrap();
        file.write_all(&pcap_record(&position, 1_500_000_000, usec + 1))
            .unwrap();
        let timestamp = Timestamp::from_parts(1_500_000_000, usec as i32 * 1000);
        expected.push((packet, timestamp));
    }
    file.flush().unwrap();
    (file, expected)
}

#[test]
fn test_pcap_source_filters_data_port() {
    let (file, expected) = capture(25);
    let mut source = PcapSource::from_file(file.path(), Some(DATA_PORT)).unwrap();
    assert_eq!(source.len(), expected.len());

    let mut packet = Packet::new();
    for (want, timestamp) in &expected {
        assert_eq!(source.read(&mut packet).unwrap(), Some(*timestamp));
        assert_eq!(&packet, want);
    }
    assert!(source.read(&mut packet).unwrap().is_none());
}

#[test]
fn test_pcap_without_port_filter_fails_on_position_packet() {
    let (file, _) = capture(2);
    let mut source = PcapSource::from_file(file.path(), None).unwrap();
    let mut packet = Packet::new();
    assert!(source.read(&mut packet).unwrap().is_some());
    assert!(matches!(
        source.read(&mut packet),
        Err(velodyne_thin::Error::Framing(_))
    ));
}

#[test]
fn test_pcap_pipeline_through_config() {
    let (file, expected) = capture(40);
    let path = file.path().to_str().unwrap().to_owned();
    let args = Args::parse_from(["velodyne-thin", "--pcap", path.as_str(), "--rate", "1"]);
    let config = Config::try_from(args).unwrap();

    let calibration = config.load_calibration().unwrap();
    let strategy = config.build_strategy(&calibration).unwrap();
    let source = config.open_source(Default::default()).unwrap();
    let mut pipeline = Pipeline::new(source, WriterSink::new(Vec::new()), calibration)
        .with_strategy(strategy)
        .with_output(config.output);
    assert_eq!(
        pipeline.run(&AtomicBool::new(false)).unwrap(),
        Termination::EndOfInput
    );

    let mut data: &[u8] = pipeline.sink().get_ref();
    let mut records = Vec::new();
    while !data.is_empty() {
        let (record, used) = CompactRecord::decode(data).unwrap();
        records.push(record);
        data = &data[used..];
    }

    assert_eq!(records.len(), expected.len());
    for (record, (_, timestamp)) in records.iter().zip(&expected) {
        assert_eq!(record.timestamp, *timestamp);
        assert_eq!(record.points.len(), POINTS_PER_PACKET);
    }
}
