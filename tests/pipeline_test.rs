// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! End-to-end tests driving the pipeline from proprietary logs and memory
//! sources through to decoded records.

use clap::Parser;
use std::{
    io::{Cursor, Write},
    sync::atomic::AtomicBool,
};
use velodyne_thin::{
    Calibration, Config, OutputMode, Packet, Pipeline, Termination, Timestamp,
    args::Args,
    formats::{CompactRecord, RAW_RECORD_SIZE, serialize_raw},
    packet::{BLOCKS_PER_PACKET, LASERS_PER_BLOCK, POINTS_PER_PACKET, ROTATION_RANGE},
    packet_source::{MemorySource, PacketSource, ProprietarySource},
    sink::WriterSink,
};

/// Packets per full rotation in the synthetic stream
const PACKETS_PER_SCAN: usize = 100;

/// Packets covering `scans` rotations, every return at `range`.
fn scan_packets(scans: usize, range: u16) -> Vec<Packet> {
    let step = ROTATION_RANGE as usize / (PACKETS_PER_SCAN * BLOCKS_PER_PACKET / 2);
    let mut rotation = 0usize;
    let mut packets = Vec::new();
    for _ in 0..scans * PACKETS_PER_SCAN {
        let mut packet = Packet::new();
        for block in 0..BLOCKS_PER_PACKET {
            packet.set_rotation(block, rotation as u16);
            for laser in 0..LASERS_PER_BLOCK {
                packet.set_return(block, laser, range, (laser * 4) as u8);
            }
            if block % 2 == 1 {
                rotation = (rotation + step) % ROTATION_RANGE as usize;
            }
        }
        packets.push(packet);
    }
    packets
}

fn write_log(file: &mut impl Write, packets: &[Packet]) {
    let mut buf = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        let seconds = 1_600_000_000 + i as i64 / 10;
        let timestamp = Timestamp::from_parts(seconds, (i % 10) as i32 * 100);
        serialize_raw(packet, timestamp, &mut buf);
        file.write_all(&buf).unwrap();
    }
    file.flush().unwrap();
}

fn decode_all(mut data: &[u8]) -> Vec<CompactRecord> {
    let mut records = Vec::new();
    while !data.is_empty() {
        let (record, used) = CompactRecord::decode(data).unwrap();
        records.push(record);
        data = &data[used..];
    }
    records
}

type LogPipeline = Pipeline<ProprietarySource<Cursor<Vec<u8>>>, WriterSink<Vec<u8>>>;

/// Pipeline replaying an in-memory proprietary log.
fn log_pipeline(log: Vec<u8>) -> LogPipeline {
    Pipeline::new(
        ProprietarySource::new(Cursor::new(log)),
        WriterSink::new(Vec::new()),
        Calibration::nominal(),
    )
}

fn config(args: &[&str]) -> Config {
    let mut argv = vec!["velodyne-thin"];
    argv.extend_from_slice(args);
    Config::try_from(Args::parse_from(argv)).unwrap()
}

#[test]
fn test_uniform_rate_end_to_end() {
    let packets = scan_packets(5, 1200);
    let config = config(&["--rate", "0.2", "--seed", "17"]);
    let calibration = config.load_calibration().unwrap();
    let strategy = config.build_strategy(&calibration).unwrap();

    let mut pipeline = Pipeline::new(
        MemorySource::from_packets(packets.clone()),
        WriterSink::new(Vec::new()),
        calibration,
    )
    .with_strategy(strategy)
    .with_seed(config.seed);
    assert_eq!(
        pipeline.run(&AtomicBool::new(false)).unwrap(),
        Termination::EndOfInput
    );

    let records = decode_all(pipeline.sink().get_ref());
    assert_eq!(records.len(), packets.len());
    let kept: usize = records.iter().map(|r| r.points.len()).sum();
    let fraction = kept as f64 / (packets.len() * POINTS_PER_PACKET) as f64;
    assert!((fraction - 0.2).abs() < 0.01, "kept fraction {}", fraction);

    // every surviving point matches its source return
    for (record, packet) in records.iter().zip(&packets) {
        for point in &record.points {
            let block = packet.block(point.block);
            assert_eq!(point.rotation, block.rotation());
            assert_eq!(point.range, block.range(point.laser));
            assert_eq!(point.intensity, block.intensity(point.laser));
        }
    }
}

#[test]
fn test_scan_rate_forwards_whole_scans() {
    let packets = scan_packets(20, 1200);
    let mut pipeline = Pipeline::new(
        MemorySource::from_packets(packets),
        WriterSink::new(Vec::new()),
        Calibration::nominal(),
    )
    .with_scan_rate(Some(0.5))
    .with_seed(Some(7));
    pipeline.run(&AtomicBool::new(false)).unwrap();

    let stats = *pipeline.stats();
    assert_eq!(stats.packets, 20 * PACKETS_PER_SCAN as u64);
    assert_eq!(stats.emitted + stats.scan_dropped, stats.packets);
    assert!(stats.emitted > 0 && stats.scan_dropped > 0);
    assert_eq!(stats.emitted % PACKETS_PER_SCAN as u64, 0);

    // forwarded packets are untouched without a strategy
    let records = decode_all(pipeline.sink().get_ref());
    assert_eq!(records.len() as u64, stats.emitted);
    assert!(records.iter().all(|r| r.points.len() == POINTS_PER_PACKET));
}

#[test]
fn test_raw_output_replays_as_proprietary_log() {
    let packets = scan_packets(1, 900);
    let mut log = Vec::new();
    write_log(&mut log, &packets);

    let mut pipeline = log_pipeline(log.clone()).with_output(OutputMode::Raw);
    pipeline.run(&AtomicBool::new(false)).unwrap();

    let out = pipeline.into_sink().into_inner();
    assert_eq!(out.len(), packets.len() * RAW_RECORD_SIZE);
    assert_eq!(out, log);

    let mut replay = ProprietarySource::new(Cursor::new(out));
    let mut packet = Packet::new();
    for (i, expected) in packets.iter().enumerate() {
        let timestamp = replay.read(&mut packet).unwrap().unwrap();
        assert_eq!(&packet, expected);
        assert_eq!(timestamp.seconds(), 1_600_000_000 + i as i64 / 10);
    }
    assert!(replay.read(&mut packet).unwrap().is_none());
}

#[test]
fn test_compact_timestamps_follow_log() {
    let packets = scan_packets(1, 900);
    let mut log = Vec::new();
    write_log(&mut log, &packets[..10]);

    let mut pipeline = log_pipeline(log);
    pipeline.run(&AtomicBool::new(false)).unwrap();

    let records = decode_all(pipeline.sink().get_ref());
    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(
            record.timestamp,
            Timestamp::from_parts(1_600_000_000, i as i32 * 100)
        );
    }
}

#[test]
fn test_fixed_background_learn_and_subtract() {
    let background = scan_packets(2, 2500);
    let mut log = tempfile::NamedTempFile::new().unwrap();
    write_log(&mut log, &background);
    let path = log.path().to_str().unwrap().to_owned();

    let config = config(&["--subtract", path.as_str(), "--input", path.as_str()]);
    let calibration = config.load_calibration().unwrap();
    let strategy = config.build_strategy(&calibration).unwrap();
    assert_eq!(strategy.as_ref().map(|s| s.name()), Some("fixed-background"));

    // replaying the learned capture leaves nothing
    let source = config.open_source(Default::default()).unwrap();
    let mut pipeline = Pipeline::new(source, WriterSink::new(Vec::new()), calibration.clone())
        .with_strategy(strategy);
    pipeline.run(&AtomicBool::new(false)).unwrap();
    let records = decode_all(pipeline.sink().get_ref());
    assert_eq!(records.len(), background.len());
    assert!(records.iter().all(|r| r.points.is_empty()));

    // anything closer than the background is foreground
    let strategy = config.build_strategy(&calibration).unwrap();
    let foreground = scan_packets(1, 1000);
    let mut pipeline = Pipeline::new(
        MemorySource::from_packets(foreground.clone()),
        WriterSink::new(Vec::new()),
        calibration,
    )
    .with_strategy(strategy);
    pipeline.run(&AtomicBool::new(false)).unwrap();
    let records = decode_all(pipeline.sink().get_ref());
    assert_eq!(records.len(), foreground.len());
    assert!(records.iter().all(|r| r.points.len() == POINTS_PER_PACKET));
}

#[test]
fn test_truncated_log_is_a_framing_error() {
    let packets = scan_packets(1, 900);
    let mut log = Vec::new();
    write_log(&mut log, &packets[..3]);
    log.truncate(2 * RAW_RECORD_SIZE + 10);

    let mut pipeline = log_pipeline(log);
    let result = pipeline.run(&AtomicBool::new(false));
    assert!(matches!(result, Err(velodyne_thin::Error::Framing(_))));
    assert_eq!(pipeline.stats().emitted, 2);
}

#[cfg(unix)]
#[test]
fn test_stalled_log_stream_observes_shutdown() {
    use std::{
        os::unix::net::UnixStream,
        sync::{Arc, mpsc},
        time::Duration,
    };

    let packets = scan_packets(1, 900);
    let mut log = Vec::new();
    write_log(&mut log, &packets[..2]);

    // two records then silence with the writer still open
    let (reader, mut writer) = UnixStream::pair().unwrap();
    writer.write_all(&log).unwrap();

    let shutdown = Arc::new(AtomicBool::new(false));
    let source = ProprietarySource::pollable(reader, shutdown.clone());
    let mut pipeline = Pipeline::new(source, WriterSink::new(Vec::new()), Calibration::nominal());

    let (done, finished) = mpsc::channel();
    let flag = shutdown.clone();
    std::thread::spawn(move || {
        let termination = pipeline.run(&flag).ok();
        done.send((termination, pipeline.stats().emitted)).unwrap();
    });

    std::thread::sleep(Duration::from_millis(200));
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let (termination, emitted) = finished.recv_timeout(Duration::from_millis(1500)).unwrap();
    assert_eq!(termination, Some(Termination::Shutdown));
    assert_eq!(emitted, 2);
    drop(writer);
}
