// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet pipeline driver.
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐   ┌────────────┐   ┌──────┐
//! │ PacketSource │ → │ ScanThinner │ → │ Strategy │ → │ formats::* │ → │ Sink │
//! └──────────────┘   └─────────────┘   └──────────┘   └────────────┘   └──────┘
//! ```
//!
//! Single-threaded and blocking. The packet and record buffers are allocated
//! once and reused for every packet; a record is either written whole or the
//! run fails.

use crate::{
    azimuth,
    calibration::Calibration,
    formats::{OutputMode, TIMESTAMP_SIZE, serialize_compact, serialize_raw},
    lidar::Error,
    packet::{PACKET_SIZE, Packet, PointMask},
    packet_source::PacketSource,
    scan::ScanThinner,
    sink::Sink,
    thin::{Strategy, ThinContext},
};
use rand::{SeedableRng, rngs::StdRng};
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info};

/// Packets between periodic compression reports
pub const REPORT_INTERVAL: u64 = 10000;

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The source has no more packets
    EndOfInput,
    /// The shutdown flag was raised
    Shutdown,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Termination::EndOfInput => write!(f, "no more data"),
            Termination::Shutdown => write!(f, "signal received"),
        }
    }
}

/// Running counters of a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
    /// Packets read from the source
    pub packets: u64,
    /// Packets dropped by the scan thinner
    pub scan_dropped: u64,
    /// Records written to the sink
    pub emitted: u64,
    /// Returns with a range in emitted packets
    pub points_in: u64,
    /// Points written in compact records
    pub points_out: u64,
    /// Exponential moving average of record size over packet size
    pub compression: f64,
}

impl Stats {
    fn record(&mut self, record_len: usize) {
        let ratio = record_len as f64 / (PACKET_SIZE + TIMESTAMP_SIZE) as f64;
        self.compression = 0.9 * self.compression + 0.1 * ratio;
        self.emitted += 1;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} packets read, {} dropped by scan, {} emitted, {} of {} points kept, compression {:.4}",
            self.packets,
            self.scan_dropped,
            self.emitted,
            self.points_out,
            self.points_in,
            self.compression
        )
    }
}

/// Source to sink driver holding all per-run state.
pub struct Pipeline<S, K> {
    source: S,
    sink: K,
    calibration: Calibration,
    scan: Option<ScanThinner>,
    strategy: Option<Strategy>,
    output: OutputMode,
    speed_override: Option<f64>,
    verbose: bool,
    rng: StdRng,
    packet: Packet,
    buf: Vec<u8>,
    stats: Stats,
}

impl<S: PacketSource, K: Sink> Pipeline<S, K> {
    /// Pipeline emitting compact records of every point, seeded from entropy.
    pub fn new(source: S, sink: K, calibration: Calibration) -> Self {
        Self {
            source,
            sink,
            calibration,
            scan: None,
            strategy: None,
            output: OutputMode::Compact,
            speed_override: None,
            verbose: false,
            rng: StdRng::from_entropy(),
            packet: Packet::new(),
            buf: Vec::with_capacity(PACKET_SIZE + 64),
            stats: Stats::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: Option<Strategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Forward only a fraction of whole scans.
    pub fn with_scan_rate(mut self, scan_rate: Option<f64>) -> Self {
        self.scan = scan_rate.map(ScanThinner::new);
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Angular speed in degrees per microsecond used instead of the
    /// per-packet estimate.
    pub fn with_angular_speed(mut self, speed: Option<f64>) -> Self {
        self.speed_override = speed;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn strategy(&self) -> Option<&Strategy> {
        self.strategy.as_ref()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Process packets until the source is exhausted or `shutdown` is set.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<Termination, Error> {
        debug!(
            "pipeline output {:?} strategy {:?} scan rate {:?}",
            self.output,
            self.strategy.as_ref().map(Strategy::name),
            self.scan.as_ref().map(ScanThinner::rate)
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(Termination::Shutdown);
            }
            if !self.step()? {
                if shutdown.load(Ordering::Relaxed) {
                    return Ok(Termination::Shutdown);
                }
                return Ok(Termination::EndOfInput);
            }
        }
    }

    /// Read and process one packet. Returns `false` at end of input.
    pub fn step(&mut self) -> Result<bool, Error> {
        let Some(timestamp) = self.source.read(&mut self.packet)? else {
            return Ok(false);
        };
        self.stats.packets += 1;

        if let Some(scan) = &mut self.scan {
            if !scan.thin(&self.packet, &mut self.rng) {
                self.stats.scan_dropped += 1;
                return Ok(true);
            }
        }

        let speed = azimuth::angular_speed(&self.packet, self.speed_override);
        let mask = match &mut self.strategy {
            Some(strategy) => {
                let mut ctx = ThinContext::new(speed, &self.calibration, &mut self.rng);
                strategy.apply(&self.packet, timestamp, &mut ctx)
            }
            None => PointMask::all(),
        };

        match self.output {
            OutputMode::Compact => {
                let points = serialize_compact(&self.packet, &mask, timestamp, &mut self.buf);
                self.stats.points_out += points as u64;
            }
            OutputMode::Raw => serialize_raw(&self.packet, timestamp, &mut self.buf),
        }
        self.sink.write_record(&self.buf)?;

        self.stats.points_in += self.packet.returns().filter(|r| r.range != 0).count() as u64;
        self.stats.record(self.buf.len());
        if self.verbose && self.stats.emitted % REPORT_INTERVAL == 0 {
            info!(
                "processed {} packets; compression rate {:.4}",
                self.stats.emitted, self.stats.compression
            );
        }
        Ok(true)
    }
}
