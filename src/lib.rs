// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Velodyne HDL-64E packet thinning.
//!
//! This library reduces the bandwidth of a Velodyne packet stream by
//! discarding laser returns (or whole scans) according to a configurable
//! strategy, and serializes the survivors into compact records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌───────────────┐     ┌──────────────────┐
//! │  PacketSource   │ ──► │  ScanThinner  │ ──► │  Strategy        │
//! │ (UDP/pcap/log)  │     │  (optional)   │     │  → PointMask     │
//! └─────────────────┘     └───────────────┘     └──────────────────┘
//!                                                        │
//!                                                        ▼
//!                               ┌─────────────────────────────────────┐
//!                               │  formats::serialize_compact / _raw  │
//!                               │  → Sink (stdout / tcp / udp)        │
//!                               └─────────────────────────────────────┘
//! ```
//!
//! The pipeline owns a single packet buffer that each source read
//! overwrites. Strategies never modify the packet; they return a
//! [`PointMask`] of the returns to keep, which the compact serializer
//! applies.
//!
//! # Modules
//!
//! - [`packet`]: Packet layout, block and return accessors, point mask
//! - [`azimuth`]: Firing time offsets and azimuth extrapolation
//! - [`calibration`]: Per-laser azimuth and range corrections
//! - [`scan`]: Whole-scan thinning
//! - [`thin`]: Strategy family and uniform rate thinning
//! - [`focus`]: Sector focus thinning
//! - [`background`]: Background subtraction strategies
//! - [`formats`]: Compact and raw record encoding and decoding
//! - [`packet_source`]: Packet source abstraction
//! - [`sink`]: Record sinks and network publishers
//! - [`pipeline`]: Source to sink driver
//! - [`config`]: Command line validation
//!
//! # Example
//!
//! ```ignore
//! use velodyne_thin::{
//!     Calibration, Pipeline, Strategy,
//!     packet_source::ProprietarySource,
//!     sink::StdoutSink,
//!     thin::UniformRate,
//! };
//!
//! let source = ProprietarySource::open("drive.bin")?;
//! let mut pipeline = Pipeline::new(source, StdoutSink::stdout(), Calibration::nominal())
//!     .with_strategy(Some(Strategy::UniformRate(UniformRate::new(0.1))));
//! let done = pipeline.run(&AtomicBool::new(false))?;
//! ```

pub mod args;
pub mod azimuth;
pub mod background;
pub mod calibration;
pub mod config;
pub mod focus;
pub mod formats;
pub mod lidar;
pub mod packet;
pub mod packet_source;
#[cfg(feature = "pcap")]
pub mod pcap_source;
pub mod pipeline;
pub mod scan;
pub mod sink;
pub mod thin;

// Re-exports for convenience
pub use calibration::Calibration;
pub use config::Config;
pub use formats::OutputMode;
pub use lidar::{Error, Timestamp};
pub use packet::{Packet, PointMask};
pub use packet_source::PacketSource;
#[cfg(feature = "pcap")]
pub use pcap_source::PcapSource;
pub use pipeline::{Pipeline, Stats, Termination};
pub use thin::Strategy;
