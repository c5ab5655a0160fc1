// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Thin a Velodyne HDL-64E packet stream and emit compact or raw records.
///
/// Records are written to stdout unless --publish is given; logs go to
/// stderr.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Emit raw framed packets instead of compact thinned records
    #[arg(long, env)]
    pub output_raw: bool,

    /// Read live packets from this UDP port
    #[arg(long, env)]
    pub udp_port: Option<u16>,

    /// Replay packets from a pcap or pcapng capture
    #[arg(long, env)]
    pub pcap: Option<PathBuf>,

    /// UDP port to extract from the capture, 0 for any
    #[arg(long, env, default_value = "2368")]
    pub pcap_port: u16,

    /// Replay a proprietary log file (default: read the log from stdin)
    #[arg(long, env)]
    pub input: Option<PathBuf>,

    /// Publish records on the network: tcp:PORT or udp:HOST:PORT
    #[arg(long, env)]
    pub publish: Option<String>,

    /// Laser calibration JSON
    #[arg(long, env)]
    pub db: Option<PathBuf>,

    /// Uniform point retention rate in [0, 1]; base rate for --focus and
    /// foreground rate for --subtract
    #[arg(long, env)]
    pub rate: Option<f64>,

    /// Fraction of whole scans to forward, in (0, 1]
    #[arg(long, env)]
    pub scan_rate: Option<f64>,

    /// Rotor angular speed override in degrees per second
    #[arg(long, env)]
    pub angular_speed: Option<f64>,

    /// Sector focus: "sector;range=<m>;bearing=<deg>;ken=<deg>;ratio=<r>"
    #[arg(long, env)]
    pub focus: Option<String>,

    /// Background subtraction by age:
    /// "foreground=<r>;background=<r>;age=<s>;threshold=<m>"
    #[arg(long, env)]
    pub subtract_by_age: Option<String>,

    /// Background subtraction by running max range:
    /// "foreground=<r>;background=<r>;epsilon=<m>"
    #[arg(long, env)]
    pub subtract_max_range: Option<String>,

    /// Learn a fixed background from a proprietary log and drop points on it
    #[arg(long, env)]
    pub subtract: Option<PathBuf>,

    /// Distance in meters under the learned background still treated as
    /// background
    #[arg(long, env)]
    pub subtract_epsilon: Option<f64>,

    /// Seed for the random number generator (entropy otherwise)
    #[arg(long, env)]
    pub seed: Option<u64>,

    /// Log periodic compression diagnostics
    #[arg(short, long, env)]
    pub verbose: bool,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,
}
