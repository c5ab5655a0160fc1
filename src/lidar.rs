// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common types shared by every stage of the thinning pipeline.
//!
//! This module provides the crate-wide [`Error`] type and the [`Timestamp`]
//! attached to each packet by its source.

use std::fmt;

/// Common error type for thinning operations
///
/// Every fatal condition of the pipeline maps onto one of these variants so
/// that `main` can report it with a single message before exiting.
#[derive(Debug)]
pub enum Error {
    /// I/O error (stdin/stdout, files, sockets after startup)
    Io(std::io::Error),
    /// Invalid or conflicting configuration, detected before processing
    Config(String),
    /// Source produced a buffer that is not exactly one packet
    Framing(String),
    /// Source or sink could not be opened
    Transport(String),
    /// Calibration file could not be parsed
    Calibration(serde_json::Error),
    /// Record could not be decoded
    Decode(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Framing(msg) => write!(f, "framing error: {}", msg),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::Calibration(err) => write!(f, "calibration error: {}", err),
            Error::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Calibration(err)
    }
}

/// Capture instant of a packet, nanoseconds since the Unix epoch.
///
/// Assigned by the packet source, never derived from encoder data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub const fn from_parts(seconds: i64, nanoseconds: i32) -> Self {
        Timestamp(seconds * 1_000_000_000 + nanoseconds as i64)
    }

    /// Like [`Timestamp::from_parts`], but `None` if `nanoseconds` is outside
    /// `0..1_000_000_000` or the instant does not fit in an `i64`.
    pub const fn checked_from_parts(seconds: i64, nanoseconds: i32) -> Option<Self> {
        if nanoseconds < 0 || nanoseconds >= 1_000_000_000 {
            return None;
        }
        match seconds.checked_mul(1_000_000_000) {
            Some(nanos) => match nanos.checked_add(nanoseconds as i64) {
                Some(nanos) => Some(Timestamp(nanos)),
                None => None,
            },
            None => None,
        }
    }

    pub const fn from_micros(micros: i64) -> Self {
        Timestamp(micros * 1_000)
    }

    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Whole seconds since the epoch (floored).
    pub const fn seconds(&self) -> i64 {
        self.0.div_euclid(1_000_000_000)
    }

    /// Nanoseconds within the second, always in `0..1_000_000_000`.
    pub const fn nanoseconds(&self) -> i32 {
        self.0.rem_euclid(1_000_000_000) as i32
    }

    /// Signed difference `self - earlier` in nanoseconds.
    pub const fn nanos_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Read the realtime clock.
    pub fn now() -> Result<Self, Error> {
        Ok(Timestamp(realtime_nanos()?))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds(), self.nanoseconds())
    }
}

/// Get the realtime clock in nanoseconds since the Unix epoch.
///
/// On Linux, uses `CLOCK_REALTIME` directly.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
fn realtime_nanos() -> Result<i64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as i64 * 1_000_000_000 + tp.tv_nsec as i64)
}

#[cfg(not(target_os = "linux"))]
fn realtime_nanos() -> Result<i64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    Ok(duration.as_nanos() as i64)
}
