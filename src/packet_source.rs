// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet source abstraction.
//!
//! This module provides a [`PacketSource`] trait that abstracts where sensor
//! packets come from:
//!
//! - **Live operation**: [`UdpSource`] reading datagrams from the sensor
//! - **Log replay**: [`ProprietarySource`] reading framed log records from a
//!   file or stdin
//! - **Pcap replay**: `PcapSource` reading captures (with feature flag)
//! - **Testing**: [`MemorySource`] replaying packets held in memory
//!
//! # Example
//!
//! ```ignore
//! use velodyne_thin::{Packet, packet_source::{PacketSource, ProprietarySource}};
//!
//! let mut source = ProprietarySource::open("drive.bin")?;
//! let mut packet = Packet::new();
//! while let Some(timestamp) = source.read(&mut packet)? {
//!     // Process packet captured at timestamp
//! }
//! ```

use crate::{
    formats::{RAW_RECORD_SIZE, RawRecord},
    lidar::{Error, Timestamp},
    packet::{PACKET_SIZE, Packet},
};
use std::{
    fs::File,
    io::{BufReader, ErrorKind, Read},
    net::UdpSocket,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::debug;

/// Trait for packet sources.
///
/// Implementations overwrite the caller's packet buffer in place.
pub trait PacketSource {
    /// Read the next packet into `packet`.
    ///
    /// # Returns
    /// - `Ok(Some(timestamp))` - A packet was read
    /// - `Ok(None)` - End of input, or shutdown was observed
    /// - `Err` - Fatal transport or framing error
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error>;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error> {
        (**self).read(packet)
    }
}

/// How long a UDP read blocks before re-checking the shutdown flag
pub const UDP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// UDP socket packet source for live sensor operation.
pub struct UdpSource {
    socket: UdpSocket,
    shutdown: Arc<AtomicBool>,
    buf: Vec<u8>,
}

impl UdpSource {
    /// Bind to `0.0.0.0:port` and create a UDP source.
    ///
    /// Reads return `Ok(None)` once `shutdown` is set.
    pub fn bind(port: u16, shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .map_err(|e| Error::Transport(format!("udp bind port {}: {}", port, e)))?;
        Self::new(socket, shutdown)
    }

    /// Create a UDP source from an existing socket.
    pub fn new(socket: UdpSocket, shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        socket.set_read_timeout(Some(UDP_POLL_INTERVAL))?;
        if let Ok(addr) = socket.local_addr() {
            debug!("udp source listening on {}", addr);
        }
        Ok(Self {
            socket,
            shutdown,
            // one spare byte to detect oversized datagrams
            buf: vec![0; PACKET_SIZE + 1],
        })
    }
}

impl PacketSource for UdpSource {
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match self.socket.recv(&mut self.buf) {
                Ok(len) if len == PACKET_SIZE => {
                    let timestamp = Timestamp::now()?;
                    packet
                        .as_bytes_mut()
                        .copy_from_slice(&self.buf[..PACKET_SIZE]);
                    return Ok(Some(timestamp));
                }
                Ok(len) => {
                    return Err(Error::Framing(format!(
                        "udp datagram of {} bytes, expected {}",
                        len, PACKET_SIZE
                    )));
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

/// Replay of a proprietary log: back-to-back raw records.
///
/// A zero embedded timestamp is replaced by the realtime clock at read time.
/// With a shutdown flag, the flag is checked before every read. Pollable
/// readers (stdin, pipes, sockets) additionally wait for data in
/// [`UDP_POLL_INTERVAL`] slices so a stalled stream still observes shutdown.
pub struct ProprietarySource<R> {
    reader: R,
    record: Vec<u8>,
    records: u64,
    shutdown: Option<Arc<AtomicBool>>,
    poll_fd: Option<i32>,
}

impl<R: Read> ProprietarySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            record: vec![0; RAW_RECORD_SIZE],
            records: 0,
            shutdown: None,
            poll_fd: None,
        }
    }

    /// Stop reading once `shutdown` is set.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Number of records read so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Block until the reader has data, end of stream, or shutdown.
    ///
    /// Returns `false` on shutdown.
    fn wait_readable(&self) -> Result<bool, Error> {
        loop {
            if self.is_shutdown() {
                return Ok(false);
            }
            match self.poll_fd {
                Some(fd) => {
                    if poll_readable(fd, UDP_POLL_INTERVAL)? {
                        return Ok(true);
                    }
                }
                None => return Ok(true),
            }
        }
    }

    /// Fill the record buffer, returning the number of bytes read before
    /// end of stream, or `None` on shutdown.
    fn fill(&mut self) -> Result<Option<usize>, Error> {
        let mut filled = 0;
        while filled < RAW_RECORD_SIZE {
            if !self.wait_readable()? {
                if filled > 0 {
                    debug!(
                        "shutdown discards {} bytes of record {}",
                        filled, self.records
                    );
                }
                return Ok(None);
            }
            match self.reader.read(&mut self.record[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(Some(filled))
    }
}

#[cfg(unix)]
impl<R: Read + std::os::fd::AsRawFd> ProprietarySource<R> {
    /// Read from a file descriptor backed stream, polling it so that a
    /// stream with no data still observes `shutdown`.
    ///
    /// The reader must not buffer internally; records are read only after
    /// the descriptor reports data.
    pub fn pollable(reader: R, shutdown: Arc<AtomicBool>) -> Self {
        let fd = reader.as_raw_fd();
        let mut source = Self::new(reader).with_shutdown(shutdown);
        source.poll_fd = Some(fd);
        source
    }
}

/// Wait up to `timeout` for `fd` to become readable (or hung up).
#[cfg(unix)]
fn poll_readable(fd: i32, timeout: Duration) -> Result<bool, Error> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if ready < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(Error::Io(err));
    }
    Ok(ready > 0)
}

#[cfg(not(unix))]
fn poll_readable(_fd: i32, _timeout: Duration) -> Result<bool, Error> {
    Ok(true)
}

impl ProprietarySource<BufReader<File>> {
    /// Open a log file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Transport(format!("open {}: {}", path.display(), e)))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

#[cfg(unix)]
impl ProprietarySource<File> {
    /// Read records from standard input until end of stream or `shutdown`.
    ///
    /// Reads go straight to the descriptor, bypassing the buffered
    /// `std::io::Stdin` handle, so polling sees every pending byte.
    pub fn stdin(shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        use std::os::fd::AsFd;
        let fd = std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| Error::Transport(format!("stdin: {}", e)))?;
        Ok(Self::pollable(File::from(fd), shutdown))
    }
}

#[cfg(not(unix))]
impl ProprietarySource<std::io::Stdin> {
    /// Read records from standard input; shutdown is observed between reads.
    pub fn stdin(shutdown: Arc<AtomicBool>) -> Result<Self, Error> {
        Ok(Self::new(std::io::stdin()).with_shutdown(shutdown))
    }
}

impl<R: Read> PacketSource for ProprietarySource<R> {
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error> {
        match self.fill()? {
            None | Some(0) => return Ok(None),
            Some(RAW_RECORD_SIZE) => {}
            Some(n) => {
                return Err(Error::Framing(format!(
                    "truncated record {}: {} of {} bytes",
                    self.records, n, RAW_RECORD_SIZE
                )));
            }
        }

        let timestamp = RawRecord::decode_into(&self.record, packet)
            .map_err(|e| Error::Framing(format!("record {}: {}", self.records, e)))?;
        self.records += 1;

        if timestamp == Timestamp::ZERO {
            return Ok(Some(Timestamp::now()?));
        }
        Ok(Some(timestamp))
    }
}

/// In-memory packet source for tests, benchmarks and learning.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    packets: Vec<(Packet, Timestamp)>,
    index: usize,
}

impl MemorySource {
    /// Create a source from timestamped packets.
    pub fn new(packets: Vec<(Packet, Timestamp)>) -> Self {
        Self { packets, index: 0 }
    }

    /// Create a source whose packets are 1 ms apart starting at the epoch.
    pub fn from_packets(packets: Vec<Packet>) -> Self {
        let packets = packets
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p, Timestamp::from_micros(i as i64 * 1000)))
            .collect();
        Self::new(packets)
    }

    /// Reset the source to the beginning.
    pub fn reset(&mut self) {
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Get remaining packet count.
    pub fn remaining(&self) -> usize {
        self.packets.len().saturating_sub(self.index)
    }
}

impl PacketSource for MemorySource {
    fn read(&mut self, packet: &mut Packet) -> Result<Option<Timestamp>, Error> {
        let Some((next, timestamp)) = self.packets.get(self.index) else {
            return Ok(None);
        };
        packet.clone_from(next);
        self.index += 1;
        Ok(Some(*timestamp))
    }
}
