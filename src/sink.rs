// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Record sinks.
//!
//! A [`Sink`] accepts whole records: each call writes one complete record or
//! fails. Records go to stdout by default, or to network subscribers when a
//! publish address is configured.

use crate::lidar::Error;
use std::{
    fmt,
    io::{ErrorKind, Write},
    net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Destination for serialized records.
pub trait Sink {
    /// Write one complete record.
    fn write_record(&mut self, record: &[u8]) -> Result<(), Error>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn write_record(&mut self, record: &[u8]) -> Result<(), Error> {
        (**self).write_record(record)
    }
}

/// Sink over any writer, flushed after every record.
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WriterSink<W> {
    fn write_record(&mut self, record: &[u8]) -> Result<(), Error> {
        self.writer.write_all(record)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Standard output sink.
pub type StdoutSink = WriterSink<std::io::Stdout>;

impl StdoutSink {
    pub fn stdout() -> Self {
        WriterSink::new(std::io::stdout())
    }
}

/// Network publish address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishAddress {
    /// Listen on a TCP port and stream records to every subscriber
    Tcp(u16),
    /// Send one datagram per record to a host
    Udp(String),
}

impl FromStr for PublishAddress {
    type Err = Error;

    /// Parse `tcp:PORT` or `udp:HOST:PORT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            Error::Config(format!(
                "invalid publish address '{}', expected tcp:PORT or udp:HOST:PORT",
                s
            ))
        };
        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        match scheme {
            "tcp" => rest.parse().map(PublishAddress::Tcp).map_err(|_| invalid()),
            "udp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid());
                }
                Ok(PublishAddress::Udp(rest.to_owned()))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for PublishAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublishAddress::Tcp(port) => write!(f, "tcp:{}", port),
            PublishAddress::Udp(addr) => write!(f, "udp:{}", addr),
        }
    }
}

/// Open the sink for a publish address.
pub fn publisher(address: &PublishAddress) -> Result<Box<dyn Sink>, Error> {
    match address {
        PublishAddress::Tcp(port) => Ok(Box::new(TcpPublisher::bind(*port)?)),
        PublishAddress::Udp(addr) => Ok(Box::new(UdpPublisher::connect(addr)?)),
    }
}

/// Longest a record write may block on one subscriber before it is dropped
pub const SUBSCRIBER_WRITE_TIMEOUT: Duration = Duration::from_millis(200);

/// TCP server streaming every record to all connected subscribers.
///
/// Pending connections are accepted before each record. A subscriber whose
/// write fails or stalls past [`SUBSCRIBER_WRITE_TIMEOUT`] is dropped; the
/// remaining subscribers are unaffected.
pub struct TcpPublisher {
    listener: TcpListener,
    clients: Vec<TcpStream>,
}

impl TcpPublisher {
    /// Listen on `0.0.0.0:port`.
    pub fn bind(port: u16) -> Result<Self, Error> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| Error::Transport(format!("tcp bind port {}: {}", port, e)))?;
        Self::new(listener)
    }

    pub fn new(listener: TcpListener) -> Result<Self, Error> {
        listener.set_nonblocking(true)?;
        if let Ok(addr) = listener.local_addr() {
            info!("publishing records on tcp {}", addr);
        }
        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    pub fn local_port(&self) -> Result<u16, Error> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Number of connected subscribers.
    pub fn subscribers(&self) -> usize {
        self.clients.len()
    }

    /// Accept every pending connection.
    pub fn accept_pending(&mut self) -> Result<(), Error> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_write_timeout(Some(SUBSCRIBER_WRITE_TIMEOUT))?;
                    stream.set_nodelay(true)?;
                    debug!("subscriber {} connected", addr);
                    self.clients.push(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }
}

impl Sink for TcpPublisher {
    fn write_record(&mut self, record: &[u8]) -> Result<(), Error> {
        self.accept_pending()?;
        self.clients.retain_mut(|client| match client.write_all(record) {
            Ok(()) => true,
            Err(e) => {
                warn!("dropping subscriber {:?}: {}", client.peer_addr().ok(), e);
                false
            }
        });
        Ok(())
    }
}

/// UDP sender, one datagram per record.
pub struct UdpPublisher {
    socket: UdpSocket,
}

impl UdpPublisher {
    /// Resolve `host:port` and connect an ephemeral socket to it.
    pub fn connect(addr: &str) -> Result<Self, Error> {
        let target = addr
            .to_socket_addrs()
            .map_err(|e| Error::Transport(format!("resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::Transport(format!("no address for {}", addr)))?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind)?;
        socket
            .connect(target)
            .map_err(|e| Error::Transport(format!("udp connect {}: {}", target, e)))?;
        info!("publishing records to udp {}", target);
        Ok(Self { socket })
    }
}

impl Sink for UdpPublisher {
    fn write_record(&mut self, record: &[u8]) -> Result<(), Error> {
        match self.socket.send(record) {
            Ok(_) => Ok(()),
            // nobody listening yet
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
