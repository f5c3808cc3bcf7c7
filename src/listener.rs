use crate::error::PimonError;
use crate::registry::{IngestOutcome, Registry};
use crate::stats::{IngestLatency, ListenerStats};
use spdlog::{debug, info, warn};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Larger than any valid record; longer datagrams arrive truncated and are rejected by length.
const RECV_BUFFER: usize = 1024;

/// Result of one blocking receive.
#[derive(Debug)]
pub enum RecvOutcome {
    Datagram { len: usize, from: SocketAddr },
    /// The socket was closed on purpose. Not an error.
    Closed,
    Error(io::Error),
}

/// Owns the UDP socket and feeds decoded records into the registry.
pub struct Listener {
    socket: UdpSocket,
    registry: Arc<Registry>,
    closed: Arc<AtomicBool>,
    stats: Arc<ListenerStats>,
    latency: Option<IngestLatency>,
    report_interval: u64,
}

/// Stops a running [`Listener`] from another thread.
pub struct ListenerCloser {
    socket: UdpSocket,
    wake_addr: SocketAddr,
    closed: Arc<AtomicBool>,
}

impl ListenerCloser {
    /// Marks the socket closed and kicks the blocked receive with an empty datagram.
    ///
    /// Returns `false` when the wake datagram could not be sent; the receive loop then
    /// only exits once some other datagram arrives.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return true;
        }
        match self.socket.send_to(&[], self.wake_addr) {
            Ok(_) => true,
            Err(e) => {
                warn!("[Listener] Failed to wake receive loop: {}", e);
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Listener {
    pub fn bind(addr: SocketAddr, registry: Arc<Registry>) -> Result<Self, PimonError> {
        let socket = UdpSocket::bind(addr).map_err(|source| PimonError::Bind { addr, source })?;
        info!("[Listener] Listening on {}", socket.local_addr().unwrap_or(addr));
        Ok(Self {
            socket,
            registry,
            closed: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ListenerStats::default()),
            latency: None,
            report_interval: 10_000,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PimonError> {
        self.socket.local_addr().map_err(PimonError::Socket)
    }

    pub fn closer(&self) -> Result<ListenerCloser, PimonError> {
        let local = self.local_addr()?;
        let wake_ip = match local.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        Ok(ListenerCloser {
            socket: self.socket.try_clone().map_err(PimonError::Socket)?,
            wake_addr: SocketAddr::new(wake_ip, local.port()),
            closed: self.closed.clone(),
        })
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        self.stats.clone()
    }

    /// Records ingest latency and logs it every `report_interval` accepted datagrams.
    pub fn enable_latency_stats(&mut self, enable: bool, report_interval: u64) {
        self.latency = enable.then(IngestLatency::new);
        self.report_interval = report_interval.max(1);
    }

    /// The per-datagram step: decode, ingest, count. Never fails.
    pub fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let registry = &self.registry;
        let outcome = match self.latency.as_mut() {
            Some(latency) => latency.time(|| registry.ingest_datagram(bytes, from)),
            None => registry.ingest_datagram(bytes, from),
        };

        match outcome {
            IngestOutcome::Accepted(_) => {
                let accepted = self.stats.accepted.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(latency) = &self.latency
                    && accepted.is_multiple_of(self.report_interval)
                {
                    info!("[Listener] Ingest latency: {}", latency.format_stats());
                }
            }
            IngestOutcome::Malformed => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("[Listener] Dropping {}-byte datagram from {}", bytes.len(), from);
            }
            IngestOutcome::RegistryFull => {
                self.stats.dropped_full.fetch_add(1, Ordering::Relaxed);
            }
        }
        outcome
    }

    pub fn recv(&self, buf: &mut [u8]) -> RecvOutcome {
        loop {
            let result = self.socket.recv_from(buf);
            if self.closed.load(Ordering::SeqCst) {
                return RecvOutcome::Closed;
            }
            return match result {
                Ok((len, from)) => RecvOutcome::Datagram { len, from },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => RecvOutcome::Error(e),
            };
        }
    }

    /// Blocks until closed. Transient receive errors are logged and skipped.
    pub fn run(mut self) {
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            match self.recv(&mut buf) {
                RecvOutcome::Datagram { len, from } => {
                    self.handle_datagram(&buf[..len], from);
                }
                RecvOutcome::Closed => break,
                RecvOutcome::Error(e) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("[Listener] Receive failed: {}", e);
                }
            }
        }

        info!("[Listener] Stopped: {}", self.stats.counts());
        if let Some(latency) = &self.latency {
            info!("[Listener] Ingest latency: {}", latency.format_stats());
        }
    }
}
