use bytemuck::{Pod, Zeroable};
use std::fmt::{Debug, Display, Formatter};

/// Width of the client id buffer on the wire, terminator included.
pub const CLIENT_ID_LEN: usize = 32;

/// Exact datagram length accepted by the listener.
pub const WIRE_RECORD_SIZE: usize = size_of::<WireRecord>();

/// Datagram body as laid out by the C sender: no framing, no version byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct WireRecord {
    pub client_id: [u8; CLIENT_ID_LEN],
    pub cpu_load: f32,
    pub cpu_temp: f32,
    pub fan_speed: f32,
    pub cpu_mhz: f32,
    pub timestamp: u64,
}

/// Fixed-width client identifier, typically the sender's hostname.
///
/// The last byte is always NUL, so at most `CLIENT_ID_LEN - 1` bytes are meaningful
/// even when the sender filled the whole buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId([u8; CLIENT_ID_LEN]);

impl ClientId {
    pub fn from_bytes(raw: [u8; CLIENT_ID_LEN]) -> Self {
        let mut raw = raw;
        raw[CLIENT_ID_LEN - 1] = 0;
        // Bytes after the first NUL are garbage as far as identity goes.
        if let Some(end) = raw.iter().position(|b| *b == 0) {
            raw[end..].fill(0);
        }
        Self(raw)
    }

    /// Truncates `name` to the longest prefix that fits the buffer.
    pub fn new(name: &str) -> Self {
        let mut raw = [0u8; CLIENT_ID_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(CLIENT_ID_LEN - 1);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self::from_bytes(raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(CLIENT_ID_LEN);
        &self.0[..end]
    }

    pub fn raw(&self) -> [u8; CLIENT_ID_LEN] {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

/// Control characters print as `?`; a rendered id is always one line.
impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text: String = String::from_utf8_lossy(self.as_bytes())
            .chars()
            .map(|c| if c.is_control() { '?' } else { c })
            .collect();
        f.pad(&text)
    }
}

impl Debug for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClientId({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One reading from one client at one instant.
///
/// Negative load, temperature or clock values are the sender's "unavailable" sentinel
/// and are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub client_id: ClientId,
    pub cpu_load: f32,
    pub cpu_temp: f32,
    pub cpu_mhz: f32,
    pub fan_speed: f32,
    /// Seconds since the epoch, sender's clock.
    pub timestamp: u64,
}

impl TelemetryRecord {
    pub fn new(
        client_id: impl Into<ClientId>,
        cpu_load: f32,
        cpu_temp: f32,
        cpu_mhz: f32,
        fan_speed: f32,
        timestamp: u64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            cpu_load,
            cpu_temp,
            cpu_mhz,
            fan_speed,
            timestamp,
        }
    }

    /// Decodes one datagram. Anything but an exact-size body is rejected.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != WIRE_RECORD_SIZE {
            return None;
        }
        let wire: WireRecord = bytemuck::pod_read_unaligned(bytes);
        Some(Self::from(wire))
    }

    pub fn encode(&self) -> [u8; WIRE_RECORD_SIZE] {
        let wire = WireRecord::from(*self);
        let mut out = [0u8; WIRE_RECORD_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&wire));
        out
    }
}

impl From<WireRecord> for TelemetryRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            client_id: ClientId::from_bytes(wire.client_id),
            cpu_load: wire.cpu_load,
            cpu_temp: wire.cpu_temp,
            cpu_mhz: wire.cpu_mhz,
            fan_speed: wire.fan_speed,
            timestamp: wire.timestamp,
        }
    }
}

impl From<TelemetryRecord> for WireRecord {
    fn from(record: TelemetryRecord) -> Self {
        Self {
            client_id: record.client_id.raw(),
            cpu_load: record.cpu_load,
            cpu_temp: record.cpu_temp,
            fan_speed: record.fan_speed,
            cpu_mhz: record.cpu_mhz,
            timestamp: record.timestamp,
        }
    }
}
