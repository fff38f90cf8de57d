//! The canonical per-port record and the rules for merging updates into it.
//! Everything here is pure.  Records only ever change through [`merge`] so
//! the precedence between scan imports and live probes lives in one place.

use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    str::FromStr,
};

/// Transport protocol of a port.  The declaration order is the presentation
/// order, TCP before UDP.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Protocol {
    /// Transmission Control Protocol
    Tcp,
    /// User Datagram Protocol
    Udp,
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unsupported protocol {other}")),
        }
    }
}

/// What we currently believe about a port.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PortState {
    /// Something accepted a connection, or a scanner reported it open.
    Open,
    /// The peer actively rejected us.
    Closed,
    /// Nothing conclusive yet.  Scanner states like `filtered` land here, as
    /// do probes that timed out before a TCP connection was established.
    Unknown,
}

impl PortState {
    /// Map a scanner's state string.  Anything that isn't plainly open or
    /// closed is unknown to us.
    pub fn from_scanner(state: &str) -> Self {
        match state {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            _ => PortState::Unknown,
        }
    }
}

impl Display for PortState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => f.write_str("open"),
            PortState::Closed => f.write_str("closed"),
            PortState::Unknown => f.write_str("unknown"),
        }
    }
}

/// Where a value in a [`PortRecord`] came from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Source {
    /// Parsed out of an external scanner's structured or free text output.
    ScanImport,
    /// Observed directly by one of our probes.
    LiveProbe,
}

/// The unique key of a port on a host.  Ordering is protocol first, then
/// number.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PortKey {
    /// The transport protocol
    pub protocol: Protocol,
    /// The port number
    pub number: u16,
}

impl PortKey {
    /// Simple constructor for [`PortKey`]
    pub fn new(protocol: Protocol, number: u16) -> Self {
        Self { protocol, number }
    }

    /// Shorthand for a TCP port
    pub fn tcp(number: u16) -> Self {
        Self::new(Protocol::Tcp, number)
    }

    /// Shorthand for a UDP port
    pub fn udp(number: u16) -> Self {
        Self::new(Protocol::Udp, number)
    }
}

impl Display for PortKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// Which source last wrote each field of a [`PortRecord`].  `None` means the
/// field still holds its initial value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Provenance {
    /// Source of [`PortRecord::state`]
    pub state: Option<Source>,
    /// Source of [`PortRecord::service`]
    pub service: Option<Source>,
    /// Source of [`PortRecord::version`]
    pub version: Option<Source>,
    /// Source of [`PortRecord::ssl`]
    pub ssl: Option<Source>,
    /// Source of [`PortRecord::plain`]
    pub plain: Option<Source>,
}

/// The canonical record of everything we know about one port.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortRecord {
    /// Transport protocol
    pub protocol: Protocol,
    /// Port number
    pub number: u16,
    /// Open, closed or unknown
    pub state: PortState,
    /// Service name, for example "http" or "ssh"
    pub service: Option<String>,
    /// Product and version string as reported by a service scan
    pub version: Option<String>,
    /// Does the port speak TLS
    pub ssl: bool,
    /// Does the port speak unencrypted HTTP directly.  `None` until an HTTP
    /// probe has had a say.
    pub plain: Option<bool>,
    /// Who set what
    pub provenance: Provenance,
}

impl PortRecord {
    /// A freshly observed port we know nothing about yet.
    pub fn new(key: PortKey) -> Self {
        Self {
            protocol: key.protocol,
            number: key.number,
            state: PortState::Unknown,
            service: None,
            version: None,
            ssl: false,
            plain: None,
            provenance: Provenance::default(),
        }
    }

    /// The key this record is stored under
    pub fn key(&self) -> PortKey {
        PortKey::new(self.protocol, self.number)
    }

    /// True if the record's version came from a service scan
    pub fn has_scanned_version(&self) -> bool {
        self.version.is_some() && self.provenance.version == Some(Source::ScanImport)
    }
}

/// A set of changes to apply to a [`PortRecord`].  Fields left as `None` are
/// not touched by live probes.  Scan imports describe the whole scanner view
/// of a port, so for them a missing service or version clears the field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PortPatch {
    /// New state
    pub state: Option<PortState>,
    /// New service name
    pub service: Option<String>,
    /// New version string
    pub version: Option<String>,
    /// New TLS flag
    pub ssl: Option<bool>,
    /// New plain HTTP flag
    pub plain: Option<bool>,
}

impl From<&PortRecord> for PortPatch {
    fn from(record: &PortRecord) -> Self {
        Self {
            state: Some(record.state),
            service: record.service.clone(),
            version: record.version.clone(),
            ssl: None,
            plain: None,
        }
    }
}

/// Apply `incoming` on top of `existing`, returning the new record.
///
/// A scan import without a version never replaces a record holding a
/// scanned version; service scan output is strictly more informative than a
/// bare open/closed line.  Live probes never touch the version.
pub fn merge(existing: &PortRecord, incoming: &PortPatch, source: Source) -> PortRecord {
    let mut merged = existing.clone();
    match source {
        Source::ScanImport => {
            if incoming.version.is_none() && existing.has_scanned_version() {
                return merged;
            }
            if let Some(state) = incoming.state {
                merged.state = state;
                merged.provenance.state = Some(source);
            }
            merged.service = incoming.service.clone();
            merged.provenance.service = Some(source);
            merged.version = incoming.version.clone();
            merged.provenance.version = Some(source);
        }
        Source::LiveProbe => {
            if let Some(state) = incoming.state {
                merged.state = state;
                merged.provenance.state = Some(source);
            }
            if let Some(service) = &incoming.service {
                merged.service = Some(service.clone());
                merged.provenance.service = Some(source);
            }
        }
    }
    if let Some(ssl) = incoming.ssl {
        merged.ssl = ssl;
        merged.provenance.ssl = Some(source);
    }
    if let Some(plain) = incoming.plain {
        merged.plain = Some(plain);
        merged.provenance.plain = Some(source);
    }
    merged
}

/// Presentation order of records: protocol, then number, ascending.
pub fn compare(a: &PortRecord, b: &PortRecord) -> Ordering {
    a.key().cmp(&b.key())
}
