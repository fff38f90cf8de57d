//! The contract for reporting what probes sent and saw.  Storing evidence and
//! tracking vulnerabilities is somebody else's job; we only hand things over.

use std::{
    fmt::{Display, Formatter},
    net::IpAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use tracing::{debug, info};

use crate::port::PortKey;

/// What a piece of evidence is about.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EvidenceSubject {
    /// The host as a whole, for example a name it goes by
    Host(IpAddr),
    /// One port on a host
    Port {
        /// The host
        ip: IpAddr,
        /// The port
        key: PortKey,
    },
}

impl Display for EvidenceSubject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceSubject::Host(ip) => ip.fmt(f),
            EvidenceSubject::Port { ip, key } => write!(f, "{ip} {key}"),
        }
    }
}

/// Handle returned by a sink for a stored piece of evidence.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct EvidenceId(pub u64);

/// How bad a finding is.  Everything these probes can find is disclosure,
/// so there is only the one level for now.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Worth knowing, not a problem on its own
    Info,
}

/// A finding backed by a piece of evidence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vulnerability {
    /// Short name of the finding
    pub name: String,
    /// How bad it is
    pub severity: Severity,
    /// Human readable explanation
    pub description: String,
}

/// Receives evidence and findings as probes produce them.  Implementations
/// are called from many probe tasks at once.
pub trait EvidenceSink: Send + Sync {
    /// Store what was sent (`payload`) and what came back (`data`).
    fn create_evidence(&self, subject: &EvidenceSubject, payload: &str, data: &str) -> EvidenceId;

    /// Register a finding backed by earlier evidence.
    fn register_vulnerability(&self, evidence: EvidenceId, vulnerability: Vulnerability);
}

/// The default sink.  It only emits tracing events.
#[derive(Debug, Default)]
pub struct LoggingEvidenceSink {
    next_id: AtomicU64,
}

impl EvidenceSink for LoggingEvidenceSink {
    fn create_evidence(&self, subject: &EvidenceSubject, payload: &str, data: &str) -> EvidenceId {
        let id = EvidenceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            "Evidence {:?} for {}: sent {:?}, received {:?}",
            id, subject, payload, data
        );
        id
    }

    fn register_vulnerability(&self, evidence: EvidenceId, vulnerability: Vulnerability) {
        info!(
            "{:?} finding \"{}\" backed by {:?}: {}",
            vulnerability.severity, vulnerability.name, evidence, vulnerability.description
        );
    }
}

/// One stored piece of evidence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Evidence {
    /// Handle of this evidence
    pub id: EvidenceId,
    /// What it's about
    pub subject: EvidenceSubject,
    /// What we sent
    pub payload: String,
    /// What we got back
    pub data: String,
}

/// Keeps everything in memory.  Handy for callers that persist at the end of
/// a run, and for tests.
#[derive(Debug, Default)]
pub struct MemoryEvidenceSink {
    evidence: Mutex<Vec<Evidence>>,
    vulnerabilities: Mutex<Vec<(EvidenceId, Vulnerability)>>,
}

impl MemoryEvidenceSink {
    /// Everything stored so far
    pub fn evidence(&self) -> Vec<Evidence> {
        match self.evidence.lock() {
            Ok(evidence) => evidence.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Every finding registered so far
    pub fn vulnerabilities(&self) -> Vec<(EvidenceId, Vulnerability)> {
        match self.vulnerabilities.lock() {
            Ok(vulnerabilities) => vulnerabilities.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EvidenceSink for MemoryEvidenceSink {
    fn create_evidence(&self, subject: &EvidenceSubject, payload: &str, data: &str) -> EvidenceId {
        let mut evidence = match self.evidence.lock() {
            Ok(evidence) => evidence,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = EvidenceId(evidence.len() as u64);
        evidence.push(Evidence {
            id,
            subject: subject.clone(),
            payload: payload.to_string(),
            data: data.to_string(),
        });
        id
    }

    fn register_vulnerability(&self, evidence: EvidenceId, vulnerability: Vulnerability) {
        let mut vulnerabilities = match self.vulnerabilities.lock() {
            Ok(vulnerabilities) => vulnerabilities,
            Err(poisoned) => poisoned.into_inner(),
        };
        vulnerabilities.push((evidence, vulnerability));
    }
}
