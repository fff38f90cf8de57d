//! A host and everything discovered about it.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::IpAddr,
};

use tokio::sync::RwLock;
use tracing::debug;

use crate::port::{merge, PortKey, PortPatch, PortRecord, Protocol, Source};

/// Whether the probe layers have been run against the host's current port
/// set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// The port set changed since the last probe run, or was never probed.
    NotTested,
    /// Every probe layer ran against the current port set.
    Tested,
}

/// One host, identified by its IP.
#[derive(Clone, Debug)]
pub struct Host {
    /// The address of the host
    pub ip: IpAddr,
    /// Every port we know about, ordered by protocol then number
    pub ports: BTreeMap<PortKey, PortRecord>,
    /// Names taken from TLS certificate common names
    pub hostnames: BTreeSet<String>,
    /// Banner lines disclosed by each port
    pub banners: BTreeMap<PortKey, BTreeSet<String>>,
    /// Does the host need another probe run
    pub test_status: TestStatus,
}

impl Host {
    /// A host with nothing discovered yet
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            ports: BTreeMap::new(),
            hostnames: BTreeSet::new(),
            banners: BTreeMap::new(),
            test_status: TestStatus::NotTested,
        }
    }

    /// Records in presentation order
    pub fn records(&self) -> Vec<&PortRecord> {
        self.ports.values().collect()
    }

    /// Fetch one record
    pub fn port(&self, key: PortKey) -> Option<&PortRecord> {
        self.ports.get(&key)
    }

    /// Keys of every known TCP port
    pub fn tcp_keys(&self) -> Vec<PortKey> {
        self.ports
            .keys()
            .filter(|key| key.protocol == Protocol::Tcp)
            .copied()
            .collect()
    }

    /// Make sure a record exists for `key` without changing an existing one.
    pub fn observe(&mut self, key: PortKey) -> &PortRecord {
        self.ports.entry(key).or_insert_with(|| PortRecord::new(key))
    }

    /// Create or update the record for `key` through [`merge`].
    pub fn apply(&mut self, key: PortKey, patch: &PortPatch, source: Source) -> &PortRecord {
        let record = self.ports.entry(key).or_insert_with(|| PortRecord::new(key));
        *record = merge(record, patch, source);
        record
    }

    /// Record a certificate common name.  Returns false if it was already
    /// known.
    pub fn add_hostname(&mut self, name: &str) -> bool {
        let created = self.hostnames.insert(name.to_string());
        if created {
            debug!("New hostname {} for {}", name, self.ip);
        }
        created
    }

    /// Record a banner disclosed by a port.  Returns false if it was already
    /// known.
    pub fn add_banner(&mut self, key: PortKey, banner: &str) -> bool {
        self.banners
            .entry(key)
            .or_default()
            .insert(banner.to_string())
    }
}

/// Shared, lockable home of a [`Host`] while its ports are probed
/// concurrently.  Every update is a read, merge and write inside one write
/// lock so two layers touching the same port can't lose each other's
/// changes.
#[derive(Debug)]
pub struct HostStore {
    host: RwLock<Host>,
}

impl HostStore {
    /// Wrap a host
    pub fn new(host: Host) -> Self {
        Self {
            host: RwLock::new(host),
        }
    }

    /// A copy of the current record for `key`
    pub async fn port(&self, key: PortKey) -> Option<PortRecord> {
        self.host.read().await.port(key).cloned()
    }

    /// Keys of every known TCP port
    pub async fn tcp_keys(&self) -> Vec<PortKey> {
        self.host.read().await.tcp_keys()
    }

    /// Run `f` with exclusive access to the host.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Host) -> R) -> R {
        let mut host = self.host.write().await;
        f(&mut host)
    }

    /// A copy of the whole host
    pub async fn snapshot(&self) -> Host {
        self.host.read().await.clone()
    }
}
