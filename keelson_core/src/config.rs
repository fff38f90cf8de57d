use std::{
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    evidence::{EvidenceSink, LoggingEvidenceSink},
    host::Host,
    probe::{
        framework::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_PROBE_TIMEOUT},
        ProbeLayer,
    },
    reconcile::ImportMode,
    target::Target,
};

/// A [builder pattern](https://en.wikipedia.org/wiki/Builder_pattern) implementation to set all
/// parameters for a probe run.
#[derive(Clone)]
pub struct ConfigBuilder {
    pub(crate) targets: Vec<Target>,
    pub(crate) ports: Vec<u16>,
    pub(crate) known_hosts: Vec<Host>,
    pub(crate) scan_output: Option<(PathBuf, ImportMode)>,
    pub(crate) layers: Vec<ProbeLayer>,
    pub(crate) probe_timeout: Duration,
    pub(crate) tracing: bool,
    pub(crate) throttle_range: Option<Range<u64>>,
    pub(crate) max_in_flight: u32,
    pub(crate) evidence: Arc<dyn EvidenceSink>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            targets: vec![],
            ports: vec![],
            known_hosts: vec![],
            scan_output: None,
            layers: ProbeLayer::ALL.to_vec(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            tracing: false,
            throttle_range: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            evidence: Arc::new(LoggingEvidenceSink::default()),
        }
    }
}

impl ConfigBuilder {
    /// Add a target to the list of potential targets held in the builder.
    pub fn add_target(&mut self, target: Target) {
        self.targets.push(target)
    }

    /// Replace the list of TCP ports seeded on every target.  Seeded ports
    /// are probed even if nothing else ever mentioned them.
    pub fn set_port_list(&mut self, ports: Vec<u16>) {
        self.ports = ports;
    }

    /// Start from what an earlier run already knew about a host.  Targets
    /// resolving to its IP pick it up instead of starting empty.
    pub fn add_known_host(&mut self, host: Host) {
        self.known_hosts.retain(|known| known.ip != host.ip);
        self.known_hosts.push(host);
    }

    /// Import every scanner output file in `dir` before probing.
    /// [`ImportMode::Replace`] throws away what the host knew about its ports,
    /// [`ImportMode::Merge`] folds the files into it.
    pub fn set_scan_output(&mut self, dir: impl AsRef<Path>, mode: ImportMode) {
        self.scan_output = Some((dir.as_ref().to_path_buf(), mode));
    }

    /// Pick which probe layers run.  A layer whose upstream layer isn't
    /// picked works from whatever the port record already says.
    pub fn set_layers(&mut self, layers: Vec<ProbeLayer>) {
        self.layers = layers;
    }

    /// Set the deadline for each individual probe exchange.
    pub fn set_probe_timeout(&mut self, probe_timeout: Duration) {
        self.probe_timeout = probe_timeout;
    }

    /// Enable or disable extremely detailed internal logging.  This is only
    /// useful for internal development.
    pub fn set_tracing(&mut self, tracing: bool) {
        self.tracing = tracing;
    }

    /// Set a range to use when generating random pauses before each request.
    /// The values are in milliseconds.
    pub fn set_throttle(&mut self, throttle_range: Range<u64>) {
        self.throttle_range = Some(throttle_range);
    }

    /// Clear any previously set throttle.
    pub fn clear_throttle(&mut self) {
        self.throttle_range = None;
    }

    /// Set the maximum number of requests in flight across the whole run.
    /// This is useful for limiting resource utilization.
    pub fn set_max_in_flight(&mut self, max_in_flight: u32) {
        self.max_in_flight = max_in_flight;
    }

    /// Send evidence and findings somewhere other than the log.
    pub fn set_evidence_sink(&mut self, evidence: Arc<dyn EvidenceSink>) {
        self.evidence = evidence;
    }
}
