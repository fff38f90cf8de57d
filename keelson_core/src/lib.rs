#![warn(missing_docs)]
//! The core of keelson.  It works out what is listening on a host's ports by
//! combining an external port scanner's output with live TCP, TLS and HTTP
//! probes, and folds everything into one record per port.
//!
//! Scanner output is read with [`load_dir`] or [`ScanImport`] and applied to
//! a [`Host`] with [`import_scan_output`] or [`merge_scan_output`].  Live
//! probes run through [`probe_host`] for one host or [`start_probe`] for a
//! whole configured run.

pub use crate::{
    config::ConfigBuilder,
    err::KeelsonErr,
    evidence::{
        Evidence, EvidenceId, EvidenceSink, EvidenceSubject, LoggingEvidenceSink,
        MemoryEvidenceSink, Severity, Vulnerability,
    },
    host::{Host, HostStore, TestStatus},
    port::{
        compare, merge, PortKey, PortPatch, PortRecord, PortState, Protocol, Provenance, Source,
    },
    probe::{
        framework::{
            PortToAnalyze, Rule, RuleClosure, RuleError, RuleId, RuleResult,
            DEFAULT_MAX_IN_FLIGHT, DEFAULT_PROBE_TIMEOUT,
        },
        rules::{
            http::{
                classify_http, http_patch, BannerGrabProbe, BannerGrabProbeResult,
                HttpClassification, HttpDetectionProbe, HttpDetectionProbeResult, BANNER_HEADERS,
                BANNER_REQUESTS,
            },
            tls::{classify_tls, TlsClassification, TlsConnectProbe, TlsConnectProbeResult},
        },
        ProbeFailure, ProbeLayer, ProbeOutcome, ProbeSettings,
    },
    reconcile::{
        apply_scan_output, import_scan_output, merge_scan_output, probe_host, ImportMode,
    },
    report::Report,
    scan::start_probe,
    scan_output::{load_dir, ScanImport, ScanOutput},
    target::{Target, TargetInstance},
};

mod config;
mod err;
mod evidence;
mod host;
mod logging;
mod port;
mod probe;
mod reconcile;
mod report;
mod scan;
mod scan_output;
mod target;
