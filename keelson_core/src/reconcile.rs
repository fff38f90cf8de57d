//! Bringing scan imports and live probes together on one host.

use std::sync::Arc;

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{info, instrument, warn};

use crate::{
    host::{Host, HostStore, TestStatus},
    port::{PortPatch, Source},
    probe::{
        framework::{PortToAnalyze, ProbeSettings},
        get_rules, run_probes_on_port, ProbeLayer,
    },
    scan_output::ScanImport,
    target::TargetInstance,
};

/// How scanner output is folded into what a host already knows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ImportMode {
    /// The output is the complete picture.  Existing ports and banners are
    /// dropped.
    Replace,
    /// The output adds to what we know, for example a later service scan.
    Merge,
}

fn import_matches(host: &Host, import: &ScanImport) -> bool {
    if host.ip != import.target() {
        warn!(
            "Refusing to apply scan output for {} to {}",
            import.target(),
            host.ip
        );
        return false;
    }
    true
}

/// Replace every port the host knows about with the imported set.  The host
/// needs probing again afterwards.
pub fn import_scan_output(host: &mut Host, import: ScanImport) {
    if !import_matches(host, &import) {
        return;
    }
    host.ports.clear();
    host.banners.clear();
    for record in import.into_records() {
        host.ports.insert(record.key(), record);
    }
    host.test_status = TestStatus::NotTested;
}

/// Fold the imported ports into the host, creating the ones it didn't know.
pub fn merge_scan_output(host: &mut Host, import: ScanImport) {
    if !import_matches(host, &import) {
        return;
    }
    for record in import.into_records() {
        host.apply(record.key(), &PortPatch::from(&record), Source::ScanImport);
    }
}

/// Fold scanner output in according to `mode`.
pub fn apply_scan_output(host: &mut Host, import: ScanImport, mode: ImportMode) {
    match mode {
        ImportMode::Replace => import_scan_output(host, import),
        ImportMode::Merge => merge_scan_output(host, import),
    }
}

/// Run the requested layers against every TCP port of `host`.  Ports are
/// probed concurrently, layers within a port one after another.
#[instrument(level = "debug", skip(host, settings), fields(ip = %host.ip))]
pub async fn probe_host(
    instance: TargetInstance,
    host: Host,
    settings: ProbeSettings,
    layers: &[ProbeLayer],
) -> Host {
    let store = Arc::new(HostStore::new(host));
    let futures: FuturesUnordered<_> = store
        .tcp_keys()
        .await
        .into_iter()
        .map(|key| {
            let port =
                PortToAnalyze::new(settings.clone(), instance.clone(), key, store.clone());
            run_probes_on_port(port, get_rules(layers))
        })
        .collect();
    futures.collect::<Vec<()>>().await;

    store
        .update(|host| host.test_status = TestStatus::Tested)
        .await;
    let host = store.snapshot().await;
    info!(
        "Finished probing {}: {} ports, {} hostnames",
        host.ip,
        host.ports.len(),
        host.hostnames.len()
    );
    host
}
