use std::{net::IpAddr, sync::Arc};

use futures::{stream, stream::FuturesUnordered, Stream, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, trace, Level};

use crate::{
    host::Host,
    logging::setup_tracing,
    port::PortKey,
    probe::ProbeSettings,
    reconcile::{apply_scan_output, probe_host, ImportMode},
    scan_output::{ScanImport, ScanOutput},
    target::{targets_to_instances, TargetInstance},
    ConfigBuilder, KeelsonErr, Report,
};

/// Scanner output read for a run, with how to apply it
type RunScanOutput = Option<(ScanOutput, ImportMode)>;

/// Everything known about `ip` before any probe runs: the configured known
/// host, then scanner output, then the seed ports.
fn seed_host(ip: IpAddr, config: &ConfigBuilder, scan_output: &RunScanOutput) -> Host {
    let mut host = config
        .known_hosts
        .iter()
        .find(|known| known.ip == ip)
        .cloned()
        .unwrap_or_else(|| Host::new(ip));
    if let Some((output, mode)) = scan_output {
        let mut import = ScanImport::new(ip).with_evidence(config.evidence.clone());
        output.parse_into(&mut import);
        debug!("Applying {} imported ports to {} ({:?})", import.len(), ip, mode);
        apply_scan_output(&mut host, import, *mode);
    }
    for port in &config.ports {
        host.observe(PortKey::tcp(*port));
    }
    host
}

async fn probe_instance(
    instance: TargetInstance,
    config: Arc<ConfigBuilder>,
    scan_output: Arc<RunScanOutput>,
    settings: ProbeSettings,
) -> Report {
    let ip = instance.get_ip();
    let host = seed_host(ip, &config, &scan_output);
    let host = probe_host(instance.clone(), host, settings, &config.layers).await;
    Report {
        target: instance.into(),
        instance: Some(ip),
        contents: Ok(host),
    }
}

/// The entry point to kick off a probe run.  It will return a stream with one
/// report per target instance, in the order they finish.  Targets that
/// couldn't be resolved are reported first.  Configured scanner output is
/// read once, up front; a directory that can't be listed fails the run.
pub async fn start_probe(
    config_builder: ConfigBuilder,
) -> Result<impl Stream<Item = Report>, KeelsonErr> {
    if config_builder.tracing {
        setup_tracing(Level::TRACE)
    }
    if config_builder.max_in_flight == 0 {
        return Err(KeelsonErr::InvalidConfig(
            "at least one request must be allowed in flight".to_string(),
        ));
    }
    if config_builder.probe_timeout.is_zero() {
        return Err(KeelsonErr::InvalidConfig(
            "the probe timeout must be longer than zero".to_string(),
        ));
    }
    let scan_output = match &config_builder.scan_output {
        Some((dir, mode)) => Some((ScanOutput::read_dir(dir).await?, *mode)),
        None => None,
    };
    let settings = ProbeSettings::new(
        Arc::new(Semaphore::new(config_builder.max_in_flight as usize)),
        config_builder.throttle_range.clone(),
        config_builder.probe_timeout,
        config_builder.evidence.clone(),
    );
    let (instances, failed) = targets_to_instances(config_builder.targets.clone()).await;
    trace!(
        "{} instances to probe, {} targets failed to resolve",
        instances.len(),
        failed.len()
    );

    let config = Arc::new(config_builder);
    let scan_output = Arc::new(scan_output);
    let results: FuturesUnordered<_> = instances
        .into_iter()
        .map(|instance| {
            probe_instance(
                instance,
                config.clone(),
                scan_output.clone(),
                settings.clone(),
            )
        })
        .collect();

    Ok(stream::iter(failed).chain(results).boxed())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::{
        evidence::MemoryEvidenceSink,
        port::{PortPatch, PortState, Source},
        probe::{
            test_support::{plain_server, refused_addr},
            ProbeLayer,
        },
        target::Target,
        TestStatus,
    };

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[tokio::test]
    async fn zero_in_flight_is_rejected() {
        let mut config = ConfigBuilder::default();
        config.set_max_in_flight(0);
        assert!(matches!(
            start_probe(config).await.err(),
            Some(KeelsonErr::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn seed_ports_are_probed() {
        let addr = plain_server(b"HTTP/1.0 200 OK\r\nServer: SimpleHTTP/0.6\r\n\r\n").await;
        let sink = Arc::new(MemoryEvidenceSink::default());
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.set_port_list(vec![addr.port()]);
        config.set_probe_timeout(Duration::from_secs(5));
        config.set_evidence_sink(sink.clone());

        let reports: Vec<Report> = start_probe(config).await.unwrap().collect().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].instance, Some(localhost()));
        let host = reports[0].contents.as_ref().unwrap();
        let record = host.port(PortKey::tcp(addr.port())).unwrap();
        assert_eq!(record.state, PortState::Open);
        assert!(!record.ssl);
        assert_eq!(record.plain, Some(true));
        assert_eq!(record.service.as_deref(), Some("http"));
        assert_eq!(host.test_status, TestStatus::Tested);
        assert!(!sink.evidence().is_empty());
    }

    #[tokio::test]
    async fn known_hosts_are_the_starting_point() {
        let mut known = Host::new(localhost());
        known.add_hostname("intranet.example");
        known.apply(
            PortKey::udp(53),
            &PortPatch {
                state: Some(PortState::Open),
                ..Default::default()
            },
            Source::ScanImport,
        );
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.add_known_host(known);
        config.set_layers(vec![]);

        let reports: Vec<Report> = start_probe(config).await.unwrap().collect().await;
        let host = reports[0].contents.as_ref().unwrap();
        assert!(host.hostnames.contains("intranet.example"));
        assert_eq!(host.port(PortKey::udp(53)).unwrap().state, PortState::Open);
    }

    #[tokio::test]
    async fn unreadable_scan_output_fails_the_run() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let missing = std::env::temp_dir().join(format!("keelson-missing-{nanos}"));
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.set_scan_output(&missing, ImportMode::Merge);
        config.set_layers(vec![ProbeLayer::TlsConnect]);

        assert!(matches!(
            start_probe(config).await.err(),
            Some(KeelsonErr::ScanOutputDir { .. })
        ));
    }

    #[tokio::test]
    async fn scan_output_is_shared_between_instances() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("keelson-shared-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("console.txt"),
            "Nmap scan report for 127.0.0.1\n22/tcp open ssh\nNmap scan report for 127.0.0.2\n3306/tcp open mysql\n",
        )
        .unwrap();
        let sink = Arc::new(MemoryEvidenceSink::default());
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.add_target(Target::IP("127.0.0.2".parse().unwrap()));
        config.set_scan_output(&dir, ImportMode::Merge);
        config.set_layers(vec![]);
        config.set_evidence_sink(sink.clone());

        let reports: Vec<Report> = start_probe(config).await.unwrap().collect().await;
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(reports.len(), 2);
        for report in &reports {
            let host = report.contents.as_ref().unwrap();
            let expected = if host.ip == localhost() {
                PortKey::tcp(22)
            } else {
                PortKey::tcp(3306)
            };
            let keys: Vec<PortKey> = host.records().iter().map(|record| record.key()).collect();
            assert_eq!(keys, vec![expected]);
        }
        assert_eq!(sink.evidence().len(), 2);
    }

    #[tokio::test]
    async fn throttle_delays_every_request() {
        let addr = refused_addr().await;
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.set_port_list(vec![addr.port()]);
        config.set_layers(vec![ProbeLayer::TlsConnect]);
        config.set_throttle(50..60);

        let start = Instant::now();
        let reports: Vec<Report> = start_probe(config).await.unwrap().collect().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        let host = reports[0].contents.as_ref().unwrap();
        assert_eq!(
            host.port(PortKey::tcp(addr.port())).unwrap().state,
            PortState::Closed
        );
    }

    #[tokio::test]
    async fn unresolved_targets_come_first() {
        let mut config = ConfigBuilder::default();
        config.add_target(Target::IP(localhost()));
        config.add_target(Target::Hostname("does-not-exist.invalid".to_string()));
        config.set_layers(vec![]);

        let reports: Vec<Report> = start_probe(config).await.unwrap().collect().await;
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].instance, None);
        assert!(reports[1].contents.is_ok());
    }
}
