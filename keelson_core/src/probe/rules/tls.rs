//! The first layer: connect over TCP and attempt a TLS handshake.  This tells
//! us if the port is reachable at all, if it speaks TLS and, through the
//! certificate, what other names the host goes by.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    net::TcpStream,
    time::{timeout_at, Instant},
};
use tracing::{info, instrument};

use crate::{
    port::{PortPatch, PortRecord, PortState, Protocol},
    probe::{
        connection::{common_name, tls_handshake},
        framework::{
            PortToAnalyze, ProbeLayer, Rule, RuleClosure, RuleError, RuleId, RuleResult,
        },
        outcome::{log_failure, ProbeFailure, ProbeOutcome},
    },
};

/// How a TCP connect and TLS handshake attempt turned out.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsClassification {
    /// Did the handshake complete
    pub ssl: bool,
    /// Is the port reachable over TCP.  `None` when we can't tell.
    pub tcp: Option<bool>,
    /// Subject common name of the certificate presented
    pub common_name: Option<String>,
}

impl TlsClassification {
    /// The port state this classification implies
    pub fn port_state(&self) -> PortState {
        match self.tcp {
            Some(true) => PortState::Open,
            Some(false) => PortState::Closed,
            None => PortState::Unknown,
        }
    }
}

/// Classify the outcome of a TLS probe.  `tcp_established` says if the TCP
/// connect completed before the outcome was decided.
pub fn classify_tls(
    outcome: &ProbeOutcome<Option<String>>,
    tcp_established: bool,
) -> TlsClassification {
    let failed = |tcp| TlsClassification {
        ssl: false,
        tcp,
        common_name: None,
    };
    match outcome {
        Ok(common_name) => TlsClassification {
            ssl: true,
            tcp: Some(true),
            common_name: common_name.clone(),
        },
        Err(ProbeFailure::Timeout) | Err(ProbeFailure::Unknown(_)) => {
            failed(tcp_established.then_some(true))
        }
        Err(ProbeFailure::ProtocolMismatch(_)) | Err(ProbeFailure::Reset) => failed(Some(true)),
        Err(ProbeFailure::Refused) => failed(Some(false)),
    }
}

/// Connect and handshake under one deadline.  Also returns whether the TCP
/// connection had been established.
pub(crate) async fn probe_tls(
    addr: SocketAddr,
    hostname: &str,
    probe_timeout: Duration,
) -> (ProbeOutcome<Option<String>>, bool) {
    let deadline = Instant::now() + probe_timeout;
    let stream = match timeout_at(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return (Err(e.into()), false),
        Err(elapsed) => return (Err(elapsed.into()), false),
    };
    let outcome = match timeout_at(deadline, tls_handshake(stream, hostname)).await {
        Ok(handshake) => handshake.map(|stream| common_name(&stream)),
        Err(elapsed) => Err(elapsed.into()),
    };
    (outcome, true)
}

/// Checks that the port takes TCP connections and if it speaks TLS.  The
/// certificate is not verified.
#[derive(Clone, Debug)]
pub struct TlsConnectProbe {}

impl TlsConnectProbe {
    /// Basic constructor for [`TlsConnectProbe`]
    pub fn new() -> Box<dyn Rule> {
        Box::new(TlsConnectProbe {})
    }
}

impl Rule for TlsConnectProbe {
    fn layer(&self) -> ProbeLayer {
        ProbeLayer::TlsConnect
    }

    fn applies_to(&self, record: &PortRecord) -> bool {
        record.protocol == Protocol::Tcp && record.state != PortState::Closed
    }

    #[instrument(level = "trace", skip(self))]
    fn get_execution_method(&self) -> RuleClosure {
        async fn exec(target: Arc<PortToAnalyze>) -> Result<Box<dyn RuleResult>, RuleError> {
            let subject = target.subject();
            let (outcome, tcp_established) = {
                let _permit = target.wait_for_clearance().await?;
                probe_tls(
                    target.get_socket_addr(),
                    &target.get_hostname(),
                    target.probe_timeout(),
                )
                .await
            };
            let classification = classify_tls(&outcome, tcp_established);
            let data = match &outcome {
                Ok(common_name) => {
                    info!(
                        "{} speaks TLS, certificate names {:?}",
                        subject, common_name
                    );
                    format!("handshake complete, common name {common_name:?}")
                }
                Err(failure) => {
                    log_failure("TLS handshake", &subject, failure);
                    failure.to_string()
                }
            };
            target
                .evidence()
                .create_evidence(&subject, "TCP connect and TLS handshake", &data);
            Ok(Box::new(TlsConnectProbeResult { classification }))
        }
        Box::new(move |target: Arc<PortToAnalyze>| Box::pin(exec(target)))
    }
}

/// The results of the rule [`TlsConnectProbe`]
#[derive(Debug, Clone)]
pub struct TlsConnectProbeResult {
    /// What the attempt told us
    pub classification: TlsClassification,
}

impl RuleResult for TlsConnectProbeResult {
    fn get_rule_id(&self) -> RuleId {
        RuleId::new::<TlsConnectProbe>()
    }

    fn port_patch(&self) -> Option<PortPatch> {
        Some(PortPatch {
            state: Some(self.classification.port_state()),
            ssl: Some(self.classification.ssl),
            ..Default::default()
        })
    }

    fn discovered_hostname(&self) -> Option<String> {
        self.classification.common_name.clone()
    }
}
