use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use reqwest::{redirect::Policy, Client};
use tracing::{info, instrument, trace};

use crate::{
    port::{PortPatch, PortRecord, PortState, Protocol},
    probe::{
        framework::{
            PortToAnalyze, ProbeLayer, Rule, RuleClosure, RuleError, RuleId, RuleResult,
        },
        outcome::{log_failure, ProbeFailure, ProbeOutcome},
        rules::tls::TlsConnectProbe,
    },
};

/// What an HTTP detection attempt told us.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HttpClassification {
    /// Did the peer answer with an HTTP status line
    pub http: bool,
    /// Was the peer there to answer at all.  `None` when we can't tell.
    pub reachable: Option<bool>,
}

/// Classify the outcome of one HTTP exchange.
pub fn classify_http(outcome: &ProbeOutcome<String>) -> HttpClassification {
    match outcome {
        Ok(_) => HttpClassification {
            http: true,
            reachable: Some(true),
        },
        Err(ProbeFailure::ProtocolMismatch(_)) => HttpClassification {
            http: false,
            reachable: Some(true),
        },
        Err(ProbeFailure::Refused) => HttpClassification {
            http: false,
            reachable: Some(false),
        },
        Err(ProbeFailure::Reset) | Err(ProbeFailure::Timeout) | Err(ProbeFailure::Unknown(_)) => {
            HttpClassification {
                http: false,
                reachable: None,
            }
        }
    }
}

/// The record changes implied by a plain attempt and, when the port speaks
/// TLS, an attempt over TLS.  Nothing changes unless one of them found HTTP.
pub fn http_patch(
    plain: &HttpClassification,
    tls: Option<&HttpClassification>,
) -> Option<PortPatch> {
    if plain.http {
        Some(PortPatch {
            service: Some("http".to_string()),
            plain: Some(true),
            ..Default::default()
        })
    } else if tls.map(|tls| tls.http).unwrap_or(false) {
        Some(PortPatch {
            service: Some("http".to_string()),
            plain: Some(false),
            ..Default::default()
        })
    } else {
        None
    }
}

/// The root URL of a port.  IPv6 literals are bracketed so the authority,
/// and with it the Host header, stays valid.
pub(crate) fn probe_url(hostname: &str, port: u16, ssl: bool) -> String {
    let scheme = if ssl { "https" } else { "http" };
    match hostname.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("{scheme}://[{ip}]:{port}/"),
        _ => format!("{scheme}://{hostname}:{port}/"),
    }
}

/// A client that talks to `addr` whatever `hostname` resolves to, doesn't
/// care about certificates and doesn't follow redirects.
fn http_client(
    addr: SocketAddr,
    hostname: &str,
    probe_timeout: Duration,
) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .danger_accept_invalid_certs(true)
        .redirect(Policy::none())
        .no_proxy()
        .timeout(probe_timeout);
    if hostname.parse::<IpAddr>().is_err() {
        builder = builder.resolve(hostname, addr);
    }
    builder.build()
}

/// Send a `HEAD /` and return the status line.
pub(crate) async fn http_exchange(
    addr: SocketAddr,
    hostname: &str,
    ssl: bool,
    probe_timeout: Duration,
) -> ProbeOutcome<String> {
    let response = http_client(addr, hostname, probe_timeout)?
        .head(probe_url(hostname, addr.port(), ssl))
        .send()
        .await?;
    let status_line = format!("{:?} {}", response.version(), response.status());
    trace!("{} answered with {}", addr, status_line);
    Ok(status_line)
}

/// Asks the port for `HEAD /` in plain text and, if it speaks TLS, over TLS
/// too.  Any HTTP response counts, only its status line is kept.
#[derive(Clone, Debug)]
pub struct HttpDetectionProbe {}

impl HttpDetectionProbe {
    /// Basic constructor for [`HttpDetectionProbe`]
    pub fn new() -> Box<dyn Rule> {
        Box::new(HttpDetectionProbe {})
    }
}

impl Rule for HttpDetectionProbe {
    fn dependencies(&self) -> Vec<RuleId> {
        vec![RuleId::new::<TlsConnectProbe>()]
    }

    fn layer(&self) -> ProbeLayer {
        ProbeLayer::HttpDetection
    }

    fn applies_to(&self, record: &PortRecord) -> bool {
        record.protocol == Protocol::Tcp && record.state == PortState::Open
    }

    #[instrument(level = "trace", skip(self))]
    fn get_execution_method(&self) -> RuleClosure {
        async fn attempt(
            target: &PortToAnalyze,
            ssl: bool,
        ) -> Result<HttpClassification, RuleError> {
            let subject = target.subject();
            let hostname = target.get_hostname();
            let url = probe_url(&hostname, target.key().number, ssl);
            let outcome = {
                let _permit = target.wait_for_clearance().await?;
                http_exchange(
                    target.get_socket_addr(),
                    &hostname,
                    ssl,
                    target.probe_timeout(),
                )
                .await
            };
            let transport = if ssl { "HTTP over TLS" } else { "HTTP" };
            let data = match &outcome {
                Ok(status) => {
                    info!("{} speaks {}: {}", subject, transport, status);
                    status.clone()
                }
                Err(failure) => {
                    log_failure(transport, &subject, failure);
                    failure.to_string()
                }
            };
            target
                .evidence()
                .create_evidence(&subject, &format!("HEAD {url}"), &data);
            Ok(classify_http(&outcome))
        }

        async fn exec(target: Arc<PortToAnalyze>) -> Result<Box<dyn RuleResult>, RuleError> {
            let record = target
                .record()
                .await
                .ok_or_else(|| RuleError::InternalRuleError("port record vanished".into()))?;
            let plain = attempt(&target, false).await?;
            let tls = if record.ssl {
                Some(attempt(&target, true).await?)
            } else {
                None
            };
            Ok(Box::new(HttpDetectionProbeResult { plain, tls }))
        }
        Box::new(move |target: Arc<PortToAnalyze>| Box::pin(exec(target)))
    }
}

/// The results of the rule [`HttpDetectionProbe`]
#[derive(Debug, Clone)]
pub struct HttpDetectionProbeResult {
    /// The attempt without TLS
    pub plain: HttpClassification,
    /// The attempt over TLS, made only when the port speaks TLS
    pub tls: Option<HttpClassification>,
}

impl RuleResult for HttpDetectionProbeResult {
    fn get_rule_id(&self) -> RuleId {
        RuleId::new::<HttpDetectionProbe>()
    }

    fn port_patch(&self) -> Option<PortPatch> {
        http_patch(&self.plain, self.tls.as_ref())
    }
}
