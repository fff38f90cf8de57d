use std::{net::SocketAddr, sync::Arc, time::Duration};

use nom::{
    bytes::complete::take_while1, character::complete::char, sequence::terminated, IResult,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    time::{timeout_at, Instant},
};
use tracing::{debug, info, instrument};

use crate::{
    evidence::{Severity, Vulnerability},
    port::{PortRecord, Protocol},
    probe::{
        connection::connect,
        framework::{
            PortToAnalyze, ProbeLayer, Rule, RuleClosure, RuleError, RuleId, RuleResult,
        },
        outcome::{log_failure, ProbeOutcome},
        rules::http::detect::{probe_url, HttpDetectionProbe},
    },
};

/// Requests sent to collect banners, in order
pub const BANNER_REQUESTS: &[&str] = &["HEAD / HTTP/1.0\r\n\r\n"];

/// Response headers that give away what software is serving.  Matched
/// without regard to case.
pub const BANNER_HEADERS: &[&str] = &["server", "x-powered-by"];

/// Stop reading after this much.  Headers come first and that's all we want.
const RESPONSE_LIMIT: usize = 64 * 1024;

/// The name of a `Name: value` header line
fn header_name(input: &str) -> IResult<&str, &str> {
    terminated(take_while1(|c: char| c != ':' && !c.is_whitespace()), char(':'))(input)
}

/// The header block of a response, without the blank line ending it.  `None`
/// if the response never ends its headers.
fn header_block(response: &str) -> Option<&str> {
    [response.find("\r\n\r\n"), response.find("\n\n")]
        .into_iter()
        .flatten()
        .min()
        .map(|end| &response[..end])
}

/// Every disclosing header line in `response`, trimmed.  `None` when there
/// is no header block to look at.
pub(crate) fn extract_banners(response: &str) -> Option<Vec<String>> {
    let headers = header_block(response)?;
    Some(
        headers
            .lines()
            .skip(1)
            .filter(|line| match header_name(line) {
                Ok((_, name)) => BANNER_HEADERS
                    .iter()
                    .any(|banner| banner.eq_ignore_ascii_case(name)),
                Err(_) => false,
            })
            .map(|line| line.trim().to_string())
            .collect(),
    )
}

/// Send `request` and read whatever comes back until the peer closes, the
/// response gets too big, or the deadline passes.  What arrived before a late
/// failure is kept.
pub(crate) async fn fetch_response(
    addr: SocketAddr,
    hostname: &str,
    ssl: bool,
    request: &str,
    probe_timeout: Duration,
) -> ProbeOutcome<String> {
    let deadline = Instant::now() + probe_timeout;
    let mut stream = timeout_at(deadline, connect(addr, hostname, ssl)).await??;
    timeout_at(deadline, stream.write_all(request.as_bytes())).await??;

    let mut response = Vec::new();
    let mut buffer = [0u8; 4096];
    while response.len() < RESPONSE_LIMIT {
        match timeout_at(deadline, stream.read(&mut buffer)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(read)) => response.extend_from_slice(&buffer[..read]),
            Ok(Err(e)) if response.is_empty() => return Err(e.into()),
            Err(elapsed) if response.is_empty() => return Err(elapsed.into()),
            Ok(Err(e)) => {
                debug!("Keeping partial response from {}: {}", addr, e);
                break;
            }
            Err(_) => {
                debug!("Deadline hit reading {}, keeping partial response", addr);
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Collects headers that disclose server software from every HTTP transport
/// the port speaks.  Each one is reported as an informational finding.
#[derive(Clone, Debug)]
pub struct BannerGrabProbe {}

impl BannerGrabProbe {
    /// Basic constructor for [`BannerGrabProbe`]
    pub fn new() -> Box<dyn Rule> {
        Box::new(BannerGrabProbe {})
    }
}

impl Rule for BannerGrabProbe {
    fn dependencies(&self) -> Vec<RuleId> {
        vec![RuleId::new::<HttpDetectionProbe>()]
    }

    fn layer(&self) -> ProbeLayer {
        ProbeLayer::BannerGrab
    }

    fn applies_to(&self, record: &PortRecord) -> bool {
        record.protocol == Protocol::Tcp
            && matches!(record.service.as_deref(), Some("http") | Some("https"))
    }

    #[instrument(level = "trace", skip(self))]
    fn get_execution_method(&self) -> RuleClosure {
        async fn grab(
            target: &PortToAnalyze,
            ssl: bool,
            request: &str,
        ) -> Result<Vec<String>, RuleError> {
            let subject = target.subject();
            let hostname = target.get_hostname();
            let url = probe_url(&hostname, target.key().number, ssl);
            let payload = format!("{url}\n\n{request}");
            let response = {
                let _permit = target.wait_for_clearance().await?;
                fetch_response(
                    target.get_socket_addr(),
                    &hostname,
                    ssl,
                    request,
                    target.probe_timeout(),
                )
                .await
            };
            let response = match response {
                Ok(response) => response,
                Err(failure) => {
                    log_failure("Banner grab", &subject, &failure);
                    target
                        .evidence()
                        .create_evidence(&subject, &payload, &failure.to_string());
                    return Ok(Vec::new());
                }
            };
            target
                .evidence()
                .create_evidence(&subject, &payload, &response);
            let banners = match extract_banners(&response) {
                Some(banners) => banners,
                None => {
                    debug!("Response from {} has no end of headers, dropping it", url);
                    return Ok(Vec::new());
                }
            };
            for banner in &banners {
                info!("{} discloses {:?}", url, banner);
                let evidence = target.evidence().create_evidence(&subject, &url, banner);
                target.evidence().register_vulnerability(
                    evidence,
                    Vulnerability {
                        name: "Banner disclosure".to_string(),
                        severity: Severity::Info,
                        description: format!("{subject} identifies its software with {banner:?}"),
                    },
                );
            }
            Ok(banners)
        }

        async fn exec(target: Arc<PortToAnalyze>) -> Result<Box<dyn RuleResult>, RuleError> {
            let record = target
                .record()
                .await
                .ok_or_else(|| RuleError::InternalRuleError("port record vanished".into()))?;
            let mut transports = Vec::new();
            if record.plain == Some(true) {
                transports.push(false);
            }
            if record.ssl {
                transports.push(true);
            }
            let mut banners = Vec::new();
            for request in BANNER_REQUESTS {
                for ssl in &transports {
                    banners.append(&mut grab(&target, *ssl, request).await?);
                }
            }
            Ok(Box::new(BannerGrabProbeResult { banners }))
        }
        Box::new(move |target: Arc<PortToAnalyze>| Box::pin(exec(target)))
    }
}

/// The results of the rule [`BannerGrabProbe`]
#[derive(Debug, Clone)]
pub struct BannerGrabProbeResult {
    /// Disclosing header lines, as sent
    pub banners: Vec<String>,
}

impl RuleResult for BannerGrabProbeResult {
    fn get_rule_id(&self) -> RuleId {
        RuleId::new::<BannerGrabProbe>()
    }

    fn banners(&self) -> Vec<String> {
        self.banners.clone()
    }
}
