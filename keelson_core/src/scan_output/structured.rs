//! Structured scanner output, nmap's XML report.  Only the parts we need are
//! modelled; every other element and attribute is ignored.

use std::{fmt, net::IpAddr};

use quick_xml::{escape::escape, DeError};
use serde::Deserialize;
use tracing::debug;

use crate::{
    port::{PortKey, PortPatch, PortState, Protocol},
    scan_output::{parse_port_number, ScanEntry},
};

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    #[serde(default)]
    ports: Option<Ports>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: String,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    ports: Vec<Port>,
}

// Numbers and protocols stay strings here so one bad entry can be skipped
// without failing the whole document.
#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@protocol")]
    protocol: String,
    #[serde(rename = "@portid")]
    portid: String,
    state: Option<State>,
    service: Option<Service>,
}

#[derive(Debug, Deserialize)]
struct State {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: Option<String>,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
    #[serde(rename = "@extrainfo")]
    extrainfo: Option<String>,
}

impl Host {
    fn has_address(&self, target: IpAddr) -> bool {
        self.addresses.iter().any(|address| {
            address
                .addr
                .parse::<IpAddr>()
                .map(|ip| ip == target)
                .unwrap_or(false)
        })
    }
}

impl Port {
    fn entry(&self) -> Result<(PortKey, PortPatch), String> {
        let protocol = self.protocol.parse::<Protocol>()?;
        let number = parse_port_number(&self.portid)?;
        let state = self
            .state
            .as_ref()
            .map(|state| PortState::from_scanner(&state.state))
            .unwrap_or(PortState::Unknown);
        Ok((
            PortKey::new(protocol, number),
            PortPatch {
                state: Some(state),
                service: self.service.as_ref().and_then(|s| s.name.clone()),
                version: self.service.as_ref().and_then(compose_version),
                ..Default::default()
            },
        ))
    }
}

/// The entry written back out as XML, keeping only what was modelled.
impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"<port protocol="{}" portid="{}">"#,
            escape(&self.protocol),
            escape(&self.portid)
        )?;
        if let Some(state) = &self.state {
            write!(f, r#"<state state="{}"/>"#, escape(&state.state))?;
        }
        if let Some(service) = &self.service {
            f.write_str("<service")?;
            for (name, value) in [
                ("name", &service.name),
                ("product", &service.product),
                ("version", &service.version),
                ("extrainfo", &service.extrainfo),
            ] {
                if let Some(value) = value {
                    write!(f, r#" {}="{}""#, name, escape(value))?;
                }
            }
            f.write_str("/>")?;
        }
        f.write_str("</port>")
    }
}

/// `product version (extrainfo)`, leaving out whatever is missing.  Nothing
/// at all gives `None` so the entry doesn't count as a versioned one.
fn compose_version(service: &Service) -> Option<String> {
    let mut version = [service.product.as_deref(), service.version.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if let Some(extra) = service.extrainfo.as_deref().filter(|e| !e.is_empty()) {
        if !version.is_empty() {
            version.push(' ');
        }
        version.push_str(&format!("({extra})"));
    }
    if version.is_empty() {
        None
    } else {
        Some(version)
    }
}

/// Pull every port entry for `target` out of an XML report, in document
/// order, each with the `<port>` element it came from.  A document that
/// doesn't deserialize contributes nothing.
pub(super) fn parse(bytes: &[u8], target: IpAddr) -> Result<Vec<ScanEntry>, DeError> {
    let run: NmapRun = quick_xml::de::from_reader(bytes)?;
    let mut entries = Vec::new();
    for host in run.hosts.iter().filter(|host| host.has_address(target)) {
        for port in host.ports.iter().flat_map(|ports| ports.ports.iter()) {
            match port.entry() {
                Ok((key, patch)) => entries.push((key, patch, port.to_string())),
                Err(e) => debug!("Skipping port entry {:?}: {}", port, e),
            }
        }
    }
    Ok(entries)
}
