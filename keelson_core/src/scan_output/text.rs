//! Free text scanner output, the human readable console report.  Port lines
//! are matched by an ordered list of patterns; the first that matches wins.

use std::net::IpAddr;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::{char, digit1, space1},
    combinator::value,
    error::{Error, ErrorKind},
    IResult,
};
use tracing::{debug, trace};

use crate::{
    port::{PortKey, PortPatch, PortState, Protocol},
    scan_output::{parse_port_number, ScanEntry},
};

/// Announces the start of a new host's section in the report
const REPORT_PREFIX: &str = "Nmap scan report for ";

/// A port line broken into its fields, before any validation.
#[derive(Debug, PartialEq)]
pub(super) struct PortLine<'a> {
    number: &'a str,
    protocol: Protocol,
    state: &'a str,
    service: &'a str,
    version: Option<&'a str>,
}

impl PortLine<'_> {
    fn into_entry(self) -> Result<(PortKey, PortPatch), String> {
        let number = parse_port_number(self.number)?;
        Ok((
            PortKey::new(self.protocol, number),
            PortPatch {
                state: Some(PortState::from_scanner(self.state)),
                service: Some(self.service.to_string()),
                version: self.version.map(str::to_string),
                ..Default::default()
            },
        ))
    }
}

/// One recognised shape of port line.
pub(super) struct LinePattern {
    name: &'static str,
    parse: for<'a> fn(&'a str) -> IResult<&'a str, PortLine<'a>>,
}

/// Tried in order.  More specific patterns go first.
pub(super) const LINE_PATTERNS: &[LinePattern] = &[
    // 80/tcp  open  http  Apache httpd 2.4
    LinePattern {
        name: "service",
        parse: service_line,
    },
    // 80/tcp  open  http
    LinePattern {
        name: "state",
        parse: state_line,
    },
];

fn port_and_protocol(input: &str) -> IResult<&str, (&str, Protocol)> {
    let (input, number) = digit1(input)?;
    let (input, _) = char('/')(input)?;
    let (input, protocol) = alt((
        value(Protocol::Tcp, tag("tcp")),
        value(Protocol::Udp, tag("udp")),
    ))(input)?;
    Ok((input, (number, protocol)))
}

fn field(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c.is_whitespace())(input)
}

fn state_line(input: &str) -> IResult<&str, PortLine<'_>> {
    let (input, (number, protocol)) = port_and_protocol(input)?;
    let (input, _) = space1(input)?;
    let (input, state) = field(input)?;
    let (input, _) = space1(input)?;
    let (input, service) = field(input)?;
    Ok((
        input,
        PortLine {
            number,
            protocol,
            state,
            service,
            version: None,
        },
    ))
}

fn service_line(input: &str) -> IResult<&str, PortLine<'_>> {
    let (input, mut line) = state_line(input)?;
    let (input, _) = space1(input)?;
    let version = input.trim();
    if version.is_empty() {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::NonEmpty)));
    }
    line.version = Some(version);
    Ok(("", line))
}

/// Does the name in a report header refer to `target`?  nmap prints either
/// the bare address or `name (address)`.
fn report_names_target(reported: &str, target: IpAddr) -> bool {
    let reported = reported.trim();
    let address = reported
        .strip_suffix(')')
        .and_then(|rest| rest.rsplit_once('('))
        .map(|(_, address)| address)
        .unwrap_or(reported);
    address
        .parse::<IpAddr>()
        .map(|ip| ip == target)
        .unwrap_or(false)
}

/// Pull every port entry for `target` out of a free text report, in the
/// order they appear, each with the line it came from.  Lines before the
/// first report header are assumed to be about the target.
pub(super) fn parse(text: &str, target: IpAddr) -> Vec<ScanEntry> {
    let mut in_target = true;
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(reported) = line.strip_prefix(REPORT_PREFIX) {
            in_target = report_names_target(reported, target);
            trace!("Report section for {} matches target: {}", reported, in_target);
            continue;
        }
        if !in_target {
            continue;
        }
        let matched = LINE_PATTERNS.iter().find_map(|pattern| {
            (pattern.parse)(line)
                .ok()
                .map(|(_, port_line)| (pattern.name, port_line))
        });
        if let Some((name, port_line)) = matched {
            match port_line.into_entry() {
                Ok((key, patch)) => entries.push((key, patch, line.trim().to_string())),
                Err(e) => debug!("Dropping {} line {:?}: {}", name, line, e),
            }
        }
    }
    entries
}
