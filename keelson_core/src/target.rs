//! This module contains everything we need to describe the hosts to probe.
use std::{
    fmt::{Display, Formatter},
    io,
    net::IpAddr,
    str::FromStr,
};

use ipnet::IpNet;
use rand::{seq::SliceRandom, thread_rng};
use tokio::net::lookup_host;
use tracing::{debug, instrument};

use crate::{err::KeelsonErr, report::Report};

/// This structure represents a target as given by the user.  It will be
/// broken down into individual instances almost immediately.  The
/// [`TargetInstance`] structure is what the internals will actually work
/// on
#[derive(Clone, Eq, Debug, PartialEq, Hash)]
pub enum Target {
    /// One IP address.  IPv4 or IPv6
    IP(IpAddr),
    /// One CIDR block
    Network(IpNet),
    /// An individual hostname.  We try to be fairly accepting of malformed
    /// hostnames, if it resolves we'll probe it.
    Hostname(String),
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::IP(ip) => ip.fmt(f),
            Target::Network(network) => network.fmt(f),
            Target::Hostname(hostname) => hostname.fmt(f),
        }
    }
}

impl FromStr for Target {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(ip_addr) = IpAddr::from_str(s) {
            Ok(Target::IP(ip_addr))
        } else if let Ok(inet) = IpNet::from_str(s) {
            Ok(Target::Network(inet))
        } else if s.trim().is_empty() {
            Err("an empty target can't be probed".to_string())
        } else {
            Ok(Target::Hostname(s.to_owned()))
        }
    }
}

impl From<TargetInstance> for Target {
    fn from(instance: TargetInstance) -> Self {
        match instance {
            TargetInstance::IP(ip) => Target::IP(ip),
            TargetInstance::Network { network, .. } => Target::Network(network),
            TargetInstance::Hostname { hostname, .. } => Target::Hostname(hostname),
        }
    }
}

/// This is one host we will actually work on.  A target may resolve into
/// multiple instances. A hostname may resolve to multiple addresses, a
/// network will obviously break up into multiple IPs.
#[derive(Clone, Eq, Debug, PartialEq, Hash)]
pub enum TargetInstance {
    /// The user asked for an individual IP.
    IP(IpAddr),
    /// One host of a CIDR block.
    Network {
        /// The original block requested
        network: IpNet,
        /// The individual IP to be probed
        instance_ip: IpAddr,
    },
    /// One address a hostname resolved to.  The name is kept for TLS SNI and
    /// the HTTP Host header.
    Hostname {
        /// The original hostname used in the DNS lookup
        hostname: String,
        /// The address we are probing for this hostname
        resolved_ip: IpAddr,
    },
}

impl TargetInstance {
    /// An instance will always have an IP associated to it.  This just makes it
    /// easy to grab it.
    pub fn get_ip(&self) -> IpAddr {
        match self {
            TargetInstance::IP(ip) => *ip,
            TargetInstance::Network { instance_ip, .. } => *instance_ip,
            TargetInstance::Hostname { resolved_ip, .. } => *resolved_ip,
        }
    }
}

/// Every distinct address `hostname` resolves to.  No addresses at all
/// counts as a failure.
async fn resolve(hostname: &str) -> io::Result<Vec<IpAddr>> {
    let mut resolved: Vec<IpAddr> = Vec::new();
    for addr in lookup_host((hostname, 0)).await? {
        if !resolved.contains(&addr.ip()) {
            resolved.push(addr.ip());
        }
    }
    if resolved.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{hostname} has no addresses"),
        ));
    }
    Ok(resolved)
}

/// Break targets up into instances, shuffled.  Hostnames that fail to resolve
/// come back as error reports instead.
#[instrument(level = "trace")]
pub(crate) async fn targets_to_instances(
    targets: Vec<Target>,
) -> (Vec<TargetInstance>, Vec<Report>) {
    let mut instances = vec![];
    let mut reports = vec![];
    for target in targets {
        match target {
            Target::IP(ip) => instances.push(TargetInstance::IP(ip)),
            Target::Network(network) => {
                for instance_ip in network.hosts() {
                    instances.push(TargetInstance::Network {
                        network,
                        instance_ip,
                    })
                }
            }
            Target::Hostname(hostname) => match resolve(&hostname).await {
                Ok(resolved) => {
                    debug!("{} resolved to {:?}", hostname, resolved);
                    for resolved_ip in resolved {
                        instances.push(TargetInstance::Hostname {
                            hostname: hostname.clone(),
                            resolved_ip,
                        });
                    }
                }
                Err(e) => {
                    reports.push(Report {
                        target: Target::Hostname(hostname),
                        instance: None,
                        contents: Err(KeelsonErr::FailedToResolveHostname(e)),
                    });
                }
            },
        }
    }
    instances.shuffle(&mut thread_rng());
    (instances, reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_targets() {
        assert_eq!(
            "10.0.0.5".parse::<Target>(),
            Ok(Target::IP("10.0.0.5".parse().unwrap()))
        );
        assert!(matches!(
            "10.0.0.0/30".parse::<Target>(),
            Ok(Target::Network(_))
        ));
        assert_eq!(
            "web.internal".parse::<Target>(),
            Ok(Target::Hostname("web.internal".to_string()))
        );
        assert!("  ".parse::<Target>().is_err());
    }

    #[tokio::test]
    async fn networks_expand_to_hosts() {
        let network: IpNet = "10.0.0.0/30".parse().unwrap();
        let (mut instances, failed) = targets_to_instances(vec![Target::Network(network)]).await;
        assert!(failed.is_empty());
        instances.sort_by_key(TargetInstance::get_ip);
        let ips: Vec<IpAddr> = instances.iter().map(TargetInstance::get_ip).collect();
        assert_eq!(
            ips,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse().unwrap()
            ]
        );
        assert_eq!(Target::from(instances[0].clone()), Target::Network(network));
    }

    #[tokio::test]
    async fn unresolvable_hostnames_become_reports() {
        let (instances, failed) =
            targets_to_instances(vec![Target::Hostname("does-not-exist.invalid".to_string())])
                .await;
        assert!(instances.is_empty());
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed[0].contents,
            Err(KeelsonErr::FailedToResolveHostname(_))
        ));
    }
}
