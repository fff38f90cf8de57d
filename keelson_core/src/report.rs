//! This module contains everything we need to describe the results of a
//! probe run.

use std::net::IpAddr;

use crate::{err::KeelsonErr, host::Host, target::Target};

/// A probe run produces a stream of Reports, one per target instance.
#[derive(Debug)]
pub struct Report {
    /// The original target as provided by the user
    pub target: Target,
    /// The IP the probes were actually run against.  This is left out when we
    /// aren't able to convert to an instance, for example a hostname that
    /// fails to resolve.
    pub instance: Option<IpAddr>,
    /// The host with everything we learned about it, or what stopped us from
    /// working on it.  The host not answering doesn't count as a failure.
    pub contents: Result<Host, KeelsonErr>,
}
