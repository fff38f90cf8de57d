//! This is core of the framework for managing probe rules.  It provides all
//! types that help make up rules, assist in their scheduling and running.

mod error;
mod rule_results;

use std::{
    any::TypeId,
    fmt::{Debug, Formatter},
    future::Future,
    net::SocketAddr,
    ops::Range,
    pin::Pin,
    sync::Arc,
    time::Duration,
};

pub use error::RuleError;
use rand::{rngs::StdRng, Rng, SeedableRng};
pub use rule_results::RuleResult;
use tokio::{
    sync::{AcquireError, Semaphore, SemaphorePermit},
    time::sleep,
};

use crate::{
    evidence::{EvidenceSink, EvidenceSubject, LoggingEvidenceSink},
    host::HostStore,
    port::{PortKey, PortRecord},
    target::TargetInstance,
};

/// The default number of requests allowed in flight across a whole run
pub const DEFAULT_MAX_IN_FLIGHT: u32 = 256;

/// The default deadline for one probe exchange
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// This is the type all rule execution should conform to.  This just the
/// unprettified form of `async fn (Arc<PortToAnalyze>) -> Result<Box<dyn
/// RuleResult>, RuleError>`.  [`PortToAnalyze`] gives the rule everything it
/// needs about the target, including the port's current record.
pub type RuleClosure = Box<
    dyn Fn(
        Arc<PortToAnalyze>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn RuleResult>, RuleError>> + Send>>,
>;

/// Settings shared by every probe in a run.
#[derive(Clone)]
pub struct ProbeSettings {
    semaphore: Arc<Semaphore>,
    throttle_range: Option<Range<u64>>,
    probe_timeout: Duration,
    evidence: Arc<dyn EvidenceSink>,
}

impl ProbeSettings {
    /// Simple constructor for [`ProbeSettings`]
    pub fn new(
        semaphore: Arc<Semaphore>,
        throttle_range: Option<Range<u64>>,
        probe_timeout: Duration,
        evidence: Arc<dyn EvidenceSink>,
    ) -> Self {
        Self {
            semaphore,
            throttle_range,
            probe_timeout,
            evidence,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::new(
            Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT as usize)),
            None,
            DEFAULT_PROBE_TIMEOUT,
            Arc::new(LoggingEvidenceSink::default()),
        )
    }
}

impl Debug for ProbeSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSettings")
            .field("available_permits", &self.semaphore.available_permits())
            .field("throttle_range", &self.throttle_range)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

/// This contains all the information needed about the target and to form our
/// requests.
#[derive(Debug)]
pub struct PortToAnalyze {
    settings: ProbeSettings,
    target_instance: TargetInstance,
    key: PortKey,
    store: Arc<HostStore>,
}

impl PortToAnalyze {
    /// Simple constructor for [`PortToAnalyze`]
    pub fn new(
        settings: ProbeSettings,
        target_instance: TargetInstance,
        key: PortKey,
        store: Arc<HostStore>,
    ) -> Arc<Self> {
        Arc::new(PortToAnalyze {
            settings,
            target_instance,
            key,
            store,
        })
    }

    /// This pauses until we are clear to make another request on this port.  It
    /// will check both the throttle settings from the user and claim a
    /// semaphore permit to another in flight ticket.  The permit should be
    /// kept in scope for the duration of the request but should be dropped
    /// when it is done.  If it isn't the rule could accumulate more than one
    /// permit, artificially limiting the number of requests allowed in
    /// flight.
    pub async fn wait_for_clearance(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        if let Some(ref throttle_range) = self.settings.throttle_range {
            if !throttle_range.is_empty() {
                sleep(Duration::from_millis(
                    StdRng::from_entropy().gen_range(throttle_range.clone()),
                ))
                .await;
            }
        }
        self.settings.semaphore.acquire().await
    }

    /// Build the hostname to use on any probes on the target.  If it is a
    /// hostname, we will use that otherwise it will be the bare IP.  It ends up
    /// in the HTTP Host header and as TLS SNI.
    pub fn get_hostname(&self) -> String {
        match &self.target_instance {
            TargetInstance::IP(ip) => ip.to_string(),
            TargetInstance::Network { instance_ip, .. } => instance_ip.to_string(),
            TargetInstance::Hostname { hostname, .. } => hostname.to_string(),
        }
    }

    /// Get a usable [`SocketAddr`] for requests.
    pub fn get_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target_instance.get_ip(), self.key.number)
    }

    /// The port being probed
    pub fn key(&self) -> PortKey {
        self.key
    }

    /// Deadline for a single exchange
    pub fn probe_timeout(&self) -> Duration {
        self.settings.probe_timeout
    }

    /// The port's record as it stands right now
    pub async fn record(&self) -> Option<PortRecord> {
        self.store.port(self.key).await
    }

    /// Where this port's findings are kept
    pub fn store(&self) -> &HostStore {
        &self.store
    }

    /// Where evidence of each attempt goes
    pub fn evidence(&self) -> &dyn EvidenceSink {
        self.settings.evidence.as_ref()
    }

    /// The evidence subject for this port
    pub fn subject(&self) -> EvidenceSubject {
        EvidenceSubject::Port {
            ip: self.target_instance.get_ip(),
            key: self.key,
        }
    }
}

/// A automatically derived unique identifier for any rule.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct RuleId {
    // All rules are 'static so the TypeId is enough for now.
    internal: TypeId,
}

impl RuleId {
    /// Simple constructor for [`RuleId`]
    pub fn new<T: Rule>() -> Self {
        Self {
            internal: TypeId::of::<T>(),
        }
    }
}

/// The probe layers, in the order they build on each other.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ProbeLayer {
    /// TCP connect followed by a TLS handshake
    TlsConnect,
    /// A `HEAD /` request, plain and over TLS
    HttpDetection,
    /// Collecting disclosing headers from HTTP responses
    BannerGrab,
}

impl ProbeLayer {
    /// Every layer
    pub const ALL: [ProbeLayer; 3] = [
        ProbeLayer::TlsConnect,
        ProbeLayer::HttpDetection,
        ProbeLayer::BannerGrab,
    ];
}

/// The base trait for a rule.  A rule is one probe layer: it makes its
/// requests, classifies what happened and hands back a [`RuleResult`] that
/// the framework folds into the port's record.
pub trait Rule: Debug + Send + Sync + 'static {
    /// The unique ID for the rule.  This is automatically derive and we really
    /// should never override this.
    fn rule_id(&self) -> RuleId {
        RuleId {
            internal: TypeId::of::<Self>(),
        }
    }

    /// The list of IDs for all rules this rule depends on.  By default a rule
    /// depends on no other rules
    fn dependencies(&self) -> Vec<RuleId> {
        Default::default()
    }

    /// Which layer this rule implements.  Users pick rules by layer.
    fn layer(&self) -> ProbeLayer;

    /// Should the rule run against a port in this state?  This is checked
    /// against the record as it stands when the rule's stage starts.
    fn applies_to(&self, record: &PortRecord) -> bool;

    /// This is the meat of the rule.  The closure returned from this is
    /// what will be run to make the requests and classify what came back.
    fn get_execution_method(&self) -> RuleClosure;
}
