use std::fmt::Debug;

use crate::{port::PortPatch, probe::framework::RuleId};

/// What a rule learned about a port.  Everything here is folded into the
/// host by the framework under one lock, so the next stage of rules sees it.
/// Rules that found nothing of a kind just keep the default.
pub trait RuleResult: 'static + Debug + Send + Sync {
    /// Returns the [`RuleId`] of the Rule this result belongs to.  This is
    /// only useful for book keeping inside the framework
    fn get_rule_id(&self) -> RuleId;

    /// Changes to the port's record
    fn port_patch(&self) -> Option<PortPatch> {
        None
    }

    /// A name the host goes by, taken from a certificate
    fn discovered_hostname(&self) -> Option<String> {
        None
    }

    /// Banner lines the port disclosed
    fn banners(&self) -> Vec<String> {
        Vec::new()
    }
}
