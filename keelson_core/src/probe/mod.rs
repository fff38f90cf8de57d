//! The live probe engine.  Each layer is a rule in the probe framework; the
//! rules for a port run in dependency order and every stage's findings are
//! folded into the host before the next stage looks at the port.
use std::sync::Arc;

use futures::{stream::FuturesUnordered, StreamExt};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    evidence::EvidenceSubject,
    port::Source,
    probe::{
        framework::{PortToAnalyze, Rule, RuleError, RuleResult},
        rules::get_all_rules,
        test_plan::PortTestPlan,
    },
};

mod connection;
pub mod framework;
mod outcome;
pub mod rules;
mod test_plan;
#[cfg(test)]
pub(crate) mod test_support;

pub use framework::{ProbeLayer, ProbeSettings};
pub use outcome::{ProbeFailure, ProbeOutcome};

/// The rules implementing the requested layers
pub(crate) fn get_rules(layers: &[ProbeLayer]) -> Vec<Box<dyn Rule>> {
    get_all_rules()
        .into_iter()
        .filter(|rule| layers.contains(&rule.layer()))
        .collect()
}

/// Run `rules` against one port until the plan runs dry.
#[instrument(level = "trace", skip(port, rules), fields(key = %port.key()))]
pub(crate) async fn run_probes_on_port(port: Arc<PortToAnalyze>, rules: Vec<Box<dyn Rule>>) {
    let mut plan = PortTestPlan::new(rules);

    while plan.has_actions_to_run() {
        let record = match port.record().await {
            Some(record) => record,
            None => {
                warn!("{} disappeared from the host mid probe", port.key());
                return;
            }
        };
        let mut finished = Vec::new();
        let futures = FuturesUnordered::new();
        for rule in plan.rules_to_run() {
            if rule.applies_to(&record) {
                let execution_closure = rule.get_execution_method();
                futures.push(execution_closure(port.clone()));
            } else {
                trace!("{:?} doesn't apply to {} right now", rule, port.key());
                finished.push(rule.rule_id());
            }
        }

        let result_batch: Vec<Result<Box<dyn RuleResult>, RuleError>> = futures.collect().await;

        for result in result_batch {
            match result {
                Ok(result) => {
                    finished.push(result.get_rule_id());
                    persist(&port, result.as_ref()).await;
                }
                Err(e) => {
                    error!("Rule failed to run on {}: {}", port.key(), e);
                }
            }
        }

        plan = plan.build_next_stage_plan(finished);
    }

    for rule in plan.pruned() {
        debug!("Pruned {:?} on {}", rule, port.key());
    }
}

/// Fold one rule's findings into the host in a single critical section.
async fn persist(port: &PortToAnalyze, result: &dyn RuleResult) {
    let key = port.key();
    let patch = result.port_patch();
    let hostname = result.discovered_hostname();
    let banners = result.banners();
    let new_hostname = port
        .store()
        .update(|host| {
            if let Some(patch) = &patch {
                let record = host.apply(key, patch, Source::LiveProbe);
                trace!("{} is now {:?}", key, record);
            }
            for banner in &banners {
                host.add_banner(key, banner);
            }
            match &hostname {
                Some(hostname) if host.add_hostname(hostname) => {
                    info!("{} goes by {}", host.ip, hostname);
                    Some((host.ip, hostname.clone()))
                }
                _ => None,
            }
        })
        .await;
    if let Some((ip, hostname)) = new_hostname {
        port.evidence().create_evidence(
            &EvidenceSubject::Host(ip),
            "TLS certificate common name",
            &hostname,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_select_rules() {
        assert_eq!(get_rules(&ProbeLayer::ALL).len(), 3);
        let rules = get_rules(&[ProbeLayer::BannerGrab]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].layer(), ProbeLayer::BannerGrab);
        assert!(get_rules(&[]).is_empty());
    }
}
