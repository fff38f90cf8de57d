//! Module containing all rules build into the system itself.

#![allow(clippy::new_ret_no_self)]
use crate::probe::{
    framework::Rule,
    rules::{
        http::{BannerGrabProbe, HttpDetectionProbe},
        tls::TlsConnectProbe,
    },
};

pub mod http;
pub mod tls;

/// Get all rules that currently exist in the system.  The planner orders
/// them by their dependencies, so the order here doesn't matter.
pub fn get_all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        TlsConnectProbe::new(),
        HttpDetectionProbe::new(),
        BannerGrabProbe::new(),
    ]
}
