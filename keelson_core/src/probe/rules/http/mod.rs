//! This module contains the HTTP(S) rules.
mod banner;
mod detect;

pub use banner::{BannerGrabProbe, BannerGrabProbeResult, BANNER_HEADERS, BANNER_REQUESTS};
pub use detect::{
    classify_http, http_patch, HttpClassification, HttpDetectionProbe, HttpDetectionProbeResult,
};
