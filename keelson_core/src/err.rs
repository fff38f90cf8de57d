//! Module to place any error handling related code
use std::{io, path::PathBuf};

use thiserror::Error;

/// An error during a probe run.  Failures of individual probes and parse
/// lines are never errors; they are classified and recorded.  These are the
/// few things that stop us from working on a target at all.
#[derive(Debug, Error)]
pub enum KeelsonErr {
    /// The hostname target wouldn't resolve
    #[error("failed to resolve hostname: {0}")]
    FailedToResolveHostname(#[source] io::Error),
    /// The configured scan output directory couldn't be listed
    #[error("failed to read scan output directory {}: {source}", .path.display())]
    ScanOutputDir {
        /// The directory we tried to read
        path: PathBuf,
        /// What went wrong
        #[source]
        source: io::Error,
    },
    /// The configuration can't be used to start a run
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
