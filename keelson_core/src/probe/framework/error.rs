use thiserror::Error;
use tokio::sync::AcquireError;

/// The base error type for rules.  Network failures are not errors, rules
/// classify those themselves.  These are the cases where a rule couldn't do
/// its job at all.  Any rule depending on a failed one is pruned.
#[derive(Debug, Error)]
pub enum RuleError {
    /// This is some kind of hard failure due to bad internal state, coding
    /// errors or something other unexpected issue.
    #[error("internal rule error: {0}")]
    InternalRuleError(Box<dyn std::error::Error + Send + Sync>),
    /// The run is shutting down and the rule couldn't get clearance to make a
    /// request.
    #[error("the rule was cancelled before it could run")]
    Cancelled,
}

impl From<AcquireError> for RuleError {
    fn from(_: AcquireError) -> Self {
        RuleError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;

    #[tokio::test]
    async fn closed_semaphore_cancels() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.close();
        let error: RuleError = semaphore.acquire().await.unwrap_err().into();
        assert!(matches!(error, RuleError::Cancelled));
    }
}
