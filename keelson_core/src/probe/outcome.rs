//! Every way a probe can go wrong, boiled down to the handful of cases that
//! change what we believe about a port.

use std::{error::Error as _, io};

use openssl::{
    error::ErrorStack,
    ssl::{self, ErrorCode},
};
use thiserror::Error;
use tokio::time::error::Elapsed;
use tracing::{error, warn};

use crate::evidence::EvidenceSubject;

/// Why a probe didn't produce what it was after.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ProbeFailure {
    /// The deadline passed before the exchange finished
    #[error("timed out")]
    Timeout,
    /// The peer refused the connection
    #[error("connection refused")]
    Refused,
    /// The peer tore down an established connection
    #[error("connection reset")]
    Reset,
    /// Something answered, but not in the protocol we spoke
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
    /// Anything we can't place.  Never treated as success.
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

/// The result of one network exchange
pub type ProbeOutcome<T> = Result<T, ProbeFailure>;

fn from_io(e: &io::Error) -> ProbeFailure {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeFailure::Refused,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => ProbeFailure::Reset,
        io::ErrorKind::TimedOut => ProbeFailure::Timeout,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
            ProbeFailure::ProtocolMismatch(e.to_string())
        }
        _ => ProbeFailure::Unknown(e.to_string()),
    }
}

fn from_ssl(e: &ssl::Error) -> ProbeFailure {
    if let Some(io_error) = e.io_error() {
        return from_io(io_error);
    }
    match e.code() {
        ErrorCode::SSL | ErrorCode::SYSCALL | ErrorCode::ZERO_RETURN => {
            ProbeFailure::ProtocolMismatch(e.to_string())
        }
        _ => ProbeFailure::Unknown(e.to_string()),
    }
}

impl From<io::Error> for ProbeFailure {
    fn from(e: io::Error) -> Self {
        from_io(&e)
    }
}

impl From<ssl::Error> for ProbeFailure {
    fn from(e: ssl::Error) -> Self {
        from_ssl(&e)
    }
}

// The HTTP client buries what actually happened a few layers down.  The first
// cause we recognise decides.
impl From<reqwest::Error> for ProbeFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return ProbeFailure::Unknown(e.to_string());
        }
        if e.is_timeout() {
            return ProbeFailure::Timeout;
        }
        let mut cause = e.source();
        while let Some(current) = cause {
            if let Some(io_error) = current.downcast_ref::<io::Error>() {
                return from_io(io_error);
            }
            if let Some(ssl_error) = current.downcast_ref::<ssl::Error>() {
                return from_ssl(ssl_error);
            }
            if current.downcast_ref::<ErrorStack>().is_some() {
                return ProbeFailure::ProtocolMismatch(e.to_string());
            }
            if let Some(hyper_error) = current.downcast_ref::<hyper::Error>() {
                if hyper_error.is_parse() || hyper_error.is_incomplete_message() {
                    return ProbeFailure::ProtocolMismatch(e.to_string());
                }
            }
            cause = current.source();
        }
        // A failed TCP connect always carries its io error.  A connect
        // failure without one is the TLS handshake giving up.
        if e.is_connect() {
            ProbeFailure::ProtocolMismatch(e.to_string())
        } else {
            ProbeFailure::Unknown(e.to_string())
        }
    }
}

// Setting up a connector or session only fails on our side.
impl From<ErrorStack> for ProbeFailure {
    fn from(e: ErrorStack) -> Self {
        ProbeFailure::Unknown(e.to_string())
    }
}

impl From<Elapsed> for ProbeFailure {
    fn from(_: Elapsed) -> Self {
        ProbeFailure::Timeout
    }
}

/// Log a failed probe at the level its kind deserves.
pub(crate) fn log_failure(probe: &str, subject: &EvidenceSubject, failure: &ProbeFailure) {
    match failure {
        ProbeFailure::Unknown(_) => error!("{} on {} failed: {}", probe, subject, failure),
        _ => warn!("{} on {}: {}", probe, subject, failure),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::Client;

    use super::*;
    use crate::probe::test_support::{plain_server, refused_addr, silent_server};

    fn client() -> Client {
        Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(300))
            .build()
            .unwrap()
    }

    #[test]
    fn io_errors_are_classified() {
        let kinds = [
            (io::ErrorKind::ConnectionRefused, ProbeFailure::Refused),
            (io::ErrorKind::ConnectionReset, ProbeFailure::Reset),
            (io::ErrorKind::ConnectionAborted, ProbeFailure::Reset),
            (io::ErrorKind::BrokenPipe, ProbeFailure::Reset),
            (io::ErrorKind::TimedOut, ProbeFailure::Timeout),
        ];
        for (kind, expected) in kinds {
            assert_eq!(ProbeFailure::from(io::Error::from(kind)), expected);
        }
        assert!(matches!(
            ProbeFailure::from(io::Error::from(io::ErrorKind::UnexpectedEof)),
            ProbeFailure::ProtocolMismatch(_)
        ));
        assert!(matches!(
            ProbeFailure::from(io::Error::new(io::ErrorKind::Other, "weird")),
            ProbeFailure::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn elapsed_is_a_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            futures::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        assert_eq!(ProbeFailure::from(elapsed), ProbeFailure::Timeout);
    }

    #[tokio::test]
    async fn http_client_failures_are_classified() {
        let refused = refused_addr().await;
        let error = client()
            .head(format!("http://{refused}/"))
            .send()
            .await
            .unwrap_err();
        assert_eq!(ProbeFailure::from(error), ProbeFailure::Refused);

        let silent = silent_server().await;
        let error = client()
            .head(format!("http://{silent}/"))
            .send()
            .await
            .unwrap_err();
        assert_eq!(ProbeFailure::from(error), ProbeFailure::Timeout);

        let ssh = plain_server(b"SSH-2.0-OpenSSH_8.9\r\n").await;
        let error = client()
            .head(format!("http://{ssh}/"))
            .send()
            .await
            .unwrap_err();
        assert!(matches!(
            ProbeFailure::from(error),
            ProbeFailure::ProtocolMismatch(_)
        ));
    }
}
