//! Opening plain and TLS connections for probes.  Certificates are never
//! verified; we want to talk to whatever is listening.

use std::{net::SocketAddr, pin::Pin};

use openssl::{
    error::ErrorStack,
    nid::Nid,
    ssl::{SslConnector, SslMethod, SslVerifyMode},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_openssl::SslStream;
use tracing::trace;

use crate::probe::outcome::ProbeOutcome;

/// Anything a probe can write a request to and read a response from.
pub(crate) trait ProbeIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProbeIo for T {}

fn tls_connector() -> Result<SslConnector, ErrorStack> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    Ok(builder.build())
}

/// Run a TLS handshake over an established TCP connection.  `hostname` is
/// sent as SNI when it isn't a bare IP.
pub(crate) async fn tls_handshake(
    stream: TcpStream,
    hostname: &str,
) -> ProbeOutcome<SslStream<TcpStream>> {
    let ssl = tls_connector()?
        .configure()?
        .verify_hostname(false)
        .into_ssl(hostname)?;
    let mut stream = SslStream::new(ssl, stream)?;
    Pin::new(&mut stream).connect().await?;
    trace!("TLS handshake with {} complete", hostname);
    Ok(stream)
}

/// Subject common name of the peer's certificate, if it sent one.
pub(crate) fn common_name(stream: &SslStream<TcpStream>) -> Option<String> {
    let certificate = stream.ssl().peer_certificate()?;
    let entry = certificate
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()?;
    let name = entry.data().as_utf8().ok()?;
    Some(name.to_string())
}

/// Connect to `addr`, wrapping the connection in TLS when `ssl` is set.
/// Callers put their own deadline around this.
pub(crate) async fn connect(
    addr: SocketAddr,
    hostname: &str,
    ssl: bool,
) -> ProbeOutcome<Box<dyn ProbeIo>> {
    let stream = TcpStream::connect(addr).await?;
    if ssl {
        Ok(Box::new(tls_handshake(stream, hostname).await?))
    } else {
        Ok(Box::new(stream))
    }
}
