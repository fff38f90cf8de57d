//! Local servers and helpers for exercising probes against real sockets.

use std::{net::SocketAddr, ops::Range, pin::Pin, sync::Arc, time::Duration};

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    nid::Nid,
    pkey::{PKey, Private},
    rsa::Rsa,
    ssl::{Ssl, SslAcceptor, SslMethod},
    x509::{X509Builder, X509NameBuilder, X509},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Semaphore,
};
use tokio_openssl::SslStream;

use crate::{
    evidence::MemoryEvidenceSink,
    host::{Host, HostStore},
    port::{PortKey, PortPatch, PortState, Source},
    probe::framework::{PortToAnalyze, ProbeSettings},
    target::TargetInstance,
};

pub(crate) fn self_signed(common_name: &str) -> (PKey<Private>, X509) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    (key, builder.build())
}

/// First byte of a TLS handshake record
const TLS_HANDSHAKE: u8 = 0x16;

/// Read until the end of a request's header block, then answer.  Anyone
/// trying to start TLS is hung up on.
async fn respond<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S, response: &[u8]) {
    let mut request = Vec::new();
    let mut buffer = [0u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(read) => request.extend_from_slice(&buffer[..read]),
        }
        if request.first() == Some(&TLS_HANDSHAKE) {
            return;
        }
    }
    let _ = stream.write_all(response).await;
    let _ = stream.shutdown().await;
}

/// A TLS server presenting a certificate for `common_name` that answers every
/// request with `response`.
pub(crate) async fn tls_server(common_name: &str, response: &'static [u8]) -> SocketAddr {
    let (key, certificate) = self_signed(common_name);
    let mut acceptor = SslAcceptor::mozilla_intermediate(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&key).unwrap();
    acceptor.set_certificate(&certificate).unwrap();
    acceptor.check_private_key().unwrap();
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let ssl = Ssl::new(acceptor.context()).unwrap();
                let mut stream = SslStream::new(ssl, stream).unwrap();
                if Pin::new(&mut stream).accept().await.is_ok() {
                    respond(stream, response).await;
                }
            });
        }
    });
    addr
}

/// A plain TCP server that answers every request with `response`.
pub(crate) async fn plain_server(response: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream, response));
        }
    });
    addr
}

/// A server that accepts connections and never says a word.
pub(crate) async fn silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// A server that hangs up as soon as it has accepted.
pub(crate) async fn hang_up_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    addr
}

/// An address nothing is listening on.
pub(crate) async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Settings with a short deadline and an evidence sink the test can inspect.
pub(crate) fn settings(probe_timeout: Duration) -> (ProbeSettings, Arc<MemoryEvidenceSink>) {
    limited_settings(16, None, probe_timeout)
}

/// Like [`settings`] with a set number of requests in flight and an optional
/// throttle in milliseconds.
pub(crate) fn limited_settings(
    permits: usize,
    throttle_range: Option<Range<u64>>,
    probe_timeout: Duration,
) -> (ProbeSettings, Arc<MemoryEvidenceSink>) {
    let sink = Arc::new(MemoryEvidenceSink::default());
    (
        ProbeSettings::new(
            Arc::new(Semaphore::new(permits)),
            throttle_range,
            probe_timeout,
            sink.clone(),
        ),
        sink,
    )
}

/// A host with one TCP port at `addr` already in `state`, ready to probe.
pub(crate) fn port_to_analyze(
    addr: SocketAddr,
    state: PortState,
    settings: ProbeSettings,
) -> Arc<PortToAnalyze> {
    let key = PortKey::tcp(addr.port());
    let mut host = Host::new(addr.ip());
    host.apply(
        key,
        &PortPatch {
            state: Some(state),
            ..Default::default()
        },
        Source::LiveProbe,
    );
    PortToAnalyze::new(
        settings,
        TargetInstance::IP(addr.ip()),
        key,
        Arc::new(HostStore::new(host)),
    )
}
