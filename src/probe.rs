//! Raw TLS dial used to look at the chain a server actually presents.
//!
//! Peer verification is switched off here so that untrusted, expired or
//! self-signed chains still complete the handshake. Whether the chain is any
//! good is decided afterwards by [`crate::validator`].

use log::debug;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslVerifyMode, StatusType};
use openssl::x509::X509;
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::InspectError;

/// Certificates are always fetched from the standard HTTPS port.
pub const HTTPS_PORT: u16 = 443;

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// What the server presented during the handshake.
pub struct PeerChain {
    /// Leaf first, then whatever intermediates the server sent.
    pub certificates: Vec<X509>,
    /// Stapled OCSP response, if the server sent one.
    pub ocsp_response: Option<Vec<u8>>,
}

/// Connects to `host:443`, completes a TLS handshake and returns the peer chain.
///
/// The connection is closed before this returns, whatever the outcome.
/// `timeout` bounds name resolution, the TCP connect and each handshake read
/// or write.
pub fn probe(host: &str, timeout: Duration) -> Result<PeerChain, InspectError> {
    probe_addr(host, HTTPS_PORT, timeout)
}

pub(crate) fn probe_addr(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<PeerChain, InspectError> {
    let mut builder = SslContext::builder(SslMethod::tls())?;
    builder.set_verify(SslVerifyMode::NONE);
    let context = builder.build();

    let mut ssl = Ssl::new(&context)?;
    ssl.set_hostname(host)?;
    ssl.set_status_type(StatusType::OCSP)?;

    let tcp_stream = connect(host, port, timeout)?;
    tcp_stream.set_read_timeout(Some(timeout))?;
    tcp_stream.set_write_timeout(Some(timeout))?;

    let mut stream = ssl.connect(tcp_stream)?;

    let certificates: Vec<X509> = match stream.ssl().peer_cert_chain() {
        Some(chain) if chain.len() > 0 => chain.iter().map(|cert| cert.to_owned()).collect(),
        _ => stream.ssl().peer_certificate().into_iter().collect(),
    };
    let ocsp_response = stream
        .ssl()
        .ocsp_status()
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| bytes.to_vec());

    // Best effort close_notify; the socket itself is released on drop.
    if let Err(e) = stream.shutdown() {
        debug!("TLS shutdown with {} failed: {}", host, e);
    }

    if certificates.is_empty() {
        return Err(InspectError::HandshakeFailed {
            details: format!("{} presented no certificate", host),
        });
    }

    debug!(
        "Fetched chain from {}: {} certificate(s), stapled OCSP: {}",
        host,
        certificates.len(),
        ocsp_response.is_some()
    );

    Ok(PeerChain {
        certificates,
        ocsp_response,
    })
}

/// Resolves on a helper thread so a slow resolver cannot outlast `timeout`.
/// A resolver that never answers leaves its thread behind until it returns.
fn resolve(host: &str, port: u16, timeout: Duration) -> Result<Vec<SocketAddr>, InspectError> {
    let (sender, receiver) = mpsc::channel();
    let target = host.to_string();
    thread::Builder::new()
        .name("resolve-host".to_string())
        .spawn(move || {
            let result = (target.as_str(), port)
                .to_socket_addrs()
                .map(|addresses| addresses.collect::<Vec<SocketAddr>>());
            // The receiver is gone once the caller gave up waiting.
            let _ = sender.send(result);
        })?;

    match receiver.recv_timeout(timeout) {
        Ok(Ok(addresses)) => Ok(addresses),
        Ok(Err(source)) => Err(InspectError::DnsResolution {
            hostname: host.to_string(),
            source,
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(InspectError::Timeout {
            operation: format!("resolve {}", host),
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(InspectError::DnsResolution {
            hostname: host.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "resolver thread exited"),
        }),
    }
}

fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, InspectError> {
    let started = Instant::now();
    let addresses = resolve(host, port, timeout)?;

    if addresses.is_empty() {
        return Err(InspectError::DnsResolution {
            hostname: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        });
    }

    let mut last_error = None;
    for address in &addresses {
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            last_error = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
            break;
        }
        match TcpStream::connect_timeout(address, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", address, e);
                last_error = Some(e);
            }
        }
    }

    let address = format!("{}:{}", host, port);
    match last_error {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => Err(InspectError::Timeout {
            operation: format!("connect to {}", address),
        }),
        Some(source) => Err(InspectError::ConnectionFailed { address, source }),
        None => Err(InspectError::ConnectionFailed {
            address,
            source: io::Error::new(io::ErrorKind::Other, "no address could be tried"),
        }),
    }
}
