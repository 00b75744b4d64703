//! Certificate fixtures for unit tests.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};
use std::io::{Read, Write};
use std::net::{IpAddr, TcpListener};
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

static SERIAL: AtomicU32 = AtomicU32::new(1);

pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

pub fn new_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

pub fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    builder.build()
}

pub fn now_plus(days: u32) -> Asn1Time {
    Asn1Time::days_from_now(days).unwrap()
}

pub fn issue(
    cn: &str,
    issuer: Option<&Issued>,
    not_before: Asn1Time,
    not_after: Asn1Time,
    ca: bool,
    sans: &[&str],
) -> Issued {
    let key = new_key();
    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::SeqCst))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name(cn)).unwrap();
    match issuer {
        Some(parent) => builder
            .set_issuer_name(parent.cert.subject_name())
            .unwrap(),
        None => builder.set_issuer_name(&name(cn)).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&not_before).unwrap();
    builder.set_not_after(&not_after).unwrap();

    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    if !sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in sans {
            if entry.parse::<IpAddr>().is_ok() {
                san.ip(entry);
            } else {
                san.dns(entry);
            }
        }
        let extension = {
            let context = builder.x509v3_context(issuer.map(|p| &*p.cert), None);
            san.build(&context).unwrap()
        };
        builder.append_extension(extension).unwrap();
    }

    let signing_key = issuer.map(|p| &p.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: builder.build(),
        key,
    }
}

pub fn root() -> Issued {
    issue("Test Root CA", None, now_plus(0), now_plus(3650), true, &[])
}

pub fn leaf_for(root: &Issued, not_before: Asn1Time, not_after: Asn1Time) -> Issued {
    issue(
        "example.com",
        Some(root),
        not_before,
        not_after,
        false,
        &["example.com", "*.example.com"],
    )
}

pub fn yesterday() -> Asn1Time {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    Asn1Time::from_unix(now - 86_400).unwrap()
}


/// Serves TLS with `identity` on a local port for `connections` sequential
/// clients. Each client that sends a request head gets `response` back;
/// clients that only handshake are simply closed.
pub fn serve_tls(
    identity: &Issued,
    intermediate: Option<&Issued>,
    connections: usize,
    response: &'static [u8],
) -> u16 {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&identity.key).unwrap();
    builder.set_certificate(&identity.cert).unwrap();
    if let Some(intermediate) = intermediate {
        builder
            .add_extra_chain_cert(intermediate.cert.clone())
            .unwrap();
    }
    builder.check_private_key().unwrap();
    let acceptor = builder.build();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for _ in 0..connections {
            let (stream, _) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let mut tls = match acceptor.accept(stream) {
                Ok(tls) => tls,
                Err(_) => continue,
            };

            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match tls.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            if !request.is_empty() {
                let _ = tls.write_all(response);
                let _ = tls.flush();
            }
            let _ = tls.shutdown();
        }
    });
    port
}
