//! The inspection record shared by the classifier, the validator and the
//! presentation layer.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::pkey::Id;
use openssl::x509::{X509NameRef, X509Ref, X509};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{InspectError, ValidationError};

/// One inspection target and everything learned about it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Link {
    url: String,
    pub is_https: bool,
    pub redirect_url: Option<String>,
    pub certificate_info: CertificateInfo,
    pub response_info: ResponseInfo,
    /// Outcome of deep validation; `None` when it was not attempted.
    pub certificate_check: Option<CertificateCheck>,
}

impl Link {
    pub fn new(url: &str) -> Self {
        Link {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Records a 3xx response and where it points.
    pub fn mark_redirected(&mut self, location: &str) {
        self.redirect_url = Some(location.to_string());
        self.response_info.was_redirected = true;
        self.response_info.redirected_https = location.starts_with("https://");
    }

    /// Stores the deep validation outcome. Both `is_cert_valid` and
    /// `is_self_signed` are derived from it, so they are never true together.
    pub fn record_check(&mut self, check: CertificateCheck) {
        self.certificate_info.is_cert_valid = check == CertificateCheck::Valid;
        self.certificate_info.is_self_signed =
            check == CertificateCheck::Invalid(ValidationError::SelfSigned);
        self.certificate_check = Some(check);
    }
}

/// Result of the validator's independent TLS dial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateCheck {
    Valid,
    Invalid(ValidationError),
    /// The second connection could not reach the host or complete a handshake.
    Unreachable(String),
}

/// Summary of a single X.509 leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub is_cert_valid: bool,
    pub is_self_signed: bool,
    pub issuer: String,
    pub subject: String,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub serial_number: String,
    pub public_key_algorithm: String,
    pub signature_algorithm: String,
}

impl CertificateInfo {
    /// Summarises a certificate without judging it: both validity flags stay false.
    pub fn from_cert(cert: &X509Ref) -> CertificateInfo {
        CertificateInfo {
            is_cert_valid: false,
            is_self_signed: false,
            issuer: distinguished_name(cert.issuer_name()),
            subject: distinguished_name(cert.subject_name()),
            valid_from: to_datetime(cert.not_before()),
            valid_to: to_datetime(cert.not_after()),
            serial_number: cert
                .serial_number()
                .to_bn()
                .and_then(|bn| bn.to_dec_str().map(|s| s.to_string()))
                .unwrap_or_default(),
            public_key_algorithm: public_key_algorithm(cert),
            signature_algorithm: signature_algorithm(cert),
        }
    }

    pub fn from_der(der: &[u8]) -> Result<CertificateInfo, InspectError> {
        let cert = X509::from_der(der)?;
        Ok(CertificateInfo::from_cert(&cert))
    }
}

/// Details taken from one HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResponseInfo {
    pub headers: BTreeMap<String, Vec<String>>,
    pub status_code: u16,
    /// Pre-formatted `"\tName: v1, v2"` lines, filled in by the renderer.
    pub selected_headers: Vec<String>,
    pub hsts: bool,
    pub was_redirected: bool,
    pub redirected_https: bool,
}

impl ResponseInfo {
    /// Looks a header up by name, ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&Vec<String>> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }
}

/// Renders a name most-specific RDN first, e.g. `CN=example.com,O=Example,C=US`.
pub fn distinguished_name(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let nid = entry.object().nid();
            let key = nid
                .short_name()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| entry.object().to_string());
            let value = entry.data().to_string().unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect();
    parts.reverse();
    parts.join(",")
}

fn to_datetime(time: &Asn1TimeRef) -> Option<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).ok()?;
    let diff = epoch.diff(time).ok()?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
}

fn public_key_algorithm(cert: &X509Ref) -> String {
    let id = match cert.public_key() {
        Ok(key) => key.id(),
        Err(_) => return "Unknown".to_string(),
    };
    let name = if id == Id::RSA || id == Id::RSA_PSS {
        "RSA"
    } else if id == Id::EC {
        "ECDSA"
    } else if id == Id::ED25519 {
        "Ed25519"
    } else if id == Id::ED448 {
        "Ed448"
    } else if id == Id::DSA {
        "DSA"
    } else {
        "Unknown"
    };
    name.to_string()
}

fn signature_algorithm(cert: &X509Ref) -> String {
    let nid = cert.signature_algorithm().object().nid();
    if nid == Nid::UNDEF {
        return "Unknown".to_string();
    }
    nid.short_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|_| "Unknown".to_string())
}
