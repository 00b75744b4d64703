//! One HTTP round trip to decide whether a URL redirects, serves plain HTTP
//! or serves HTTPS.
//!
//! The request is made with certificate verification off and redirects not
//! followed, so the first response is always the one that gets classified.
//! Only a coarse certificate summary is taken here; deep validation happens
//! on a separate connection in [`crate::validator`].

use log::{info, warn};
use reqwest::blocking::{Client, Response};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::InspectError;
use crate::link::{CertificateInfo, Link};

pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

pub const HSTS_HEADER: &str = "Strict-Transport-Security";

/// The parts of an HTTP response the classification depends on.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    /// Header multimap keyed by canonical name.
    pub headers: BTreeMap<String, Vec<String>>,
    /// `Some` when the response arrived over TLS.
    pub tls: Option<TlsSession>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsSession {
    /// DER of the leaf certificate, if the peer presented one.
    pub peer_certificate: Option<Vec<u8>>,
}

impl RawResponse {
    pub fn from_response(response: &Response) -> RawResponse {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(canonical_header_name(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let tls = response
            .extensions()
            .get::<TlsInfo>()
            .map(|info| TlsSession {
                peer_certificate: info.peer_certificate().map(|der| der.to_vec()),
            });

        RawResponse {
            status: response.status().as_u16(),
            headers,
            tls,
        }
    }

    fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
    }
}

pub struct Classifier {
    client: Client,
}

impl Classifier {
    /// Builds the insecure, non-redirecting client the classification needs.
    pub fn new(timeout: Duration) -> Result<Classifier, InspectError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .timeout(timeout)
            .tls_info(true)
            .build()?;
        Ok(Classifier { client })
    }

    /// Uses a caller-supplied client. It must have `tls_info(true)` set,
    /// otherwise every response looks like plain HTTP.
    pub fn with_client(client: Client) -> Classifier {
        Classifier { client }
    }

    /// Issues a single GET for `link` and records what came back.
    pub fn classify(&self, link: &mut Link) -> Result<(), InspectError> {
        info!("Starting HTTPS check for URL: {}", link.url());

        let response = self.client.get(link.url()).send().map_err(|e| {
            warn!("Error getting URL: {}. Error: {}", link.url(), e);
            InspectError::from(e)
        })?;
        let raw = RawResponse::from_response(&response);
        drop(response);

        apply_response(link, raw)
    }
}

/// Classifies an already received response into `link`.
pub fn apply_response(link: &mut Link, response: RawResponse) -> Result<(), InspectError> {
    link.response_info.status_code = response.status;
    let location = response.header("Location").cloned();
    let hsts = response.header(HSTS_HEADER).is_some();
    link.response_info.headers = response.headers;

    if is_redirect(response.status) {
        let location = location.ok_or_else(|| InspectError::Request {
            details: format!(
                "{} answered {} without a Location header",
                link.url(),
                response.status
            ),
        })?;
        let target = resolve_location(link.url(), &location);
        info!("URL: {} was redirected to: {}", link.url(), target);
        link.mark_redirected(&target);
        return Ok(());
    }

    let session = match response.tls {
        Some(session) => session,
        None => {
            info!(
                "URL: {} is not redirected and does not use HTTPS",
                link.url()
            );
            link.is_https = false;
            return Ok(());
        }
    };
    link.is_https = true;
    link.response_info.hsts = hsts;

    let der = session.peer_certificate.ok_or_else(|| {
        warn!("No peer certificates for URL: {}", link.url());
        InspectError::NoPeerCertificates {
            url: link.url().to_string(),
        }
    })?;
    link.certificate_info = CertificateInfo::from_der(&der)?;
    Ok(())
}

pub fn is_redirect(status: u16) -> bool {
    (300..400).contains(&status)
}

/// Resolves a relative `Location` against the requested URL. Absolute
/// targets are kept exactly as the server sent them.
fn resolve_location(base: &str, location: &str) -> String {
    if url::Url::parse(location).is_ok() {
        return location.to_string();
    }
    url::Url::parse(base)
        .and_then(|base| base.join(location))
        .map(|resolved| resolved.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// `content-type` becomes `Content-Type`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
