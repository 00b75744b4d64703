//! `inspect(url) -> Link`: the entry point the dispatcher calls.

use log::{info, warn};
use std::time::Duration;
use url::{Host, Url};

use crate::classifier::Classifier;
use crate::error::InspectError;
use crate::link::{CertificateCheck, Link};
use crate::probe::{probe_addr, HTTPS_PORT};
use crate::validator::CertificateValidator;

/// Anything that can turn a URL into a populated [`Link`].
pub trait Inspect {
    fn inspect(&self, url: &str) -> Result<Link, InspectError>;
}

/// Classifies a URL, then validates its certificate on a fresh connection.
pub struct Inspector {
    classifier: Classifier,
    validator: CertificateValidator,
    dial_timeout: Duration,
    probe_port: u16,
}

impl Inspector {
    pub fn new(
        classifier: Classifier,
        validator: CertificateValidator,
        dial_timeout: Duration,
    ) -> Inspector {
        Inspector {
            classifier,
            validator,
            dial_timeout,
            probe_port: HTTPS_PORT,
        }
    }

    #[cfg(test)]
    fn with_probe_port(mut self, port: u16) -> Inspector {
        self.probe_port = port;
        self
    }

    /// Builds an inspector that trusts the system roots.
    pub fn with_timeouts(
        dial_timeout: Duration,
        http_timeout: Duration,
    ) -> Result<Inspector, InspectError> {
        Ok(Inspector::new(
            Classifier::new(http_timeout)?,
            CertificateValidator::system()?,
            dial_timeout,
        ))
    }

    /// Dials `host:443` and validates whatever chain it presents.
    ///
    /// Connect-class errors mean the host was not inspected;
    /// `InspectError::Validation` means it was and the certificate failed.
    pub fn check_certificate(&self, host: &str) -> Result<(), InspectError> {
        let peer = probe_addr(host, self.probe_port, self.dial_timeout)?;
        self.validator
            .validate(&peer.certificates, peer.ocsp_response.as_deref(), host)?;
        Ok(())
    }

    fn verify_certificate(&self, link: &mut Link, target: &Url) {
        let host = match dial_host(target) {
            Some(host) => host,
            None => return,
        };

        let check = match self.check_certificate(&host) {
            Ok(()) => CertificateCheck::Valid,
            Err(InspectError::Validation(e)) => {
                info!("Certificate for {} is not valid: {}", host, e);
                CertificateCheck::Invalid(e)
            }
            Err(e) => {
                warn!("Failed to dial {} for certificate check: {}", host, e);
                CertificateCheck::Unreachable(e.to_string())
            }
        };

        link.record_check(check);
    }
}

impl Inspect for Inspector {
    fn inspect(&self, url: &str) -> Result<Link, InspectError> {
        let target = parse_target(url)?;
        let mut link = Link::new(url);

        self.classifier.classify(&mut link)?;

        if link.is_https && !link.response_info.was_redirected {
            self.verify_certificate(&mut link, &target);
        }
        Ok(link)
    }
}

/// True for absolute `http`/`https` URLs that name a host.
pub fn is_url(candidate: &str) -> bool {
    parse_target(candidate).is_ok()
}

fn parse_target(candidate: &str) -> Result<Url, InspectError> {
    let invalid = |reason: String| InspectError::InvalidInput {
        field: "url".to_string(),
        reason,
    };
    let url = Url::parse(candidate).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid("missing host".to_string())),
    }
}

/// Host in the form the resolver accepts (IPv6 without brackets).
fn dial_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}
