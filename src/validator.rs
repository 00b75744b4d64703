//! Deep validation of a presented certificate chain.
//!
//! Checks run in a fixed order and stop at the first failure:
//! self-signed heuristic, chain verification, validity window, hostname,
//! then revocation through a stapled OCSP response when one is available.

use log::debug;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::ocsp::{
    OcspCertId, OcspCertStatus, OcspFlag, OcspResponse, OcspResponseStatus, OcspRevokedStatus,
};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509NameRef, X509Ref, X509StoreContext, X509};
use std::net::IpAddr;

use crate::error::{InspectError, ValidationError};
use crate::link::CertificateCheck;

/// Validates chains against a fixed set of trust roots.
pub struct CertificateValidator {
    store: X509Store,
}

impl CertificateValidator {
    /// Uses the platform's default trust roots.
    pub fn system() -> Result<CertificateValidator, InspectError> {
        let mut builder = X509StoreBuilder::new()?;
        builder.set_default_paths()?;
        // The validity window is checked separately so expiry is reported as such.
        builder.set_flags(X509VerifyFlags::NO_CHECK_TIME)?;
        Ok(CertificateValidator {
            store: builder.build(),
        })
    }

    /// Trusts exactly the given roots.
    pub fn with_roots(roots: Vec<X509>) -> Result<CertificateValidator, InspectError> {
        let mut builder = X509StoreBuilder::new()?;
        for root in roots {
            builder.add_cert(root)?;
        }
        builder.set_flags(X509VerifyFlags::NO_CHECK_TIME)?;
        Ok(CertificateValidator {
            store: builder.build(),
        })
    }

    /// Validates `chain` (leaf first) for `host`.
    pub fn validate(
        &self,
        chain: &[X509],
        ocsp_response: Option<&[u8]>,
        host: &str,
    ) -> Result<(), ValidationError> {
        let leaf = chain.first().ok_or_else(|| ValidationError::ChainVerification {
            details: "empty certificate chain".to_string(),
        })?;

        if is_self_signed(leaf) {
            return Err(ValidationError::SelfSigned);
        }

        self.verify_chain(leaf, &chain[1..])?;
        check_validity_window(leaf)?;

        if !matches_host(leaf, host) {
            return Err(ValidationError::HostnameMismatch {
                host: host.to_string(),
            });
        }

        if let (Some(der), Some(issuer)) = (ocsp_response, chain.get(1)) {
            self.check_ocsp(der, leaf, issuer)?;
        }

        debug!("Certificate for {} passed validation", host);
        Ok(())
    }

    /// Runs [`validate`](Self::validate) and folds the outcome into a [`CertificateCheck`].
    pub fn check(&self, chain: &[X509], ocsp_response: Option<&[u8]>, host: &str) -> CertificateCheck {
        match self.validate(chain, ocsp_response, host) {
            Ok(()) => CertificateCheck::Valid,
            Err(e) => CertificateCheck::Invalid(e),
        }
    }

    fn verify_chain(&self, leaf: &X509Ref, intermediates: &[X509]) -> Result<(), ValidationError> {
        let chain_error = |details: String| ValidationError::ChainVerification { details };

        let mut untrusted = Stack::new().map_err(|e| chain_error(e.to_string()))?;
        for cert in intermediates {
            untrusted
                .push(cert.clone())
                .map_err(|e| chain_error(e.to_string()))?;
        }

        let mut context = X509StoreContext::new().map_err(|e| chain_error(e.to_string()))?;
        let outcome = context
            .init(&self.store, leaf, &untrusted, |ctx| {
                if ctx.verify_cert()? {
                    Ok(Ok(()))
                } else {
                    Ok(Err(ctx.error().error_string().to_string()))
                }
            })
            .map_err(|e| chain_error(e.to_string()))?;

        outcome.map_err(chain_error)
    }

    fn check_ocsp(&self, der: &[u8], leaf: &X509Ref, issuer: &X509) -> Result<(), ValidationError> {
        let failed = |reason: String| ValidationError::RevocationCheckFailed { reason };

        let response = OcspResponse::from_der(der).map_err(|e| failed(e.to_string()))?;
        if response.status() != OcspResponseStatus::SUCCESSFUL {
            return Err(failed(format!(
                "responder returned status {}",
                response.status().as_raw()
            )));
        }
        let basic = response.basic().map_err(|e| failed(e.to_string()))?;

        let mut signers = Stack::new().map_err(|e| failed(e.to_string()))?;
        signers
            .push(issuer.clone())
            .map_err(|e| failed(e.to_string()))?;
        basic
            .verify(&signers, &self.store, OcspFlag::empty())
            .map_err(|e| failed(format!("signature: {}", e)))?;

        let id = OcspCertId::from_cert(MessageDigest::sha1(), leaf, issuer)
            .map_err(|e| failed(e.to_string()))?;
        let status = basic
            .find_status(&id)
            .ok_or_else(|| failed("no status for the leaf certificate".to_string()))?;

        if status.status == OcspCertStatus::REVOKED {
            return Err(ValidationError::Revoked {
                reason: revocation_reason(status.reason).to_string(),
            });
        }
        Ok(())
    }
}

/// Issuer CN equals subject CN, compared exactly.
///
/// This is a naming heuristic; the signature is not checked.
pub fn is_self_signed(cert: &X509Ref) -> bool {
    common_name(cert.issuer_name()) == common_name(cert.subject_name())
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_default()
}

fn check_validity_window(leaf: &X509Ref) -> Result<(), ValidationError> {
    let now = Asn1Time::days_from_now(0).map_err(|e| ValidationError::ChainVerification {
        details: e.to_string(),
    })?;
    if leaf.not_after() < now {
        return Err(ValidationError::Expired {
            not_after: leaf.not_after().to_string(),
        });
    }
    if leaf.not_before() > now {
        return Err(ValidationError::NotYetValid {
            not_before: leaf.not_before().to_string(),
        });
    }
    Ok(())
}

/// Matches `host` against the leaf's subjectAltName entries.
///
/// The subject CN is not consulted.
pub fn matches_host(cert: &X509Ref, host: &str) -> bool {
    let host = host.trim_end_matches('.');
    let names = match cert.subject_alt_names() {
        Some(names) => names,
        None => return false,
    };

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return names
            .iter()
            .filter_map(|name| name.ipaddress())
            .any(|bytes| ip_matches(ip, bytes));
    }

    names
        .iter()
        .filter_map(|name| name.dnsname())
        .any(|pattern| dns_name_matches(pattern, host))
}

fn ip_matches(ip: IpAddr, bytes: &[u8]) -> bool {
    match ip {
        IpAddr::V4(v4) => bytes == &v4.octets()[..],
        IpAddr::V6(v6) => bytes == &v6.octets()[..],
    }
}

/// A `*` may only stand for the whole left-most label and covers exactly one label.
pub fn dns_name_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.');
    if pattern.is_empty() || host.is_empty() {
        return false;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => {
            if suffix.contains('*') {
                return false;
            }
            match host.split_once('.') {
                Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
                None => false,
            }
        }
        None => !pattern.contains('*') && pattern.eq_ignore_ascii_case(host),
    }
}

fn revocation_reason(reason: OcspRevokedStatus) -> &'static str {
    match reason {
        OcspRevokedStatus::KEY_COMPROMISE => "key compromise",
        OcspRevokedStatus::CA_COMPROMISE => "CA compromise",
        OcspRevokedStatus::AFFILIATION_CHANGED => "affiliation changed",
        OcspRevokedStatus::STATUS_SUPERSEDED => "superseded",
        OcspRevokedStatus::STATUS_CESSATION_OF_OPERATION => "cessation of operation",
        OcspRevokedStatus::STATUS_CERTIFICATE_HOLD => "certificate hold",
        OcspRevokedStatus::REMOVE_FROM_CRL => "remove from CRL",
        _ => "unspecified",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{issue, leaf_for, now_plus, root, yesterday};

    #[test]
    fn test_is_self_signed_compares_common_names() {
        let self_issued = issue("example.com", None, now_plus(0), now_plus(30), false, &[]);
        assert!(is_self_signed(&self_issued.cert));

        let ca = root();
        let leaf = leaf_for(&ca, yesterday(), now_plus(30));
        assert!(!is_self_signed(&leaf.cert));
    }

    #[test]
    fn test_is_self_signed_is_case_sensitive_and_ignores_signer() {
        let ca = issue("example.com", None, now_plus(0), now_plus(30), true, &[]);
        let same_cn = issue("example.com", Some(&ca), now_plus(0), now_plus(30), false, &[]);
        assert!(is_self_signed(&same_cn.cert));

        let other_case = issue("Example.com", Some(&ca), now_plus(0), now_plus(30), false, &[]);
        assert!(!is_self_signed(&other_case.cert));
    }

    #[test]
    fn test_valid_chain_passes() {
        let ca = root();
        let leaf = leaf_for(&ca, yesterday(), now_plus(90));
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();

        assert_eq!(validator.validate(&[leaf.cert.clone()], None, "example.com"), Ok(()));
        assert_eq!(
            validator.check(&[leaf.cert], None, "www.example.com"),
            CertificateCheck::Valid
        );
    }

    #[test]
    fn test_self_signed_stops_before_other_checks() {
        // Expired, untrusted and for the wrong host: only the self-signed verdict is reported.
        let expired_self_signed = issue(
            "example.com",
            None,
            Asn1Time::from_unix(946_684_800).unwrap(),
            Asn1Time::from_unix(978_307_200).unwrap(),
            false,
            &["other.test"],
        );
        let validator = CertificateValidator::with_roots(vec![]).unwrap();
        assert_eq!(
            validator.validate(&[expired_self_signed.cert], Some(b"garbage"), "example.com"),
            Err(ValidationError::SelfSigned)
        );
    }

    #[test]
    fn test_untrusted_chain_fails_verification() {
        let trusted = root();
        let rogue = issue("Rogue CA", None, now_plus(0), now_plus(3650), true, &[]);
        let leaf = leaf_for(&rogue, yesterday(), now_plus(90));
        let validator = CertificateValidator::with_roots(vec![trusted.cert]).unwrap();

        let err = validator
            .validate(&[leaf.cert], None, "example.com")
            .unwrap_err();
        assert!(matches!(err, ValidationError::ChainVerification { .. }));
    }

    #[test]
    fn test_expired_leaf_is_reported_as_expired() {
        let ca = root();
        let leaf = leaf_for(
            &ca,
            Asn1Time::from_unix(946_684_800).unwrap(),
            Asn1Time::from_unix(978_307_200).unwrap(),
        );
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();

        let check = validator.check(&[leaf.cert], None, "example.com");
        match check {
            CertificateCheck::Invalid(ValidationError::Expired { .. }) => {}
            other => panic!("expected expiry, got {:?}", other),
        }
    }

    #[test]
    fn test_future_leaf_is_not_yet_valid() {
        let ca = root();
        let leaf = leaf_for(&ca, now_plus(10), now_plus(400));
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();

        let err = validator
            .validate(&[leaf.cert], None, "example.com")
            .unwrap_err();
        assert!(matches!(err, ValidationError::NotYetValid { .. }));
    }

    #[test]
    fn test_hostname_mismatch() {
        let ca = root();
        let leaf = leaf_for(&ca, yesterday(), now_plus(90));
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();

        assert_eq!(
            validator.validate(&[leaf.cert.clone()], None, "example.org"),
            Err(ValidationError::HostnameMismatch {
                host: "example.org".to_string()
            })
        );
        // A wildcard covers a single label only.
        assert!(validator
            .validate(&[leaf.cert], None, "a.b.example.com")
            .is_err());
    }

    #[test]
    fn test_ocsp_is_skipped_without_intermediate() {
        let ca = root();
        let leaf = leaf_for(&ca, yesterday(), now_plus(90));
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();

        assert_eq!(
            validator.validate(&[leaf.cert], Some(b"not an ocsp response"), "example.com"),
            Ok(())
        );
    }

    #[test]
    fn test_malformed_ocsp_with_intermediate_fails() {
        let ca = root();
        let intermediate = issue(
            "Test Intermediate CA",
            Some(&ca),
            now_plus(0),
            now_plus(1825),
            true,
            &[],
        );
        let leaf = leaf_for(&intermediate, yesterday(), now_plus(90));
        let validator = CertificateValidator::with_roots(vec![ca.cert.clone()]).unwrap();
        let chain = vec![leaf.cert, intermediate.cert];

        assert_eq!(validator.validate(&chain, None, "example.com"), Ok(()));

        let err = validator
            .validate(&chain, Some(b"not an ocsp response"), "example.com")
            .unwrap_err();
        assert!(matches!(err, ValidationError::RevocationCheckFailed { .. }));
    }

    mod stapled {
        use super::*;

        const ROOT: &[u8] = include_bytes!("../tests/fixtures/ocsp/root.pem");
        const ISSUER: &[u8] = include_bytes!("../tests/fixtures/ocsp/issuer.pem");
        const GOOD_LEAF: &[u8] = include_bytes!("../tests/fixtures/ocsp/good.pem");
        const REVOKED_LEAF: &[u8] = include_bytes!("../tests/fixtures/ocsp/revoked.pem");
        const GOOD_RESPONSE: &[u8] = include_bytes!("../tests/fixtures/ocsp/good.der");
        const REVOKED_RESPONSE: &[u8] = include_bytes!("../tests/fixtures/ocsp/revoked.der");

        fn pem(bytes: &[u8]) -> X509 {
            X509::from_pem(bytes).unwrap()
        }

        fn validator() -> CertificateValidator {
            CertificateValidator::with_roots(vec![pem(ROOT)]).unwrap()
        }

        #[test]
        fn test_good_status_passes() {
            let chain = vec![pem(GOOD_LEAF), pem(ISSUER)];
            assert_eq!(
                validator().validate(&chain, Some(GOOD_RESPONSE), "ocsp.test"),
                Ok(())
            );
        }

        #[test]
        fn test_revoked_status_is_reported() {
            let chain = vec![pem(REVOKED_LEAF), pem(ISSUER)];
            assert_eq!(
                validator().validate(&chain, Some(REVOKED_RESPONSE), "revoked.ocsp.test"),
                Err(ValidationError::Revoked {
                    reason: "key compromise".to_string()
                })
            );
            assert_eq!(
                validator().validate(&chain, None, "revoked.ocsp.test"),
                Ok(())
            );
        }

        #[test]
        fn test_response_for_another_certificate_fails() {
            let chain = vec![pem(REVOKED_LEAF), pem(ISSUER)];
            let err = validator()
                .validate(&chain, Some(GOOD_RESPONSE), "revoked.ocsp.test")
                .unwrap_err();
            assert!(matches!(err, ValidationError::RevocationCheckFailed { .. }));
        }

        #[test]
        fn test_response_from_untrusted_signer_fails() {
            let other = root();
            let validator = CertificateValidator::with_roots(vec![other.cert]).unwrap();
            let err = validator
                .check_ocsp(GOOD_RESPONSE, &pem(GOOD_LEAF), &pem(ISSUER))
                .unwrap_err();
            assert!(matches!(err, ValidationError::RevocationCheckFailed { .. }));
        }
    }

    #[test]
    fn test_revocation_reason_names() {
        assert_eq!(
            revocation_reason(OcspRevokedStatus::STATUS_SUPERSEDED),
            "superseded"
        );
        assert_eq!(
            revocation_reason(OcspRevokedStatus::STATUS_CERTIFICATE_HOLD),
            "certificate hold"
        );
        assert_eq!(revocation_reason(OcspRevokedStatus::UNSPECIFIED), "unspecified");
    }

    #[test]
    fn test_empty_chain() {
        let validator = CertificateValidator::with_roots(vec![]).unwrap();
        assert!(matches!(
            validator.validate(&[], None, "example.com"),
            Err(ValidationError::ChainVerification { .. })
        ));
    }

    #[test]
    fn test_ip_host_matches_ip_san_only() {
        let ca = root();
        let leaf = issue(
            "server",
            Some(&ca),
            yesterday(),
            now_plus(90),
            false,
            &["127.0.0.1", "localhost"],
        );
        assert!(matches_host(&leaf.cert, "127.0.0.1"));
        assert!(matches_host(&leaf.cert, "localhost."));
        assert!(!matches_host(&leaf.cert, "10.0.0.1"));
    }

    #[test]
    fn test_dns_name_matching_rules() {
        assert!(dns_name_matches("example.com", "EXAMPLE.com"));
        assert!(dns_name_matches("*.example.com", "www.example.com"));
        assert!(!dns_name_matches("*.example.com", "example.com"));
        assert!(!dns_name_matches("w*.example.com", "www.example.com"));
        assert!(!dns_name_matches("*.*.com", "a.b.com"));
        assert!(!dns_name_matches("", "example.com"));
    }
}
