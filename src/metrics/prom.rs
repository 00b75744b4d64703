use chrono::Utc;
use lazy_static::lazy_static;
use log::{debug, warn};
use prometheus::{labels, register_gauge, Gauge};

use linkcheck::Link;

lazy_static! {
    static ref LINKCHECK_HTTPS: Gauge =
        register_gauge!("linkcheck_https", "1 when the URL is served over HTTPS").unwrap();
    static ref LINKCHECK_CERT_VALID: Gauge = register_gauge!(
        "linkcheck_cert_valid",
        "1 when the certificate passed validation"
    )
    .unwrap();
    static ref LINKCHECK_DAYS_BEFORE_EXPIRED: Gauge =
        register_gauge!("linkcheck_days_before_expired", "days before expiration").unwrap();
}

/// Gauge values for one link.
#[derive(Debug, PartialEq)]
struct Sample {
    https: f64,
    cert_valid: f64,
    days_before_expired: f64,
}

fn sample(link: &Link) -> Sample {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let days_before_expired = link
        .certificate_info
        .valid_to
        .map(|valid_to| (valid_to - Utc::now()).num_days() as f64)
        .unwrap_or(0.0);
    Sample {
        https: flag(link.is_https),
        cert_valid: flag(link.certificate_info.is_cert_valid),
        days_before_expired,
    }
}

/// Pushes one group of gauges per link to the gateway at `prometheus_address`.
pub fn prometheus_metrics(links: &[Link], prometheus_address: &str) {
    for link in links {
        let sample = sample(link);
        LINKCHECK_HTTPS.set(sample.https);
        LINKCHECK_CERT_VALID.set(sample.cert_valid);
        LINKCHECK_DAYS_BEFORE_EXPIRED.set(sample.days_before_expired);

        let metric_families = prometheus::gather();
        let pushed = prometheus::push_metrics(
            "linkcheck",
            labels! {
                "instance".to_owned() => "linkcheck".to_owned(),
                "url".to_owned() => link.url().to_owned(),
                "status_code".to_owned() => link.response_info.status_code.to_string(),
                "redirected".to_owned() => link.response_info.was_redirected.to_string(),
                "self_signed".to_owned() => link.certificate_info.is_self_signed.to_string(),
            },
            &format!("{}/metrics/job", prometheus_address),
            metric_families,
            None,
        );

        match pushed {
            Ok(()) => debug!("Pushed metrics for {}", link.url()),
            Err(e) => warn!("Failed to push metrics to prometheus: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use linkcheck::CertificateCheck;

    #[test]
    fn test_sample_for_plain_http() {
        let link = Link::new("http://example.com");
        assert_eq!(
            sample(&link),
            Sample {
                https: 0.0,
                cert_valid: 0.0,
                days_before_expired: 0.0,
            }
        );
    }

    #[test]
    fn test_sample_for_valid_certificate() {
        let mut link = Link::new("https://example.com");
        link.is_https = true;
        link.certificate_info.valid_to = Some(Utc::now() + Duration::days(30) + Duration::hours(1));
        link.record_check(CertificateCheck::Valid);

        let sample = sample(&link);
        assert_eq!(sample.https, 1.0);
        assert_eq!(sample.cert_valid, 1.0);
        assert_eq!(sample.days_before_expired, 30.0);
    }
}
