//! Turns inspected links into something a person can read.

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::link::{CertificateCheck, CertificateInfo, Link, ResponseInfo};

/// Headers shown in the text reply unless configured otherwise.
pub const DEFAULT_SELECTED_HEADERS: [&str; 3] = ["Content-Type", "Date", "Server"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Summary,
}

/// Fills `selected_headers` with `"\tName: v1, v2"` lines for each allowed
/// header that is present, in allow-list order.
pub fn select_headers<S: AsRef<str>>(link: &mut Link, allow_list: &[S]) {
    let lines: Vec<String> = allow_list
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            link.response_info
                .header(name)
                .map(|values| format!("\t{}: {}", name, values.join(", ")))
        })
        .collect();
    link.response_info.selected_headers = lines;
}

pub fn render_text(link: &Link) -> String {
    let mut out = format!("URL: {}\nHTTPS: {}\n", link.url(), link.is_https);
    if let Some(target) = &link.redirect_url {
        out.push_str(&format!("Redirect URL: {}\n", target));
    }
    if let Some(check) = &link.certificate_check {
        out.push_str(&format!("Certificate check: {}\n", describe_check(check)));
    }
    out.push_str("\nCertificate Info: \n");
    out.push_str(&certificate_text(&link.certificate_info));
    out.push_str("\nResponse Info: \n");
    out.push_str(&response_text(&link.response_info));
    out
}

pub fn render_json(links: &[Link]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(links)
}

/// One row per link.
pub fn render_summary(links: &[Link]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "URL",
        "Status",
        "HTTPS",
        "Redirect",
        "HSTS",
        "Certificate",
        "Expires",
    ]);

    for link in links {
        let certificate = match &link.certificate_check {
            Some(CertificateCheck::Valid) => Cell::new("valid").fg(Color::Green),
            Some(check) => Cell::new(describe_check(check)).fg(Color::Red),
            None => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(link.url()),
            Cell::new(link.response_info.status_code),
            Cell::new(link.is_https),
            Cell::new(link.redirect_url.as_deref().unwrap_or("-")),
            Cell::new(link.response_info.hsts),
            certificate,
            Cell::new(format_time(link.certificate_info.valid_to)),
        ]);
    }

    table.to_string()
}

pub fn describe_check(check: &CertificateCheck) -> String {
    match check {
        CertificateCheck::Valid => "valid".to_string(),
        CertificateCheck::Invalid(e) => format!("invalid ({}): {}", e.kind(), e),
        CertificateCheck::Unreachable(details) => format!("not checked: {}", details),
    }
}

fn certificate_text(info: &CertificateInfo) -> String {
    format!(
        "\tCertificate is Valid: {}\n\
         \tCertificate is Self-Signed: {}\n\
         \tIssuer: {}\n\
         \tSubject: {}\n\
         \tSerial Number: {}\n\
         \tPublic Key Algorithm: {}\n\
         \tValid from: {}\n\
         \tValid to: {}\n\
         \tSignature Algorithm: {}\n",
        info.is_cert_valid,
        info.is_self_signed,
        info.issuer,
        info.subject,
        info.serial_number,
        info.public_key_algorithm,
        format_time(info.valid_from),
        format_time(info.valid_to),
        info.signature_algorithm,
    )
}

fn response_text(info: &ResponseInfo) -> String {
    let selected = if info.selected_headers.is_empty() {
        "\nSelected Headers: None".to_string()
    } else {
        format!("\nSelected Headers:\n{}", info.selected_headers.join("\n"))
    };
    format!(
        "\tResponse status code: {}\n\
         \tWas redirected: {}\n\
         \tRedirected to HTTPS: {}\n\
         \tHSTS: {}\n\
         {}",
        info.status_code, info.was_redirected, info.redirected_https, info.hsts, selected,
    )
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}
