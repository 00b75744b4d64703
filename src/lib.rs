//! Inspects URLs for HTTPS usage, redirects and certificate health.
//!
//! An inspection makes one HTTP request without following redirects
//! ([`Classifier`]), then, for HTTPS targets that did not redirect, opens a
//! second TLS connection ([`probe`]) and validates the presented chain
//! ([`CertificateValidator`]). Everything learned ends up in a [`Link`].
//!
//! ```no_run
//! use linkcheck::{Inspect, Inspector};
//! use std::time::Duration;
//!
//! let inspector = Inspector::with_timeouts(Duration::from_secs(5), Duration::from_secs(5))?;
//! let link = inspector.inspect("https://example.com")?;
//! println!("{}", linkcheck::render::render_text(&link));
//! # Ok::<(), linkcheck::InspectError>(())
//! ```

pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod inspector;
pub mod link;
pub mod probe;
pub mod ratelimit;
pub mod render;
pub mod telegram;
pub mod validator;

#[cfg(test)]
mod testutil;

pub use classifier::Classifier;
pub use dispatcher::Dispatcher;
pub use error::{ErrorKind, InspectError, ValidationError};
pub use inspector::{Inspect, Inspector};
pub use link::{CertificateCheck, CertificateInfo, Link, ResponseInfo};
pub use probe::{probe, PeerChain};
pub use ratelimit::RateLimiter;
pub use render::OutputFormat;
pub use validator::CertificateValidator;
