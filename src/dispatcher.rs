//! Chat command handling: `/start`, `/help` and `/check <url>`.
//!
//! The dispatcher owns its admission gate and produces the reply text; how
//! the reply reaches the user is up to the caller.

use log::{info, warn};

use crate::inspector::{is_url, Inspect};
use crate::ratelimit::RateLimiter;
use crate::render::{render_text, select_headers, DEFAULT_SELECTED_HEADERS};

pub const START_MESSAGE: &str = "Hello! I'm a bot for checking HTTPS in URLs. Use the /check <URL> command to check a URL.";
pub const HELP_MESSAGE: &str = "Commands I can help with:\n/start - start working with the bot\n/check <URL> - check URL for HTTPS usage\n/help - get help about available commands.";
pub const TOO_MANY_REQUESTS: &str = "Too many requests. Please try again later.";
pub const ENTER_URL: &str =
    "Please specify a URL for checking. For example, /check https://example.com";
pub const ERROR_CHECK_HTTPS: &str =
    "An error occurred while checking HTTPS. Please check your URL and try again.";
pub const UNRECOGNIZED_COMMAND: &str =
    "Sorry, I didn't recognize this command. Use /help for a list of available commands.";
pub const INVALID_URL: &str = "The text you specified is not a URL. Please try again.";

/// A chat command split into its name and argument text.
#[derive(Debug, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    pub arguments: &'a str,
}

/// Splits `/name@bot rest of line`; returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<Command<'_>> {
    let text = text.trim();
    let body = text.strip_prefix('/')?;
    let (head, arguments) = match body.find(char::is_whitespace) {
        Some(index) => (&body[..index], body[index..].trim()),
        None => (body, ""),
    };
    let name = head.split('@').next().unwrap_or(head);
    Some(Command { name, arguments })
}

pub struct Dispatcher<I: Inspect> {
    inspector: I,
    limiter: RateLimiter,
    selected_headers: Vec<String>,
}

impl<I: Inspect> Dispatcher<I> {
    pub fn new(inspector: I, limiter: RateLimiter) -> Self {
        Dispatcher {
            inspector,
            limiter,
            selected_headers: DEFAULT_SELECTED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
        }
    }

    pub fn with_selected_headers(mut self, headers: Vec<String>) -> Self {
        self.selected_headers = headers;
        self
    }

    /// Produces the reply for one incoming message.
    pub fn handle(&self, text: &str) -> String {
        let command = match parse_command(text) {
            Some(command) => command,
            None => return UNRECOGNIZED_COMMAND.to_string(),
        };

        match command.name {
            "start" => START_MESSAGE.to_string(),
            "help" => HELP_MESSAGE.to_string(),
            "check" => self.check(command.arguments),
            _ => UNRECOGNIZED_COMMAND.to_string(),
        }
    }

    fn check(&self, url: &str) -> String {
        if !self.limiter.allow() {
            info!("Rate limit reached, refusing check of '{}'", url);
            return TOO_MANY_REQUESTS.to_string();
        }
        if url.is_empty() {
            return ENTER_URL.to_string();
        }
        if !is_url(url) {
            return INVALID_URL.to_string();
        }

        match self.inspector.inspect(url) {
            Ok(mut link) => {
                select_headers(&mut link, self.selected_headers.as_slice());
                render_text(&link)
            }
            Err(e) => {
                warn!("Error checking HTTPS for '{}' ({}): {}", url, e.kind(), e);
                ERROR_CHECK_HTTPS.to_string()
            }
        }
    }
}
