//! Telegram Bot API transport for the [`Dispatcher`].
//!
//! Long-polls `getUpdates` and answers every message through `sendMessage`.
//! Only the handful of Bot API fields the dispatcher needs are modelled.

use log::{info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;

use crate::dispatcher::Dispatcher;
use crate::inspector::Inspect;

pub const TOKEN_ENV: &str = "TELEGRAM_TOKEN";
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Seconds the server may hold a `getUpdates` call open.
pub const POLL_TIMEOUT_SECS: u64 = 60;

const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Reads the bot token from the environment, loading `.env` first unless
/// `DOCKER_ENV` is set.
pub fn token_from_env() -> Option<String> {
    if std::env::var_os("DOCKER_ENV").is_none() {
        if let Err(e) = dotenvy::dotenv() {
            info!("No .env file loaded: {}", e);
        }
    }
    std::env::var(TOKEN_ENV)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

#[derive(Debug)]
pub enum TelegramError {
    Http(reqwest::Error),
    /// The API answered `ok: false`.
    Api { method: String, description: String },
}

impl fmt::Display for TelegramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelegramError::Http(e) => write!(f, "Telegram request failed: {}", e),
            TelegramError::Api {
                method,
                description,
            } => write!(f, "Telegram {} failed: {}", method, description),
        }
    }
}

impl std::error::Error for TelegramError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelegramError::Http(e) => Some(e),
            TelegramError::Api { .. } => None,
        }
    }
}

impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Http(e)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct User {
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramBot {
    client: Client,
    endpoint: String,
    offset: i64,
    poll_timeout: u64,
}

impl TelegramBot {
    pub fn new(token: &str) -> Result<TelegramBot, TelegramError> {
        TelegramBot::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Talks to a Bot API server other than the public one.
    pub fn with_api_base(token: &str, api_base: &str) -> Result<TelegramBot, TelegramError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(TelegramBot::with_client(client, token, api_base))
    }

    /// The client's timeout must exceed the poll timeout.
    pub fn with_client(client: Client, token: &str, api_base: &str) -> TelegramBot {
        TelegramBot {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            offset: 0,
            poll_timeout: POLL_TIMEOUT_SECS,
        }
    }

    pub fn with_poll_timeout(mut self, seconds: u64) -> TelegramBot {
        self.poll_timeout = seconds;
        self
    }

    fn call<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, TelegramError> {
        let response: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body)
            .send()?
            .json()?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(TelegramError::Api {
                method: method.to_string(),
                description: response
                    .description
                    .unwrap_or_else(|| "no result".to_string()),
            }),
        }
    }

    /// Fetches pending updates and acknowledges them for the next call.
    pub fn get_updates(&mut self) -> Result<Vec<Update>, TelegramError> {
        let updates: Vec<Update> = self.call(
            "getUpdates",
            &GetUpdates {
                offset: self.offset,
                timeout: self.poll_timeout,
                allowed_updates: ["message"],
            },
        )?;
        if let Some(last) = updates.iter().map(|u| u.update_id).max() {
            self.offset = last + 1;
        }
        Ok(updates)
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self.call("sendMessage", &SendMessage { chat_id, text })?;
        Ok(())
    }

    /// One poll: answers every message received. Returns how many replies were sent.
    pub fn poll_once<I: Inspect>(
        &mut self,
        dispatcher: &Dispatcher<I>,
    ) -> Result<usize, TelegramError> {
        let mut sent = 0;
        for update in self.get_updates()? {
            if let Some((chat_id, reply)) = reply_to(dispatcher, &update) {
                match self.send_message(chat_id, &reply) {
                    Ok(()) => sent += 1,
                    Err(e) => warn!("Error sending message: {}", e),
                }
            }
        }
        Ok(sent)
    }

    /// Polls forever. Transport errors are logged and retried.
    pub fn run<I: Inspect>(&mut self, dispatcher: &Dispatcher<I>) {
        info!("Polling Telegram for updates");
        loop {
            if let Err(e) = self.poll_once(dispatcher) {
                warn!("{}", e);
                thread::sleep(RETRY_DELAY);
            }
        }
    }
}

/// The reply for one update, or `None` for updates without a text message.
pub fn reply_to<I: Inspect>(dispatcher: &Dispatcher<I>, update: &Update) -> Option<(i64, String)> {
    let message = update.message.as_ref()?;
    let text = message.text.as_deref()?;
    let user = message
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");
    info!("[{}] {}", user, text);
    Some((message.chat.id, dispatcher.handle(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{HELP_MESSAGE, START_MESSAGE};
    use crate::error::InspectError;
    use crate::link::Link;
    use crate::ratelimit::RateLimiter;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    struct Offline;

    impl Inspect for Offline {
        fn inspect(&self, url: &str) -> Result<Link, InspectError> {
            Err(InspectError::Request {
                details: format!("offline: {}", url),
            })
        }
    }

    fn local_bot(token: &str, base: &str) -> TelegramBot {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        TelegramBot::with_client(client, token, base).with_poll_timeout(0)
    }

    fn dispatcher() -> Dispatcher<Offline> {
        Dispatcher::new(Offline, RateLimiter::default())
    }

    const UPDATES: &str = r#"{"ok":true,"result":[
        {"update_id":7,"message":{"message_id":1,"chat":{"id":42,"type":"private"},"from":{"id":1,"is_bot":false,"first_name":"A","username":"alice"},"text":"/start"}},
        {"update_id":8,"message":{"message_id":2,"chat":{"id":43,"type":"private"},"sticker":{}}},
        {"update_id":9,"edited_message":{"message_id":3,"chat":{"id":44,"type":"private"},"text":"/help"}}
    ]}"#;

    #[test]
    fn test_updates_deserialize() {
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(UPDATES).unwrap();
        assert!(response.ok);
        let updates = response.result.unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].message.as_ref().unwrap().chat.id, 42);
        assert!(updates[1].message.as_ref().unwrap().text.is_none());
        assert!(updates[2].message.is_none());
    }

    #[test]
    fn test_reply_to_text_messages_only() {
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(UPDATES).unwrap();
        let updates = response.result.unwrap();
        let dispatcher = dispatcher();

        assert_eq!(
            reply_to(&dispatcher, &updates[0]),
            Some((42, START_MESSAGE.to_string()))
        );
        assert_eq!(reply_to(&dispatcher, &updates[1]), None);
        assert_eq!(reply_to(&dispatcher, &updates[2]), None);
    }

    /// Answers `bodies.len()` HTTP requests in order and hands back each
    /// request's path and body.
    fn fake_api(bodies: Vec<&'static str>) -> (String, mpsc::Receiver<(String, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            for body in bodies {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                let head_end = loop {
                    let n = stream.read(&mut buf).unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if let Some(i) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break i + 4;
                    }
                    if n == 0 {
                        break request.len();
                    }
                };
                let head = String::from_utf8_lossy(&request[..head_end]).to_string();
                let length = head
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                while request.len() < head_end + length {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let path = head.split_whitespace().nth(1).unwrap_or("").to_string();
                let payload = String::from_utf8_lossy(&request[head_end..]).to_string();
                sender.send((path, payload)).unwrap();

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (base, receiver)
    }

    #[test]
    fn test_poll_once_answers_and_advances_offset() {
        let updates = r#"{"ok":true,"result":[{"update_id":11,"message":{"message_id":1,"chat":{"id":5,"type":"private"},"text":"/help"}}]}"#;
        let sent = r#"{"ok":true,"result":{"message_id":2}}"#;
        let empty = r#"{"ok":true,"result":[]}"#;
        let (base, requests) = fake_api(vec![updates, sent, empty]);

        let mut bot = local_bot("TOKEN", &base);
        let dispatcher = dispatcher();

        assert_eq!(bot.poll_once(&dispatcher).unwrap(), 1);
        assert_eq!(bot.poll_once(&dispatcher).unwrap(), 0);

        let (path, body) = requests.recv().unwrap();
        assert_eq!(path, "/botTOKEN/getUpdates");
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["offset"], 0);
        assert_eq!(body["timeout"], 0);

        let (path, body) = requests.recv().unwrap();
        assert_eq!(path, "/botTOKEN/sendMessage");
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["chat_id"], 5);
        assert_eq!(body["text"], HELP_MESSAGE);

        let (_, body) = requests.recv().unwrap();
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["offset"], 12);
    }

    #[test]
    fn test_api_error_is_reported() {
        let (base, _requests) =
            fake_api(vec![r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#]);
        let mut bot = local_bot("BAD", &base);

        match bot.get_updates() {
            Err(TelegramError::Api { method, description }) => {
                assert_eq!(method, "getUpdates");
                assert_eq!(description, "Unauthorized");
            }
            other => panic!("expected an API error, got {:?}", other),
        }
    }
}
