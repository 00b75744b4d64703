use clap::Parser;
use log::{error, info, LevelFilter};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use linkcheck::config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
use linkcheck::render::{render_json, render_summary, render_text, select_headers};
use linkcheck::telegram::{self, TelegramBot};
use linkcheck::{Dispatcher, Inspect, InspectError, Inspector, Link, OutputFormat};

mod metrics;

/// Checks URLs for HTTPS usage, redirects and certificate validity.
///
/// With URLs, each one is inspected and reported. Without URLs, commands
/// (`/start`, `/help`, `/check <URL>`) are served as a Telegram bot when
/// TELEGRAM_TOKEN is set (environment or .env), otherwise read from
/// standard input.
#[derive(Parser, Debug)]
#[command(name = "linkcheck", version, author, about, long_about = None)]
struct Cli {
    /// URLs to inspect
    urls: Vec<String>,

    /// Output format: text, json or summary
    #[arg(short, long)]
    output: Option<String>,

    /// Configuration file (defaults to ./linkcheck.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    generate_config: bool,

    /// Timeout in seconds for both the HTTP request and the certificate check
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Push metrics to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Push Gateway address
    #[arg(long, value_name = "ADDRESS")]
    prometheus_address: Option<String>,

    /// Log level; overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LevelFilter>,
}

fn init_logger(level: Option<LevelFilter>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("hyper_util", LevelFilter::Info);
    if let Err(e) = builder.try_init() {
        eprintln!("Failed to initialize logger: {}", e);
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let file_config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::from_file(DEFAULT_CONFIG_FILE)?,
        None => Config::default(),
    };

    let urls = if cli.urls.is_empty() {
        None
    } else {
        Some(cli.urls.clone())
    };
    let cli_config = Config::from_cli_args(
        urls,
        cli.output.clone(),
        cli.timeout,
        if cli.prometheus { Some(true) } else { None },
        cli.prometheus_address.clone(),
    );

    let config = Config::defaults()
        .merge_with(file_config)
        .merge_with(cli_config);
    config.validate()?;
    Ok(config)
}

fn inspect_all(inspector: Inspector, urls: Vec<String>) -> Vec<(String, Result<Link, InspectError>)> {
    let inspector = Arc::new(inspector);
    let (sender, receiver): (
        Sender<(usize, String, Result<Link, InspectError>)>,
        Receiver<(usize, String, Result<Link, InspectError>)>,
    ) = mpsc::channel();

    for (index, url) in urls.into_iter().enumerate() {
        let thread_tx = sender.clone();
        let inspector = Arc::clone(&inspector);
        thread::spawn(move || {
            let result = inspector.inspect(&url);
            if thread_tx.send((index, url, result)).is_err() {
                error!("Result channel closed before inspection finished");
            }
        });
    }
    drop(sender);

    let mut results: Vec<(usize, String, Result<Link, InspectError>)> = receiver.iter().collect();
    results.sort_by_key(|(index, _, _)| *index);
    results
        .into_iter()
        .map(|(_, url, result)| (url, result))
        .collect()
}

fn run_urls(config: &Config, inspector: Inspector, urls: Vec<String>) -> i32 {
    let headers = config.headers();
    let mut links: Vec<Link> = Vec::with_capacity(urls.len());
    let mut failed = false;

    for (url, result) in inspect_all(inspector, urls) {
        match result {
            Ok(mut link) => {
                select_headers(&mut link, headers.as_slice());
                links.push(link);
            }
            Err(e) => {
                failed = true;
                eprintln!("Fail to check url: {} ({}) {}", url, e.kind(), e);
            }
        }
    }

    match config.output_format() {
        OutputFormat::Text => {
            for link in &links {
                println!("--------------------------------------");
                println!("{}", render_text(link));
            }
        }
        OutputFormat::Json => match render_json(&links) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize results: {}", e);
                failed = true;
            }
        },
        OutputFormat::Summary => println!("{}", render_summary(&links)),
    }

    if let Some(address) = config.prometheus_address() {
        metrics::prom::prometheus_metrics(&links, &address);
    }

    if failed {
        1
    } else {
        0
    }
}

fn run_session(config: &Config, inspector: Inspector) -> i32 {
    let dispatcher =
        Dispatcher::new(inspector, config.rate_limiter()).with_selected_headers(config.headers());

    if let Some(token) = telegram::token_from_env() {
        return match TelegramBot::new(&token) {
            Ok(mut bot) => {
                bot.run(&dispatcher);
                0
            }
            Err(e) => {
                error!("Failed to start Telegram bot: {}", e);
                2
            }
        };
    }

    info!(
        "{} not set, reading commands from standard input",
        telegram::TOKEN_ENV
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read command: {}", e);
                return 1;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = dispatcher.handle(&line);
        if writeln!(stdout, "{}", reply).and_then(|_| stdout.flush()).is_err() {
            return 1;
        }
    }
    0
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.log_level);

    if cli.generate_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            exit(2);
        }
    };

    let inspector = match Inspector::with_timeouts(config.dial_timeout(), config.http_timeout()) {
        Ok(inspector) => inspector,
        Err(e) => {
            eprintln!("Failed to set up inspector: {}", e);
            exit(2);
        }
    };

    let code = match config.urls.clone() {
        Some(urls) if !urls.is_empty() => run_urls(&config, inspector, urls),
        _ => run_session(&config, inspector),
    };
    exit(code);
}
