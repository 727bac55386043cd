//! h1-dispatch command line.
//!
//! Sends one request (optionally repeated and pipelined) through a single
//! client and prints one JSON line per response, plus one per disconnect.
//!
//! ```text
//! h1-dispatch http://127.0.0.1:8080/items -X PUT -H 'content-type: text/plain' -d hello --repeat 4 --pipelining 4
//! ```

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use url::Url;

use h1_dispatch::config::{load_config, ClientConfig};
use h1_dispatch::observability::init_logging;
use h1_dispatch::{Client, ClientError, Method, Origin, Request};

#[derive(Debug, Parser)]
#[command(name = "h1-dispatch", version, about = "Send HTTP/1.1 requests over persistent connections")]
struct Cli {
    /// Target URL (http only).
    url: Url,

    /// Request method.
    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Request header as `name: value`. May be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Number of times to send the request.
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// In-flight requests per connection; overrides the config file.
    #[arg(long)]
    pipelining: Option<usize>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level; overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResponseLine {
    seq: usize,
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body_len: usize,
    body: Option<String>,
    elapsed_ms: u64,
    error: Option<ErrorLine>,
}

#[derive(Debug, Serialize)]
struct ErrorLine {
    code: &'static str,
    message: String,
}

impl From<&ClientError> for ErrorLine {
    fn from(err: &ClientError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DisconnectLine {
    event: &'static str,
    origin: String,
    connection: u64,
    error: ErrorLine,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header {raw:?} is not `name: value`"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn build_request(cli: &Cli, headers: &[(String, String)]) -> Request {
    let mut path = cli.url.path().to_string();
    if let Some(query) = cli.url.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut request = Request::new(cli.method, path);
    for (name, value) in headers {
        request = request.header(name.clone(), value);
    }
    if let Some(data) = &cli.data {
        request = request.body(data.clone());
    }
    request
}

async fn collect(seq: usize, started: Instant, pending: Result<h1_dispatch::PendingResponse, ClientError>) -> ResponseLine {
    let mut line = ResponseLine {
        seq,
        status: None,
        headers: Vec::new(),
        body_len: 0,
        body: None,
        elapsed_ms: 0,
        error: None,
    };

    let result = match pending {
        Ok(pending) => pending.await,
        Err(err) => Err(err),
    };
    match result {
        Ok(response) => {
            line.status = Some(response.status());
            line.headers = response.headers().to_vec();
            match response.bytes().await {
                Ok(body) => {
                    line.body_len = body.len();
                    line.body = Some(String::from_utf8_lossy(&body).into_owned());
                }
                Err(err) => line.error = Some(ErrorLine::from(&err)),
            }
        }
        Err(err) => line.error = Some(ErrorLine::from(&err)),
    }
    line.elapsed_ms = started.elapsed().as_millis() as u64;
    line
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(pipelining) = cli.pipelining {
        config.pipelining = pipelining;
    }
    if let Some(level) = &cli.log_level {
        config.observability.log_level = level.clone();
    }
    init_logging(&config.observability);

    let headers = cli
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let origin = Origin::from_url(&cli.url)?;

    tracing::info!(
        origin = %origin,
        method = %cli.method,
        repeat = cli.repeat,
        pipelining = config.pipelining,
        "Sending requests"
    );

    let client = Client::builder().origin(origin).config(config).build()?;
    let mut events = client.subscribe();

    let started = Instant::now();
    let submitted: Vec<_> = (0..cli.repeat)
        .map(|_| client.submit(build_request(&cli, &headers)))
        .collect();

    let mut tasks = Vec::with_capacity(submitted.len());
    for (seq, pending) in submitted.into_iter().enumerate() {
        tasks.push(tokio::spawn(collect(seq, started, pending)));
    }

    let mut failed = false;
    for task in tasks {
        let line = task.await?;
        failed |= line.error.is_some();
        println!("{}", serde_json::to_string(&line)?);
    }

    client.close().await;

    while let Some(event) = events.try_disconnect() {
        let line = DisconnectLine {
            event: "disconnect",
            origin: event.origin.to_string(),
            connection: event.connection.as_u64(),
            error: ErrorLine::from(&event.error),
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parsing() {
        assert_eq!(
            parse_header("Content-Type:  text/plain ").unwrap(),
            ("Content-Type".to_string(), "text/plain".to_string())
        );
        assert!(parse_header("no-colon").is_err());
    }

    #[test]
    fn cli_builds_request() {
        let cli = Cli::parse_from(["h1-dispatch", "http://localhost:8080/a?b=1", "-X", "PUT", "-d", "hi"]);
        let request = build_request(&cli, &[("x-test".into(), "1".into())]);
        assert_eq!(request.method(), Method::Put);
        assert_eq!(request.path(), "/a?b=1");
        assert_eq!(request.headers()[0].0, "x-test");
    }
}
