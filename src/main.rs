use anyhow::{Context, Result};
use clap::Parser;
use keyrelay::config::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use keyrelay::credential::mask;
use keyrelay::{RequestBody, RequestSpec, RetryPolicy};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// keyrelay - send API requests across a pool of keys
///
/// Requests go out with one key at a time. When the upstream rate limits a
/// key (HTTP 429, or HTTP 200 carrying a rate-limit error), the next key is
/// tried. Connection resets and TLS hiccups are retried on the same key.
///
/// Examples:
///   keyrelay --keys k1,k2 request GET models
///   keyrelay request POST chat/completions --data '{"model":"gpt-4o-mini"}'
#[derive(Parser, Debug)]
#[command(author, version = env!("KEYRELAY_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Upstream base URL
    #[arg(
        long = "base-url",
        env = "KEYRELAY_BASE_URL",
        value_name = "URL",
        default_value = DEFAULT_BASE_URL,
        global = true
    )]
    base_url: String,

    /// Comma-separated API keys (also via KEYRELAY_API_KEYS)
    #[arg(
        long = "keys",
        env = "KEYRELAY_API_KEYS",
        value_name = "KEY,...",
        hide_env_values = true,
        global = true
    )]
    keys: Option<String>,

    /// Retries per key on transient connection errors
    #[arg(long, value_name = "N", default_value_t = 10, global = true)]
    max_attempts: u32,

    /// First backoff delay in milliseconds
    #[arg(long = "base-delay-ms", value_name = "MS", default_value_t = 10, global = true)]
    base_delay_ms: u64,

    /// Backoff multiplier
    #[arg(long, value_name = "N", default_value_t = 2, global = true)]
    backoff_factor: u32,

    /// Backoff ceiling in milliseconds
    #[arg(long = "max-delay-ms", value_name = "MS", default_value_t = 100, global = true)]
    max_delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long = "timeout-secs", value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    timeout_secs: u64,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Send one request and print the response
    Request(RequestArgs),

    /// Print the log-safe rendering of a key
    Mask(MaskArgs),
}

#[derive(clap::Args, Debug)]
struct RequestArgs {
    /// HTTP method, e.g. GET or POST
    #[arg(value_name = "METHOD")]
    method: String,

    /// Path relative to the base URL
    #[arg(value_name = "PATH", default_value = "")]
    path: String,

    /// Request body, sent as-is
    #[arg(long, short = 'd', value_name = "BODY")]
    data: Option<String>,

    /// Extra header in NAME:VALUE form (repeatable)
    #[arg(long = "header", short = 'H', value_name = "NAME:VALUE")]
    headers: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct MaskArgs {
    /// The key to mask
    #[arg(value_name = "KEY")]
    key: String,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        let keys = self
            .keys
            .clone()
            .context("No API keys given. Use --keys or set KEYRELAY_API_KEYS.")?;

        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        };

        Ok(ClientConfig::new(Some(self.base_url.clone()), keys)
            .with_retry(retry)
            .with_timeout(Duration::from_secs(self.timeout_secs)))
    }
}

impl RequestArgs {
    fn to_spec(&self) -> Result<RequestSpec> {
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method '{}'", self.method))?;

        let mut headers = HeaderMap::new();
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            headers.append(name, value);
        }

        let mut spec = RequestSpec::new(method, self.path.clone()).with_headers(headers);
        if let Some(data) = &self.data {
            spec = spec.with_body(RequestBody::Text(data.clone()));
        }
        Ok(spec)
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("Invalid header '{}'. Expected NAME:VALUE.", raw))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name in '{}'", raw))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value in '{}'", raw))?;
    Ok((name, value))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Request(args) => {
            let spec = args.to_spec()?;
            let dispatcher = cli.client_config()?.into_dispatcher()?;
            let response = dispatcher.dispatch(&spec).await?;

            println!("HTTP {}", response.status);
            println!("{}", response.text());
        }
        Commands::Mask(args) => {
            println!("{}", mask(&args.key));
        }
    }
    Ok(())
}
