use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser};
use envkey_core::fetch::{fetch, FetchOptions, Hosts};
use envkey_crypto::Pgp;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envkey-fetch")]
#[command(about = "Fetches and decrypts an EnvKey environment", long_about = None)]
#[command(version, disable_version_flag = true)]
struct Cli {
    /// The ENVKEY credential string
    envkey: String,

    /// Cache the encrypted response on disk and fall back to it when the
    /// network is unavailable
    #[arg(long)]
    cache: bool,

    /// Cache directory (default: $HOME/.envkey/cache)
    #[arg(long = "cache-dir")]
    cache_dir: Option<PathBuf>,

    /// Client name reported to the server
    #[arg(long = "client-name")]
    client_name: Option<String>,

    /// Client version reported to the server
    #[arg(long = "client-version")]
    client_version: Option<String>,

    /// Attempts against the primary host before falling back
    #[arg(long, default_value_t = 3)]
    retries: u8,

    /// Base backoff in seconds between primary retries (doubles per attempt)
    #[arg(
        long = "retryBackoff",
        alias = "retry-backoff",
        default_value_t = 1.0,
        value_parser = non_negative_seconds
    )]
    retry_backoff: f64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10.0, value_parser = non_negative_seconds)]
    timeout: f64,

    /// Print diagnostics to stderr
    #[arg(long)]
    verbose: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),
}

/// Durations are built from these flags, so they must be finite and
/// non-negative.
fn non_negative_seconds(value: &str) -> Result<f64, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("not a number of seconds: {e}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err("must be a finite, non-negative number of seconds".to_string());
    }
    Ok(seconds)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("envkey_core=debug,envkey_crypto=debug,envkey_fetch=debug")
    } else {
        EnvFilter::new("error")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = FetchOptions {
        should_cache: cli.cache,
        cache_dir: cli.cache_dir,
        client_name: cli.client_name,
        client_version: cli.client_version,
        retries: cli.retries,
        retry_backoff: cli.retry_backoff,
        timeout_seconds: cli.timeout,
        hosts: Hosts::default(),
    };

    match fetch(&Pgp, &cli.envkey, &options).await {
        Ok(env_json) => {
            println!("{env_json}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            // Errors go to stdout for backward-compatible callers that parse
            // `error: …` from the output stream.
            println!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
