//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Send HTTP requests through a composable request pipeline.
///
/// Each URL is requested in order through one pipeline. Response bodies are
/// written to stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "digger")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to request (relative paths need --base-url)
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON pipeline config file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL that relative paths are joined onto
    #[arg(long)]
    pub base_url: Option<String>,

    /// Attempts per request until a non-error status (1-100)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub ensure_attempts: Option<u32>,

    /// Minimum seconds between the end of one request and the start of the next
    #[arg(long, value_name = "SECONDS")]
    pub pace: Option<f64>,

    /// Local source address to bind (repeat to rotate through several)
    #[arg(long = "ip", value_name = "ADDR")]
    pub ips: Vec<String>,

    /// Pick the source address at random instead of in order
    #[arg(long)]
    pub random_ip: bool,

    /// Send a random browser User-Agent with every request
    #[arg(long)]
    pub random_user_agent: bool,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header_arg)]
    pub headers: Vec<(String, String)>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Print the status line and response headers before the body
    #[arg(short, long)]
    pub include: bool,
}

fn parse_header_arg(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
