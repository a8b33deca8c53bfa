//! CLI entry point for the digger tool.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use digger::{
    CallOptions, LayerKind, Method, MultipleIpConfig, PipelineBuilder, PipelineConfig, Response,
};
use tracing::{debug, error, info, warn};

mod cli;

use cli::Args;

fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Bodies own stdout.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = resolve_config(&args)?;
    let method: Method = args.method.parse().context("invalid --method")?;
    let options = call_options(&args)?;

    let mut pipeline = pipeline_builder(config, args.random_user_agent)
        .build()
        .context("failed to build request pipeline")?;
    info!(layers = ?pipeline.layer_names(), "pipeline ready");

    let mut stdout = io::stdout().lock();
    let mut failures = 0usize;
    for url in &args.urls {
        match pipeline.execute(method, url, options.clone()) {
            Ok(response) => {
                write_response(&mut stdout, &response, args.include)
                    .context("failed to write response")?;
                if !response.ok() {
                    warn!(url = %response.url(), status = response.status(), "request returned an error status");
                    failures += 1;
                }
            }
            Err(e) => {
                error!(url = %url, error = %e, "request failed");
                failures += 1;
            }
        }
    }
    stdout.flush().context("failed to flush stdout")?;

    info!(
        requested = args.urls.len(),
        failed = failures,
        "Done"
    );

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Loads the config file, if any, and lays the flags over it.
fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(attempts) = args.ensure_attempts {
        config.ensure_attempts = attempts;
    }
    if let Some(pace) = args.pace {
        config.pace = pace;
    }
    if !args.ips.is_empty() {
        config = config.with_ip_addresses(args.ips.iter().cloned(), args.random_ip);
    } else if args.random_ip {
        config
            .multiple_ip_config
            .get_or_insert_with(MultipleIpConfig::default)
            .random = true;
    }

    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

/// Layer order: base-url, user-agent, ensure, pacing, source-address.
fn pipeline_builder(config: PipelineConfig, random_user_agent: bool) -> PipelineBuilder {
    let has_base_url = config.base_url.is_some();
    let has_ip_config = config.multiple_ip_config.is_some();

    let mut builder = PipelineBuilder::new(config);
    if has_base_url {
        builder = builder.layer(LayerKind::BaseUrl);
    }
    if random_user_agent {
        builder = builder.layer(LayerKind::UserAgent);
    }
    builder = builder.layer(LayerKind::Ensure).layer(LayerKind::Pacing);
    if has_ip_config {
        builder = builder.layer(LayerKind::SourceAddress);
    }
    builder
}

fn call_options(args: &Args) -> Result<CallOptions> {
    let mut options = CallOptions::new();
    for (name, value) in &args.headers {
        options = options
            .header(name, value)
            .with_context(|| format!("invalid header {name:?}"))?;
    }
    if let Some(seconds) = args.timeout {
        let timeout = Duration::try_from_secs_f64(seconds)
            .ok()
            .filter(|t| !t.is_zero())
            .with_context(|| format!("--timeout must be a positive number of seconds, got {seconds}"))?;
        options = options.timeout(timeout);
    }
    Ok(options)
}

fn write_response(out: &mut impl Write, response: &Response, include: bool) -> io::Result<()> {
    if include {
        writeln!(out, "HTTP {}", response.status())?;
        for (name, value) in response.headers() {
            writeln!(out, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(out)?;
    }
    out.write_all(response.bytes())
}
