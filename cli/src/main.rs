mod commands;
mod shape;

use anyhow::{Context, Result};
use attested_executor::config::{DEFAULT_SENTINEL_TOKEN, DEFAULT_TOKEN_HEADER};
use attested_executor::{
    AttestationProvider, AttestedRequestExecutor, ExecutorConfig, LocalDevProvider, TransportKind,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "shapes-client")]
#[command(about = "Demo client for the attested shapes endpoint", long_about = None)]
#[command(version)]
struct Cli {
    /// Shapes server host (optionally host:port)
    #[arg(long, env = "SHAPES_HOST", default_value = "demo-server.approovr.io", global = true)]
    host: String,

    /// JSON file configuring the local development attestation provider
    #[arg(long, env = "ATTESTATION_PROVIDER_CONFIG", global = true)]
    provider_config: Option<PathBuf>,

    /// HTTPS transport used for attested requests
    #[arg(long, env = "SHAPES_TRANSPORT", value_enum, default_value_t = TransportArg::Stream, global = true)]
    transport: TransportArg,

    /// Header carrying the attestation token
    #[arg(long, env = "ATTESTATION_TOKEN_HEADER", default_value = DEFAULT_TOKEN_HEADER, global = true)]
    token_header: String,

    /// Header value sent when no token could be fetched
    #[arg(long, env = "ATTESTATION_SENTINEL_TOKEN", default_value = DEFAULT_SENTINEL_TOKEN, global = true)]
    sentinel_token: String,

    /// TCP connect timeout in milliseconds
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 500, global = true)]
    connect_timeout_ms: u64,

    /// Whole-request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    request_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a shape from the attested endpoint
    Shape,

    /// Say hello to the unprotected endpoint
    Hello,

    /// Show the pinned certificate the provider holds for a host
    Pin {
        /// Host to inspect (defaults to --host without port)
        host: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportArg {
    Stream,
    Reqwest,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stream => TransportKind::Stream,
            TransportArg::Reqwest => TransportKind::Reqwest,
        }
    }
}

impl Cli {
    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            token_header: self.token_header.clone(),
            sentinel_token: self.sentinel_token.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            ..ExecutorConfig::default()
        }
    }

    fn provider(&self) -> Result<Arc<LocalDevProvider>> {
        match &self.provider_config {
            Some(path) => {
                let provider = LocalDevProvider::from_file(path).with_context(|| {
                    format!("Failed to load provider config {}", path.display())
                })?;
                Ok(Arc::new(provider))
            }
            None => {
                tracing::warn!(
                    "No provider config given, token fetches will fail and requests carry the sentinel"
                );
                Ok(Arc::new(LocalDevProvider::unavailable()))
            }
        }
    }
}

/// Hostname part of `host[:port]`
fn bare_host(host: &str) -> &str {
    if host.starts_with('[') {
        return host
            .split_once(']')
            .map(|(h, _)| h.trim_start_matches('['))
            .unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Shape => {
            let provider: Arc<dyn AttestationProvider> = cli.provider()?;
            let executor = AttestedRequestExecutor::builder(provider)
                .config(cli.executor_config())
                .transport(cli.transport.into())
                .build()
                .context("Failed to set up attested executor")?;
            commands::shape::run(&executor, &cli.host).await?;
        }
        Commands::Hello => {
            commands::hello::run(&cli.host, cli.executor_config().request_timeout).await?;
        }
        Commands::Pin { host } => {
            let host = host.as_deref().unwrap_or_else(|| bare_host(&cli.host));
            commands::pin::run(cli.provider()?, host).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host() {
        assert_eq!(bare_host("demo-server.approovr.io"), "demo-server.approovr.io");
        assert_eq!(bare_host("localhost:8443"), "localhost");
        assert_eq!(bare_host("[::1]:8443"), "::1");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["shapes-client", "shape"]).unwrap();
        let config = cli.executor_config();

        assert_eq!(cli.host, "demo-server.approovr.io");
        assert_eq!(config.token_header, DEFAULT_TOKEN_HEADER);
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert!(matches!(cli.transport, TransportArg::Stream));
    }

    #[test]
    fn test_cli_transport_flag() {
        let cli =
            Cli::try_parse_from(["shapes-client", "--transport", "reqwest", "pin", "example.com"]).unwrap();

        assert!(matches!(TransportKind::from(cli.transport), TransportKind::Reqwest));
        assert!(matches!(cli.command, Commands::Pin { host: Some(ref h) } if h == "example.com"));
    }
}
