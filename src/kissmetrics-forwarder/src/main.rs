//! KISSmetrics forwarder: maps analytics messages onto the KISSmetrics
//! tracking API and delivers them.
//!
//! `serve` runs the HTTP ingestion API. `map` is an offline dry run that
//! prints the calls each message would produce.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kissmetrics_api::ApiServer;
use kissmetrics_core::config::AppConfig;
use kissmetrics_core::{Message, Settings};
use kissmetrics_dispatch::{Dispatcher, HttpTransport};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kissmetrics-forwarder")]
#[command(about = "Forwards analytics messages to the KISSmetrics tracking API")]
#[command(version)]
struct Cli {
    /// KISSmetrics API key (overrides config)
    #[arg(long, global = true, env = "KISSMETRICS__SETTINGS__API_KEY")]
    api_key: Option<String>,

    /// Prefix every property with its event name
    #[arg(long, global = true, default_value_t = false)]
    prefix_properties: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP ingestion API
    Serve {
        /// HTTP port (overrides config)
        #[arg(long, env = "KISSMETRICS__API__HTTP_PORT")]
        http_port: Option<u16>,

        /// Tracking API base URL (overrides config)
        #[arg(long, env = "KISSMETRICS__TRANSPORT__ENDPOINT")]
        endpoint: Option<String>,
    },
    /// Print the calls for newline-delimited JSON messages without sending them
    Map {
        /// Input file; reads stdin when omitted
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `map` output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(
            |_| {
                "kissmetrics_forwarder=info,kissmetrics_dispatch=info,kissmetrics_api=info,tower_http=info"
                    .into()
            },
        ))
        .with_writer(io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(api_key) = cli.api_key {
        config.settings.api_key = Some(api_key);
    }
    if cli.prefix_properties {
        config.settings.prefix_properties = true;
    }

    match cli.command {
        Command::Serve {
            http_port,
            endpoint,
        } => {
            if let Some(port) = http_port {
                config.api.http_port = port;
            }
            if let Some(endpoint) = endpoint {
                config.transport.endpoint = endpoint;
            }
            serve(config).await
        }
        Command::Map { input } => map(&config, input),
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let settings = Settings::from_config(&config.settings)?;
    let transport = HttpTransport::new(&config.transport)?;
    let dispatcher = Arc::new(Dispatcher::new(settings, Arc::new(transport))?);

    info!(
        endpoint = %config.transport.endpoint,
        retries = config.transport.retries,
        http_port = config.api.http_port,
        prefix_properties = config.settings.prefix_properties,
        "Configuration loaded"
    );

    let api_server = ApiServer::new(config.clone(), dispatcher);

    if config.metrics.enabled {
        if let Err(e) = api_server.start_metrics() {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    info!("KISSmetrics forwarder is ready to serve traffic");

    // Blocks until shutdown
    api_server.start_http().await
}

fn map(config: &AppConfig, input: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = Settings::from_config(&config.settings)?;

    let reader: Box<dyn BufRead> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0usize;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;

        let planned = serde_json::from_str::<Message>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|message| Ok(kissmetrics_mapper::map(&message, &settings)?));

        match planned {
            Ok(mapped) => {
                for call in mapped.into_calls() {
                    writeln!(out, "{}", serde_json::to_string(&call)?)?;
                }
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping message");
                failed += 1;
            }
        }
    }

    out.flush()?;
    if failed > 0 {
        anyhow::bail!("{failed} message(s) could not be mapped");
    }
    Ok(())
}
