//! Zentinel Mock Dispatch - CLI Entry Point
//!
//! Loads a stub file and dispatches a single request through the handler,
//! printing the rendered response.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_mock_dispatch::{
    InMemoryStubServer, Request, RequestMethod, StubRequestHandler, StubResponseRenderer,
    StubServerConfig, TracingNotifier,
};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-mock-dispatch",
    about = "Dispatch a request against HTTP stub definitions and print the response",
    version
)]
struct Args {
    /// Path to stub configuration file
    #[arg(short, long, default_value = "stubs.yaml")]
    config: PathBuf,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: RequestMethod,

    /// Request URL (path and query)
    #[arg(short, long, default_value = "/")]
    url: String,

    /// Request header as NAME:VALUE (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long)]
    body: Option<String>,

    /// Client address reported in the request log line
    #[arg(long, default_value = "127.0.0.1")]
    client_ip: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../config/default-stubs.yaml"));
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        StubServerConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        StubServerConfig::default()
    };

    if args.validate {
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let renderer = StubResponseRenderer::new(&config.settings);
    let stub_server = InMemoryStubServer::new(config)?;
    let handler = StubRequestHandler::new(Arc::new(stub_server), Arc::new(renderer))
        .with_notifier(Arc::new(TracingNotifier));

    let mut builder = Request::builder()
        .method(args.method)
        .url(args.url)
        .client_ip(args.client_ip);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("Invalid header {:?}, expected NAME:VALUE", header))?;
        builder = builder.header(name.trim(), value.trim());
    }
    if let Some(body) = args.body {
        builder = builder.body(body);
    }

    let response = handler.handle(&builder.build())?;

    println!("HTTP {}", response.status());
    for (name, value) in response.headers().iter() {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", response.body_as_string());

    Ok(())
}
