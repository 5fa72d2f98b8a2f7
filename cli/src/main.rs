// onionrelay — relay, client and application-server modes in one binary
//
// Every mode shares the file-backed relay directory, so a local network is a
// handful of `onionrelay relay` processes, one `onionrelay server` and any
// number of `onionrelay client` calls.

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use config::Config;
use onionrelay_core::app::AppServerConfig;
use onionrelay_core::transport::tcp;
use onionrelay_core::{
    ApplicationServer, ClientConfig, FileDirectory, HeaderScheme, OnionClient, RelayContext,
    RelayService, RequestType, TcpTransport,
};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "onionrelay")]
#[command(about = "Three-hop onion routing over a shared relay directory", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory root shared by relays and clients
    #[arg(short, long, global = true)]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay node
    Relay {
        /// Node id, published as /relays/<id>
        #[arg(short, long)]
        id: String,
        /// Address to listen on and advertise
        #[arg(short, long, default_value = "127.0.0.1:9001")]
        listen: SocketAddrV4,
        /// Header sealing scheme (rsa or x25519)
        #[arg(short, long)]
        scheme: Option<String>,
    },
    /// Run the application server
    Server {
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: SocketAddrV4,
    },
    /// Send one request through a fresh circuit
    Client {
        /// Application server the exit relay should reach
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        server: SocketAddrV4,
        #[arg(value_enum)]
        request: RequestKind,
        /// Request argument (a number, or the echo text)
        #[arg(default_value = "")]
        body: String,
        /// Circuit id for the first circuit
        #[arg(long)]
        circuit_id: Option<u16>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestKind {
    Greet,
    Fibonacci,
    Random,
    Echo,
}

impl From<RequestKind> for RequestType {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Greet => RequestType::Greet,
            RequestKind::Fibonacci => RequestType::Fibonacci,
            RequestKind::Random => RequestType::RandomNumbers,
            RequestKind::Echo => RequestType::Echo,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let role = match cli.command {
        Commands::Relay { .. } => Some("relay"),
        Commands::Server { .. } => Some("server"),
        Commands::Client { .. } => None,
    };
    let _log_guard = logging::init(role)?;

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(directory) = cli.directory {
        config.directory_path = Some(directory);
    }

    match cli.command {
        Commands::Relay { id, listen, scheme } => cmd_relay(config, id, listen, scheme).await,
        Commands::Server { listen } => cmd_server(listen).await,
        Commands::Client {
            server,
            request,
            body,
            circuit_id,
        } => cmd_client(config, server, request.into(), body, circuit_id).await,
    }
}

fn open_directory(config: &Config) -> Result<Arc<FileDirectory>> {
    let root = config.directory_root()?;
    let directory = FileDirectory::open(&root)
        .with_context(|| format!("Failed to open directory at {}", root.display()))?;
    Ok(Arc::new(directory))
}

/// Resolves when ctrl-c arrives
async fn wait_for_ctrl_c() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

async fn cmd_relay(
    mut config: Config,
    id: String,
    listen: SocketAddrV4,
    scheme: Option<String>,
) -> Result<()> {
    if let Some(scheme) = scheme {
        config.relay.header_scheme = scheme
            .parse::<HeaderScheme>()
            .map_err(anyhow::Error::msg)?;
    }

    let directory = open_directory(&config)?;
    let identity = config
        .relay
        .generate_identity()
        .context("Failed to generate relay identity")?;

    let ctx = RelayContext::new(
        id,
        identity,
        listen,
        directory,
        Arc::new(TcpTransport::default()),
        config.relay,
    )
    .context("Invalid relay configuration")?;

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    let mut service = RelayService::start(Arc::new(ctx))
        .await
        .context("Failed to start relay")?;
    service.serve_tcp(listener);

    println!(
        "{} {} on {}",
        "Relay".green().bold(),
        service.context().node_id,
        listen
    );

    wait_for_ctrl_c().await?;
    info!("Shutting down relay");
    service.shutdown().await;
    Ok(())
}

async fn cmd_server(listen: SocketAddrV4) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    let server = Arc::new(ApplicationServer::new(AppServerConfig::default()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(tcp::serve(listener, server, shutdown_rx));
    println!("{} on {}", "Application server".green().bold(), listen);

    wait_for_ctrl_c().await?;
    info!("Shutting down application server");
    let _ = shutdown_tx.send(true);
    task.await
        .context("Server task panicked")?
        .context("Server listener failed")?;
    Ok(())
}

async fn cmd_client(
    config: Config,
    server: SocketAddrV4,
    request: RequestType,
    body: String,
    circuit_id: Option<u16>,
) -> Result<()> {
    let directory = open_directory(&config)?;

    let client_config = ClientConfig {
        destination: server,
        circuit_id,
        max_attempts: config.client.max_attempts,
        params: config.client.params,
    };
    let mut client = OnionClient::new(directory, Arc::new(TcpTransport::default()), client_config)
        .context("Invalid client configuration")?;

    let circuit = client
        .build_circuit()
        .await
        .context("Failed to build circuit")?;
    let hops: Vec<SocketAddrV4> = circuit.hops.iter().map(|hop| hop.address).collect();
    info!("Circuit {} via {:?}", circuit.circuit_id, hops);

    let reply = client
        .request(request, body.as_bytes())
        .await
        .context("Request failed")?;
    println!("{} {}", "Reply:".cyan().bold(), String::from_utf8_lossy(&reply));

    if let Err(e) = client.destroy().await {
        println!("{} {}", "Destroy failed:".yellow(), e);
    }
    Ok(())
}
