use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use socket_inbox::{client, constants::*, logging, Server, ServerConfig};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info};

#[derive(Parser)]
#[command(name = "socket-inbox")]
#[command(about = "Capture raw TCP messages into an inbox directory")]
#[command(version)]
struct Cli {
    /// Console log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    loglevel: LogLevel,
    /// Also log (at debug level) to this file
    #[arg(long, global = true)]
    logfile: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the listener and save every received message
    Listen(ListenArgs),
    /// Send one message to a listener
    Send {
        /// Listener host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Listener port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Single-line message; read verbatim from stdin when omitted
        message: Option<String>,
    },
}

#[derive(Args)]
struct ListenArgs {
    /// TOML file with base settings; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Host to bind to (e.g., 127.0.0.1 or 0.0.0.0)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on [default: 15001]
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory where incoming messages are saved
    #[arg(long)]
    datadir: Option<PathBuf>,
    /// External command run with each saved file's path
    #[arg(long)]
    post_processing: Option<PathBuf>,
    /// Maximum concurrent connections [default: 100]
    #[arg(long)]
    max_connections: Option<usize>,
    /// Idle read timeout in seconds, 0 disables [default: 30]
    #[arg(long)]
    read_timeout: Option<u64>,
    /// Discard messages larger than this many bytes [default: unbounded]
    #[arg(long)]
    max_message_size: Option<usize>,
    /// Kill post-processing after this many seconds, 0 disables [default: 60]
    #[arg(long)]
    post_processing_timeout: Option<u64>,
}

impl ListenArgs {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(datadir) = self.datadir {
            config.datadir = datadir;
        }
        if let Some(cmd) = self.post_processing {
            config.post_processing = Some(cmd);
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(secs) = self.read_timeout {
            config.read_timeout_secs = secs;
        }
        if let Some(limit) = self.max_message_size {
            config.max_message_size = Some(limit);
        }
        if let Some(secs) = self.post_processing_timeout {
            config.post_processing_timeout_secs = secs;
        }
        Ok(config)
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.loglevel.into(), cli.logfile.as_deref())?;
    debug!("Running Socket Inbox command line");

    match cli.command {
        Commands::Listen(args) => listen(args.into_config()?).await,
        Commands::Send { host, port, message } => send(&host, port, message).await,
    }
}

async fn listen(config: ServerConfig) -> Result<()> {
    info!("Starting socket server...");
    info!("Server configuration:");
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Data directory: {}", config.datadir.display());
    info!(
        "  Post-processing: {}",
        config
            .post_processing
            .as_ref()
            .map_or_else(|| "None".to_string(), |p| p.display().to_string())
    );
    info!("  Max connections: {}", config.max_connections);

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server failed to start: {}", e);
            return Err(e.into());
        }
    };

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    info!("Press Ctrl-C to stop the server");
    server
        .run_until(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("Server shutdown requested by user"),
            }
        })
        .await;

    Ok(())
}

async fn send(host: &str, port: u16, message: Option<String>) -> Result<()> {
    let payload = match message {
        Some(message) => client::single_line(&message),
        None => {
            let mut buffer = Vec::new();
            let bytes_read = tokio::io::stdin()
                .take(MAX_STDIN_SIZE as u64)
                .read_to_end(&mut buffer)
                .await
                .context("Failed to read stdin")?;
            if bytes_read == MAX_STDIN_SIZE {
                anyhow::bail!("Stdin data too large (max {} bytes)", MAX_STDIN_SIZE);
            }
            buffer
        }
    };

    let sent = client::send_message(host, port, &payload).await?;
    println!("Sent {} bytes to {}:{}", sent, host, port);
    Ok(())
}
