//! ptyhub
//!
//! Backend owning pseudo-terminal sessions on behalf of UI windows. Windows
//! connect over WebSocket, create sessions, stream their output with flow
//! control, and lose their sessions when they disconnect.

mod client;
mod config;
mod manager;
mod pty;
mod server;
mod services;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use client::PtyIpcBridge;
use config::{BackendConfig, CONFIG_FILE};
use manager::{spawn_manager, ManagerSettings, PtyManager};
use pty::{NativePtyConnector, Pty, INITIAL_PERMITTED_DATA_SIZE};
use server::{Backend, PtyCreateRequest, ServerConfig, WebSocketServer};

/// PTY session backend for terminal windows
#[derive(Parser, Debug)]
#[command(name = "ptyhub")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the backend server
    Serve(ServeArgs),
    /// Run a command in a backend session attached to this terminal
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Authentication token for remote connections
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Backend URL
    #[arg(long, default_value = "ws://127.0.0.1:9000/ws")]
    url: String,

    /// Terminal columns
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Terminal rows
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Command and arguments to run
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    info!("ptyhub v{}", env!("CARGO_PKG_VERSION"));

    let mut config = BackendConfig::load(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if args.token.is_some() {
        config.token = args.token;
    }
    if config.token.is_some() {
        info!("Token authentication enabled");
    }

    let settings = ManagerSettings {
        default_cwd: config.default_cwd.clone(),
        write_buffer_size: config.max_write_buffer_size,
    };
    let (manager, exited) = PtyManager::new(Arc::new(NativePtyConnector::new()), settings);
    let backend = Arc::new(Backend::new(&config, spawn_manager(manager, exited))?);

    let mut window_events = backend.subscribe_window_events();
    tokio::spawn(async move {
        while let Ok(event) = window_events.recv().await {
            debug!(?event, "Window event");
        }
    });

    let server = Arc::new(WebSocketServer::bind(ServerConfig::from(&config), backend).await?);
    let server_handle = Arc::clone(&server);

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let connection = client::connect(&args.url).await?;
    let ptys = PtyIpcBridge::new(connection.bridge().clone());

    let mut command = args.command.into_iter();
    let program = command.next().unwrap_or_default();
    let env: HashMap<String, String> = std::env::vars().collect();
    let request =
        PtyCreateRequest::new(program, command.collect(), args.cols, args.rows).with_env(env);

    let (pty, mut events) = ptys.create_pty(request).await?;
    let pty = Arc::new(pty);
    info!(session = pty.id(), "Session started");

    tokio::spawn({
        let pty = Arc::clone(&pty);
        async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if pty.write(&String::from_utf8_lossy(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    while let Some(chunk) = events.data.recv().await {
        stdout.write_all(chunk.as_bytes()).await?;
        stdout.flush().await?;
        // Everything received so far is on screen
        pty.permitted_data_size(INITIAL_PERMITTED_DATA_SIZE);
    }

    match events.exit.await {
        Ok(exit) => debug!(?exit, "Session ended"),
        Err(_) => error!("Connection lost"),
    }
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
