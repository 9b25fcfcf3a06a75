//! CAN WebSocket Relay Server
//!
//! Command-line front end of the can-ws-relay library. It:
//! - Merges the command line with an optional config.toml
//! - Starts the WebSocket transport
//! - Opens one raw CAN socket per requested interface
//! - Relays frames until SIGINT/SIGTERM

use anyhow::{Context, Result};
use can_ws_relay::{
    IndexCache, Multiplexer, RawCanSocket, RelayConfig, ShutdownSignal, SignalWatcher,
    TransportConfig, WsTransport,
};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;

#[cfg(not(target_os = "linux"))]
compile_error!("canwsserver needs Linux SocketCAN");

/// CAN WebSocket Relay - Stream live CAN frames to WebSocket clients
#[derive(Parser, Debug)]
#[command(name = "canwsserver")]
#[command(about = "Relay CAN frames to WebSocket subscribers", long_about = None)]
#[command(version)]
#[command(after_help = "Use interface name 'any' to receive from all CAN interfaces.\n\
                        Use CTRL-C to terminate.\n\n\
                        Example:\n  canwsserver -p 7681 can0 can1")]
struct Args {
    /// CAN interfaces to relay (e.g. can0, vcan1, any)
    #[arg(value_name = "CAN_INTERFACE")]
    interfaces: Vec<String>,

    /// Listening port of the WebSocket server [default: 7681]
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Listening address of the WebSocket server [default: 0.0.0.0]
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_logging(args.verbose, args.quiet);

    let config = match relay_config(&args) {
        Ok(Some(config)) => config,
        Ok(None) => {
            let _ = Args::command().print_help();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            log::error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!("CAN WebSocket Relay v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using relay library v{}", can_ws_relay::VERSION);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Build the relay configuration, or `None` when no interface was given
fn relay_config(args: &Args) -> Result<Option<RelayConfig>> {
    let file = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            Some(config::load_config(path)?)
        }
        None => None,
    };

    let config = config::build_relay_config(
        file,
        config::Overrides {
            interfaces: &args.interfaces,
            port: args.port,
            bind: args.bind.as_deref(),
        },
    )?;

    if config.interfaces.is_empty() {
        return Ok(None);
    }
    Ok(Some(config))
}

/// Bring everything up, relay until shutdown and tear everything down
fn run(config: &RelayConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let shutdown = ShutdownSignal::new().context("Cannot create shutdown signal")?;
    let watcher =
        SignalWatcher::spawn(shutdown.clone()).context("Cannot install signal handlers")?;

    let mut transport = WsTransport::create(TransportConfig::from(config))
        .context("WebSocket server initialisation failed")?;
    transport
        .start()
        .context("Unable to start WebSocket service loop")?;
    log::info!("Listening on ws://{}", transport.local_addr());

    let endpoints = config
        .interfaces
        .iter()
        .map(RawCanSocket::open)
        .collect::<can_ws_relay::Result<Vec<_>>>()
        .context("Cannot open CAN socket")?;

    for endpoint in &config.interfaces {
        log::info!("Relaying from {}", endpoint.name);
    }

    let mut cache = IndexCache::new(config.cache_capacity);
    cache.note_name_len(config.longest_interface_name());

    let mut mux = Multiplexer::new(endpoints, cache, transport.dispatcher(), shutdown);
    let result = mux.run();

    let stats = mux.close();
    transport.destroy();
    watcher.stop();

    log::info!(
        "Relayed {} frames ({} dispatches, {} without timestamp)",
        stats.frames,
        stats.dispatches,
        stats.degraded_timestamps
    );

    result.context("Frame relay stopped")?;
    log::info!("Shutdown complete");
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
