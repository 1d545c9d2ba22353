//! IPK25-CHAT Client - Terminal chat client
//!
//! Reads commands and chat lines from stdin and talks to an IPK25-CHAT server
//! over TCP or UDP.

use clap::Parser;
use ipk_client::{
    config::{ClientConfig, ConfigFile, Overrides},
    engine::ProtocolEngine,
    session::{ExitStatus, Session},
    shutdown::{install_signal_handler, Shutdown},
    Result,
};
use ipk_transport::TransportKind;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transport protocol (tcp or udp)
    #[arg(short = 't', long)]
    transport: Option<TransportKind>,

    /// Server hostname or IPv4 address
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Server port [default: 4567]
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// UDP confirmation timeout in milliseconds [default: 250]
    #[arg(short = 'd', long = "udp-timeout")]
    udp_timeout: Option<u64>,

    /// Maximum number of UDP retransmissions [default: 3]
    #[arg(short = 'r', long)]
    retransmissions: Option<u8>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let file = match &self.config {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                ConfigFile::load_from_file(path)?
            }
            None => ConfigFile::default(),
        };

        let overrides = Overrides {
            transport: self.transport,
            server: self.server.clone(),
            port: self.port,
            udp_timeout: self.udp_timeout,
            retransmissions: self.retransmissions,
        };

        ClientConfig::resolve(file, overrides)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let status = run().await;

    // Exit right away; the runtime would otherwise wait on the blocking stdin read
    std::process::exit(status.code());
}

async fn run() -> ExitStatus {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let status = if e.use_stderr() {
                ExitStatus::ArgParse
            } else {
                ExitStatus::Success
            };
            let _ = e.print();
            return status;
        }
    };

    // Logs go to stderr; stdout belongs to the chat
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match args.client_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            println!("ERROR: {}", e);
            return ExitStatus::ArgParse;
        }
    };

    let (trigger, shutdown) = Shutdown::channel();
    if let Err(e) = install_signal_handler(trigger) {
        error!("{}", e);
        println!("ERROR: {}", e);
        return ExitStatus::ClientFailure;
    }

    let mut engine = match ProtocolEngine::open(&config).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("{}", e);
            println!("ERROR: {}", e);
            return ExitStatus::ClientFailure;
        }
    };

    if let Err(e) = engine.connect().await {
        error!("{}", e);
        println!("ERROR: {}", e);
        return ExitStatus::ClientFailure;
    }

    let input = BufReader::new(tokio::io::stdin());
    let mut session = Session::new(engine, std::io::stdout(), config.reply_timeout());
    session.run(input, shutdown).await
}
