use clap::Parser;
use log::{error, info};
use server::client_manager::ConnectionManager;
use server::config::{ConfigLoader, SettingsSource};
use server::discovery::{DiscoveryResponder, ServerIdentity};
use server::session::Session;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the game and discovery sockets to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port for players
    #[arg(short, long, default_value_t = shared::TCP_PORT)]
    port: u16,

    /// UDP port answering discovery broadcasts
    #[arg(short, long, default_value_t = shared::UDP_PORT)]
    discovery_port: u16,

    /// Game settings file, created with defaults if missing
    #[arg(short, long, default_value = "arena.yaml")]
    config: PathBuf,

    /// Program launched on the settings file when it fails to validate
    #[arg(short, long)]
    editor: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=debug to log every line on the wire");
    }

    let args = Args::parse();

    let identity = ServerIdentity::generate();
    info!("Starting {} on {}", identity.id, identity.address);

    let responder =
        DiscoveryResponder::bind(&format!("{}:{}", args.host, args.discovery_port), identity)
            .await?;
    tokio::spawn(responder.run());

    let connections = ConnectionManager::bind(&format!("{}:{}", args.host, args.port)).await?;
    let source = SettingsSource::File(ConfigLoader::new(args.config, args.editor));
    let mut session = Session::new(connections, source).await;

    tokio::select! {
        result = session.run() => {
            if let Err(e) = result {
                error!("Session stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
