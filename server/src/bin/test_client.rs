//! Headless bot that plays against a running server.
//!
//! Finds the server over UDP unless `--server` is given, joins, keeps its own
//! copy of the grid from `STATE_INIT` plus deltas, and steers at random.

use clap::Parser;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::protocol::{Cell, ClientMessage, Grid, ServerMessage};
use shared::{Direction, Point, DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address; discovered over UDP broadcast when omitted
    #[arg(short, long)]
    server: Option<SocketAddr>,

    /// UDP port the server's discovery responder listens on
    #[arg(short, long, default_value_t = shared::UDP_PORT)]
    discovery_port: u16,

    /// Chance of sending a turn after each state update
    #[arg(short, long, default_value = "0.3")]
    turn_chance: f64,

    /// Seconds to wait for a discovery answer
    #[arg(long, default_value = "3")]
    discovery_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let server = match args.server {
        Some(addr) => addr,
        None => {
            discover(
                args.discovery_port,
                Duration::from_secs(args.discovery_timeout),
            )
            .await?
        }
    };

    info!("Connecting to {}", server);
    let stream = TcpStream::connect(server).await?;
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut rng = rand::thread_rng();
    let mut grid: Option<Grid> = None;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            info!("Server closed the connection");
            return Ok(());
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }

        let message = match ServerMessage::decode(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable line from server: {}", e);
                continue;
            }
        };
        debug!("Received {}", message.label());

        match message {
            ServerMessage::Accepted => info!("Joined the game"),
            ServerMessage::Rejected => {
                info!("Server refused us: game already started");
                return Ok(());
            }
            ServerMessage::Test => send(&mut writer, ClientMessage::TestAnswer).await?,
            ServerMessage::Ping => send(&mut writer, ClientMessage::Pong).await?,
            ServerMessage::SpaceAwait => send(&mut writer, ClientMessage::SpacePressed).await?,
            ServerMessage::EndGame => {
                if let Some(grid) = grid.take() {
                    info!("Round over, {} apple(s) left", count(&grid, Cell::Apple));
                }
            }
            ServerMessage::StateInit(initial) => {
                info!("Round started on a {}x{} board", initial.width(), initial.height());
                grid = Some(initial);
            }
            ServerMessage::State(changes) => {
                let Some(grid) = grid.as_mut() else {
                    warn!("Delta before STATE_INIT, ignoring");
                    continue;
                };
                grid.apply(&changes);
                if rng.gen_bool(args.turn_chance) {
                    if let Some(dir) = Direction::ALL.choose(&mut rng) {
                        send(&mut writer, ClientMessage::Turn(*dir)).await?;
                    }
                }
            }
        }
    }
}

async fn discover(port: u16, wait: Duration) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(DISCOVERY_REQUEST, ("255.255.255.255", port))
        .await?;
    info!("Looking for a server on UDP port {}", port);

    let mut buffer = [0u8; 256];
    let (len, from) = timeout(wait, socket.recv_from(&mut buffer))
        .await
        .map_err(|_| "no server answered the discovery broadcast")??;

    let text = String::from_utf8_lossy(&buffer[..len]).to_string();
    let prefix = String::from_utf8_lossy(DISCOVERY_RESPONSE_PREFIX);
    let mut parts = text.split('|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(id), Some(ip)) if tag == prefix => {
            info!("Found {} at {} (answered from {})", id, ip, from);
            Ok(SocketAddr::new(ip.parse()?, shared::TCP_PORT))
        }
        _ => Err(format!("unexpected discovery answer {:?}", text).into()),
    }
}

async fn send(writer: &mut OwnedWriteHalf, message: ClientMessage) -> std::io::Result<()> {
    debug!("Sending {}", message.token());
    writer.write_all(message.token().as_bytes()).await?;
    writer.write_all(b"\n").await
}

fn count(grid: &Grid, wanted: Cell) -> usize {
    (0..grid.width())
        .flat_map(|x| (0..grid.height()).map(move |y| Point::new(x, y)))
        .filter(|p| grid.get(*p) == Some(wanted))
        .count()
}
