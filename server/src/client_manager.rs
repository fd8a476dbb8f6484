//! TCP connection management for the session server
//!
//! This module owns everything about the players' connections:
//! - Accepting sockets and turning away anyone who arrives mid-game
//! - Liveness probing and roster trimming between rounds
//! - Seat assignment in connection order
//! - Sequential broadcast of server lines with per-client write deadlines
//!
//! Accepting runs on its own task; the roster itself is only touched by the
//! session driver, which owns the [`ConnectionManager`].

use crate::client::{Client, WRITE_TIMEOUT};
use crate::error::{IoDirection, SessionError};
use log::{debug, error, info, warn};
use shared::protocol::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a client gets to answer a liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Roster of connected players plus the accept loop feeding it.
pub struct ConnectionManager {
    clients: Vec<Client>,
    local_addr: SocketAddr,
    /// Sockets accepted while the roster was open
    incoming: mpsc::Receiver<(TcpStream, SocketAddr)>,
    /// Whether the accept loop should hand sockets over instead of refusing
    accepting: Arc<AtomicBool>,
    next_client_id: u32,
    write_timeout: Duration,
    acceptor: JoinHandle<()>,
}

impl ConnectionManager {
    /// Binds the listener and starts accepting in the background.
    pub async fn bind(addr: &str) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("TCP server listening on {}", local_addr);

        let (tx, incoming) = mpsc::channel(16);
        let accepting = Arc::new(AtomicBool::new(false));
        let acceptor = tokio::spawn(accept_loop(listener, tx, Arc::clone(&accepting)));

        Ok(Self {
            clients: Vec::new(),
            local_addr,
            incoming,
            accepting,
            next_client_id: 1,
            write_timeout: WRITE_TIMEOUT,
            acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Drops kicked clients and those failing a `TEST` probe.
    pub async fn check_clients(&mut self) {
        let mut alive = Vec::with_capacity(self.clients.len());
        for mut client in self.clients.drain(..) {
            if !client.is_alive() {
                info!("Client {} was kicked, dropping it", client.id);
                continue;
            }
            match probe(&mut client, self.write_timeout).await {
                Ok(()) => alive.push(client),
                Err(e) => info!("Client {} failed liveness probe: {}", client.id, e),
            }
        }
        self.clients = alive;
    }

    /// Rebuilds the roster until exactly `players` live clients are seated.
    ///
    /// Existing clients are probed first and the roster is trimmed if it
    /// overshoots; then new sockets are accepted until it is full. Seats are
    /// assigned in connection order.
    pub async fn wait_for_players(&mut self, players: usize) -> Result<(), SessionError> {
        self.check_clients().await;
        if self.clients.len() > players {
            info!("Dropping {} surplus client(s)", self.clients.len() - players);
            self.clients.truncate(players);
        }

        // Sockets forwarded after the previous roster filled were never
        // answered; their peers have been waiting since then.
        self.reject_queued();

        self.accepting.store(true, Ordering::SeqCst);
        while self.clients.len() < players {
            info!("Waiting for players: {}/{}", self.clients.len(), players);
            let Some((stream, addr)) = self.incoming.recv().await else {
                self.accepting.store(false, Ordering::SeqCst);
                return Err(SessionError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "accept loop stopped",
                )));
            };

            let mut client = Client::new(self.next_client_id, stream, addr);
            self.next_client_id += 1;
            match client.write(&ServerMessage::Accepted, self.write_timeout).await {
                Ok(()) => {
                    info!("Client {} connected from {}", client.id, addr);
                    self.clients.push(client);
                }
                Err(e) => warn!("Client {} from {} lost during handshake: {}", client.id, addr, e),
            }
        }
        self.accepting.store(false, Ordering::SeqCst);

        // Sockets that slipped in while the last seat was being filled.
        self.reject_queued();

        for (seat, client) in self.clients.iter_mut().enumerate() {
            client.set_seat(seat);
            debug!("Client {} takes seat {}", client.id, seat);
        }
        Ok(())
    }

    fn reject_queued(&mut self) {
        while let Ok((stream, addr)) = self.incoming.try_recv() {
            tokio::spawn(reject(stream, addr));
        }
    }

    /// Sends `message` to every client in seat order.
    ///
    /// A failing client is kicked but the remaining clients still get the
    /// line; the first failure is returned afterwards.
    pub async fn broadcast(&mut self, message: &ServerMessage) -> Result<(), SessionError> {
        let mut first_error = None;
        for client in &mut self.clients {
            if let Err(e) = client.write(message, self.write_timeout).await {
                if !e.is_connection_lost() {
                    return Err(e);
                }
                warn!("Broadcast to client {} failed: {}", client.id, e);
                client.kick();
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Reads one line from every client, in seat order.
    pub async fn read_all(&self) -> Result<Vec<String>, SessionError> {
        let mut answers = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            answers.push(read_control(client).await?);
        }
        Ok(answers)
    }

    /// Round trip of a `PING`, informational only.
    pub async fn check_ping(&mut self, seat: usize) -> Result<Duration, SessionError> {
        let write_timeout = self.write_timeout;
        let Some(client) = self.clients.get_mut(seat) else {
            return Ok(Duration::ZERO);
        };
        let start = tokio::time::Instant::now();
        client.write(&ServerMessage::Ping, write_timeout).await?;
        let answer = read_control(client).await?;
        if answer != ClientMessage::Pong.token() {
            debug!("Seat {} answered PING with {}", seat, answer);
        }
        Ok(start.elapsed())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

/// Reads the next control line, skipping direction tokens that were still
/// in flight when the previous round ended.
async fn read_control(client: &Client) -> Result<String, SessionError> {
    loop {
        let line = client.read().await?;
        match ClientMessage::parse(&line) {
            Ok(ClientMessage::Turn(dir)) => {
                debug!("Discarding stale {} from client {}", dir, client.id)
            }
            _ => return Ok(line),
        }
    }
}

async fn probe(client: &mut Client, write_timeout: Duration) -> Result<(), SessionError> {
    client.write(&ServerMessage::Test, write_timeout).await?;
    let answer = match timeout(PROBE_TIMEOUT, read_control(client)).await {
        Ok(answer) => answer?,
        Err(_) => {
            return Err(SessionError::lost(
                client.seat(),
                IoDirection::Read,
                "probe timed out",
            ))
        }
    };
    if answer == ClientMessage::TestAnswer.token() {
        Ok(())
    } else {
        Err(SessionError::lost(
            client.seat(),
            IoDirection::Read,
            format!("unexpected probe answer {:?}", answer),
        ))
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<(TcpStream, SocketAddr)>,
    accepting: Arc<AtomicBool>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if accepting.load(Ordering::SeqCst) {
                    if tx.send((stream, addr)).await.is_err() {
                        break;
                    }
                } else {
                    tokio::spawn(reject(stream, addr));
                }
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Tells a late joiner the game is running and closes the socket.
async fn reject(mut stream: TcpStream, addr: SocketAddr) {
    info!("Refusing connection from {}: game already started", addr);
    let line = [ServerMessage::Rejected.label().as_bytes(), b"\n"].concat();
    let send = async {
        stream.write_all(&line).await?;
        stream.shutdown().await
    };
    if let Ok(Err(e)) = timeout(WRITE_TIMEOUT, send).await {
        debug!("Failed to refuse {}: {}", addr, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

    type Peer = (BufReader<OwnedReadHalf>, OwnedWriteHalf);

    async fn connect(addr: SocketAddr) -> Peer {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        (BufReader::new(read), write)
    }

    async fn next_line(peer: &mut Peer) -> String {
        let mut line = String::new();
        peer.0.read_line(&mut line).await.unwrap();
        line.trim().to_string()
    }

    /// Seats `count` peers that completed the `ok` handshake.
    async fn seated(manager: &mut ConnectionManager, count: usize) -> Vec<Peer> {
        let addr = manager.local_addr();
        let peers = tokio::spawn(async move {
            let mut peers = Vec::new();
            for _ in 0..count {
                let mut peer = connect(addr).await;
                assert_eq!(next_line(&mut peer).await, "ok");
                peers.push(peer);
            }
            peers
        });
        manager.wait_for_players(count).await.unwrap();
        peers.await.unwrap()
    }

    #[tokio::test]
    async fn test_seats_follow_connection_order() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let _peers = seated(&mut manager, 2).await;

        assert_eq!(manager.len(), 2);
        assert_eq!(manager.clients()[0].seat(), Some(0));
        assert_eq!(manager.clients()[1].seat(), Some(1));
        assert!(manager.clients()[0].id < manager.clients()[1].id);
    }

    #[tokio::test]
    async fn test_rejects_when_not_accepting() {
        let manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let mut peer = connect(manager.local_addr()).await;
        assert_eq!(next_line(&mut peer).await, "Game already started");
    }

    #[tokio::test]
    async fn test_probe_drops_silent_clients() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let mut peers = seated(&mut manager, 2).await;
        let _silent = peers.pop().unwrap();
        let mut responsive = peers.pop().unwrap();

        let answer = tokio::spawn(async move {
            assert_eq!(next_line(&mut responsive).await, "TEST");
            responsive.1.write_all(b"TEST_ANSWER\n").await.unwrap();
            responsive
        });

        manager.check_clients().await;
        let _responsive = answer.await.unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.clients()[0].id, 1);
    }

    #[tokio::test]
    async fn test_kicked_clients_are_dropped_without_probe() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let _peers = seated(&mut manager, 1).await;

        manager.clients()[0].kick();
        manager.check_clients().await;
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_seat() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let mut peers = seated(&mut manager, 2).await;

        manager.broadcast(&ServerMessage::SpaceAwait).await.unwrap();
        for peer in &mut peers {
            assert_eq!(next_line(peer).await, "SPACE_AWAIT");
        }
        assert!(manager.clients().iter().all(Client::is_alive));
    }

    #[tokio::test]
    async fn test_broadcast_skips_past_failed_seat() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let mut peers = seated(&mut manager, 2).await;
        let mut survivor = peers.pop().unwrap();
        drop(peers);

        // The first write to a closed peer may still be buffered locally.
        let mut failure = None;
        for _ in 0..50 {
            let result = manager.broadcast(&ServerMessage::Ping).await;
            assert_eq!(next_line(&mut survivor).await, "PING");
            if let Err(e) = result {
                failure = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let err = failure.expect("writes to a closed peer kept succeeding");
        assert!(err.is_connection_lost());
        assert!(matches!(err, SessionError::ConnectionLost { seat: Some(0), .. }));
        assert!(!manager.clients()[0].is_alive());
        assert!(manager.clients()[1].is_alive());
    }

    #[tokio::test]
    async fn test_socket_queued_between_rosters_is_rejected() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let addr = manager.local_addr();

        // A socket the accept loop forwarded just as the last roster closed.
        manager.accepting.store(true, Ordering::SeqCst);
        let mut stale = connect(addr).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.accepting.store(false, Ordering::SeqCst);

        let fresh = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut peer = connect(addr).await;
            assert_eq!(next_line(&mut peer).await, "ok");
            peer
        });
        manager.wait_for_players(1).await.unwrap();
        let _fresh = fresh.await.unwrap();

        assert_eq!(next_line(&mut stale).await, "Game already started");
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.clients()[0].id, 1);
    }

    #[tokio::test]
    async fn test_read_all_skips_stale_directions() {
        let mut manager = ConnectionManager::bind("127.0.0.1:0").await.unwrap();
        let mut peers = seated(&mut manager, 1).await;

        peers[0].1.write_all(b"U\nL\nSPACE_PRESSED\n").await.unwrap();
        assert_eq!(manager.read_all().await.unwrap(), vec!["SPACE_PRESSED"]);
    }
}
