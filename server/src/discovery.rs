//! UDP beacon that lets clients on the local network find the server.
//!
//! The responder is independent of the session: it answers every exact
//! `DISCOVER_SNAKE_GAME` datagram with `SNAKE_GAME_HERE|<id>|<ip>` for the
//! whole lifetime of the process and never gives up on socket errors.

use log::{debug, error, info};
use shared::{DISCOVERY_REQUEST, DISCOVERY_RESPONSE_PREFIX};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use uuid::Uuid;

/// Address used only to pick the outbound interface; nothing is sent to it.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// What the beacon tells clients about this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub id: String,
    pub address: IpAddr,
}

impl ServerIdentity {
    pub fn new(id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: id.into(),
            address,
        }
    }

    /// Fresh random id plus the address of the outbound interface.
    pub fn generate() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(format!("snake_game_server-{}", &suffix[..8]), local_ip())
    }

    /// Body of a discovery response.
    pub fn response(&self) -> Vec<u8> {
        let mut response = DISCOVERY_RESPONSE_PREFIX.to_vec();
        response.extend_from_slice(format!("|{}|{}", self.id, self.address).as_bytes());
        response
    }
}

/// IPv4 address of the interface that would route to the internet, or
/// loopback when there is no such route.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(ROUTE_PROBE_ADDR)?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(e) => {
            debug!("No outbound route ({}), advertising loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Answer for one incoming datagram, if it deserves one.
pub fn handle_datagram(identity: &ServerIdentity, datagram: &[u8]) -> Option<Vec<u8>> {
    (datagram == DISCOVERY_REQUEST).then(|| identity.response())
}

pub struct DiscoveryResponder {
    socket: UdpSocket,
    identity: ServerIdentity,
}

impl DiscoveryResponder {
    pub async fn bind(addr: &str, identity: ServerIdentity) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        socket.set_broadcast(true)?;
        info!(
            "Discovery responder listening on {} as {}",
            socket.local_addr()?,
            identity.id
        );
        Ok(Self { socket, identity })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// Serves discovery requests forever.
    pub async fn run(self) {
        let mut buffer = [0u8; 1024];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let Some(response) = handle_datagram(&self.identity, &buffer[..len]) else {
                        debug!("Ignoring {} byte datagram from {}", len, addr);
                        continue;
                    };
                    match self.socket.send_to(&response, addr).await {
                        Ok(_) => debug!("Answered discovery request from {}", addr),
                        Err(e) => error!("Failed to answer discovery from {}: {}", addr, e),
                    }
                }
                Err(e) => {
                    error!("Error receiving discovery datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity::new("snake_game_server-0badf00d", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn test_response_format() {
        assert_eq!(
            identity().response(),
            b"SNAKE_GAME_HERE|snake_game_server-0badf00d|10.0.0.7".to_vec()
        );
    }

    #[test]
    fn test_only_exact_request_is_answered() {
        let identity = identity();
        assert!(handle_datagram(&identity, b"DISCOVER_SNAKE_GAME").is_some());
        assert!(handle_datagram(&identity, b"DISCOVER_SNAKE_GAME\n").is_none());
        assert!(handle_datagram(&identity, b"discover_snake_game").is_none());
        assert!(handle_datagram(&identity, b"").is_none());
    }

    #[test]
    fn test_generated_identity() {
        let identity = ServerIdentity::generate();
        let suffix = identity.id.strip_prefix("snake_game_server-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(identity.address.is_ipv4());
    }

    #[tokio::test]
    async fn test_responder_answers_over_udp() {
        let responder = DiscoveryResponder::bind("127.0.0.1:0", identity()).await.unwrap();
        let addr = responder.local_addr().unwrap();
        let task = tokio::spawn(responder.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"HELLO", addr).await.unwrap();
        client.send_to(DISCOVERY_REQUEST, addr).await.unwrap();

        let mut buffer = [0u8; 256];
        let (len, from) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, addr);
        assert_eq!(&buffer[..len], identity().response().as_slice());
        task.abort();
    }
}
