//! One player's TCP connection: line framing, write deadlines and liveness.

use crate::error::{IoDirection, SessionError};
use log::debug;
use shared::protocol::ServerMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Deadline for flushing one outgoing line.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Newline-delimited reader that survives cancellation.
///
/// Partially received bytes stay in `pending` when a read is abandoned, so
/// the next call picks up the same line instead of losing its start.
#[derive(Debug)]
pub struct LineReader<R = OwnedReadHalf> {
    inner: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Next line with surrounding whitespace stripped. `None` means the peer
    /// closed the connection, which includes sending a blank line.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.pending).await?;
        let line = std::mem::take(&mut self.pending);
        if read == 0 && line.is_empty() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&line).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

/// Read side of a client that input readers can hold on to.
#[derive(Debug, Clone)]
pub struct ClientReader {
    pub seat: Option<usize>,
    lines: Arc<Mutex<LineReader>>,
    alive: Arc<AtomicBool>,
}

impl ClientReader {
    /// Blocks until the client sends a non-empty line.
    pub async fn read(&self) -> Result<String, SessionError> {
        let mut lines = self.lines.lock().await;
        read_from(&mut *lines, self.seat).await
    }

    /// Marks the connection as unusable so the next roster check drops it.
    pub fn kick(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn lines(&self) -> &Arc<Mutex<LineReader>> {
        &self.lines
    }
}

pub(crate) async fn read_from<R: AsyncRead + Unpin>(
    lines: &mut LineReader<R>,
    seat: Option<usize>,
) -> Result<String, SessionError> {
    match lines.next_line().await {
        Ok(Some(line)) => {
            debug!("{} is read from seat {:?}", line, seat);
            Ok(line)
        }
        Ok(None) => Err(SessionError::lost(
            seat,
            IoDirection::Read,
            "client closed connection",
        )),
        Err(e) => Err(SessionError::lost(seat, IoDirection::Read, e)),
    }
}

/// Writes one message as a single `\n`-terminated line and flushes it
/// within `deadline`.
pub(crate) async fn write_to<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ServerMessage,
    seat: Option<usize>,
    deadline: Duration,
) -> Result<(), SessionError> {
    let mut line = message.encode()?;
    if line.is_empty() || line.contains(&b'\n') {
        return Err(SessionError::ProtocolViolation(format!(
            "{} cannot be sent as one line",
            message.label()
        )));
    }
    debug!(
        "{} is written to seat {:?} (length = {})",
        message.label(),
        seat,
        line.len()
    );
    line.push(b'\n');

    let send = async {
        writer.write_all(&line).await?;
        writer.flush().await
    };
    match timeout(deadline, send).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::lost(seat, IoDirection::Write, e)),
        Err(_) => Err(SessionError::lost(
            seat,
            IoDirection::Write,
            "flush timed out",
        )),
    }
}

/// A connected player: socket halves, seat and liveness.
#[derive(Debug)]
pub struct Client {
    /// Connection counter value assigned on accept
    pub id: u32,
    pub addr: SocketAddr,
    reader: ClientReader,
    writer: OwnedWriteHalf,
}

impl Client {
    pub fn new(id: u32, stream: TcpStream, addr: SocketAddr) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            id,
            addr,
            reader: ClientReader {
                seat: None,
                lines: Arc::new(Mutex::new(LineReader::new(read_half))),
                alive: Arc::new(AtomicBool::new(true)),
            },
            writer,
        }
    }

    pub fn seat(&self) -> Option<usize> {
        self.reader.seat
    }

    pub fn set_seat(&mut self, seat: usize) {
        self.reader.seat = Some(seat);
    }

    pub fn is_alive(&self) -> bool {
        self.reader.alive.load(Ordering::SeqCst)
    }

    pub fn kick(&self) {
        self.reader.kick();
    }

    /// Handle for a task that reads from this client concurrently.
    pub fn reader(&self) -> ClientReader {
        self.reader.clone()
    }

    pub async fn read(&self) -> Result<String, SessionError> {
        self.reader.read().await
    }

    pub async fn write(
        &mut self,
        message: &ServerMessage,
        deadline: Duration,
    ) -> Result<(), SessionError> {
        let seat = self.reader.seat;
        write_to(&mut self.writer, message, seat, deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{Cell, CellChange};
    use shared::Point;
    use tokio_test::io::Builder;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_reads_trimmed_lines() {
        let mock = Builder::new().read(b"SPACE_PRESSED\r\n  R \n").build();
        let mut lines = LineReader::new(mock);

        assert_eq!(
            lines.next_line().await.unwrap(),
            Some("SPACE_PRESSED".to_string())
        );
        assert_eq!(lines.next_line().await.unwrap(), Some("R".to_string()));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let mock = Builder::new().read(b"TEST_AN").read(b"SWER\n").build();
        let mut lines = LineReader::new(mock);
        assert_eq!(
            lines.next_line().await.unwrap(),
            Some("TEST_ANSWER".to_string())
        );
    }

    #[tokio::test]
    async fn test_blank_line_means_closed() {
        let mock = Builder::new().read(b"\r\n").build();
        let mut lines = LineReader::new(mock);
        let err = assert_err!(read_from(&mut lines, Some(1)).await);
        assert!(err.is_connection_lost());
        assert!(matches!(
            err,
            SessionError::ConnectionLost {
                seat: Some(1),
                op: IoDirection::Read,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_returned() {
        let mock = Builder::new().read(b"PONG").build();
        let mut lines = LineReader::new(mock);
        assert_eq!(read_from(&mut lines, None).await.unwrap(), "PONG");
    }

    #[tokio::test]
    async fn test_write_terminates_line() {
        let mut mock = Builder::new().write(b"SPACE_AWAIT\n").build();
        assert_ok!(write_to(&mut mock, &ServerMessage::SpaceAwait, Some(0), WRITE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_write_delta_bytes() {
        let changes = vec![CellChange {
            point: Point::new(1, 2),
            cell: Cell::Apple,
        }];
        let mut mock = Builder::new().write(b"STATE|\x65\x66A\n").build();
        assert_ok!(
            write_to(&mut mock, &ServerMessage::State(changes), Some(0), WRITE_TIMEOUT).await
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_connection_lost() {
        let mut mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "gone",
            ))
            .build();
        let err = assert_err!(write_to(&mut mock, &ServerMessage::Ping, Some(1), WRITE_TIMEOUT).await);
        assert!(matches!(
            err,
            SessionError::ConnectionLost {
                op: IoDirection::Write,
                ..
            }
        ));
    }
}
