//! Line protocol spoken over the session TCP connection.
//!
//! Every message is a single line terminated by `\n`. Control messages are
//! bare tokens, full boards travel as `STATE_INIT|<w>|<h>|<columns>` and
//! per-tick updates as `STATE|<delta>`, where the delta is a run of 3-byte
//! groups `(x + 100, y + 100, cell-code)` with no separators.

use crate::{Direction, Point, BYTE_CODE_SHIFT, MAX_SIDE};
use thiserror::Error;

/// Number of seats the cell code table has letters for.
pub const MAX_SEATS: usize = 2;

pub const OK: &str = "ok";
pub const REJECTED: &str = "Game already started";
pub const TEST: &str = "TEST";
pub const TEST_ANSWER: &str = "TEST_ANSWER";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const SPACE_AWAIT: &str = "SPACE_AWAIT";
pub const SPACE_PRESSED: &str = "SPACE_PRESSED";
pub const END_GAME: &str = "END_GAME";
pub const STATE_INIT: &str = "STATE_INIT";
pub const STATE: &str = "STATE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown token {0:?}")]
    UnknownToken(String),
    #[error("malformed STATE_INIT: {0}")]
    MalformedInit(String),
    #[error("delta length {0} is not a multiple of 3")]
    TruncatedDelta(usize),
    #[error("cell {0} does not fit the wire encoding")]
    CoordinateOutOfRange(Point),
    #[error("unknown cell code {0:#04x}")]
    UnknownCell(u8),
}

/// Content of one board cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Apple,
    Body(u8),
    Head(u8),
}

impl Cell {
    pub fn to_byte(self) -> u8 {
        match self {
            Cell::Empty => b'.',
            Cell::Apple => b'A',
            Cell::Body(seat) => b'c' + seat,
            Cell::Head(seat) => b'C' + seat,
        }
    }

    pub fn from_byte(code: u8) -> Result<Cell, ProtocolError> {
        let seats = MAX_SEATS as u8;
        match code {
            b'.' => Ok(Cell::Empty),
            b'A' => Ok(Cell::Apple),
            c if (b'c'..b'c' + seats).contains(&c) => Ok(Cell::Body(c - b'c')),
            c if (b'C'..b'C' + seats).contains(&c) => Ok(Cell::Head(c - b'C')),
            other => Err(ProtocolError::UnknownCell(other)),
        }
    }
}

/// One changed cell of a delta update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub point: Point,
    pub cell: Cell,
}

/// Rendered board, stored column-major (`x` outer, `y` inner) the same way
/// clients index it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        let size = (width.max(0) * height.max(0)) as usize;
        Self {
            width,
            height,
            cells: vec![Cell::Empty; size],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn index(&self, point: Point) -> Option<usize> {
        point
            .in_bound(self.width, self.height)
            .then(|| (point.x * self.height + point.y) as usize)
    }

    pub fn get(&self, point: Point) -> Option<Cell> {
        self.index(point).map(|i| self.cells[i])
    }

    /// Writes a cell; points outside the board are ignored.
    pub fn set(&mut self, point: Point, cell: Cell) {
        if let Some(i) = self.index(point) {
            self.cells[i] = cell;
        }
    }

    /// Cells of `newer` that differ from `self`, in column-major order.
    /// Both grids must share dimensions; a resized board yields every cell.
    pub fn diff(&self, newer: &Grid) -> Vec<CellChange> {
        let same_shape = self.width == newer.width && self.height == newer.height;
        let mut changes = Vec::new();
        for x in 0..newer.width {
            for y in 0..newer.height {
                let point = Point::new(x, y);
                let cell = newer.get(point).unwrap_or_default();
                if !same_shape || self.get(point) != Some(cell) {
                    changes.push(CellChange { point, cell });
                }
            }
        }
        changes
    }

    pub fn apply(&mut self, changes: &[CellChange]) {
        for change in changes {
            self.set(change.point, change.cell);
        }
    }

    fn encode_columns(&self) -> String {
        (0..self.width)
            .map(|x| {
                (0..self.height)
                    .map(|y| char::from(self.cells[(x * self.height + y) as usize].to_byte()))
                    .map(String::from)
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    fn decode(width: &str, height: &str, columns: &str) -> Result<Grid, ProtocolError> {
        let malformed = |what: &str| ProtocolError::MalformedInit(what.to_string());
        let width: i32 = width.parse().map_err(|_| malformed("width"))?;
        let height: i32 = height.parse().map_err(|_| malformed("height"))?;
        if width <= 0 || height <= 0 {
            return Err(malformed("non-positive size"));
        }

        let mut grid = Grid::new(width, height);
        let columns: Vec<&str> = columns.split(':').collect();
        if columns.len() != width as usize {
            return Err(malformed("column count"));
        }
        for (x, column) in columns.into_iter().enumerate() {
            let codes: Vec<&str> = column.split(',').collect();
            if codes.len() != height as usize {
                return Err(malformed("column height"));
            }
            for (y, code) in codes.into_iter().enumerate() {
                let [byte] = code.as_bytes() else {
                    return Err(malformed("cell code width"));
                };
                grid.set(Point::new(x as i32, y as i32), Cell::from_byte(*byte)?);
            }
        }
        Ok(grid)
    }
}

/// Packs changes into `(x + 100, y + 100, code)` triples.
pub fn encode_delta(changes: &[CellChange]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(changes.len() * 3);
    for change in changes {
        let Point { x, y } = change.point;
        if !(0..=MAX_SIDE).contains(&x) || !(0..=MAX_SIDE).contains(&y) {
            return Err(ProtocolError::CoordinateOutOfRange(change.point));
        }
        out.push(x as u8 + BYTE_CODE_SHIFT);
        out.push(y as u8 + BYTE_CODE_SHIFT);
        out.push(change.cell.to_byte());
    }
    Ok(out)
}

pub fn decode_delta(bytes: &[u8]) -> Result<Vec<CellChange>, ProtocolError> {
    if bytes.len() % 3 != 0 {
        return Err(ProtocolError::TruncatedDelta(bytes.len()));
    }
    bytes
        .chunks_exact(3)
        .map(|chunk| {
            let x = i32::from(chunk[0]) - i32::from(BYTE_CODE_SHIFT);
            let y = i32::from(chunk[1]) - i32::from(BYTE_CODE_SHIFT);
            let point = Point::new(x, y);
            if x < 0 || y < 0 {
                return Err(ProtocolError::CoordinateOutOfRange(point));
            }
            Ok(CellChange {
                point,
                cell: Cell::from_byte(chunk[2])?,
            })
        })
        .collect()
}

/// Lines sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Accepted,
    Rejected,
    Test,
    Ping,
    SpaceAwait,
    EndGame,
    StateInit(Grid),
    State(Vec<CellChange>),
}

impl ServerMessage {
    /// Leading token, used for logging without dumping board payloads.
    pub fn label(&self) -> &'static str {
        match self {
            ServerMessage::Accepted => OK,
            ServerMessage::Rejected => REJECTED,
            ServerMessage::Test => TEST,
            ServerMessage::Ping => PING,
            ServerMessage::SpaceAwait => SPACE_AWAIT,
            ServerMessage::EndGame => END_GAME,
            ServerMessage::StateInit(_) => STATE_INIT,
            ServerMessage::State(_) => STATE,
        }
    }

    /// Line body without the terminator. Delta payloads may contain bytes
    /// above 0x7f, so the result is raw bytes rather than a `String`.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ServerMessage::StateInit(grid) => Ok(format!(
                "{}|{}|{}|{}",
                STATE_INIT,
                grid.width,
                grid.height,
                grid.encode_columns()
            )
            .into_bytes()),
            ServerMessage::State(changes) => {
                let mut line = format!("{}|", STATE).into_bytes();
                line.extend(encode_delta(changes)?);
                Ok(line)
            }
            other => Ok(other.label().as_bytes().to_vec()),
        }
    }

    /// Parses one line with surrounding whitespace already removed.
    pub fn decode(line: &[u8]) -> Result<ServerMessage, ProtocolError> {
        if let Some(payload) = line.strip_prefix(b"STATE_INIT|") {
            let text = String::from_utf8_lossy(payload);
            let mut parts = text.splitn(3, '|');
            let (Some(w), Some(h), Some(columns)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ProtocolError::MalformedInit("missing fields".to_string()));
            };
            return Grid::decode(w, h, columns).map(ServerMessage::StateInit);
        }
        if let Some(payload) = line.strip_prefix(b"STATE|") {
            return decode_delta(payload).map(ServerMessage::State);
        }

        match std::str::from_utf8(line).unwrap_or_default() {
            OK => Ok(ServerMessage::Accepted),
            REJECTED => Ok(ServerMessage::Rejected),
            TEST => Ok(ServerMessage::Test),
            PING => Ok(ServerMessage::Ping),
            SPACE_AWAIT => Ok(ServerMessage::SpaceAwait),
            END_GAME => Ok(ServerMessage::EndGame),
            _ => Err(ProtocolError::UnknownToken(
                String::from_utf8_lossy(line).into_owned(),
            )),
        }
    }
}

/// Lines sent by a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMessage {
    TestAnswer,
    Pong,
    SpacePressed,
    Turn(Direction),
}

impl ClientMessage {
    pub fn token(&self) -> &'static str {
        match self {
            ClientMessage::TestAnswer => TEST_ANSWER,
            ClientMessage::Pong => PONG,
            ClientMessage::SpacePressed => SPACE_PRESSED,
            ClientMessage::Turn(dir) => dir.token(),
        }
    }

    pub fn parse(line: &str) -> Result<ClientMessage, ProtocolError> {
        match line.trim() {
            TEST_ANSWER => Ok(ClientMessage::TestAnswer),
            PONG => Ok(ClientMessage::Pong),
            SPACE_PRESSED => Ok(ClientMessage::SpacePressed),
            other => Direction::from_token(other)
                .map(ClientMessage::Turn)
                .ok_or_else(|| ProtocolError::UnknownToken(other.to_string())),
        }
    }
}
