//! Wire-level vocabulary shared by the arena server and its peers.
//!
//! Grid coordinates, movement directions, well-known ports and the line
//! protocol codec live here so that any client speaking to the server can
//! reuse exactly the same encoding rules.

use std::fmt;
use std::ops::{Add, Sub};

pub mod protocol;

/// TCP port the session server listens on.
pub const TCP_PORT: u16 = 8888;
/// UDP port the discovery beacon answers on.
pub const UDP_PORT: u16 = 9999;
/// Exact datagram a client broadcasts to find servers.
pub const DISCOVERY_REQUEST: &[u8] = b"DISCOVER_SNAKE_GAME";
/// Prefix of every discovery answer: `SNAKE_GAME_HERE|<server-id>|<ip>`.
pub const DISCOVERY_RESPONSE_PREFIX: &[u8] = b"SNAKE_GAME_HERE";
/// Offset added to coordinates inside delta triples.
pub const BYTE_CODE_SHIFT: u8 = 100;
/// Largest board side whose coordinates still fit a delta byte.
pub const MAX_SIDE: i32 = (u8::MAX - BYTE_CODE_SHIFT) as i32;

/// A cell position on the board. `x` grows to the right, `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// True if the point lies in `[0, width) x [0, height)`.
    pub fn in_bound(&self, width: i32, height: i32) -> bool {
        (0..width).contains(&self.x) && (0..height).contains(&self.y)
    }

    /// Reduces both coordinates modulo the board size.
    pub fn wrap_into(&self, width: i32, height: i32) -> Point {
        Point {
            x: self.x.rem_euclid(width),
            y: self.y.rem_euclid(height),
        }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Movement direction of a snake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Unit step for this direction.
    pub fn delta(self) -> Point {
        match self {
            Direction::Up => Point::new(0, -1),
            Direction::Down => Point::new(0, 1),
            Direction::Left => Point::new(-1, 0),
            Direction::Right => Point::new(1, 0),
        }
    }

    /// Two directions are collinear when they share a movement axis.
    pub fn is_collinear(self, other: Direction) -> bool {
        self.is_vertical() == other.is_vertical()
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }

    /// Direction of the single step leading from `from` to `to`, if they are
    /// axis-adjacent.
    pub fn between(from: Point, to: Point) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|dir| from + dir.delta() == to)
    }

    /// Single-letter wire token.
    pub fn token(self) -> &'static str {
        match self {
            Direction::Up => "U",
            Direction::Down => "D",
            Direction::Left => "L",
            Direction::Right => "R",
        }
    }

    pub fn from_token(token: &str) -> Option<Direction> {
        match token {
            "U" => Some(Direction::Up),
            "D" => Some(Direction::Down),
            "L" => Some(Direction::Left),
            "R" => Some(Direction::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_arithmetic() {
        let a = Point::new(2, 3);
        let b = Point::new(-1, 4);
        assert_eq!(a + b, Point::new(1, 7));
        assert_eq!(a - b, Point::new(3, -1));
    }

    #[test]
    fn test_point_in_bound() {
        assert!(Point::new(0, 0).in_bound(4, 4));
        assert!(Point::new(3, 3).in_bound(4, 4));
        assert!(!Point::new(4, 0).in_bound(4, 4));
        assert!(!Point::new(0, -1).in_bound(4, 4));
    }

    #[test]
    fn test_point_wrap_into() {
        assert_eq!(Point::new(4, 2).wrap_into(4, 5), Point::new(0, 2));
        assert_eq!(Point::new(-1, -1).wrap_into(4, 5), Point::new(3, 4));
        assert_eq!(Point::new(2, 2).wrap_into(4, 5), Point::new(2, 2));
    }

    #[test]
    fn test_direction_collinearity() {
        assert!(Direction::Up.is_collinear(Direction::Down));
        assert!(Direction::Left.is_collinear(Direction::Left));
        assert!(!Direction::Up.is_collinear(Direction::Right));
        assert!(!Direction::Left.is_collinear(Direction::Down));
    }

    #[test]
    fn test_direction_between() {
        let origin = Point::new(1, 1);
        for dir in Direction::ALL {
            assert_eq!(Direction::between(origin, origin + dir.delta()), Some(dir));
        }
        assert_eq!(Direction::between(origin, Point::new(2, 2)), None);
        assert_eq!(Direction::between(origin, origin), None);
    }

    #[test]
    fn test_direction_tokens() {
        for dir in Direction::ALL {
            assert_eq!(Direction::from_token(dir.token()), Some(dir));
        }
        assert_eq!(Direction::from_token("X"), None);
        assert_eq!(Direction::from_token("up"), None);
        assert_eq!(Direction::from_token(""), None);
    }
}
