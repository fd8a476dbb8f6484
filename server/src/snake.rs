//! Snake bodies and the steering queue shared with input readers.
//!
//! The body is only touched by the session driver. The steering state
//! (current facing plus up to [`QUEUE_CAPACITY`] pending turns) is shared
//! with the seat's input reader through a [`SteeringHandle`], so pushes and
//! pops are serialised by a short, non-async lock.

use crate::error::GameError;
use shared::{Direction, Point};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maximum number of turns a player may queue ahead of the simulation.
pub const QUEUE_CAPACITY: usize = 3;

#[derive(Debug)]
struct Steering {
    current: Direction,
    pending: VecDeque<Direction>,
}

/// Cloneable access to one snake's steering state.
#[derive(Debug, Clone)]
pub struct SteeringHandle {
    inner: Arc<Mutex<Steering>>,
}

impl SteeringHandle {
    fn new(current: Direction) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Steering {
                current,
                pending: VecDeque::with_capacity(QUEUE_CAPACITY),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Steering> {
        // The guarded data stays consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a turn unless it is collinear with the last pending (or
    /// current) direction or the queue is full. Returns whether it was kept.
    pub fn apply(&self, dir: Direction) -> bool {
        let mut steering = self.lock();
        let last = steering.pending.back().copied().unwrap_or(steering.current);
        if dir.is_collinear(last) || steering.pending.len() >= QUEUE_CAPACITY {
            return false;
        }
        steering.pending.push_back(dir);
        true
    }

    /// Pops the next queued turn, falling back to the current direction,
    /// and makes it current.
    fn advance(&self) -> Direction {
        let mut steering = self.lock();
        if let Some(dir) = steering.pending.pop_front() {
            steering.current = dir;
        }
        steering.current
    }

    pub fn current(&self) -> Direction {
        self.lock().current
    }

    pub fn pending(&self) -> Vec<Direction> {
        self.lock().pending.iter().copied().collect()
    }
}

/// One player's snake. The body is stored tail first, head last.
#[derive(Debug)]
pub struct Snake {
    seat: usize,
    body: VecDeque<Point>,
    steering: SteeringHandle,
}

impl Snake {
    /// Creates a snake facing along its last two segments.
    pub fn new(seat: usize, body: Vec<Point>) -> Result<Self, GameError> {
        let direction = match body.as_slice() {
            [.., neck, head] => Direction::between(*neck, *head),
            _ => None,
        }
        .ok_or_else(|| GameError::InvalidBody(body.clone()))?;

        Ok(Self {
            seat,
            body: body.into(),
            steering: SteeringHandle::new(direction),
        })
    }

    pub fn seat(&self) -> usize {
        self.seat
    }

    pub fn body(&self) -> &VecDeque<Point> {
        &self.body
    }

    pub fn head(&self) -> Point {
        // Construction guarantees at least two segments and nothing removes
        // more than it appends.
        self.body.back().copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn direction(&self) -> Direction {
        self.steering.current()
    }

    pub fn steering(&self) -> SteeringHandle {
        self.steering.clone()
    }

    pub fn apply_direction(&self, dir: Direction) -> bool {
        self.steering.apply(dir)
    }

    /// Consumes one queued turn for this tick.
    pub(crate) fn next_direction(&mut self) -> Direction {
        self.steering.advance()
    }

    /// Appends `head`; the tail is kept when the snake grows.
    pub(crate) fn advance(&mut self, head: Point, grow: bool) {
        self.body.push_back(head);
        if !grow {
            self.body.pop_front();
        }
    }
}
