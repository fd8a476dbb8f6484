//! Board rules for one round.
//!
//! The engine is owned by the session driver and advanced once per tick.
//! Only the steering queues inside each snake are touched from elsewhere.

use crate::config::{BoundaryPolicy, Settings};
use crate::error::GameError;
use crate::snake::{Snake, SteeringHandle};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{Cell, CellChange, Grid};
use shared::{Direction, Point};
use std::collections::HashSet;

/// Authoritative board for one round: snakes, apples and the rules that
/// advance them one tick at a time.
#[derive(Debug)]
pub struct SimulationEngine {
    width: i32,
    height: i32,
    boundary: BoundaryPolicy,
    apples_target: usize,
    apples: HashSet<Point>,
    snakes: Vec<Snake>,
    ended: bool,
    /// Last grid handed out, baseline for the next delta.
    rendered: Option<Grid>,
    rng: StdRng,
}

impl SimulationEngine {
    pub fn new(settings: &Settings) -> Self {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    /// Engine with reproducible apple placement.
    pub fn with_seed(settings: &Settings, seed: u64) -> Self {
        Self::with_rng(settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: &Settings, rng: StdRng) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            boundary: settings.boundary,
            apples_target: settings.apples_number,
            apples: HashSet::new(),
            snakes: Vec::new(),
            ended: false,
            rendered: None,
            rng,
        }
    }

    /// Places the snakes for a fresh round and seeds the apples.
    pub fn build_start_position(
        &mut self,
        players_number: usize,
        width: i32,
        height: i32,
    ) -> Result<(), GameError> {
        let bodies = match players_number {
            1 => {
                let y = height / 2;
                vec![row(0, y, Direction::Right)]
            }
            2 => vec![
                row(0, 1, Direction::Right),
                row(width - 1, height - 2, Direction::Left),
            ],
            n => return Err(GameError::UnsupportedPlayers(n)),
        };

        self.width = width;
        self.height = height;
        self.snakes = bodies
            .into_iter()
            .enumerate()
            .map(|(seat, body)| Snake::new(seat, body))
            .collect::<Result<_, _>>()?;
        self.apples.clear();
        self.ended = false;
        self.rendered = None;
        self.gen_apples();

        info!(
            "Board {}x{} ready for {} player(s), {} apple(s)",
            width,
            height,
            players_number,
            self.apples.len()
        );
        Ok(())
    }

    /// Advances every snake one cell, then resolves collisions and apples.
    pub fn make_turn(&mut self) {
        if self.ended {
            return;
        }

        for snake in &mut self.snakes {
            let dir = snake.next_direction();
            let mut head = snake.head() + dir.delta();
            if self.boundary == BoundaryPolicy::Wrap {
                head = head.wrap_into(self.width, self.height);
            }
            let grow = self.apples.contains(&head);
            snake.advance(head, grow);
        }

        for index in 0..self.snakes.len() {
            let head = self.snakes[index].head();
            if !head.in_bound(self.width, self.height) {
                debug!("Seat {} left the board at {}", index, head);
                self.ended = true;
                continue;
            }
            if self.hits_body(index, head) {
                debug!("Seat {} crashed at {}", index, head);
                self.ended = true;
            }
            self.apples.remove(&head);
        }

        self.gen_apples();
    }

    /// True if `head` overlaps any segment other than snake `index`'s own
    /// head position.
    fn hits_body(&self, index: usize, head: Point) -> bool {
        self.snakes.iter().enumerate().any(|(i, snake)| {
            if i == index {
                snake.body().iter().rev().skip(1).any(|p| *p == head)
            } else {
                snake.body().contains(&head)
            }
        })
    }

    fn is_under_snake(&self, point: Point) -> bool {
        self.snakes.iter().any(|s| s.body().contains(&point))
    }

    /// Tops the apple set up to the target, ending the game once the board
    /// has no free cell left for one.
    pub fn gen_apples(&mut self) {
        if self.apples.len() >= self.apples_target {
            return;
        }

        let mut free: Vec<Point> = (0..self.width)
            .flat_map(|x| (0..self.height).map(move |y| Point::new(x, y)))
            .filter(|p| !self.apples.contains(p) && !self.is_under_snake(*p))
            .collect();

        while self.apples.len() < self.apples_target {
            if free.is_empty() {
                info!("Board is full");
                self.ended = true;
                break;
            }
            let pick = self.rng.gen_range(0..free.len());
            self.apples.insert(free.swap_remove(pick));
        }
    }

    /// Queues a turn for `seat`; out-of-range seats are ignored.
    pub fn apply_direction(&self, seat: usize, dir: Direction) -> bool {
        self.snakes
            .get(seat)
            .is_some_and(|snake| snake.apply_direction(dir))
    }

    /// Steering access for the input reader of `seat`.
    pub fn steering(&self, seat: usize) -> Option<SteeringHandle> {
        self.snakes.get(seat).map(Snake::steering)
    }

    fn construct_grid(&self) -> Grid {
        let mut grid = Grid::new(self.width, self.height);
        for apple in &self.apples {
            grid.set(*apple, Cell::Apple);
        }
        for snake in &self.snakes {
            let seat = snake.seat() as u8;
            for segment in snake.body() {
                grid.set(*segment, Cell::Body(seat));
            }
            grid.set(snake.head(), Cell::Head(seat));
        }
        grid
    }

    /// Full board, which also becomes the baseline for the next delta.
    pub fn render_full(&mut self) -> Grid {
        let grid = self.construct_grid();
        self.rendered = Some(grid.clone());
        grid
    }

    /// Cells changed since the previous render. Must be called exactly once
    /// per tick, in order.
    pub fn render_delta(&mut self) -> Vec<CellChange> {
        let grid = self.construct_grid();
        let baseline = self
            .rendered
            .take()
            .unwrap_or_else(|| Grid::new(self.width, self.height));
        let changes = baseline.diff(&grid);
        self.rendered = Some(grid);
        changes
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn snakes(&self) -> &[Snake] {
        &self.snakes
    }

    pub fn apples(&self) -> &HashSet<Point> {
        &self.apples
    }

    /// Replaces the apple set, for scripted boards.
    pub fn set_apples(&mut self, apples: impl IntoIterator<Item = Point>) {
        self.apples = apples.into_iter().collect();
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }
}

/// Three-segment horizontal body, tail at `(start_x, y)`, heading `facing`.
fn row(start_x: i32, y: i32, facing: Direction) -> Vec<Point> {
    let step = facing.delta().x;
    (0..3).map(|i| Point::new(start_x + i * step, y)).collect()
}
