//! Session state machine driving rounds of the arena.
//!
//! ```text
//!   WaitClients ──> WaitRestart ──> GameStart ──> GameCycle
//!        ^              ^  │                          │
//!        │              │  └── not ready ──> WaitClients
//!        │              └──────── game over ──────────┘
//!        └──────── connection lost (from any state)
//! ```
//!
//! The driver owns the roster, the board and the reader pool. Everything that
//! mutates the board happens on the driver task; readers only push into
//! steering queues and report faults over a channel.

use crate::client_manager::ConnectionManager;
use crate::config::{Settings, SettingsSource};
use crate::error::SessionError;
use crate::game::SimulationEngine;
use crate::input::ReaderPool;
use log::{debug, error, info, warn};
use shared::protocol::{ClientMessage, ServerMessage};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// Pause before starting over after a lost connection.
pub const RECOVERY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitClients,
    WaitRestart,
    GameStart,
    GameCycle,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::WaitClients => "WaitClients",
            SessionState::WaitRestart => "WaitRestart",
            SessionState::GameStart => "GameStart",
            SessionState::GameCycle => "GameCycle",
        };
        f.write_str(name)
    }
}

pub struct Session {
    state: SessionState,
    connections: ConnectionManager,
    source: SettingsSource,
    settings: Settings,
    engine: Option<SimulationEngine>,
    readers: ReaderPool,
    faults: mpsc::UnboundedReceiver<SessionError>,
    seed: Option<u64>,
}

impl Session {
    /// Loads the first settings and starts in `WaitClients`.
    pub async fn new(connections: ConnectionManager, source: SettingsSource) -> Self {
        let settings = source.load().await;
        let (fault_tx, faults) = mpsc::unbounded_channel();
        Self {
            state: SessionState::WaitClients,
            connections,
            source,
            settings,
            engine: None,
            readers: ReaderPool::new(fault_tx),
            faults,
            seed: None,
        }
    }

    /// Seeds every board this session builds.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn engine(&self) -> Option<&SimulationEngine> {
        self.engine.as_ref()
    }

    /// Runs the handler for the current state and moves to the state it
    /// returns. On error the state is left unchanged.
    pub async fn step(&mut self) -> Result<SessionState, SessionError> {
        let next = match self.state {
            SessionState::WaitClients => self.wait_clients().await?,
            SessionState::WaitRestart => self.wait_restart().await?,
            SessionState::GameStart => self.game_start().await?,
            SessionState::GameCycle => self.game_cycle().await?,
        };
        info!("Session {} -> {}", self.state, next);
        self.state = next;
        Ok(next)
    }

    /// Drives the session forever. Lost connections send it back to
    /// `WaitClients`; any other error ends the run.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            if let Err(e) = self.step().await {
                if !e.is_connection_lost() {
                    error!("Session failed in {}: {}", self.state, e);
                    return Err(e);
                }
                warn!(
                    "{} in {}, restarting in {:?}",
                    e, self.state, RECOVERY_DELAY
                );
                tokio::time::sleep(RECOVERY_DELAY).await;
                self.state = SessionState::WaitClients;
            }
        }
    }

    async fn wait_clients(&mut self) -> Result<SessionState, SessionError> {
        if let Err(e) = self.connections.broadcast(&ServerMessage::EndGame).await {
            debug!("END_GAME not delivered: {}", e);
        }
        self.readers.stop().await;
        self.drain_faults();
        self.engine = None;

        self.connections
            .wait_for_players(self.settings.players_number)
            .await?;
        Ok(SessionState::WaitRestart)
    }

    async fn wait_restart(&mut self) -> Result<SessionState, SessionError> {
        self.readers.stop().await;
        if let Some(fault) = self.drain_faults() {
            return Err(fault);
        }

        self.connections.broadcast(&ServerMessage::SpaceAwait).await?;
        let answers = self.connections.read_all().await?;
        for seat in 0..self.connections.len() {
            let rtt = self.connections.check_ping(seat).await?;
            info!("Seat {} ping: {:.1} ms", seat, rtt.as_secs_f64() * 1000.0);
        }

        let ready = ClientMessage::SpacePressed.token();
        if let Some((seat, answer)) = answers.iter().enumerate().find(|(_, a)| *a != ready) {
            info!("Seat {} answered {:?} instead of {}", seat, answer, ready);
            return Ok(SessionState::WaitClients);
        }
        Ok(SessionState::GameStart)
    }

    async fn game_start(&mut self) -> Result<SessionState, SessionError> {
        self.settings = self.source.load().await;
        let players = self.settings.players_number;
        if players != self.connections.len() {
            info!(
                "Settings ask for {} player(s) but {} are seated",
                players,
                self.connections.len()
            );
            return Ok(SessionState::WaitClients);
        }

        let mut engine = match self.seed {
            Some(seed) => SimulationEngine::with_seed(&self.settings, seed),
            None => SimulationEngine::new(&self.settings),
        };
        engine.build_start_position(players, self.settings.width, self.settings.height)?;
        self.connections
            .broadcast(&ServerMessage::StateInit(engine.render_full()))
            .await?;

        self.drain_faults();
        for client in self.connections.clients() {
            let Some(steering) = client.seat().and_then(|seat| engine.steering(seat)) else {
                warn!("Client {} has no snake", client.id);
                continue;
            };
            self.readers.spawn(client.reader(), steering);
        }
        self.engine = Some(engine);
        Ok(SessionState::GameCycle)
    }

    async fn game_cycle(&mut self) -> Result<SessionState, SessionError> {
        let period = self.settings.turn_duration();
        let mut deadline = Instant::now() + period;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {}
                Some(fault) = self.faults.recv() => return Err(fault),
            }

            let Some(engine) = self.engine.as_mut() else {
                warn!("No board to advance");
                return Ok(SessionState::WaitClients);
            };
            engine.make_turn();
            if engine.ended() {
                info!("Game over");
                self.connections.broadcast(&ServerMessage::EndGame).await?;
                return Ok(SessionState::WaitRestart);
            }
            let delta = engine.render_delta();
            self.connections
                .broadcast(&ServerMessage::State(delta))
                .await?;

            deadline = next_deadline(deadline, period, Instant::now());
        }
    }

    /// Empties the fault channel, keeping the first fault.
    fn drain_faults(&mut self) -> Option<SessionError> {
        let mut first = None;
        while let Ok(fault) = self.faults.try_recv() {
            debug!("Pending reader fault: {}", fault);
            first.get_or_insert(fault);
        }
        first
    }
}

/// Deadline of the tick after the one due at `deadline`. The schedule keeps
/// its phase unless the tick overran, in which case it restarts from `now`.
fn next_deadline(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let next = deadline + period;
    if next < now {
        warn!("Tick overran by {:?}", now - next);
        return now;
    }
    next
}
