//! # Snake Arena Server Library
//!
//! This library provides the authoritative server for a one- or two-player
//! snake arena. It owns the board, advances it on a fixed tick, and streams
//! compact state updates to every seated player over a line-oriented TCP
//! protocol. A separate UDP beacon lets clients on the local network find
//! the server without knowing its address.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every rule decision (movement, growth, collisions, apple spawning, the
//! boundary policy) is made by the [`game::SimulationEngine`]. Clients only
//! send direction tokens and render what they are told.
//!
//! ### Session Lifecycle
//! The [`session::Session`] cycles through `WaitClients`, `WaitRestart`,
//! `GameStart` and `GameCycle`. A lost connection in any state sends it back
//! to `WaitClients` after a short pause; anything else is treated as a bug
//! and ends the run.
//!
//! ### State Streaming
//! A round starts with a full `STATE_INIT` grid. Each following tick sends
//! only the cells that changed, packed as `(x + 100, y + 100, code)` byte
//! triples after `STATE|`.
//!
//! ## Module Organization
//!
//! ### Client (`client`, `client_manager`)
//! - Cancel-safe line reading and deadline-bound writes per connection
//! - Accept loop that turns late joiners away
//! - Liveness probes, roster trimming and seat assignment
//!
//! ### Simulation (`snake`, `game`)
//! - Snake bodies and the bounded steering queue shared with input readers
//! - Board rules, full and delta rendering
//!
//! ### Input (`input`)
//! One reader task per seat feeding direction tokens into the steering
//! queues until the session signals shutdown.
//!
//! ### Discovery (`discovery`)
//! UDP responder answering `DISCOVER_SNAKE_GAME` probes for the lifetime of
//! the process.
//!
//! ### Configuration and Errors (`config`, `error`)
//! YAML game settings reloaded every round, and the error types shared by
//! all of the above.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::client_manager::ConnectionManager;
//! use server::config::{Settings, SettingsSource};
//! use server::session::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connections = ConnectionManager::bind("0.0.0.0:8888").await?;
//!     let source = SettingsSource::Fixed(Settings::default());
//!
//!     // Runs rounds until a non-recoverable error occurs
//!     let mut session = Session::new(connections, source).await;
//!     session.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod client_manager;
pub mod config;
pub mod discovery;
pub mod error;
pub mod game;
pub mod input;
pub mod session;
pub mod snake;
