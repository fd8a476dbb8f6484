//! Per-seat direction readers that run while a game is in progress.
//!
//! Each reader races the next line from its client against a shared
//! shutdown signal. Valid direction tokens go straight into the seat's
//! steering queue; anything else kicks the client and reports a fault to
//! the session driver.

use crate::client::{read_from, ClientReader};
use crate::error::SessionError;
use crate::snake::SteeringHandle;
use log::{debug, info, warn};
use shared::Direction;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// How long a stopping reader gets to notice the shutdown signal.
pub const READER_GRACE: Duration = Duration::from_millis(100);

/// Readers for the current round plus the signal that stops them.
#[derive(Debug)]
pub struct ReaderPool {
    shutdown: watch::Sender<bool>,
    faults: mpsc::UnboundedSender<SessionError>,
    handles: Vec<JoinHandle<()>>,
}

impl ReaderPool {
    pub fn new(faults: mpsc::UnboundedSender<SessionError>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            faults,
            handles: Vec::new(),
        }
    }

    /// Clears the shutdown signal and starts one reader for `client`.
    pub fn spawn(&mut self, client: ClientReader, steering: SteeringHandle) {
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let faults = self.faults.clone();
        self.handles
            .push(tokio::spawn(read_directions(client, steering, shutdown, faults)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every reader and waits for it to unwind. Readers still
    /// running after the grace period are aborted.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        for mut handle in self.handles.drain(..) {
            if timeout(READER_GRACE, &mut handle).await.is_err() {
                warn!("Direction reader ignored shutdown, aborting it");
                handle.abort();
            }
        }
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn read_directions(
    client: ClientReader,
    steering: SteeringHandle,
    mut shutdown: watch::Receiver<bool>,
    faults: mpsc::UnboundedSender<SessionError>,
) {
    let seat = client.seat;
    let mut lines = tokio::select! {
        _ = shutdown.wait_for(|stop| *stop) => return,
        lines = client.lines().lock() => lines,
    };
    debug!("Direction reader for seat {:?} started", seat);

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            line = read_from(&mut *lines, seat) => line,
        };

        let result = line.and_then(|token| match Direction::from_token(&token) {
            Some(dir) => Ok(dir),
            None => Err(SessionError::InvalidDirection { seat, token }),
        });
        match result {
            Ok(dir) => {
                if !steering.apply(dir) {
                    debug!("Seat {:?} turn {} dropped", seat, dir);
                }
            }
            Err(e) => {
                info!("Direction reader for seat {:?} failed: {}", seat, e);
                client.kick();
                // The driver may already be gone when the process stops.
                let _ = faults.send(e);
                break;
            }
        }
    }
    debug!("Direction reader for seat {:?} stopped", seat);
}
