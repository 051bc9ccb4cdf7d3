//! Live-reload client registry and server statistics.
//!
//! Connected browsers each hold a bounded channel; a rebuild broadcasts
//! `reload` (or `error:<message>`) to every subscriber. Sends never
//! block: a client whose channel is full simply misses that message and
//! catches up on the next one.

use crate::{builder::BuildReport, error::BuildError, log};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-client message buffer depth.
const CLIENT_QUEUE: usize = 8;
/// Most recent build errors retained for the stats endpoint.
const ERROR_HISTORY: usize = 10;

/// Message pushed to browsers after a successful rebuild.
pub const RELOAD_MSG: &str = "reload";
/// Prefix for rebuild-failure messages.
pub const ERROR_PREFIX: &str = "error:";

// ============================================================================
// Client registry
// ============================================================================

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<Vec<(u64, Sender<String>)>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    /// Register a new client and hand back its id and receiving end.
    pub fn subscribe(&self) -> (u64, Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(CLIENT_QUEUE);
        self.clients.lock().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.clients.lock().retain(|(cid, _)| *cid != id);
    }

    /// Deliver a message to every subscriber without blocking.
    pub fn broadcast(&self, message: &str) {
        let senders: Vec<Sender<String>> = self
            .clients
            .lock()
            .iter()
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            // Full queue: drop the message for this client
            let _ = tx.try_send(message.to_string());
        }
    }

    pub fn count(&self) -> usize {
        self.clients.lock().len()
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub start_time: DateTime<Utc>,
    pub requests: u64,
    pub build_count: u64,
    pub last_build: Option<DateTime<Utc>>,
    pub build_time_ms: u64,
    pub error_count: u64,
    pub client_count: usize,
    pub build_errors: Vec<String>,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            requests: 0,
            build_count: 0,
            last_build: None,
            build_time_ms: 0,
            error_count: 0,
            client_count: 0,
            build_errors: Vec::new(),
        }
    }
}

// ============================================================================
// Hub
// ============================================================================

/// Shared state between the watch loop and the dev server: who is
/// connected, and what the rebuilds have been doing.
#[derive(Default)]
pub struct ReloadHub {
    pub clients: ClientRegistry,
    stats: RwLock<ServerStats>,
}

impl ReloadHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a build outcome and notify every connected client.
    pub fn record_build(&self, result: &Result<BuildReport, BuildError>) {
        {
            let mut stats = self.stats.write();
            stats.build_count += 1;
            stats.last_build = Some(Utc::now());
            match result {
                Ok(report) => {
                    stats.build_time_ms = report.duration.as_millis() as u64;
                }
                Err(e) => {
                    stats.error_count += 1;
                    stats.build_errors.push(e.to_string());
                    if stats.build_errors.len() > ERROR_HISTORY {
                        stats.build_errors.remove(0);
                    }
                }
            }
        }

        match result {
            Ok(_) => self.clients.broadcast(RELOAD_MSG),
            Err(e) => {
                log!("error"; "rebuild failed: {e}");
                self.clients.broadcast(&format!("{ERROR_PREFIX}{e}"));
            }
        }
    }

    pub fn record_request(&self) {
        self.stats.write().requests += 1;
    }

    /// Stats snapshot with the live client count filled in.
    pub fn stats_snapshot(&self) -> ServerStats {
        let mut stats = self.stats.read().clone();
        stats.client_count = self.clients.count();
        stats
    }
}
