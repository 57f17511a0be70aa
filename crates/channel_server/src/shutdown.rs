//! Time-boxed graceful shutdown of a channel node.
//!
//! A shutdown is requested with a duration. The node enters maintenance
//! (which the registry sees on the pushed heartbeat), warns every client,
//! asks clients to disconnect 30 seconds before the end and, when the
//! duration has elapsed, saves shared state, drops every remaining client
//! and exits. Only one shutdown can be scheduled per process and it cannot
//! be called off.
//!
//! Operator paths (local console, in-session command, remote request from
//! the registry) all go through [`ShutdownCoordinator::request`], which
//! clamps the duration into `[60, 1800]` seconds.

use crate::clients::ClientRegistry;
use crate::status::{NodeStatus, ServerList};
use crate::store::SharedStateStore;
use cluster_protocol::schedule::Scheduler;
use cluster_protocol::{ShutdownResult, TimerId};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

/// Clients are asked to leave this long before the node exits.
pub const DISCONNECT_OFFSET_SECS: i64 = 30;

pub const MIN_SHUTDOWN_SECS: i64 = 60;
pub const MAX_SHUTDOWN_SECS: i64 = 1800;

/// Longest duration a shutdown timer accepts.
pub const MAX_TIMER_SECS: i64 = u32::MAX as i64 / 1000;

/// Terminates the process.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdProcessExit;

impl ProcessExit for StdProcessExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    Idle,
    Scheduled,
    Elapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownSession {
    pub status: ShutdownStatus,
    pub duration_secs: i64,
    pub disconnect_offset_secs: i64,
    /// `duration - offset`; negative when the duration is shorter than the
    /// offset, in which case the request goes out immediately
    pub disconnect_at_secs: i64,
    pub disconnect_timer: Option<TimerId>,
    pub elapse_timer: Option<TimerId>,
}

impl Default for ShutdownSession {
    fn default() -> Self {
        Self {
            status: ShutdownStatus::Idle,
            duration_secs: 0,
            disconnect_offset_secs: DISCONNECT_OFFSET_SECS,
            disconnect_at_secs: 0,
            disconnect_timer: None,
            elapse_timer: None,
        }
    }
}

pub struct ShutdownCoordinator {
    scheduler: Arc<Scheduler>,
    status: Arc<NodeStatus>,
    server_list: Arc<ServerList>,
    clients: Arc<ClientRegistry>,
    store: Arc<dyn SharedStateStore>,
    exit: Arc<dyn ProcessExit>,
    session: Mutex<ShutdownSession>,
}

impl ShutdownCoordinator {
    pub fn new(
        scheduler: Arc<Scheduler>,
        status: Arc<NodeStatus>,
        server_list: Arc<ServerList>,
        clients: Arc<ClientRegistry>,
        store: Arc<dyn SharedStateStore>,
        exit: Arc<dyn ProcessExit>,
    ) -> Self {
        Self {
            scheduler,
            status,
            server_list,
            clients,
            store,
            exit,
            session: Mutex::new(ShutdownSession::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ShutdownSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> ShutdownSession {
        self.lock().clone()
    }

    /// Clamps `seconds` into `[60, 1800]` and schedules the shutdown.
    pub fn request(self: &Arc<Self>, seconds: i64) -> ShutdownResult {
        self.schedule(seconds.clamp(MIN_SHUTDOWN_SECS, MAX_SHUTDOWN_SECS))
    }

    /// Schedules a shutdown `duration_secs` from now, unclamped.
    pub fn schedule(self: &Arc<Self>, duration_secs: i64) -> ShutdownResult {
        let full_name = self.status.full_name();

        if !self
            .server_list
            .contains(self.status.server_group(), self.status.node_name())
        {
            warn!("Shutdown of {} refused: not in the server list", full_name);
            return ShutdownResult::Fail;
        }

        let mut session = self.lock();
        if session.status != ShutdownStatus::Idle {
            warn!("Shutdown of {} already in progress", full_name);
            return ShutdownResult::AlreadyInProgress;
        }
        if duration_secs <= 0 || duration_secs > MAX_TIMER_SECS {
            warn!("Shutdown of {} refused: invalid duration {}s", full_name, duration_secs);
            return ShutdownResult::Fail;
        }

        let disconnect_at_secs = duration_secs - DISCONNECT_OFFSET_SECS;
        let disconnect_delay = secs(disconnect_at_secs.max(0));
        let remaining_at_request = duration_secs - disconnect_at_secs.max(0);

        let coordinator = self.clone();
        let disconnect_timer = self.scheduler.schedule_after(disconnect_delay, move || {
            let asked = coordinator.clients.request_disconnect(remaining_at_request);
            info!("📤 Asked {} client(s) to disconnect", asked);
        });

        let coordinator = self.clone();
        let elapse_timer = self
            .scheduler
            .schedule_after(secs(duration_secs), move || coordinator.elapse());

        *session = ShutdownSession {
            status: ShutdownStatus::Scheduled,
            duration_secs,
            disconnect_offset_secs: DISCONNECT_OFFSET_SECS,
            disconnect_at_secs,
            disconnect_timer: Some(disconnect_timer),
            elapse_timer: Some(elapse_timer),
        };
        drop(session);

        info!("🛑 {} shutting down in {} seconds", full_name, duration_secs);
        self.clients.broadcast_notice(&format!(
            "The server will shut down in {} seconds, please log out.",
            duration_secs
        ));
        self.status.set_maintenance(true);

        ShutdownResult::Success
    }

    /// When the disconnect request is due, on the scheduler's clock.
    pub fn disconnect_deadline(&self) -> Option<Duration> {
        let timer = self.lock().disconnect_timer?;
        self.scheduler.deadline(timer)
    }

    pub fn elapse_deadline(&self) -> Option<Duration> {
        let timer = self.lock().elapse_timer?;
        self.scheduler.deadline(timer)
    }

    fn elapse(&self) {
        self.lock().status = ShutdownStatus::Elapsed;
        info!("⏰ Shutdown time reached for {}", self.status.full_name());

        if let Err(e) = self.store.save() {
            error!("Failed to save shared state: {}", e);
        }

        let dropped = self.clients.kill_all();
        info!("🔌 Disconnected {} remaining client(s)", dropped);

        self.exit.exit(0);
    }
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value).unwrap_or(0))
}
