//! Shared server services
//!
//! Everything a connection needs is built once here and handed out as an
//! `Arc<ServerContext>`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bus::FrameBus;
use crate::engine::{DeviceControl, MediaEngine};
use crate::error::{Error, Result};
use crate::pool::WorkPool;
use crate::presence::AccessLog;
use crate::protocol::OutboundMessage;
use crate::recording::Recorder;
use crate::registry::{ConnectionId, SessionRegistry};
use crate::server::config::ServerConfig;
use crate::session::{OutboundTx, Session, SessionDeps};
use crate::stats::ServerStats;

/// Services shared by every connection
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub bus: Arc<FrameBus>,
    pub recorder: Arc<Recorder>,
    pub engine: Arc<dyn MediaEngine>,
    pub device: Arc<dyn DeviceControl>,
    pub access_log: Arc<dyn AccessLog>,
    pub pool: WorkPool,
    next_connection_id: AtomicU64,
    total_sessions: AtomicU64,
    started_at: Instant,
}

impl ServerContext {
    /// Build the shared services
    ///
    /// Must be called from within a tokio runtime; the work pool spawns its
    /// workers immediately.
    pub fn new(
        config: ServerConfig,
        engine: Arc<dyn MediaEngine>,
        device: Arc<dyn DeviceControl>,
        access_log: Arc<dyn AccessLog>,
    ) -> Arc<Self> {
        let recorder = Recorder::new(Arc::clone(&engine), config.record_root.clone())
            .max_duration(config.max_record_duration);
        let pool = WorkPool::new(config.work_pool_workers, config.work_queue_capacity);

        Arc::new(Self {
            registry: SessionRegistry::new(),
            bus: Arc::new(FrameBus::new()),
            recorder: Arc::new(recorder),
            engine,
            device,
            access_log,
            pool,
            next_connection_id: AtomicU64::new(1),
            total_sessions: AtomicU64::new(0),
            started_at: Instant::now(),
            config,
        })
    }

    /// Handles a session releases during teardown
    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps {
            bus: Arc::clone(&self.bus),
            recorder: Arc::clone(&self.recorder),
            access_log: Arc::clone(&self.access_log),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create, register and start a session for a new connection
    ///
    /// The send path is built before registration; if that fails nothing is
    /// registered or subscribed.
    pub async fn open_session(self: &Arc<Self>, outbound: OutboundTx) -> Result<Arc<Session>> {
        let id = self.next_connection_id();
        let session = Session::create(id, self.engine.as_ref(), self.session_deps(), outbound)?;

        if !self.registry.register(id, Arc::clone(&session)).await {
            session.teardown().await;
            return Err(Error::DuplicateSession(id));
        }
        self.total_sessions.fetch_add(1, Ordering::Relaxed);

        if session.attach().await.is_none() {
            tracing::debug!(session = %id, "Session closed before attaching to the bus");
        }
        tokio::spawn(Arc::clone(&session).run(Arc::clone(self)));

        Ok(session)
    }

    /// Unregister and tear down a session, then refresh presence
    pub async fn close_session(&self, id: ConnectionId) -> bool {
        let removed = self.registry.unregister(id).await;
        if removed {
            self.broadcast_presence().await;
        }
        removed
    }

    /// Send the online-user list to every live session
    pub async fn broadcast_presence(&self) -> usize {
        let active = self.registry.keys().await;
        let users = self.access_log.online_users(&active);
        let delivered = self.registry.broadcast(&OutboundMessage::Users(users)).await;
        tracing::debug!(sessions = delivered, "Presence broadcast");
        delivered
    }

    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_sessions: self.total_sessions.load(Ordering::Relaxed),
            active_sessions: self.registry.len().await,
            recording: self.recorder.is_active(),
            jobs_completed: self.pool.completed(),
            bus: self.bus.stats(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Tear down every session, stop recording, drain the work pool
    pub async fn shutdown(&self) {
        let drained = self.registry.drain().await;
        if self.recorder.stop() {
            tracing::info!("Recording stopped at shutdown");
        }
        self.pool.shutdown().await;
        tracing::info!(sessions = drained, "Server context shut down");
    }
}
