//! Viewer presence
//!
//! A viewer introduces itself with a `{"client": {...}}` hello. The visit is
//! logged with its arrival time, closed when the session is torn down, and
//! the list of viewers currently online is broadcast to every live session.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::registry::ConnectionId;

/// Client identification sent in the hello message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub username: Option<String>,
    pub useragent: Option<String>,
    pub path: Option<String>,
    pub origin: Option<String>,
}

impl ClientInfo {
    /// Name shown in the online list
    pub fn display_name(&self) -> String {
        self.username
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| self.ip.clone())
            .unwrap_or_else(|| "anonymous".to_string())
    }
}

/// Entry of the online list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnlineUser {
    pub name: String,
    /// Arrival time, `YYYY-MM-DD HH:MM:SS`
    pub indate: String,
}

/// A logged visit
#[derive(Debug, Clone)]
pub struct Visit {
    pub session: ConnectionId,
    pub client: ClientInfo,
    pub indate: DateTime<Local>,
    pub outdate: Option<DateTime<Local>>,
}

/// Store for viewer visits
pub trait AccessLog: Send + Sync + 'static {
    /// Record a viewer's hello
    fn record_visit(&self, session: ConnectionId, client: &ClientInfo);

    /// Mark the visit of a departing session as ended
    fn close_visit(&self, session: ConnectionId);

    /// Viewers among `live` that have introduced themselves
    fn online_users(&self, live: &[ConnectionId]) -> Vec<OnlineUser>;
}

/// Ended visits kept by [`MemoryAccessLog`] unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Access log kept in memory
///
/// Only the most recent ended visits are retained; older ones are dropped.
#[derive(Debug)]
pub struct MemoryAccessLog {
    open: Mutex<HashMap<ConnectionId, Visit>>,
    closed: Mutex<VecDeque<Visit>>,
    history_limit: usize,
}

impl Default for MemoryAccessLog {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` ended visits (at least one)
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
            closed: Mutex::new(VecDeque::new()),
            history_limit: limit.max(1),
        }
    }

    /// Visits that have ended, oldest first
    pub fn history(&self) -> Vec<Visit> {
        self.closed.lock().iter().cloned().collect()
    }

    /// Number of visits still open
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }
}

impl AccessLog for MemoryAccessLog {
    fn record_visit(&self, session: ConnectionId, client: &ClientInfo) {
        tracing::info!(
            session = %session,
            name = %client.display_name(),
            useragent = client.useragent.as_deref().unwrap_or("-"),
            "Viewer joined"
        );

        let mut open = self.open.lock();
        // A repeated hello refreshes the identity but keeps the arrival time
        let indate = open.get(&session).map(|v| v.indate).unwrap_or_else(Local::now);
        open.insert(
            session,
            Visit {
                session,
                client: client.clone(),
                indate,
                outdate: None,
            },
        );
    }

    fn close_visit(&self, session: ConnectionId) {
        let visit = self.open.lock().remove(&session);
        if let Some(mut visit) = visit {
            visit.outdate = Some(Local::now());
            tracing::info!(session = %session, name = %visit.client.display_name(), "Viewer left");
            let mut closed = self.closed.lock();
            if closed.len() == self.history_limit {
                closed.pop_front();
            }
            closed.push_back(visit);
        }
    }

    fn online_users(&self, live: &[ConnectionId]) -> Vec<OnlineUser> {
        let open = self.open.lock();
        let mut users: Vec<&Visit> = live.iter().filter_map(|id| open.get(id)).collect();
        users.sort_by_key(|v| (v.indate, v.session));
        users
            .into_iter()
            .map(|v| OnlineUser {
                name: v.client.display_name(),
                indate: v.indate.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect()
    }
}
