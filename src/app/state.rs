//! Application state shared across routes

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::game::EngineHandle;
use crate::ws::protocol::MatchReport;

/// Metadata for a connected WebSocket session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub name: String,
    /// Unix millis at connection time
    pub connected_at: u64,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: EngineHandle,
    pub sessions: Arc<DashMap<Uuid, SessionInfo>>,
    pub last_report: Arc<RwLock<Option<MatchReport>>>,
}

impl AppState {
    pub fn new(config: Config, engine: EngineHandle) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            sessions: Arc::new(DashMap::new()),
            last_report: Arc::new(RwLock::new(None)),
        }
    }
}
