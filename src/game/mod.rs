//! Match orchestration modules

pub mod engine;
pub mod field;
pub mod passing;
pub mod restart;
pub mod scoring;
pub mod sequence;

pub use engine::{EngineHandle, EngineHost, MatchEngine, RosterEntry};
pub use field::{FieldBounds, MatchContext, MatchRules};

use crate::util::time::unix_millis;
use crate::ws::protocol::ClientSignal;
use uuid::Uuid;

/// Signal received from a WebSocket session or an admin endpoint
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    /// Sending session, `None` for admin-injected signals
    pub session_id: Option<Uuid>,
    pub signal: ClientSignal,
    pub received_at: u64,
}

impl SignalEnvelope {
    pub fn from_session(session_id: Uuid, signal: ClientSignal) -> Self {
        Self {
            session_id: Some(session_id),
            signal,
            received_at: unix_millis(),
        }
    }

    pub fn admin(signal: ClientSignal) -> Self {
        Self {
            session_id: None,
            signal,
            received_at: unix_millis(),
        }
    }
}
