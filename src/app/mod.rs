pub mod state;

pub use state::{AppState, SessionInfo};
