//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::game::MatchRules;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Allowed client origin for CORS (comma-separated for multiple)
    pub client_origin: String,

    /// Fixed RNG seed for the engine (random when unset)
    pub engine_seed: Option<u64>,
    /// Match tuning (regulation length, rosters, mercy thresholds)
    pub rules: MatchRules,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let engine_seed = match env::var("ENGINE_SEED") {
            Ok(raw) => Some(raw.parse().map_err(|_| ConfigError::Invalid("ENGINE_SEED"))?),
            Err(_) => None,
        };

        let defaults = MatchRules::default();
        let rules = MatchRules {
            regulation_secs: env_parse("REGULATION_SECS", defaults.regulation_secs)?,
            overtime_secs: env_parse("OVERTIME_SECS", defaults.overtime_secs)?,
            min_players_per_team: env_parse("MIN_PLAYERS_PER_TEAM", defaults.min_players_per_team)?,
            max_players_per_team: env_parse("MAX_PLAYERS_PER_TEAM", defaults.max_players_per_team)?,
            mercy_immediate_diff: env_parse("MERCY_GOAL_DIFF", defaults.mercy_immediate_diff)?,
            mercy_late_diff: env_parse("MERCY_LATE_GOAL_DIFF", defaults.mercy_late_diff)?,
            mercy_late_window_secs: env_parse(
                "MERCY_LATE_WINDOW_SECS",
                defaults.mercy_late_window_secs,
            )?,
        };

        if rules.regulation_secs == 0 {
            return Err(ConfigError::InvalidRules("REGULATION_SECS must be positive"));
        }
        if rules.min_players_per_team == 0 {
            return Err(ConfigError::InvalidRules(
                "MIN_PLAYERS_PER_TEAM must be positive",
            ));
        }
        if rules.max_players_per_team < rules.min_players_per_team {
            return Err(ConfigError::InvalidRules(
                "MAX_PLAYERS_PER_TEAM must be at least MIN_PLAYERS_PER_TEAM",
            ));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            engine_seed,
            rules,
        })
    }
}

/// Parse an optional environment variable, falling back to a default
fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid match rules: {0}")]
    InvalidRules(&'static str),
}
