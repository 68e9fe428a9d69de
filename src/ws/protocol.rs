//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    /// Defends the goal on the min-X end, attacks towards +X
    Red,
    /// Defends the goal on the max-X end, attacks towards -X
    Blue,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }

    /// Sign of the X direction this team attacks in
    pub fn attack_sign(self) -> f32 {
        match self {
            Team::Red => 1.0,
            Team::Blue => -1.0,
        }
    }
}

/// How an actor is driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A connected player
    Human,
    /// A server-registered practice bot
    Automated,
}

/// Which touchline the ball crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchlineSide {
    MinZ,
    MaxZ,
}

/// Coin toss faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinFace {
    Heads,
    Tails,
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Lobby, waiting for enough players
    Waiting,
    /// Pre-match sequence running (coin toss, placement, countdown)
    Starting,
    /// Regulation clock running
    Playing,
    /// Goal celebration / restart sequence in progress
    GoalScored,
    /// Overtime clock running
    Overtime,
    /// Match over, report available
    Finished,
}

/// Gameplay statistics an actor can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Goal,
    Tackle,
    Pass,
    Shot,
    Save,
    /// Metres travelled since the last report
    Distance,
}

/// World position or direction, Y-up with gameplay on the XZ plane
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Distance to another point, ignoring height
    pub fn distance_xz(&self, other: &Vec3) -> f32 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Length of the XZ projection
    pub fn length_xz(&self) -> f32 {
        (self.x * self.x + self.z * self.z).sqrt()
    }

    /// Unit vector of the XZ projection (zero vector stays zero)
    pub fn normalized_xz(&self) -> Vec3 {
        let len = self.length_xz();
        if len <= f32::EPSILON {
            return Vec3::ZERO;
        }
        Vec3::new(self.x / len, 0.0, self.z / len)
    }

    /// Dot product of the XZ projections
    pub fn dot_xz(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.z * other.z
    }
}

/// Running score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub red: u32,
    pub blue: u32,
}

impl Score {
    pub fn add(&mut self, team: Team) {
        match team {
            Team::Red => self.red += 1,
            Team::Blue => self.blue += 1,
        }
    }

    /// Absolute goal difference
    pub fn differential(&self) -> u32 {
        self.red.abs_diff(self.blue)
    }

    /// Leading team, `None` when tied
    pub fn leader(&self) -> Option<Team> {
        match self.red.cmp(&self.blue) {
            std::cmp::Ordering::Greater => Some(Team::Red),
            std::cmp::Ordering::Less => Some(Team::Blue),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Entity addressed by a reposition/freeze/despawn intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRef {
    Ball,
    Player { id: Uuid },
}

/// Resolution of a pass request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Pass towards a chosen teammate
    Teammate { player_id: Uuid, position: Vec3 },
    /// No viable teammate, kick towards a point ahead of the carrier
    Direction { target: Vec3 },
}

/// Signals sent from clients (or admin endpoints) to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientSignal {
    /// Join the lobby with a display name
    Join {
        name: String,
    },

    /// Pick or switch team while in the lobby
    SelectTeam {
        team: Team,
    },

    /// Leave the match
    Leave,

    /// Register a server-driven actor (practice bot)
    RegisterAutomated {
        name: String,
        team: Team,
    },

    /// Remove a previously registered automated actor
    RetireActor {
        actor_id: Uuid,
    },

    /// Ball fully crossed a goal mouth
    Goal {
        /// Team the goal counts for
        team: Team,
    },

    /// Ball crossed a touchline
    BallOutSideline {
        side: TouchlineSide,
        /// Where the ball left the field
        position: Vec3,
        /// Team that last touched the ball, if known
        last_toucher: Option<Team>,
    },

    /// Ball crossed a goal line outside the goal mouth
    BallOutGoalLine {
        /// Whose goal line was crossed
        end: Team,
        position: Vec3,
        last_toucher: Option<Team>,
    },

    /// Ball left the field with no boundary detail available.
    /// The oldest collaborators send it without a position.
    BallOut {
        #[serde(default)]
        position: Option<Vec3>,
    },

    /// Periodic actor transform report
    PositionUpdate {
        /// Automated actor ID, or `None` for the sending session's player
        actor_id: Option<Uuid>,
        position: Vec3,
    },

    /// Gameplay stat attributed to an actor
    StatEvent {
        actor_id: Option<Uuid>,
        kind: StatKind,
        amount: f32,
    },

    /// Ball carrier asks where to pass
    PassRequest {
        actor_id: Option<Uuid>,
        /// Carrier facing direction
        facing: Vec3,
    },

    /// Call the coin toss (no choice = random pick)
    CoinToss {
        choice: Option<CoinFace>,
    },

    /// Force the match to start from the lobby
    StartMatch,

    /// Abandon the match and return everyone to the lobby
    ResetMatch,

    /// Put a stuck ball back into play at the nearest legal spot
    BallReset {
        reason: Option<String>,
    },

    /// Ping for latency measurement
    Ping {
        t: u64,
    },
}

/// Intents sent from the engine to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerIntent {
    /// Welcome message after connection
    Welcome {
        session_id: Uuid,
        server_time: u64,
    },

    /// An actor entered the roster
    ActorRegistered {
        actor_id: Uuid,
        name: String,
        team: Option<Team>,
        kind: ActorKind,
    },

    /// Lobby team occupancy changed
    TeamCounts {
        red: u32,
        blue: u32,
        max_per_team: u32,
    },

    /// Coin toss window opened
    CoinTossPrompt {
        prompt: String,
    },

    /// Coin toss resolved
    CoinTossResult {
        result: CoinFace,
        kickoff_team: Team,
    },

    /// Pre-restart countdown step (3, 2, 1)
    Countdown {
        count: u32,
    },

    /// Ball is live
    CountdownGo,

    /// Clock/score/status heartbeat, sent once per match second
    GameState {
        /// Seconds left in the current period
        time_remaining: u32,
        score: Score,
        status: MatchStatus,
        /// Team taking the next kickoff, if one is pending
        kickoff_team: Option<Team>,
    },

    /// A goal was awarded
    GoalScored {
        team: Team,
        score: Score,
        /// Conceding team restarts play
        kickoff_team: Team,
    },

    /// Match finished
    GameOver {
        report: MatchReport,
    },

    /// Move an entity (physics host applies this verbatim)
    Reposition {
        entity: EntityRef,
        position: Vec3,
        /// Facing direction to apply, if any
        facing: Option<Vec3>,
        /// Clear the entity's velocity
        zero_velocity: bool,
        /// Keep the entity locked in place until unfrozen
        freeze: bool,
    },

    /// Lock or unlock an entity's movement
    SetFrozen {
        entity: EntityRef,
        frozen: bool,
    },

    /// Remove an entity from the world
    Despawn {
        entity: EntityRef,
    },

    /// Answer to a pass request
    PassResolved {
        player: Uuid,
        outcome: PassOutcome,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Final match report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub red_score: u32,
    pub blue_score: u32,
    /// `None` for a tie after overtime
    pub winner: Option<Team>,
    pub was_overtime: bool,
    pub match_duration_secs: u32,
    pub ended_at: DateTime<Utc>,
    pub player_stats: Vec<PlayerReport>,
    pub team_stats: TeamTotals,
}

/// Per-actor line in the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerReport {
    pub actor_id: Uuid,
    pub name: String,
    pub team: Option<Team>,
    pub kind: ActorKind,
    pub stats: StatLine,
}

/// Accumulated gameplay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatLine {
    pub goals: u32,
    pub tackles: u32,
    pub passes: u32,
    pub shots: u32,
    pub saves: u32,
    pub distance_m: f32,
}

impl StatLine {
    pub fn record(&mut self, kind: StatKind, amount: f32) {
        match kind {
            StatKind::Goal => self.goals += amount.max(0.0).round() as u32,
            StatKind::Tackle => self.tackles += amount.max(0.0).round() as u32,
            StatKind::Pass => self.passes += amount.max(0.0).round() as u32,
            StatKind::Shot => self.shots += amount.max(0.0).round() as u32,
            StatKind::Save => self.saves += amount.max(0.0).round() as u32,
            StatKind::Distance => self.distance_m += amount.max(0.0),
        }
    }

    pub fn merge(&mut self, other: &StatLine) {
        self.goals += other.goals;
        self.tackles += other.tackles;
        self.passes += other.passes;
        self.shots += other.shots;
        self.saves += other.saves;
        self.distance_m += other.distance_m;
    }
}

/// Team-level stat totals
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamTotals {
    pub red: StatLine,
    pub blue: StatLine,
}
