//! Field geometry, formation layout and match rules

use serde::{Deserialize, Serialize};

use crate::ws::protocol::{Team, Vec3};

/// Rest height for placed entities
pub const SPAWN_HEIGHT: f32 = 1.1;

/// Playable area of the pitch on the XZ plane
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FieldBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_z: f32,
    pub max_z: f32,
    /// Y applied to every placement
    pub spawn_y: f32,
}

impl FieldBounds {
    pub fn standard() -> Self {
        Self {
            min_x: -42.0,
            max_x: 42.0,
            min_z: -26.0,
            max_z: 26.0,
            spawn_y: SPAWN_HEIGHT,
        }
    }

    /// Center spot
    pub fn center(&self) -> Vec3 {
        Vec3::new(
            (self.min_x + self.max_x) / 2.0,
            self.spawn_y,
            (self.min_z + self.max_z) / 2.0,
        )
    }

    pub fn contains(&self, p: &Vec3) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.z >= self.min_z && p.z <= self.max_z
    }

    /// Clamp a point onto the field, `inset` metres in from every line
    pub fn clamp_inside(&self, p: &Vec3, inset: f32) -> Vec3 {
        Vec3::new(
            p.x.clamp(self.min_x + inset, self.max_x - inset),
            self.spawn_y,
            p.z.clamp(self.min_z + inset, self.max_z - inset),
        )
    }

    /// X of the goal line a team defends
    pub fn goal_line_x(&self, team: Team) -> f32 {
        match team {
            Team::Red => self.min_x,
            Team::Blue => self.max_x,
        }
    }

    /// Mouth of the goal a team defends
    pub fn goal_center(&self, team: Team) -> Vec3 {
        let mid_z = (self.min_z + self.max_z) / 2.0;
        Vec3::new(self.goal_line_x(team), self.spawn_y, mid_z)
    }

    /// Mouth of the goal a team attacks
    pub fn attacked_goal_center(&self, team: Team) -> Vec3 {
        self.goal_center(team.opponent())
    }
}

impl Default for FieldBounds {
    fn default() -> Self {
        Self::standard()
    }
}

/// Formation slots as (depth into own half, lateral Z) from the center spot.
/// Slot 0 is the striker and takes kickoffs.
pub const FORMATION_OFFSETS: [(f32, f32); 4] = [
    (3.0, 0.0),   // striker
    (9.0, 7.0),   // right mid
    (15.0, -7.0), // left back
    (21.0, 0.0),  // keeper
];

/// Kickoff spot for a formation slot, inside the team's own half
pub fn formation_position(bounds: &FieldBounds, team: Team, slot: usize) -> Vec3 {
    let (depth, lateral) = FORMATION_OFFSETS[slot % FORMATION_OFFSETS.len()];
    let center = bounds.center();
    let raw = Vec3::new(
        center.x - team.attack_sign() * depth,
        bounds.spawn_y,
        center.z + lateral,
    );
    bounds.clamp_inside(&raw, 1.0)
}

/// Tunable match rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchRules {
    /// Regulation period length in seconds
    pub regulation_secs: u32,
    /// Overtime period length in seconds
    pub overtime_secs: u32,
    pub min_players_per_team: u32,
    pub max_players_per_team: u32,
    /// Goal difference that ends the match immediately
    pub mercy_immediate_diff: u32,
    /// Goal difference that ends the match inside the late window
    pub mercy_late_diff: u32,
    /// Seconds of regulation left for the late mercy rule to apply
    pub mercy_late_window_secs: u32,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            regulation_secs: 300,
            overtime_secs: 120,
            min_players_per_team: 1,
            max_players_per_team: 4,
            mercy_immediate_diff: 10,
            mercy_late_diff: 5,
            mercy_late_window_secs: 120,
        }
    }
}

/// Everything match logic needs to know about its environment
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub rules: MatchRules,
    pub bounds: FieldBounds,
}

impl MatchContext {
    pub fn new(rules: MatchRules) -> Self {
        Self {
            rules,
            bounds: FieldBounds::standard(),
        }
    }
}
