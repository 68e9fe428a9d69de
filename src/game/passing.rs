//! Pass target selection for the ball carrier

use crate::game::field::FieldBounds;
use crate::ws::protocol::{ActorKind, Team, Vec3};
use uuid::Uuid;

/// Candidates closer than this are unplayable
pub const MIN_PASS_DISTANCE: f32 = 2.0;
/// Candidates further than this are out of range
pub const MAX_PASS_DISTANCE: f32 = 30.0;
/// Sweet spot for pass length
pub const OPTIMAL_PASS_DISTANCE: f32 = 10.0;
/// Goal-distance gain that earns full progression credit
const PROGRESS_SCALE: f32 = 15.0;
/// Kick length when no teammate is viable
const FALLBACK_DISTANCE: f32 = 8.0;

/// Scoring weights, summed per candidate
const W_ALIGNMENT: f32 = 30.0;
const W_DISTANCE: f32 = 25.0;
const W_PROGRESS: f32 = 20.0;
const W_SPACE: f32 = 15.0;
/// Flat preference for passing to people over bots
const HUMAN_BONUS: f32 = 50.0;

/// A teammate considered for a pass
#[derive(Debug, Clone, Copy)]
pub struct TeammateSnapshot {
    pub player_id: Uuid,
    pub position: Vec3,
    pub kind: ActorKind,
}

/// Winning candidate with its total score
#[derive(Debug, Clone, Copy)]
pub struct PassCandidate {
    pub player_id: Uuid,
    pub position: Vec3,
    pub score: f32,
}

pub struct PassSelector;

impl PassSelector {
    /// Pick the best pass target, or `None` when no teammate is viable.
    ///
    /// Candidates are evaluated in the order given; a tie keeps the earlier
    /// one, so callers pass teammates in ascending actor-id order.
    pub fn select(
        bounds: &FieldBounds,
        carrier_pos: &Vec3,
        carrier_team: Team,
        facing: &Vec3,
        teammates: &[TeammateSnapshot],
        opponents: &[Vec3],
    ) -> Option<PassCandidate> {
        let facing_dir = facing.normalized_xz();
        let has_facing = facing_dir.length_xz() > f32::EPSILON;
        let goal = bounds.attacked_goal_center(carrier_team);
        let carrier_goal_dist = carrier_pos.distance_xz(&goal);

        let mut best: Option<PassCandidate> = None;
        for mate in teammates {
            let dist = carrier_pos.distance_xz(&mate.position);
            if dist < MIN_PASS_DISTANCE || dist > MAX_PASS_DISTANCE {
                continue;
            }

            let to_mate = Vec3::new(
                mate.position.x - carrier_pos.x,
                0.0,
                mate.position.z - carrier_pos.z,
            )
            .normalized_xz();

            let alignment = if has_facing {
                let dot = facing_dir.dot_xz(&to_mate);
                if dot <= 0.0 {
                    // Outside the 90-degree cone around the carrier's facing
                    continue;
                }
                dot
            } else {
                0.5
            };

            let distance_affinity = if dist <= OPTIMAL_PASS_DISTANCE {
                (dist - MIN_PASS_DISTANCE) / (OPTIMAL_PASS_DISTANCE - MIN_PASS_DISTANCE)
            } else {
                1.0 - (dist - OPTIMAL_PASS_DISTANCE) / (MAX_PASS_DISTANCE - OPTIMAL_PASS_DISTANCE)
            }
            .clamp(0.0, 1.0);

            let mate_goal_dist = mate.position.distance_xz(&goal);
            let progress = ((carrier_goal_dist - mate_goal_dist) / PROGRESS_SCALE).clamp(0.0, 1.0);

            let space = Self::space_factor(&mate.position, opponents);

            let mut score = W_ALIGNMENT * alignment
                + W_DISTANCE * distance_affinity
                + W_PROGRESS * progress
                + W_SPACE * space;
            if mate.kind == ActorKind::Human {
                score += HUMAN_BONUS;
            }

            let better = match &best {
                Some(current) => score > current.score,
                None => true,
            };
            if better {
                best = Some(PassCandidate {
                    player_id: mate.player_id,
                    position: mate.position,
                    score,
                });
            }
        }
        best
    }

    /// How open a spot is, from 0.0 (swarmed) to 1.0 (clear)
    fn space_factor(position: &Vec3, opponents: &[Vec3]) -> f32 {
        let mut pressure: f32 = 0.0;
        for opp in opponents {
            let d = position.distance_xz(opp);
            if d < 3.0 {
                pressure += 0.5;
            } else if d < 6.0 {
                pressure += 0.2;
            }
        }
        (1.0 - pressure).max(0.0)
    }

    /// Target point for a carrier with nobody to pass to: a short kick along
    /// the facing direction, or towards the attacked goal when facing is zero.
    pub fn fallback_target(
        bounds: &FieldBounds,
        carrier_pos: &Vec3,
        carrier_team: Team,
        facing: &Vec3,
    ) -> Vec3 {
        let mut dir = facing.normalized_xz();
        if dir.length_xz() <= f32::EPSILON {
            let goal = bounds.attacked_goal_center(carrier_team);
            dir = Vec3::new(goal.x - carrier_pos.x, 0.0, goal.z - carrier_pos.z).normalized_xz();
        }
        let raw = Vec3::new(
            carrier_pos.x + dir.x * FALLBACK_DISTANCE,
            bounds.spawn_y,
            carrier_pos.z + dir.z * FALLBACK_DISTANCE,
        );
        bounds.clamp_inside(&raw, 1.0)
    }
}
