//! Restart placement: kickoffs, throw-ins, corners and goal kicks

use crate::game::field::{formation_position, FieldBounds};
use crate::ws::protocol::{EntityRef, Team, TouchlineSide, Vec3};
use rand::Rng;
use uuid::Uuid;

/// Kickoff taker stands this far behind the ball
pub const KICKOFF_TAKER_OFFSET: f32 = 2.5;
/// Defenders may not stand closer to the center spot than this at kickoff
pub const KICKOFF_MIN_APPROACH: f32 = 7.0;
/// Throw-in spots sit this far inside the touchline
pub const TOUCHLINE_INSET: f32 = 1.5;
/// Corner spots sit this far inside both lines
pub const CORNER_INSET: f32 = 1.5;
/// Goal kicks are taken this far in front of the goal line
pub const GOAL_KICK_OFFSET: f32 = 7.0;

/// The four restart situations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    Kickoff,
    ThrowIn,
    CornerKick,
    GoalKick,
}

/// One entity placement within a restart
#[derive(Debug, Clone)]
pub struct Placement {
    pub entity: EntityRef,
    pub position: Vec3,
    pub facing: Option<Vec3>,
    /// Hold the entity in place until the ball goes live
    pub freeze: bool,
}

/// Everything the physics host must move for one restart.
/// The ball placement always comes first.
#[derive(Debug, Clone)]
pub struct RestartPlan {
    pub kind: RestartKind,
    pub restarting_team: Team,
    /// Player who puts the ball in play, set for kickoffs only
    pub taker: Option<Uuid>,
    pub placements: Vec<Placement>,
}

/// Roster row the kickoff plan needs
#[derive(Debug, Clone, Copy)]
pub struct ActorSlot {
    pub actor_id: Uuid,
    pub team: Team,
    pub slot: usize,
}

pub struct RestartPositioner;

impl RestartPositioner {
    /// Full-field kickoff: ball on the center spot, the taker just behind it,
    /// everyone else on formation spots in their own half, defenders held
    /// back off the center spot. All placements are frozen until go.
    pub fn kickoff_plan(
        bounds: &FieldBounds,
        kickoff_team: Team,
        actors: &[ActorSlot],
    ) -> RestartPlan {
        let center = bounds.center();
        let mut placements = vec![Placement {
            entity: EntityRef::Ball,
            position: center,
            facing: None,
            freeze: true,
        }];

        // The lowest occupied slot takes the kickoff
        let taker = actors
            .iter()
            .filter(|a| a.team == kickoff_team)
            .min_by_key(|a| a.slot)
            .map(|a| a.actor_id);

        for actor in actors {
            let position = if Some(actor.actor_id) == taker {
                Vec3::new(
                    center.x - kickoff_team.attack_sign() * KICKOFF_TAKER_OFFSET,
                    bounds.spawn_y,
                    center.z,
                )
            } else if actor.team == kickoff_team {
                formation_position(bounds, actor.team, actor.slot)
            } else {
                let spot = formation_position(bounds, actor.team, actor.slot);
                let depth = (center.x - spot.x) * actor.team.attack_sign();
                if depth < KICKOFF_MIN_APPROACH {
                    Vec3::new(
                        center.x - actor.team.attack_sign() * KICKOFF_MIN_APPROACH,
                        bounds.spawn_y,
                        spot.z,
                    )
                } else {
                    spot
                }
            };
            let facing = Vec3::new(center.x - position.x, 0.0, center.z - position.z)
                .normalized_xz();
            placements.push(Placement {
                entity: EntityRef::Player {
                    id: actor.actor_id,
                },
                position,
                facing: Some(facing),
                freeze: true,
            });
        }

        RestartPlan {
            kind: RestartKind::Kickoff,
            restarting_team: kickoff_team,
            taker,
            placements,
        }
    }

    /// Throw-in on the crossed touchline, at the exit point clamped onto the
    /// field. Play continues, so nothing is frozen.
    pub fn throw_in_plan(
        bounds: &FieldBounds,
        side: TouchlineSide,
        exit: &Vec3,
        team: Team,
    ) -> RestartPlan {
        let z = match side {
            TouchlineSide::MinZ => bounds.min_z + TOUCHLINE_INSET,
            TouchlineSide::MaxZ => bounds.max_z - TOUCHLINE_INSET,
        };
        let x = exit
            .x
            .clamp(bounds.min_x + TOUCHLINE_INSET, bounds.max_x - TOUCHLINE_INSET);
        RestartPlan {
            kind: RestartKind::ThrowIn,
            restarting_team: team,
            taker: None,
            placements: vec![Placement {
                entity: EntityRef::Ball,
                position: Vec3::new(x, bounds.spawn_y, z),
                facing: None,
                freeze: false,
            }],
        }
    }

    /// Corner kick at the corner nearest to where the ball went out.
    pub fn corner_kick_plan(
        bounds: &FieldBounds,
        end: Team,
        exit: &Vec3,
        team: Team,
    ) -> RestartPlan {
        let center_z = (bounds.min_z + bounds.max_z) / 2.0;
        let z = if exit.z >= center_z {
            bounds.max_z - CORNER_INSET
        } else {
            bounds.min_z + CORNER_INSET
        };
        let x = match end {
            Team::Red => bounds.min_x + CORNER_INSET,
            Team::Blue => bounds.max_x - CORNER_INSET,
        };
        RestartPlan {
            kind: RestartKind::CornerKick,
            restarting_team: team,
            taker: None,
            placements: vec![Placement {
                entity: EntityRef::Ball,
                position: Vec3::new(x, bounds.spawn_y, z),
                facing: None,
                freeze: false,
            }],
        }
    }

    /// Goal kick from in front of the defended goal.
    pub fn goal_kick_plan(bounds: &FieldBounds, end: Team) -> RestartPlan {
        let goal = bounds.goal_center(end);
        let x = goal.x + end.attack_sign() * GOAL_KICK_OFFSET;
        RestartPlan {
            kind: RestartKind::GoalKick,
            restarting_team: end,
            taker: None,
            placements: vec![Placement {
                entity: EntityRef::Ball,
                position: Vec3::new(x, bounds.spawn_y, goal.z),
                facing: None,
                freeze: false,
            }],
        }
    }

    /// Decide who throws in after a sideline crossing: the opponent of the
    /// last toucher, or a coin flip when nobody saw the touch.
    pub fn resolve_throw_in<R: Rng>(last_toucher: Option<Team>, rng: &mut R) -> Team {
        match last_toucher {
            Some(toucher) => toucher.opponent(),
            None => {
                if rng.gen::<bool>() {
                    Team::Red
                } else {
                    Team::Blue
                }
            }
        }
    }

    /// Decide what a ball over the goal line (outside the goal mouth) earns:
    /// last touch by the defending side gives a corner to the attackers,
    /// anything else gives a goal kick to the defenders.
    pub fn resolve_goal_line(end: Team, last_toucher: Option<Team>) -> (RestartKind, Team) {
        match last_toucher {
            Some(toucher) if toucher == end => (RestartKind::CornerKick, end.opponent()),
            _ => (RestartKind::GoalKick, end),
        }
    }
}
