//! Authoritative match engine and its tick loop host

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::field::MatchContext;
use crate::game::passing::{PassSelector, TeammateSnapshot};
use crate::game::restart::{ActorSlot, RestartKind, RestartPlan, RestartPositioner};
use crate::game::scoring::{GoalVerdict, ScoringEngine, TimeUpVerdict};
use crate::game::sequence::{RestartPhase, RestartSequence};
use crate::game::SignalEnvelope;
use crate::util::time::{tick_delta, unix_millis, TICK_DURATION_MICROS};
use crate::ws::protocol::{
    ActorKind, ClientSignal, CoinFace, EntityRef, MatchReport, MatchStatus, PassOutcome,
    PlayerReport, Score, ServerIntent, StatKind, StatLine, Team, TeamTotals, TouchlineSide, Vec3,
};

/// Display names longer than this get cut
const MAX_NAME_LEN: usize = 24;

/// Queue latency above this gets logged; the drain runs every tick, so
/// anything near it means the engine is falling behind
const STALE_SIGNAL_WARN_MS: u64 = 500;

/// Roster entry for one registered actor (authoritative)
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub team: Option<Team>,
    pub kind: ActorKind,
    /// Formation slot within the team, assigned at team selection
    pub slot: usize,
    /// Last reported world position
    pub position: Option<Vec3>,
    /// Held in place by the current restart sequence
    pub frozen: bool,
    pub stats: StatLine,
}

/// The authoritative match state machine. Signals go in, intents come out;
/// physics, rendering and audio live with the callers.
pub struct MatchEngine {
    ctx: MatchContext,
    status: MatchStatus,
    scorer: ScoringEngine,
    /// Seconds left in the current period
    time_remaining: u32,
    /// Team taking the next kickoff
    kickoff_team: Option<Team>,
    /// Player scripted to put the ball in play at the next go
    kickoff_taker: Option<Uuid>,
    /// Team that took the opening kickoff (overtime restarts with the other one)
    opening_kickoff_team: Option<Team>,
    overtime_played: bool,
    /// Sorted by actor id, so iteration order is stable everywhere
    roster: BTreeMap<Uuid, RosterEntry>,
    sequence: Option<RestartSequence>,
    /// Bumped on every reset; sequences from older generations are dropped
    reset_generation: u64,
    /// Sub-second accumulator for the one-second match clock
    clock_accum: f32,
    /// Seconds of live play so far
    played_secs: u32,
    ball_in_world: bool,
    rng: ChaCha8Rng,
    outbox: Vec<ServerIntent>,
}

impl MatchEngine {
    pub fn new(ctx: MatchContext, seed: u64) -> Self {
        let time_remaining = ctx.rules.regulation_secs;
        Self {
            ctx,
            status: MatchStatus::Waiting,
            scorer: ScoringEngine::new(),
            time_remaining,
            kickoff_team: None,
            kickoff_taker: None,
            opening_kickoff_team: None,
            overtime_played: false,
            roster: BTreeMap::new(),
            sequence: None,
            reset_generation: 0,
            clock_accum: 0.0,
            played_secs: 0,
            ball_in_world: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
            outbox: Vec::new(),
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn score(&self) -> Score {
        self.scorer.score()
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Take everything queued for broadcast since the last drain
    pub fn drain_intents(&mut self) -> Vec<ServerIntent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, intent: ServerIntent) {
        self.outbox.push(intent);
    }

    fn emit_error(&mut self, code: &str, message: &str) {
        self.emit(ServerIntent::Error {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    /// Dispatch one signal from a session or an admin endpoint
    pub fn handle_signal(&mut self, envelope: SignalEnvelope) {
        let session_id = envelope.session_id;
        match envelope.signal {
            ClientSignal::Join { name } => self.handle_join(session_id, name),
            ClientSignal::SelectTeam { team } => self.handle_select_team(session_id, team),
            ClientSignal::Leave => self.handle_leave(session_id),
            ClientSignal::RegisterAutomated { name, team } => {
                self.handle_register_automated(name, team)
            }
            ClientSignal::RetireActor { actor_id } => self.handle_retire(actor_id),
            ClientSignal::Goal { team } => self.handle_goal(team),
            ClientSignal::BallOutSideline {
                side,
                position,
                last_toucher,
            } => self.handle_sideline_out(side, position, last_toucher),
            ClientSignal::BallOutGoalLine {
                end,
                position,
                last_toucher,
            } => self.handle_goal_line_out(end, position, last_toucher),
            ClientSignal::BallOut { position } => self.handle_plain_ball_out(position),
            ClientSignal::PositionUpdate { actor_id, position } => {
                self.record_position(session_id, actor_id, position)
            }
            ClientSignal::StatEvent {
                actor_id,
                kind,
                amount,
            } => self.record_stat(session_id, actor_id, kind, amount),
            ClientSignal::PassRequest { actor_id, facing } => {
                self.resolve_pass(session_id, actor_id, facing)
            }
            ClientSignal::CoinToss { choice } => self.perform_coin_toss(session_id, choice),
            ClientSignal::StartMatch => self.start_match(),
            ClientSignal::ResetMatch => self.reset_match(),
            ClientSignal::BallReset { reason } => self.handle_ball_reset(reason),
            ClientSignal::Ping { t } => self.emit(ServerIntent::Pong { t }),
        }
    }

    /// Advance sequences and the match clock by one engine tick
    pub fn tick(&mut self) {
        let dt = tick_delta();

        if let Some(mut seq) = self.sequence.take() {
            if seq.generation == self.reset_generation {
                let entered = seq.advance(dt);
                let resume = seq.resume_status;
                if !seq.is_finished() {
                    self.sequence = Some(seq);
                }
                for phase in entered {
                    self.enter_phase(phase, resume);
                }
            }
            // Sequences from an older generation are dropped on the floor
        }

        self.clock_accum += dt;
        while self.clock_accum >= 1.0 && self.clock_is_running() {
            self.clock_accum -= 1.0;
            self.advance_clock_second();
        }
        if !self.clock_is_running() {
            self.clock_accum = 0.0;
        }
    }

    fn clock_is_running(&self) -> bool {
        matches!(self.status, MatchStatus::Playing | MatchStatus::Overtime)
    }

    fn advance_clock_second(&mut self) {
        self.played_secs += 1;
        self.time_remaining = self.time_remaining.saturating_sub(1);
        self.emit_game_state();
        if self.time_remaining == 0 {
            self.handle_time_up();
        }
    }

    fn emit_game_state(&mut self) {
        let intent = ServerIntent::GameState {
            time_remaining: self.time_remaining,
            score: self.scorer.score(),
            status: self.status,
            kickoff_team: self.kickoff_team,
        };
        self.emit(intent);
    }

    fn team_counts(&self) -> (u32, u32) {
        let mut red = 0;
        let mut blue = 0;
        for entry in self.roster.values() {
            match entry.team {
                Some(Team::Red) => red += 1,
                Some(Team::Blue) => blue += 1,
                None => {}
            }
        }
        (red, blue)
    }

    fn emit_team_counts(&mut self) {
        let (red, blue) = self.team_counts();
        let max_per_team = self.ctx.rules.max_players_per_team;
        self.emit(ServerIntent::TeamCounts {
            red,
            blue,
            max_per_team,
        });
    }

    fn random_team(&mut self) -> Team {
        if self.rng.gen::<bool>() {
            Team::Red
        } else {
            Team::Blue
        }
    }

    fn sanitize_name(raw: &str, actor_id: Uuid) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return format!("Player_{}", &actor_id.to_string()[..8]);
        }
        trimmed.chars().take(MAX_NAME_LEN).collect()
    }

    /// Map a signal to the actor it talks about: an explicit actor id wins,
    /// otherwise the sending session's own player.
    fn resolve_actor(&self, session_id: Option<Uuid>, actor_id: Option<Uuid>) -> Option<Uuid> {
        let id = actor_id.or(session_id)?;
        self.roster.contains_key(&id).then_some(id)
    }

    // ---- lobby ----

    fn handle_join(&mut self, session_id: Option<Uuid>, name: String) {
        let Some(session_id) = session_id else {
            self.emit_error("no_session", "Join requires a player session");
            return;
        };
        if self.roster.contains_key(&session_id) {
            warn!(actor_id = %session_id, "Actor already joined");
            self.emit_error("already_joined", "You are already in the lobby");
            return;
        }
        if self.status != MatchStatus::Waiting {
            self.emit_error("match_in_progress", "Wait for the current match to finish");
            return;
        }

        let name = Self::sanitize_name(&name, session_id);
        self.roster.insert(
            session_id,
            RosterEntry {
                name: name.clone(),
                team: None,
                kind: ActorKind::Human,
                slot: 0,
                position: None,
                frozen: false,
                stats: StatLine::default(),
            },
        );
        info!(actor_id = %session_id, name = %name, "Player joined lobby");
        self.emit(ServerIntent::ActorRegistered {
            actor_id: session_id,
            name,
            team: None,
            kind: ActorKind::Human,
        });
    }

    fn handle_select_team(&mut self, session_id: Option<Uuid>, team: Team) {
        let Some(session_id) = session_id else {
            self.emit_error("no_session", "Team selection requires a player session");
            return;
        };
        if self.status != MatchStatus::Waiting {
            self.emit_error("match_in_progress", "Teams are locked once the match starts");
            return;
        }
        if !self.roster.contains_key(&session_id) {
            self.emit_error("unknown_actor", "Join the lobby before picking a team");
            return;
        }

        let (red, blue) = self.team_counts();
        let occupancy = match team {
            Team::Red => red,
            Team::Blue => blue,
        };
        let already_on_team = self
            .roster
            .get(&session_id)
            .map(|e| e.team == Some(team))
            .unwrap_or(false);
        if !already_on_team && occupancy >= self.ctx.rules.max_players_per_team {
            self.emit_error("team_full", "That team is full");
            return;
        }

        let slot = self.next_free_slot(team, session_id);
        if let Some(entry) = self.roster.get_mut(&session_id) {
            entry.team = Some(team);
            entry.slot = slot;
        }
        info!(actor_id = %session_id, team = ?team, slot, "Team selected");
        self.emit_team_counts();
        self.try_begin_match();
    }

    fn next_free_slot(&self, team: Team, excluding: Uuid) -> usize {
        let used: Vec<usize> = self
            .roster
            .iter()
            .filter(|(id, e)| **id != excluding && e.team == Some(team))
            .map(|(_, e)| e.slot)
            .collect();
        (0..).find(|slot| !used.contains(slot)).unwrap_or(0)
    }

    fn handle_leave(&mut self, session_id: Option<Uuid>) {
        let Some(session_id) = session_id else {
            return;
        };
        let Some(entry) = self.roster.remove(&session_id) else {
            return;
        };
        info!(actor_id = %session_id, name = %entry.name, "Actor left");
        self.emit(ServerIntent::Despawn {
            entity: EntityRef::Player { id: session_id },
        });
        self.emit_team_counts();

        let humans_left = self
            .roster
            .values()
            .any(|e| e.kind == ActorKind::Human);
        if self.status != MatchStatus::Waiting && !humans_left {
            info!("All players left, resetting match");
            self.reset_match();
            return;
        }

        // A pre-match sequence cannot go ahead if a side emptied out
        if self.status == MatchStatus::Starting {
            let (red, blue) = self.team_counts();
            let min = self.ctx.rules.min_players_per_team;
            if red < min || blue < min {
                info!("Not enough players to start, back to the lobby");
                self.abort_to_lobby();
            }
        }
    }

    fn abort_to_lobby(&mut self) {
        self.sequence = None;
        self.status = MatchStatus::Waiting;
        self.kickoff_team = None;
        self.opening_kickoff_team = None;
        self.time_remaining = self.ctx.rules.regulation_secs;
        self.unfreeze_all();
        self.emit_game_state();
    }

    fn handle_register_automated(&mut self, name: String, team: Team) {
        if self.status != MatchStatus::Waiting {
            self.emit_error("match_in_progress", "Bots can only be added in the lobby");
            return;
        }
        let (red, blue) = self.team_counts();
        let occupancy = match team {
            Team::Red => red,
            Team::Blue => blue,
        };
        if occupancy >= self.ctx.rules.max_players_per_team {
            self.emit_error("team_full", "That team is full");
            return;
        }

        let actor_id = Uuid::from_u128(self.rng.gen());
        let name = Self::sanitize_name(&name, actor_id);
        let slot = self.next_free_slot(team, actor_id);
        self.roster.insert(
            actor_id,
            RosterEntry {
                name: name.clone(),
                team: Some(team),
                kind: ActorKind::Automated,
                slot,
                position: None,
                frozen: false,
                stats: StatLine::default(),
            },
        );
        info!(actor_id = %actor_id, name = %name, team = ?team, "Automated actor registered");
        self.emit(ServerIntent::ActorRegistered {
            actor_id,
            name,
            team: Some(team),
            kind: ActorKind::Automated,
        });
        self.emit_team_counts();
        self.try_begin_match();
    }

    fn handle_retire(&mut self, actor_id: Uuid) {
        match self.roster.get(&actor_id) {
            Some(entry) if entry.kind == ActorKind::Automated => {}
            Some(_) => {
                self.emit_error("not_automated", "Only automated actors can be retired");
                return;
            }
            None => {
                self.emit_error("unknown_actor", "No such actor");
                return;
            }
        }
        self.roster.remove(&actor_id);
        info!(actor_id = %actor_id, "Automated actor retired");
        self.emit(ServerIntent::Despawn {
            entity: EntityRef::Player { id: actor_id },
        });
        self.emit_team_counts();
    }

    // ---- match lifecycle ----

    fn try_begin_match(&mut self) {
        if self.status != MatchStatus::Waiting {
            return;
        }
        let (red, blue) = self.team_counts();
        let min = self.ctx.rules.min_players_per_team;
        if red >= min && blue >= min {
            self.begin_match();
        }
    }

    fn start_match(&mut self) {
        if self.status != MatchStatus::Waiting {
            self.emit_error("already_started", "Match already underway");
            return;
        }
        let (red, blue) = self.team_counts();
        let min = self.ctx.rules.min_players_per_team;
        if red < min || blue < min {
            self.emit_error("not_enough_players", "Both teams need players first");
            return;
        }
        self.begin_match();
    }

    fn begin_match(&mut self) {
        self.status = MatchStatus::Starting;
        self.time_remaining = self.ctx.rules.regulation_secs;
        self.kickoff_team = None;
        let seq = RestartSequence::opening(self.reset_generation);
        let first = seq.current();
        let resume = seq.resume_status;
        self.sequence = Some(seq);
        info!("Match starting, coin toss open");
        self.emit_game_state();
        if let Some(phase) = first {
            self.enter_phase(phase, resume);
        }
    }

    fn perform_coin_toss(&mut self, session_id: Option<Uuid>, choice: Option<CoinFace>) {
        let in_prompt = self
            .sequence
            .as_ref()
            .map(|s| s.current() == Some(RestartPhase::CoinTossPrompt))
            .unwrap_or(false);
        if !in_prompt {
            self.emit_error("coin_toss_closed", "The coin toss window is over");
            return;
        }

        let flip = if self.rng.gen::<bool>() {
            CoinFace::Heads
        } else {
            CoinFace::Tails
        };
        let caller_team = session_id
            .and_then(|sid| self.roster.get(&sid))
            .and_then(|e| e.team);
        let kickoff = match (choice, caller_team) {
            (Some(call), Some(team)) => {
                if call == flip {
                    team
                } else {
                    team.opponent()
                }
            }
            _ => self.random_team(),
        };
        self.set_kickoff(flip, kickoff);

        if let Some(mut seq) = self.sequence.take() {
            let next = seq.skip_current();
            let resume = seq.resume_status;
            if !seq.is_finished() {
                self.sequence = Some(seq);
            }
            if let Some(phase) = next {
                self.enter_phase(phase, resume);
            }
        }
    }

    fn set_kickoff(&mut self, flip: CoinFace, kickoff: Team) {
        self.kickoff_team = Some(kickoff);
        self.opening_kickoff_team = Some(kickoff);
        info!(result = ?flip, kickoff = ?kickoff, "Coin toss resolved");
        self.emit(ServerIntent::CoinTossResult {
            result: flip,
            kickoff_team: kickoff,
        });
    }

    fn handle_goal(&mut self, team: Team) {
        if !self.clock_is_running() || self.sequence.is_some() {
            warn!(team = ?team, status = ?self.status, "Goal signal ignored, ball not live");
            return;
        }

        let verdict = self
            .scorer
            .record_goal(&self.ctx.rules, team, self.time_remaining);
        let conceder = team.opponent();
        self.kickoff_team = Some(conceder);
        let score = self.scorer.score();
        info!(team = ?team, red = score.red, blue = score.blue, "Goal scored");
        self.emit(ServerIntent::GoalScored {
            team,
            score,
            kickoff_team: conceder,
        });

        match verdict {
            GoalVerdict::MercyFinish => {
                info!("Mercy rule ends the match");
                self.finish_match();
            }
            GoalVerdict::Continue => {
                let resume = self.status;
                self.status = MatchStatus::GoalScored;
                self.sequence = Some(RestartSequence::after_goal(self.reset_generation, resume));
                self.emit_game_state();
            }
        }
    }

    fn handle_time_up(&mut self) {
        match self.scorer.evaluate_time_up(self.overtime_played) {
            TimeUpVerdict::Overtime => {
                self.overtime_played = true;
                self.time_remaining = self.ctx.rules.overtime_secs;
                // The side that did not take the opening kickoff restarts
                let kickoff = self
                    .opening_kickoff_team
                    .map(|t| t.opponent())
                    .unwrap_or_else(|| self.random_team());
                self.kickoff_team = Some(kickoff);
                self.status = MatchStatus::Starting;
                info!(kickoff = ?kickoff, "Tied at full time, overtime");
                let seq =
                    RestartSequence::countdown_restart(self.reset_generation, MatchStatus::Overtime);
                let first = seq.current();
                let resume = seq.resume_status;
                self.sequence = Some(seq);
                self.emit_game_state();
                if let Some(phase) = first {
                    self.enter_phase(phase, resume);
                }
            }
            TimeUpVerdict::Finished => self.finish_match(),
        }
    }

    fn finish_match(&mut self) {
        self.status = MatchStatus::Finished;
        self.sequence = None;
        self.unfreeze_all();
        let report = self.build_report();
        info!(
            red = report.red_score,
            blue = report.blue_score,
            winner = ?report.winner,
            "Match finished"
        );
        self.emit(ServerIntent::GameOver { report });
        self.emit_game_state();
    }

    fn build_report(&self) -> MatchReport {
        let score = self.scorer.score();
        let mut player_stats: Vec<PlayerReport> = self
            .roster
            .iter()
            .map(|(id, entry)| PlayerReport {
                actor_id: *id,
                name: entry.name.clone(),
                team: entry.team,
                kind: entry.kind,
                stats: entry.stats,
            })
            .collect();
        player_stats.sort_by(|a, b| {
            b.stats
                .goals
                .cmp(&a.stats.goals)
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut team_stats = TeamTotals::default();
        for report in &player_stats {
            match report.team {
                Some(Team::Red) => team_stats.red.merge(&report.stats),
                Some(Team::Blue) => team_stats.blue.merge(&report.stats),
                None => {}
            }
        }

        MatchReport {
            red_score: score.red,
            blue_score: score.blue,
            winner: self.scorer.leader(),
            was_overtime: self.overtime_played,
            match_duration_secs: self.played_secs,
            ended_at: chrono::Utc::now(),
            player_stats,
            team_stats,
        }
    }

    fn reset_match(&mut self) {
        self.reset_generation += 1;
        self.sequence = None;

        // Everyone leaves the world, sessions rejoin from the lobby
        let actors: Vec<Uuid> = self.roster.keys().copied().collect();
        for id in actors {
            self.emit(ServerIntent::Despawn {
                entity: EntityRef::Player { id },
            });
        }
        self.roster.clear();

        if self.ball_in_world {
            self.emit(ServerIntent::Despawn {
                entity: EntityRef::Ball,
            });
            self.ball_in_world = false;
        }

        self.status = MatchStatus::Waiting;
        self.scorer.reset();
        self.time_remaining = self.ctx.rules.regulation_secs;
        self.kickoff_team = None;
        self.kickoff_taker = None;
        self.opening_kickoff_team = None;
        self.overtime_played = false;
        self.clock_accum = 0.0;
        self.played_secs = 0;
        info!("Match reset, back to the lobby");
        self.emit_team_counts();
        self.emit_game_state();
    }

    fn unfreeze_all(&mut self) {
        let frozen: Vec<Uuid> = self
            .roster
            .iter()
            .filter(|(_, e)| e.frozen)
            .map(|(id, _)| *id)
            .collect();
        for id in frozen {
            if let Some(entry) = self.roster.get_mut(&id) {
                entry.frozen = false;
            }
            self.emit(ServerIntent::SetFrozen {
                entity: EntityRef::Player { id },
                frozen: false,
            });
        }
        if self.ball_in_world {
            self.emit(ServerIntent::SetFrozen {
                entity: EntityRef::Ball,
                frozen: false,
            });
        }
    }

    // ---- restart sequences ----

    fn enter_phase(&mut self, phase: RestartPhase, resume_status: MatchStatus) {
        match phase {
            RestartPhase::CoinTossPrompt => {
                self.emit(ServerIntent::CoinTossPrompt {
                    prompt: "Call heads or tails for the kickoff".to_string(),
                });
            }
            RestartPhase::CoinTossReveal => {
                // Nobody called it in time, toss for them
                if self.kickoff_team.is_none() {
                    let flip = if self.rng.gen::<bool>() {
                        CoinFace::Heads
                    } else {
                        CoinFace::Tails
                    };
                    let kickoff = self.random_team();
                    self.set_kickoff(flip, kickoff);
                }
            }
            RestartPhase::GoalPause => {}
            RestartPhase::Reposition => {
                let kickoff = self.kickoff_team.unwrap_or_else(|| {
                    warn!("Reposition without a kickoff team, picking one");
                    self.random_team()
                });
                self.kickoff_team = Some(kickoff);
                let actors: Vec<ActorSlot> = self
                    .roster
                    .iter()
                    .filter_map(|(id, e)| {
                        e.team.map(|team| ActorSlot {
                            actor_id: *id,
                            team,
                            slot: e.slot,
                        })
                    })
                    .collect();
                let plan = RestartPositioner::kickoff_plan(&self.ctx.bounds, kickoff, &actors);
                self.emit_restart_plan(&plan);
                self.kickoff_taker = plan.taker;
            }
            RestartPhase::Countdown(count) => {
                self.emit(ServerIntent::Countdown { count });
            }
            RestartPhase::Go => {
                self.emit(ServerIntent::CountdownGo);
                self.unfreeze_all();
                self.status = resume_status;
                self.clock_accum = 0.0;
                // No kickoff pending once the ball is live
                self.kickoff_team = None;
                info!(status = ?self.status, "Ball live");
                self.emit_game_state();
                if let Some(taker) = self.kickoff_taker.take() {
                    self.script_kickoff_pass(taker);
                }
            }
        }
    }

    fn emit_restart_plan(&mut self, plan: &RestartPlan) {
        for placement in &plan.placements {
            debug_assert!(self.ctx.bounds.contains(&placement.position));
            if let EntityRef::Player { id } = placement.entity {
                // Placements are authoritative for the placed player's position
                if let Some(entry) = self.roster.get_mut(&id) {
                    entry.position = Some(placement.position);
                    if placement.freeze {
                        entry.frozen = true;
                    }
                }
            }
            if placement.entity == EntityRef::Ball {
                self.ball_in_world = true;
            }
            self.emit(ServerIntent::Reposition {
                entity: placement.entity,
                position: placement.position,
                facing: placement.facing,
                zero_velocity: true,
                freeze: placement.freeze,
            });
        }
    }

    // ---- out of bounds ----

    fn ball_is_live(&self) -> bool {
        self.clock_is_running() && self.sequence.is_none()
    }

    fn handle_sideline_out(
        &mut self,
        side: TouchlineSide,
        position: Vec3,
        last_toucher: Option<Team>,
    ) {
        if !self.ball_is_live() {
            warn!("Sideline signal ignored, ball not live");
            return;
        }
        let team = RestartPositioner::resolve_throw_in(last_toucher, &mut self.rng);
        let plan = RestartPositioner::throw_in_plan(&self.ctx.bounds, side, &position, team);
        info!(side = ?side, team = ?plan.restarting_team, "Throw-in");
        self.emit_restart_plan(&plan);
    }

    fn handle_goal_line_out(&mut self, end: Team, position: Vec3, last_toucher: Option<Team>) {
        if !self.ball_is_live() {
            warn!("Goal line signal ignored, ball not live");
            return;
        }
        let (kind, team) = RestartPositioner::resolve_goal_line(end, last_toucher);
        let plan = match kind {
            RestartKind::CornerKick => {
                RestartPositioner::corner_kick_plan(&self.ctx.bounds, end, &position, team)
            }
            _ => RestartPositioner::goal_kick_plan(&self.ctx.bounds, team),
        };
        info!(end = ?end, kind = ?plan.kind, team = ?plan.restarting_team, "Goal line restart");
        self.emit_restart_plan(&plan);
    }

    /// Legacy boundary signal with no line information: drop the ball back
    /// onto the field where it left, or recenter it when the payload-less
    /// old shape arrives.
    fn handle_plain_ball_out(&mut self, position: Option<Vec3>) {
        if !self.ball_is_live() {
            warn!("Ball out signal ignored, ball not live");
            return;
        }
        let spot = match position {
            Some(exit) => self.ctx.bounds.clamp_inside(&exit, 1.5),
            None => self.ctx.bounds.center(),
        };
        self.emit(ServerIntent::Reposition {
            entity: EntityRef::Ball,
            position: spot,
            facing: None,
            zero_velocity: true,
            freeze: false,
        });
    }

    fn handle_ball_reset(&mut self, reason: Option<String>) {
        if !self.ball_is_live() {
            self.emit_error("ball_reset_unavailable", "Ball can only be reset in open play");
            return;
        }
        info!(reason = reason.as_deref().unwrap_or("unspecified"), "Ball reset");
        let center = self.ctx.bounds.center();
        self.emit(ServerIntent::Reposition {
            entity: EntityRef::Ball,
            position: center,
            facing: None,
            zero_velocity: true,
            freeze: false,
        });
    }

    // ---- actors ----

    fn record_position(&mut self, session_id: Option<Uuid>, actor_id: Option<Uuid>, position: Vec3) {
        if let Some(id) = self.resolve_actor(session_id, actor_id) {
            if let Some(entry) = self.roster.get_mut(&id) {
                entry.position = Some(position);
            }
        }
    }

    fn record_stat(
        &mut self,
        session_id: Option<Uuid>,
        actor_id: Option<Uuid>,
        kind: StatKind,
        amount: f32,
    ) {
        if let Some(id) = self.resolve_actor(session_id, actor_id) {
            if let Some(entry) = self.roster.get_mut(&id) {
                entry.stats.record(kind, amount);
            }
        }
    }

    fn resolve_pass(&mut self, session_id: Option<Uuid>, actor_id: Option<Uuid>, facing: Vec3) {
        let Some(carrier_id) = self.resolve_actor(session_id, actor_id) else {
            self.emit_error("unknown_actor", "No such actor");
            return;
        };
        if !self.ball_is_live() {
            self.emit_error("ball_not_live", "Passing is only available in open play");
            return;
        }
        let Some(entry) = self.roster.get(&carrier_id) else {
            return;
        };
        let (Some(team), Some(carrier_pos)) = (entry.team, entry.position) else {
            self.emit_error("no_position", "No known position for the carrier");
            return;
        };

        let outcome = self.select_pass_outcome(carrier_id, team, &carrier_pos, &facing);
        self.emit(ServerIntent::PassResolved {
            player: carrier_id,
            outcome,
        });
    }

    /// Run the selector over the live roster; no eligible receiver falls
    /// back to a clamped directional target
    fn select_pass_outcome(
        &self,
        carrier_id: Uuid,
        team: Team,
        carrier_pos: &Vec3,
        facing: &Vec3,
    ) -> PassOutcome {
        let teammates: Vec<TeammateSnapshot> = self
            .roster
            .iter()
            .filter(|(id, e)| **id != carrier_id && e.team == Some(team))
            .filter_map(|(id, e)| {
                e.position.map(|position| TeammateSnapshot {
                    player_id: *id,
                    position,
                    kind: e.kind,
                })
            })
            .collect();
        let opponents: Vec<Vec3> = self
            .roster
            .values()
            .filter(|e| e.team == Some(team.opponent()))
            .filter_map(|e| e.position)
            .collect();

        match PassSelector::select(
            &self.ctx.bounds,
            carrier_pos,
            team,
            facing,
            &teammates,
            &opponents,
        ) {
            Some(candidate) => PassOutcome::Teammate {
                player_id: candidate.player_id,
                position: candidate.position,
            },
            None => PassOutcome::Direction {
                target: PassSelector::fallback_target(&self.ctx.bounds, carrier_pos, team, facing),
            },
        }
    }

    /// Kickoffs are played as a scripted tap back into the formation
    fn script_kickoff_pass(&mut self, taker: Uuid) {
        let Some(entry) = self.roster.get(&taker) else {
            return;
        };
        let (Some(team), Some(position)) = (entry.team, entry.position) else {
            return;
        };
        let facing = Vec3::new(-team.attack_sign(), 0.0, 0.0);
        let outcome = self.select_pass_outcome(taker, team, &position, &facing);
        self.emit(ServerIntent::PassResolved {
            player: taker,
            outcome,
        });
    }
}

/// Handle to the running engine task
#[derive(Clone)]
pub struct EngineHandle {
    pub signal_tx: mpsc::Sender<SignalEnvelope>,
    pub intent_tx: broadcast::Sender<ServerIntent>,
    roster_count: Arc<AtomicUsize>,
    status: Arc<parking_lot::RwLock<MatchStatus>>,
}

impl EngineHandle {
    pub fn roster_count(&self) -> usize {
        self.roster_count.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> MatchStatus {
        *self.status.read()
    }
}

/// Owns the engine and drives it from a fixed-rate tick loop
pub struct EngineHost {
    engine: MatchEngine,
    signal_rx: mpsc::Receiver<SignalEnvelope>,
    intent_tx: broadcast::Sender<ServerIntent>,
    roster_count: Arc<AtomicUsize>,
    status: Arc<parking_lot::RwLock<MatchStatus>>,
}

impl EngineHost {
    pub fn new(ctx: MatchContext, seed: u64) -> (Self, EngineHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(256);
        let (intent_tx, _) = broadcast::channel(64);
        let roster_count = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(parking_lot::RwLock::new(MatchStatus::Waiting));

        let handle = EngineHandle {
            signal_tx,
            intent_tx: intent_tx.clone(),
            roster_count: roster_count.clone(),
            status: status.clone(),
        };
        let host = Self {
            engine: MatchEngine::new(ctx, seed),
            signal_rx,
            intent_tx,
            roster_count,
            status,
        };
        (host, handle)
    }

    /// Run the engine tick loop. Lives for the whole process; a match reset
    /// brings the engine back to the lobby rather than ending the task.
    pub async fn run(mut self) {
        info!("Match engine started");

        let tick_duration = Duration::from_micros(TICK_DURATION_MICROS);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            // Drain the signal queue
            while let Ok(envelope) = self.signal_rx.try_recv() {
                let queued_ms = unix_millis().saturating_sub(envelope.received_at);
                if queued_ms > STALE_SIGNAL_WARN_MS {
                    warn!(queued_ms, "Signal sat in the queue");
                }
                self.engine.handle_signal(envelope);
            }

            self.engine.tick();

            for intent in self.engine.drain_intents() {
                let _ = self.intent_tx.send(intent);
            }

            self.roster_count
                .store(self.engine.roster_len(), Ordering::Relaxed);
            let status = self.engine.status();
            if *self.status.read() != status {
                info!(
                    status = ?status,
                    score = ?self.engine.score(),
                    time_remaining = self.engine.time_remaining(),
                    "Match status changed"
                );
            }
            *self.status.write() = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::field::MatchRules;

    fn engine_with(rules: MatchRules) -> MatchEngine {
        MatchEngine::new(MatchContext::new(rules), 7)
    }

    fn quick_rules() -> MatchRules {
        MatchRules {
            regulation_secs: 30,
            overtime_secs: 10,
            ..MatchRules::default()
        }
    }

    fn signal(engine: &mut MatchEngine, session: Uuid, signal: ClientSignal) {
        engine.handle_signal(SignalEnvelope::from_session(session, signal));
    }

    fn admin(engine: &mut MatchEngine, sig: ClientSignal) {
        engine.handle_signal(SignalEnvelope::admin(sig));
    }

    fn advance_secs(engine: &mut MatchEngine, secs: f32) {
        let ticks = (secs / 0.1).round() as u32;
        for _ in 0..ticks {
            engine.tick();
        }
    }

    /// Two humans, one per team; auto-start fires on the second selection
    fn fill_lobby(engine: &mut MatchEngine) -> (Uuid, Uuid) {
        let red = Uuid::from_u128(0x0a);
        let blue = Uuid::from_u128(0x0b);
        signal(engine, red, ClientSignal::Join { name: "Ada".into() });
        signal(engine, blue, ClientSignal::Join { name: "Grace".into() });
        signal(engine, red, ClientSignal::SelectTeam { team: Team::Red });
        signal(engine, blue, ClientSignal::SelectTeam { team: Team::Blue });
        (red, blue)
    }

    /// Drive a freshly started match through toss, placement and countdown
    fn play_to_kickoff(engine: &mut MatchEngine) -> (Uuid, Uuid) {
        let (red, blue) = fill_lobby(engine);
        assert_eq!(engine.status(), MatchStatus::Starting);
        signal(
            engine,
            red,
            ClientSignal::CoinToss {
                choice: Some(CoinFace::Heads),
            },
        );
        // Reveal, reposition and three countdown steps
        advance_secs(engine, 2.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Playing);
        engine.drain_intents();
        (red, blue)
    }

    fn kickoff_team_from(intents: &[ServerIntent]) -> Option<Team> {
        intents.iter().find_map(|i| match i {
            ServerIntent::CoinTossResult { kickoff_team, .. } => Some(*kickoff_team),
            _ => None,
        })
    }

    #[test]
    fn lobby_fills_and_match_starts() {
        let mut engine = engine_with(quick_rules());
        let (red, _) = fill_lobby(&mut engine);
        assert_eq!(engine.status(), MatchStatus::Starting);

        let intents = engine.drain_intents();
        assert!(intents
            .iter()
            .any(|i| matches!(i, ServerIntent::CoinTossPrompt { .. })));
        assert!(intents.iter().any(
            |i| matches!(i, ServerIntent::TeamCounts { red: 1, blue: 1, .. })
        ));

        // Joining a running match is refused
        signal(
            &mut engine,
            Uuid::from_u128(0x0c),
            ClientSignal::Join { name: "Late".into() },
        );
        let intents = engine.drain_intents();
        assert!(intents.iter().any(|i| matches!(
            i,
            ServerIntent::Error { code, .. } if code == "match_in_progress"
        )));

        // The starter keeps their roster spot
        assert!(engine.roster.contains_key(&red));
    }

    #[test]
    fn coin_toss_call_decides_kickoff_once() {
        let mut engine = engine_with(quick_rules());
        let (red, _) = fill_lobby(&mut engine);
        engine.drain_intents();

        signal(
            &mut engine,
            red,
            ClientSignal::CoinToss {
                choice: Some(CoinFace::Heads),
            },
        );
        let intents = engine.drain_intents();
        let (result, kickoff) = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::CoinTossResult {
                    result,
                    kickoff_team,
                } => Some((*result, *kickoff_team)),
                _ => None,
            })
            .expect("toss result");
        // Caller is on red: a correct call wins the kickoff
        if result == CoinFace::Heads {
            assert_eq!(kickoff, Team::Red);
        } else {
            assert_eq!(kickoff, Team::Blue);
        }

        // Second call is too late
        signal(
            &mut engine,
            red,
            ClientSignal::CoinToss { choice: None },
        );
        let intents = engine.drain_intents();
        assert!(intents.iter().any(|i| matches!(
            i,
            ServerIntent::Error { code, .. } if code == "coin_toss_closed"
        )));
    }

    #[test]
    fn expired_toss_window_resolves_randomly() {
        let mut engine = engine_with(quick_rules());
        fill_lobby(&mut engine);
        engine.drain_intents();

        // Let the whole prompt window lapse without a call
        advance_secs(&mut engine, 6.1);
        let intents = engine.drain_intents();
        assert!(kickoff_team_from(&intents).is_some());
    }

    #[test]
    fn countdown_runs_to_go_and_play_begins() {
        let mut engine = engine_with(quick_rules());
        let (red, _) = fill_lobby(&mut engine);
        signal(&mut engine, red, ClientSignal::CoinToss { choice: None });
        engine.drain_intents();

        advance_secs(&mut engine, 2.0 + 1.0 + 3.0 + 0.3);
        let intents = engine.drain_intents();

        let counts: Vec<u32> = intents
            .iter()
            .filter_map(|i| match i {
                ServerIntent::Countdown { count } => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![3, 2, 1]);
        assert!(intents
            .iter()
            .any(|i| matches!(i, ServerIntent::CountdownGo)));
        assert_eq!(engine.status(), MatchStatus::Playing);

        // Kickoff placements covered the ball and both players
        let repositions = intents
            .iter()
            .filter(|i| matches!(i, ServerIntent::Reposition { .. }))
            .count();
        assert_eq!(repositions, 3);
        // Everyone thawed at go
        assert!(engine.roster.values().all(|e| !e.frozen));
    }

    #[test]
    fn kickoff_go_scripts_a_tap_back_pass() {
        let rules = MatchRules {
            min_players_per_team: 2,
            ..quick_rules()
        };
        let mut engine = engine_with(rules);
        let r1 = Uuid::from_u128(1);
        let r2 = Uuid::from_u128(2);
        let b1 = Uuid::from_u128(3);
        let b2 = Uuid::from_u128(4);
        for (id, name) in [(r1, "r1"), (r2, "r2"), (b1, "b1"), (b2, "b2")] {
            signal(&mut engine, id, ClientSignal::Join { name: name.into() });
        }
        signal(&mut engine, r1, ClientSignal::SelectTeam { team: Team::Red });
        signal(&mut engine, r2, ClientSignal::SelectTeam { team: Team::Red });
        signal(&mut engine, b1, ClientSignal::SelectTeam { team: Team::Blue });
        signal(&mut engine, b2, ClientSignal::SelectTeam { team: Team::Blue });
        assert_eq!(engine.status(), MatchStatus::Starting);

        admin(&mut engine, ClientSignal::CoinToss { choice: None });
        advance_secs(&mut engine, 2.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Playing);

        let intents = engine.drain_intents();
        let kickoff = kickoff_team_from(&intents).expect("toss result");
        // First selection per team holds the lowest slot and takes the kickoff
        let (taker, mate) = match kickoff {
            Team::Red => (r1, r2),
            Team::Blue => (b1, b2),
        };
        let (player, outcome) = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::PassResolved { player, outcome } => {
                    Some((*player, outcome.clone()))
                }
                _ => None,
            })
            .expect("scripted kickoff pass");
        assert_eq!(player, taker);
        match outcome {
            PassOutcome::Teammate { player_id, .. } => assert_eq!(player_id, mate),
            PassOutcome::Direction { .. } => panic!("expected a tap back to the formation"),
        }
    }

    #[test]
    fn goal_pauses_clock_and_conceder_kicks_off() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);

        advance_secs(&mut engine, 2.0);
        let before = engine.time_remaining();
        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        let intents = engine.drain_intents();
        assert!(intents.iter().any(|i| matches!(
            i,
            ServerIntent::GoalScored {
                team: Team::Red,
                kickoff_team: Team::Blue,
                ..
            }
        )));
        assert_eq!(engine.status(), MatchStatus::GoalScored);

        // A second goal during the celebration is ignored
        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        assert_eq!(engine.score().red, 1);

        // Celebration and countdown do not consume match time
        advance_secs(&mut engine, 3.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Playing);
        assert_eq!(engine.time_remaining(), before);
    }

    #[test]
    fn mercy_rule_ends_a_blowout() {
        let mut engine = engine_with(MatchRules {
            mercy_immediate_diff: 3,
            ..quick_rules()
        });
        play_to_kickoff(&mut engine);

        for _ in 0..2 {
            admin(&mut engine, ClientSignal::Goal { team: Team::Blue });
            advance_secs(&mut engine, 3.0 + 1.0 + 3.0 + 0.3);
            assert_eq!(engine.status(), MatchStatus::Playing);
            engine.drain_intents();
        }
        admin(&mut engine, ClientSignal::Goal { team: Team::Blue });
        assert_eq!(engine.status(), MatchStatus::Finished);

        let intents = engine.drain_intents();
        let report = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::GameOver { report } => Some(report.clone()),
                _ => None,
            })
            .expect("game over report");
        assert_eq!(report.winner, Some(Team::Blue));
        assert_eq!(report.blue_score, 3);
        assert!(!report.was_overtime);
    }

    #[test]
    fn final_report_aggregates_stat_events() {
        let mut engine = engine_with(MatchRules {
            mercy_immediate_diff: 1,
            ..quick_rules()
        });
        let (red, blue) = play_to_kickoff(&mut engine);

        for _ in 0..2 {
            signal(
                &mut engine,
                red,
                ClientSignal::StatEvent {
                    actor_id: None,
                    kind: StatKind::Pass,
                    amount: 1.0,
                },
            );
        }
        signal(
            &mut engine,
            red,
            ClientSignal::StatEvent {
                actor_id: None,
                kind: StatKind::Goal,
                amount: 1.0,
            },
        );
        signal(
            &mut engine,
            blue,
            ClientSignal::StatEvent {
                actor_id: None,
                kind: StatKind::Save,
                amount: 1.0,
            },
        );
        signal(
            &mut engine,
            blue,
            ClientSignal::StatEvent {
                actor_id: None,
                kind: StatKind::Distance,
                amount: 25.0,
            },
        );

        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        assert_eq!(engine.status(), MatchStatus::Finished);
        let intents = engine.drain_intents();
        let report = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::GameOver { report } => Some(report.clone()),
                _ => None,
            })
            .expect("game over report");

        assert_eq!(report.team_stats.red.passes, 2);
        assert_eq!(report.team_stats.red.goals, 1);
        assert_eq!(report.team_stats.blue.saves, 1);
        assert!((report.team_stats.blue.distance_m - 25.0).abs() < f32::EPSILON);
        // Goal scorers sort to the front of the player table
        assert_eq!(report.player_stats[0].actor_id, red);
        assert_eq!(report.player_stats.len(), 2);
    }

    #[test]
    fn tie_goes_to_overtime_with_swapped_kickoff() {
        let mut engine = engine_with(quick_rules());
        let (red, _) = fill_lobby(&mut engine);
        signal(&mut engine, red, ClientSignal::CoinToss { choice: None });
        let opening = kickoff_team_from(&engine.drain_intents()).expect("opening kickoff");
        advance_secs(&mut engine, 2.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Playing);
        engine.drain_intents();

        // Run out regulation still tied
        advance_secs(&mut engine, 31.0);
        assert_eq!(engine.status(), MatchStatus::Starting);
        let intents = engine.drain_intents();
        let overtime_kickoff = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::GameState { kickoff_team, .. } => *kickoff_team,
                _ => None,
            })
            .expect("overtime kickoff");
        assert_eq!(overtime_kickoff, opening.opponent());

        // Placement already ran inside the 31s window, countdown remains
        advance_secs(&mut engine, 3.0 + 0.2);
        assert_eq!(engine.status(), MatchStatus::Overtime);
        assert_eq!(engine.time_remaining(), quick_rules().overtime_secs);
    }

    #[test]
    fn overtime_goal_resumes_overtime() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);
        advance_secs(&mut engine, 31.0);
        advance_secs(&mut engine, 3.0 + 0.2);
        assert_eq!(engine.status(), MatchStatus::Overtime);
        engine.drain_intents();

        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        assert_eq!(engine.status(), MatchStatus::GoalScored);
        advance_secs(&mut engine, 3.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Overtime);
    }

    #[test]
    fn overtime_tie_finishes_without_a_winner() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);
        advance_secs(&mut engine, 31.0);
        advance_secs(&mut engine, 3.0 + 0.2);
        assert_eq!(engine.status(), MatchStatus::Overtime);
        engine.drain_intents();

        // Overtime runs out still level
        advance_secs(&mut engine, 11.0);
        assert_eq!(engine.status(), MatchStatus::Finished);
        let intents = engine.drain_intents();
        let report = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::GameOver { report } => Some(report.clone()),
                _ => None,
            })
            .expect("game over report");
        assert_eq!(report.winner, None);
        assert!(report.was_overtime);
    }

    #[test]
    fn sideline_out_repositions_the_ball_without_stopping_play() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);

        admin(
            &mut engine,
            ClientSignal::BallOutSideline {
                side: TouchlineSide::MaxZ,
                position: Vec3::new(5.0, 1.0, 30.0),
                last_toucher: Some(Team::Red),
            },
        );
        let intents = engine.drain_intents();
        let placed = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::Reposition {
                    entity: EntityRef::Ball,
                    position,
                    ..
                } => Some(*position),
                _ => None,
            })
            .expect("ball placed");
        assert!(placed.z < 26.0);
        assert!(placed.z > 20.0);
        // Play continues, no status change
        assert_eq!(engine.status(), MatchStatus::Playing);
    }

    #[test]
    fn legacy_ball_out_without_position_recenters() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);

        admin(&mut engine, ClientSignal::BallOut { position: None });
        let intents = engine.drain_intents();
        let placed = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::Reposition {
                    entity: EntityRef::Ball,
                    position,
                    ..
                } => Some(*position),
                _ => None,
            })
            .expect("ball recentered");
        let center = engine.ctx.bounds.center();
        assert!((placed.x - center.x).abs() < f32::EPSILON);
        assert!((placed.z - center.z).abs() < f32::EPSILON);
        assert_eq!(engine.status(), MatchStatus::Playing);
    }

    #[test]
    fn goal_line_out_routes_corner_or_goal_kick() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);

        // Defender touched last: corner, ball near the red goal line
        admin(
            &mut engine,
            ClientSignal::BallOutGoalLine {
                end: Team::Red,
                position: Vec3::new(-43.0, 1.0, 10.0),
                last_toucher: Some(Team::Red),
            },
        );
        let intents = engine.drain_intents();
        let corner = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::Reposition {
                    entity: EntityRef::Ball,
                    position,
                    ..
                } => Some(*position),
                _ => None,
            })
            .expect("corner placed");
        assert!(corner.x < -39.0);
        assert!(corner.z > 23.0);

        // Attacker touched last: goal kick away from the line
        admin(
            &mut engine,
            ClientSignal::BallOutGoalLine {
                end: Team::Red,
                position: Vec3::new(-43.0, 1.0, -10.0),
                last_toucher: Some(Team::Blue),
            },
        );
        let intents = engine.drain_intents();
        let goal_kick = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::Reposition {
                    entity: EntityRef::Ball,
                    position,
                    ..
                } => Some(*position),
                _ => None,
            })
            .expect("goal kick placed");
        assert!(goal_kick.x > -40.0 && goal_kick.x < -30.0);
    }

    #[test]
    fn out_of_bounds_ignored_during_celebration() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);
        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        engine.drain_intents();

        admin(
            &mut engine,
            ClientSignal::BallOutSideline {
                side: TouchlineSide::MinZ,
                position: Vec3::new(0.0, 1.0, -30.0),
                last_toucher: None,
            },
        );
        let intents = engine.drain_intents();
        assert!(!intents
            .iter()
            .any(|i| matches!(i, ServerIntent::Reposition { .. })));
    }

    #[test]
    fn pass_request_prefers_humans_and_falls_back() {
        let mut engine = engine_with(quick_rules());
        let red = Uuid::from_u128(0x0a);
        let red2 = Uuid::from_u128(0x0b);
        let blue = Uuid::from_u128(0x0c);
        signal(&mut engine, red, ClientSignal::Join { name: "Ada".into() });
        signal(&mut engine, red2, ClientSignal::Join { name: "Lin".into() });
        signal(&mut engine, blue, ClientSignal::Join { name: "Grace".into() });
        signal(&mut engine, red, ClientSignal::SelectTeam { team: Team::Red });
        signal(&mut engine, red2, ClientSignal::SelectTeam { team: Team::Red });
        admin(
            &mut engine,
            ClientSignal::RegisterAutomated {
                name: "Bot".into(),
                team: Team::Red,
            },
        );
        signal(&mut engine, blue, ClientSignal::SelectTeam { team: Team::Blue });
        assert_eq!(engine.status(), MatchStatus::Starting);
        signal(&mut engine, red, ClientSignal::CoinToss { choice: None });
        advance_secs(&mut engine, 2.0 + 1.0 + 3.0 + 0.3);
        assert_eq!(engine.status(), MatchStatus::Playing);
        engine.drain_intents();

        let bot_id = *engine
            .roster
            .iter()
            .find(|(_, e)| e.kind == ActorKind::Automated)
            .map(|(id, _)| id)
            .expect("bot registered");

        // Carrier at the center, human teammate and bot equally placed
        signal(
            &mut engine,
            red,
            ClientSignal::PositionUpdate {
                actor_id: None,
                position: Vec3::new(0.0, 1.1, 0.0),
            },
        );
        signal(
            &mut engine,
            red2,
            ClientSignal::PositionUpdate {
                actor_id: None,
                position: Vec3::new(10.0, 1.1, 4.0),
            },
        );
        admin(
            &mut engine,
            ClientSignal::PositionUpdate {
                actor_id: Some(bot_id),
                position: Vec3::new(10.0, 1.1, -4.0),
            },
        );
        signal(
            &mut engine,
            red,
            ClientSignal::PassRequest {
                actor_id: None,
                facing: Vec3::new(1.0, 0.0, 0.0),
            },
        );
        let intents = engine.drain_intents();
        let outcome = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::PassResolved { outcome, .. } => Some(outcome.clone()),
                _ => None,
            })
            .expect("pass resolved");
        assert!(matches!(
            outcome,
            PassOutcome::Teammate { player_id, .. } if player_id == red2
        ));

        // With teammates unknown/far away the engine still answers
        signal(
            &mut engine,
            red2,
            ClientSignal::PositionUpdate {
                actor_id: None,
                position: Vec3::new(-40.0, 1.1, -25.0),
            },
        );
        admin(
            &mut engine,
            ClientSignal::PositionUpdate {
                actor_id: Some(bot_id),
                position: Vec3::new(-40.0, 1.1, 25.0),
            },
        );
        signal(
            &mut engine,
            red,
            ClientSignal::PassRequest {
                actor_id: None,
                facing: Vec3::new(1.0, 0.0, 0.0),
            },
        );
        let intents = engine.drain_intents();
        let outcome = intents
            .iter()
            .find_map(|i| match i {
                ServerIntent::PassResolved { outcome, .. } => Some(outcome.clone()),
                _ => None,
            })
            .expect("pass resolved");
        assert!(matches!(outcome, PassOutcome::Direction { .. }));
    }

    #[test]
    fn reset_clears_everything_and_invalidates_sequences() {
        let mut engine = engine_with(quick_rules());
        play_to_kickoff(&mut engine);
        admin(&mut engine, ClientSignal::Goal { team: Team::Red });
        assert_eq!(engine.status(), MatchStatus::GoalScored);
        engine.drain_intents();

        admin(&mut engine, ClientSignal::ResetMatch);
        assert_eq!(engine.status(), MatchStatus::Waiting);
        assert_eq!(engine.score(), Default::default());
        let intents = engine.drain_intents();
        assert!(intents
            .iter()
            .any(|i| matches!(i, ServerIntent::Despawn { entity: EntityRef::Ball })));
        // A full reset empties the roster, sessions rejoin from the lobby
        let despawned_players = intents
            .iter()
            .filter(|i| matches!(i, ServerIntent::Despawn { entity: EntityRef::Player { .. } }))
            .count();
        assert_eq!(despawned_players, 2);
        assert_eq!(engine.roster_len(), 0);

        // The pending goal countdown never fires
        advance_secs(&mut engine, 10.0);
        assert_eq!(engine.status(), MatchStatus::Waiting);
        let intents = engine.drain_intents();
        assert!(!intents
            .iter()
            .any(|i| matches!(i, ServerIntent::Countdown { .. } | ServerIntent::CountdownGo)));

        // Reset in the lobby is harmless
        admin(&mut engine, ClientSignal::ResetMatch);
        assert_eq!(engine.status(), MatchStatus::Waiting);
    }

    #[test]
    fn last_human_leaving_resets_the_match() {
        let mut engine = engine_with(quick_rules());
        let (red, blue) = play_to_kickoff(&mut engine);
        signal(&mut engine, red, ClientSignal::Leave);
        assert_eq!(engine.status(), MatchStatus::Playing);
        signal(&mut engine, blue, ClientSignal::Leave);
        assert_eq!(engine.status(), MatchStatus::Waiting);
        assert_eq!(engine.roster_len(), 0);
    }

    #[test]
    fn signal_storm_never_breaks_invariants() {
        let mut engine = engine_with(quick_rules());
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let sessions: Vec<Uuid> = (0..6).map(Uuid::from_u128).collect();
        let mut prev_status = MatchStatus::Waiting;
        let mut prev_score = Score::default();

        for step in 0..2000 {
            let session = sessions[rng.gen_range(0..sessions.len())];
            let sig = match rng.gen_range(0..14) {
                0 => ClientSignal::Join {
                    name: format!("p{step}"),
                },
                1 => ClientSignal::SelectTeam {
                    team: if rng.gen() { Team::Red } else { Team::Blue },
                },
                2 => ClientSignal::Leave,
                3 => ClientSignal::Goal {
                    team: if rng.gen() { Team::Red } else { Team::Blue },
                },
                4 => ClientSignal::BallOutSideline {
                    side: if rng.gen() {
                        TouchlineSide::MinZ
                    } else {
                        TouchlineSide::MaxZ
                    },
                    position: Vec3::new(rng.gen_range(-60.0..60.0), 1.0, rng.gen_range(-40.0..40.0)),
                    last_toucher: None,
                },
                5 => ClientSignal::BallOutGoalLine {
                    end: if rng.gen() { Team::Red } else { Team::Blue },
                    position: Vec3::new(rng.gen_range(-60.0..60.0), 1.0, rng.gen_range(-40.0..40.0)),
                    last_toucher: if rng.gen() { Some(Team::Red) } else { None },
                },
                6 => ClientSignal::CoinToss {
                    choice: if rng.gen() { Some(CoinFace::Heads) } else { None },
                },
                7 => ClientSignal::StartMatch,
                8 => ClientSignal::ResetMatch,
                9 => ClientSignal::BallReset { reason: None },
                10 => ClientSignal::PositionUpdate {
                    actor_id: None,
                    position: Vec3::new(rng.gen_range(-60.0..60.0), 1.0, rng.gen_range(-40.0..40.0)),
                },
                11 => ClientSignal::PassRequest {
                    actor_id: None,
                    facing: Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0)),
                },
                12 => ClientSignal::StatEvent {
                    actor_id: None,
                    kind: StatKind::Pass,
                    amount: 1.0,
                },
                _ => ClientSignal::BallOut {
                    position: if rng.gen() {
                        Some(Vec3::new(
                            rng.gen_range(-60.0..60.0),
                            1.0,
                            rng.gen_range(-40.0..40.0),
                        ))
                    } else {
                        None
                    },
                },
            };
            signal(&mut engine, session, sig);
            engine.tick();
            engine.drain_intents();

            // Scores only move up, except a full reset back to zero
            let score = engine.score();
            let monotonic = score.red >= prev_score.red && score.blue >= prev_score.blue;
            assert!(monotonic || score == Score::default());
            prev_score = score;

            // Every status change follows the transition table
            let status = engine.status();
            if status != prev_status {
                let legal: &[MatchStatus] = match prev_status {
                    MatchStatus::Waiting => &[MatchStatus::Starting],
                    MatchStatus::Starting => &[
                        MatchStatus::Playing,
                        MatchStatus::Overtime,
                        MatchStatus::Waiting,
                    ],
                    MatchStatus::Playing => &[
                        MatchStatus::GoalScored,
                        MatchStatus::Starting,
                        MatchStatus::Finished,
                        MatchStatus::Waiting,
                    ],
                    MatchStatus::GoalScored => &[
                        MatchStatus::Playing,
                        MatchStatus::Overtime,
                        MatchStatus::Waiting,
                    ],
                    MatchStatus::Overtime => &[
                        MatchStatus::GoalScored,
                        MatchStatus::Finished,
                        MatchStatus::Waiting,
                    ],
                    MatchStatus::Finished => &[MatchStatus::Waiting],
                };
                assert!(legal.contains(&status), "{prev_status:?} -> {status:?}");
            }
            prev_status = status;

            // Per-team occupancy never exceeds the cap
            let (red, blue) = {
                let mut red = 0;
                let mut blue = 0;
                for e in engine.roster.values() {
                    match e.team {
                        Some(Team::Red) => red += 1,
                        Some(Team::Blue) => blue += 1,
                        None => {}
                    }
                }
                (red, blue)
            };
            assert!(red <= engine.ctx.rules.max_players_per_team);
            assert!(blue <= engine.ctx.rules.max_players_per_team);
        }
    }

    #[test]
    fn host_round_trips_signals_to_intents() {
        tokio_test::block_on(async {
            let (host, handle) = EngineHost::new(MatchContext::new(quick_rules()), 7);
            assert_eq!(handle.status(), MatchStatus::Waiting);
            let mut intent_rx = handle.intent_tx.subscribe();
            tokio::spawn(host.run());

            handle
                .signal_tx
                .send(SignalEnvelope::from_session(
                    Uuid::from_u128(1),
                    ClientSignal::Join { name: "Ada".into() },
                ))
                .await
                .expect("engine accepts signals");

            let registered = tokio::time::timeout(Duration::from_secs(2), async {
                loop {
                    match intent_rx.recv().await {
                        Ok(ServerIntent::ActorRegistered { name, .. }) => break name,
                        Ok(_) => continue,
                        Err(e) => panic!("intent stream closed: {e}"),
                    }
                }
            })
            .await
            .expect("registration broadcast arrives");
            assert_eq!(registered, "Ada");
            assert_eq!(handle.roster_count(), 1);
        });
    }
}
