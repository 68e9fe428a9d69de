//! Timed restart sequences: coin toss, celebration pauses and countdowns

use std::collections::VecDeque;

use crate::ws::protocol::MatchStatus;

/// How long players get to call the opening coin toss
pub const COIN_TOSS_WINDOW_SECS: f32 = 6.0;
/// How long the toss result stays on screen
pub const COIN_REVEAL_SECS: f32 = 2.0;
/// Celebration pause after a goal
pub const GOAL_PAUSE_SECS: f32 = 3.0;
/// Time reserved for the physics host to move everyone into place
pub const REPOSITION_SECS: f32 = 1.0;
/// Length of each countdown step
pub const COUNTDOWN_STEP_SECS: f32 = 1.0;
/// Countdown starts at this number
pub const COUNTDOWN_START: u32 = 3;

/// One timed step of a restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    /// Waiting for a player to call heads or tails
    CoinTossPrompt,
    /// Toss result shown before placement
    CoinTossReveal,
    /// Celebration pause after a goal
    GoalPause,
    /// Entities being moved into place
    Reposition,
    /// Countdown step (3, 2, 1)
    Countdown(u32),
    /// Ball goes live
    Go,
}

impl RestartPhase {
    pub fn duration_secs(self) -> f32 {
        match self {
            RestartPhase::CoinTossPrompt => COIN_TOSS_WINDOW_SECS,
            RestartPhase::CoinTossReveal => COIN_REVEAL_SECS,
            RestartPhase::GoalPause => GOAL_PAUSE_SECS,
            RestartPhase::Reposition => REPOSITION_SECS,
            RestartPhase::Countdown(_) => COUNTDOWN_STEP_SECS,
            RestartPhase::Go => 0.0,
        }
    }
}

/// A queue of timed phases driven by the engine tick. Each sequence is
/// stamped with the reset generation it was created under, so a match reset
/// silently retires sequences that were already in flight.
#[derive(Debug, Clone)]
pub struct RestartSequence {
    phases: VecDeque<RestartPhase>,
    /// Time left in the current phase
    remaining: f32,
    pub generation: u64,
    /// Status the match returns to when the ball goes live
    pub resume_status: MatchStatus,
}

impl RestartSequence {
    fn new(generation: u64, resume_status: MatchStatus, phases: Vec<RestartPhase>) -> Self {
        let phases: VecDeque<RestartPhase> = phases.into();
        let remaining = phases.front().map(|p| p.duration_secs()).unwrap_or(0.0);
        Self {
            phases,
            remaining,
            generation,
            resume_status,
        }
    }

    fn countdown_tail(phases: &mut Vec<RestartPhase>) {
        for count in (1..=COUNTDOWN_START).rev() {
            phases.push(RestartPhase::Countdown(count));
        }
        phases.push(RestartPhase::Go);
    }

    /// Opening sequence: coin toss window, reveal, placement, countdown.
    pub fn opening(generation: u64) -> Self {
        let mut phases = vec![
            RestartPhase::CoinTossPrompt,
            RestartPhase::CoinTossReveal,
            RestartPhase::Reposition,
        ];
        Self::countdown_tail(&mut phases);
        Self::new(generation, MatchStatus::Playing, phases)
    }

    /// Post-goal sequence: celebration pause, placement, countdown.
    pub fn after_goal(generation: u64, resume_status: MatchStatus) -> Self {
        let mut phases = vec![RestartPhase::GoalPause, RestartPhase::Reposition];
        Self::countdown_tail(&mut phases);
        Self::new(generation, resume_status, phases)
    }

    /// Bare kickoff sequence: placement and countdown, used for the
    /// overtime restart.
    pub fn countdown_restart(generation: u64, resume_status: MatchStatus) -> Self {
        let mut phases = vec![RestartPhase::Reposition];
        Self::countdown_tail(&mut phases);
        Self::new(generation, resume_status, phases)
    }

    pub fn current(&self) -> Option<RestartPhase> {
        self.phases.front().copied()
    }

    pub fn is_finished(&self) -> bool {
        self.phases.is_empty()
    }

    /// Advance the clock and return every phase entered during the step, in
    /// order. Fractional time carries over between phases.
    pub fn advance(&mut self, dt: f32) -> Vec<RestartPhase> {
        let mut entered = Vec::new();
        if self.phases.is_empty() {
            return entered;
        }
        self.remaining -= dt;
        while self.remaining <= 0.0 {
            self.phases.pop_front();
            match self.phases.front() {
                Some(next) => {
                    entered.push(*next);
                    self.remaining += next.duration_secs();
                }
                None => break,
            }
        }
        entered
    }

    /// End the current phase right away (a coin toss call cuts the prompt
    /// window short). Returns the phase entered, if any.
    pub fn skip_current(&mut self) -> Option<RestartPhase> {
        self.phases.pop_front();
        let next = self.phases.front().copied();
        if let Some(phase) = next {
            self.remaining = phase.duration_secs();
        } else {
            self.remaining = 0.0;
        }
        next
    }
}
