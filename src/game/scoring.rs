//! Score keeping, mercy rule and end-of-period evaluation

use crate::game::field::MatchRules;
use crate::ws::protocol::{Score, Team};

/// What a freshly counted goal means for the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalVerdict {
    /// Play restarts with a kickoff
    Continue,
    /// The lead is unassailable, end the match now
    MercyFinish,
}

/// What an expired clock means for the match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpVerdict {
    /// Tied at full time, play one overtime period
    Overtime,
    /// Match over
    Finished,
}

/// Authoritative score plus the policies that read it
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    score: Score,
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn leader(&self) -> Option<Team> {
        self.score.leader()
    }

    pub fn reset(&mut self) {
        self.score = Score::default();
    }

    /// Count a goal and decide whether the mercy rule ends the match.
    /// A big enough lead ends it at any time; a smaller one only once the
    /// period is nearly over.
    pub fn record_goal(
        &mut self,
        rules: &MatchRules,
        team: Team,
        time_remaining: u32,
    ) -> GoalVerdict {
        self.score.add(team);
        let diff = self.score.differential();
        if diff >= rules.mercy_immediate_diff {
            return GoalVerdict::MercyFinish;
        }
        if diff >= rules.mercy_late_diff && time_remaining <= rules.mercy_late_window_secs {
            return GoalVerdict::MercyFinish;
        }
        GoalVerdict::Continue
    }

    /// Decide what an expired clock means. Overtime is played at most once.
    pub fn evaluate_time_up(&self, overtime_played: bool) -> TimeUpVerdict {
        if self.score.leader().is_none() && !overtime_played {
            TimeUpVerdict::Overtime
        } else {
            TimeUpVerdict::Finished
        }
    }
}
