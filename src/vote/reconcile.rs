//! Reconciling the local phase against server views.
//!
//! Two sources report on the vote: the game snapshot (every game poll) and the
//! vote status endpoint (the faster sub-loop while voting). Both funnel into
//! the same rules. An absent vote sends any active phase straight to `Idle`.
//! A present vote starts, updates or concludes the tracked ballot.

use tokio::time::Instant;

use super::*;
use crate::api::ApiResult;
use crate::presenter::NoticeLevel;

impl VoteEngine {
    /// Apply a game snapshot requested at `requested_at`
    pub fn on_snapshot(
        &mut self,
        snapshot: &GameSnapshot,
        requested_at: Instant,
        now: Instant,
    ) -> Vec<VoteEffect> {
        let mut effects = Vec::new();
        if self.state() == VoteState::Finished {
            return effects;
        }

        self.role = snapshot.your_role;
        self.player_name = snapshot.player_name.clone();

        if snapshot.status == GameStatus::Finished {
            return self.halt();
        }

        match &snapshot.active_vote {
            None => self.vote_absent(&mut effects),
            Some(vote) => {
                let server_has_voted = vote.has_voted(&self.self_id);
                self.vote_present(vote, server_has_voted, requested_at, now, &mut effects);
            }
        }
        effects
    }

    /// Apply the outcome of a `FetchStatus` effect
    pub fn apply_vote_status(
        &mut self,
        epoch: u64,
        requested_at: Instant,
        result: ApiResult<VoteStatus>,
        now: Instant,
    ) -> Vec<VoteEffect> {
        self.status_in_flight = false;
        let recheck = std::mem::take(&mut self.status_recheck);
        let mut effects = Vec::new();

        if epoch != self.epoch || self.state() != VoteState::Voting {
            tracing::debug!("Dropping vote status for stale vote {}", epoch);
            return effects;
        }

        match result {
            Err(e) => tracing::warn!("Vote status check failed: {}", e),
            Ok(VoteStatus::Inactive) => self.vote_absent(&mut effects),
            Ok(VoteStatus::Active {
                vote,
                already_voted,
            }) => {
                let server_has_voted = already_voted || vote.has_voted(&self.self_id);
                self.vote_present(&vote, server_has_voted, requested_at, now, &mut effects);
            }
        }

        if recheck && self.state() == VoteState::Voting {
            self.request_status(&mut effects);
        }
        effects
    }

    fn vote_absent(&mut self, effects: &mut Vec<VoteEffect>) {
        if self.dismissed.take().is_some() {
            tracing::debug!("Cleared vote no longer reported by server");
        }
        self.cancel(effects);
    }

    fn vote_present(
        &mut self,
        vote: &VoteSnapshot,
        server_has_voted: bool,
        requested_at: Instant,
        now: Instant,
        effects: &mut Vec<VoteEffect>,
    ) {
        let key = vote.key();

        if let Some(dismissed) = &self.dismissed {
            // A fresh accusation of the same pair carries no result and no full tally
            if *dismissed == key && vote.is_concluded() {
                // Concluded and shown already; the clear has not landed yet
                if self.state() == VoteState::Idle {
                    self.request_clear(effects);
                }
                return;
            }
            self.dismissed = None;
        }

        if self.ballot().is_some_and(|ballot| ballot.key != key) {
            tracing::info!("Server replaced the tracked vote");
            self.cancel(effects);
        }

        if self.state() == VoteState::Idle {
            let ballot = Ballot::from_snapshot(vote, &self.self_id, server_has_voted);
            self.enter_voting(ballot, now, effects);
            return;
        }

        let mut conclude = false;
        match &mut self.phase {
            VotePhase::Voting { ballot, .. } => {
                let merge = ballot.merge(vote, server_has_voted, requested_at);
                if merge.progress_changed {
                    effects.push(VoteEffect::Ui(ballot.progress()));
                }
                match merge.has_voted {
                    HasVotedChange::Confirmed => {
                        effects.push(VoteEffect::Ui(UiEvent::VoteButtons { enabled: false }));
                    }
                    HasVotedChange::Reverted => {
                        tracing::warn!("Server does not have our vote, re-enabling voting");
                        effects.push(VoteEffect::Ui(UiEvent::VoteButtons {
                            enabled: ballot.can_vote(),
                        }));
                        effects.push(VoteEffect::Ui(UiEvent::notice(
                            NoticeLevel::Warning,
                            "Your vote was not registered. Please vote again.",
                        )));
                    }
                    HasVotedChange::None => {}
                }
                conclude = ballot.is_concluded();
            }
            VotePhase::Processing { ballot, .. } => {
                // Not interruptible; only pick up a late result for the results view
                if ballot.result.is_none() {
                    ballot.result = vote.result;
                }
                if vote.votes_cast >= ballot.votes_cast {
                    ballot.tally = vote.tally;
                    ballot.votes_cast = vote.votes_cast;
                }
            }
            VotePhase::Idle | VotePhase::Results { .. } | VotePhase::Finished => {}
        }

        if conclude {
            self.enter_processing(now, effects);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HasVotedChange {
    None,
    Confirmed,
    Reverted,
}

pub(super) struct Merge {
    pub progress_changed: bool,
    pub has_voted: HasVotedChange,
}

impl Ballot {
    /// Fold a server view of the same vote into the ballot. The server wins,
    /// except that a view requested before our vote was acknowledged can
    /// neither revert `has_voted` nor roll back the tally we got with the ack.
    pub(super) fn merge(
        &mut self,
        vote: &VoteSnapshot,
        server_has_voted: bool,
        requested_at: Instant,
    ) -> Merge {
        let stale = self.voted_at.is_some_and(|at| requested_at <= at);
        let before = (self.tally, self.votes_cast, self.votes_needed);

        if !stale {
            self.tally = vote.tally;
            self.votes_cast = vote.votes_cast;
        }
        if vote.votes_needed.is_some() {
            self.votes_needed = vote.votes_needed;
        }
        if vote.result.is_some() {
            self.result = vote.result;
        }
        if vote.initiator_name != "???" {
            self.initiator_name = vote.initiator_name.clone();
        }
        if vote.suspect_name != "???" {
            self.suspect_name = vote.suspect_name.clone();
        }

        let has_voted = match (self.has_voted, server_has_voted) {
            (false, true) => {
                self.has_voted = true;
                HasVotedChange::Confirmed
            }
            (true, false) if !stale => {
                self.has_voted = false;
                self.voted_at = None;
                HasVotedChange::Reverted
            }
            _ => HasVotedChange::None,
        };

        Merge {
            progress_changed: before != (self.tally, self.votes_cast, self.votes_needed),
            has_voted,
        }
    }

    pub(super) fn record_own_vote(&mut self, ack: &CastVoteAck, now: Instant) {
        self.has_voted = true;
        self.voted_at = Some(now);
        self.tally = ack.tally;
        self.votes_cast = ack.votes_cast;
        if ack.votes_needed > 0 {
            self.votes_needed = Some(ack.votes_needed);
        }
        if ack.result.is_some() {
            self.result = ack.result;
        }
    }
}
