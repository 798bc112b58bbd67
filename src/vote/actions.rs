//! Local vote actions: accusing a player and casting a vote.
//!
//! Each action is split into `begin_*` (local checks, claims the single
//! in-flight slot) and `complete_*` (applies the server's answer). Nothing is
//! sent unless `begin_*` returned `Ok`.

use tokio::time::Instant;

use super::*;
use crate::api::ApiResult;
use crate::presenter::NoticeLevel;

impl VoteEngine {
    pub fn begin_start_vote(&mut self, suspect_id: &str) -> Result<(), VoteRejection> {
        match self.state() {
            VoteState::Idle => {}
            VoteState::Finished => return Err(VoteRejection::GameFinished),
            _ => return Err(VoteRejection::VoteInProgress),
        }
        if suspect_id == self.self_id {
            return Err(VoteRejection::SelfAccusation);
        }
        if self.action_in_flight {
            return Err(VoteRejection::ActionInFlight);
        }

        self.action_in_flight = true;
        self.pending_suspect = Some(suspect_id.to_string());
        Ok(())
    }

    pub fn complete_start_vote(
        &mut self,
        result: ApiResult<VoteStarted>,
        now: Instant,
    ) -> Vec<VoteEffect> {
        self.action_in_flight = false;
        let requested = self.pending_suspect.take();
        let mut effects = Vec::new();

        let started = match result {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!("Starting vote failed: {}", e);
                effects.push(VoteEffect::Ui(UiEvent::notice(
                    NoticeLevel::Error,
                    format!("Could not start the vote: {}", e),
                )));
                return effects;
            }
        };

        if self.state() != VoteState::Idle {
            // A poll saw the vote before the acknowledgement arrived
            tracing::debug!("Vote start acknowledged, already tracking a vote");
            return effects;
        }
        let Some(suspect_id) = started.suspect_id.or(requested) else {
            return effects;
        };

        self.dismissed = None;
        let initiator_name = started
            .initiator_name
            .unwrap_or_else(|| self.player_name.clone());
        let ballot = Ballot {
            key: VoteKey {
                initiator_id: Some(self.self_id.clone()),
                suspect_id,
            },
            initiator_name,
            suspect_name: started.suspect_name.unwrap_or_else(|| "???".to_string()),
            is_player_suspect: false,
            has_voted: false,
            voted_at: None,
            tally: Tally::default(),
            votes_cast: 0,
            votes_needed: None,
            result: None,
        };
        self.enter_voting(ballot, now, &mut effects);
        effects
    }

    /// Returns the vote epoch to hand back to [`VoteEngine::complete_cast_vote`]
    pub fn begin_cast_vote(&mut self) -> Result<u64, VoteRejection> {
        let VotePhase::Voting { ballot, .. } = &self.phase else {
            return Err(VoteRejection::NotVoting);
        };
        if ballot.is_player_suspect {
            return Err(VoteRejection::SelfVote);
        }
        if ballot.has_voted {
            return Err(VoteRejection::AlreadyVoted);
        }
        if self.action_in_flight {
            return Err(VoteRejection::ActionInFlight);
        }

        self.action_in_flight = true;
        Ok(self.epoch)
    }

    pub fn complete_cast_vote(
        &mut self,
        epoch: u64,
        direction: VoteDirection,
        result: ApiResult<CastVoteAck>,
        now: Instant,
    ) -> Vec<VoteEffect> {
        self.action_in_flight = false;
        let mut effects = Vec::new();

        if epoch != self.epoch {
            tracing::debug!("Dropping vote acknowledgement for stale vote {}", epoch);
            return effects;
        }
        let VotePhase::Voting { ballot, .. } = &mut self.phase else {
            return effects;
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!("Casting vote failed: {}", e);
                effects.push(VoteEffect::Ui(UiEvent::notice(
                    NoticeLevel::Error,
                    format!("Could not cast your vote: {}", e),
                )));
                return effects;
            }
        };

        tracing::info!(
            "Voted {:?} on {}: {} up, {} down, {}/{}",
            direction,
            ballot.suspect_name,
            ack.tally.up,
            ack.tally.down,
            ack.votes_cast,
            ack.votes_needed
        );
        ballot.record_own_vote(&ack, now);
        effects.push(VoteEffect::Ui(UiEvent::VoteCastConfirmed { direction }));
        effects.push(VoteEffect::Ui(UiEvent::VoteButtons { enabled: false }));
        effects.push(VoteEffect::Ui(ballot.progress()));

        if ack.all_voted || ballot.is_concluded() {
            self.enter_processing(now, &mut effects);
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::vote::tests::*;
    use std::time::Duration;

    fn ack(up: u32, down: u32, needed: u32) -> CastVoteAck {
        CastVoteAck {
            tally: Tally { up, down },
            votes_cast: up + down,
            votes_needed: needed,
            all_voted: up + down >= needed,
            result: None,
        }
    }

    #[test]
    fn test_start_vote_enters_voting_on_ack() {
        let start = Instant::now();
        let mut engine = VoteEngine::new("a", VoteTiming::default());
        engine.on_snapshot(&snapshot(None), start, start);

        engine.begin_start_vote("b").unwrap();
        assert_eq!(
            engine.begin_start_vote("b"),
            Err(VoteRejection::ActionInFlight)
        );

        engine.complete_start_vote(
            Ok(VoteStarted {
                suspect_id: Some("b".to_string()),
                suspect_name: Some("Bob".to_string()),
                initiator_name: Some("Alice".to_string()),
            }),
            start,
        );

        assert_eq!(engine.state(), VoteState::Voting);
        let ballot = engine.ballot().unwrap();
        assert!(!ballot.is_player_suspect);
        assert_eq!(ballot.suspect_id(), "b");
        assert_eq!(ballot.suspect_name, "Bob");
        assert_eq!(
            engine.begin_start_vote("c"),
            Err(VoteRejection::VoteInProgress)
        );
    }

    #[test]
    fn test_self_accusation_rejected_locally() {
        let mut engine = VoteEngine::new("a", VoteTiming::default());
        assert_eq!(
            engine.begin_start_vote("a"),
            Err(VoteRejection::SelfAccusation)
        );
        // Nothing was claimed
        assert!(engine.begin_start_vote("b").is_ok());
    }

    #[test]
    fn test_start_vote_rejection_is_reported() {
        let start = Instant::now();
        let mut engine = VoteEngine::new("a", VoteTiming::default());
        engine.begin_start_vote("b").unwrap();

        let effects = engine.complete_start_vote(
            Err(ApiError::Rejected("vote already in progress".to_string())),
            start,
        );

        assert_eq!(engine.state(), VoteState::Idle);
        assert!(matches!(
            ui(&effects).as_slice(),
            [UiEvent::Notice {
                level: NoticeLevel::Error,
                ..
            }]
        ));
        assert!(engine.begin_start_vote("b").is_ok());
    }

    #[test]
    fn test_suspect_cannot_vote() {
        let start = Instant::now();
        let mut engine = VoteEngine::new("b", VoteTiming::default());
        engine.on_snapshot(&snapshot(Some(vote("a", "b"))), start, start);

        assert_eq!(engine.begin_cast_vote(), Err(VoteRejection::SelfVote));
    }

    #[test]
    fn test_cast_vote_requires_voting_state() {
        let mut engine = VoteEngine::new("c", VoteTiming::default());
        assert_eq!(engine.begin_cast_vote(), Err(VoteRejection::NotVoting));

        engine.halt();
        assert_eq!(engine.begin_cast_vote(), Err(VoteRejection::NotVoting));
        assert_eq!(
            engine.begin_start_vote("b"),
            Err(VoteRejection::GameFinished)
        );
    }

    #[test]
    fn test_rapid_casts_produce_one_request() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let sent: Vec<_> = (0..5).filter_map(|_| engine.begin_cast_vote().ok()).collect();
        assert_eq!(sent.len(), 1);

        engine.complete_cast_vote(sent[0], VoteDirection::Up, Ok(ack(1, 0, 3)), start);
        assert_eq!(engine.begin_cast_vote(), Err(VoteRejection::AlreadyVoted));
    }

    #[test]
    fn test_cast_vote_is_optimistic() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let epoch = engine.begin_cast_vote().unwrap();
        let effects =
            engine.complete_cast_vote(epoch, VoteDirection::Down, Ok(ack(0, 1, 3)), start);

        let ballot = engine.ballot().unwrap();
        assert!(ballot.has_voted);
        assert_eq!(ballot.tally, Tally { up: 0, down: 1 });
        let events = ui(&effects);
        assert!(events.contains(&&UiEvent::VoteCastConfirmed {
            direction: VoteDirection::Down
        }));
        assert!(events.contains(&&UiEvent::VoteButtons { enabled: false }));
    }

    #[test]
    fn test_stale_snapshot_cannot_revert_optimistic_vote() {
        let start = Instant::now();
        let mut engine = voting_engine(start);
        let acked = start + Duration::from_secs(2);

        let epoch = engine.begin_cast_vote().unwrap();
        engine.complete_cast_vote(epoch, VoteDirection::Up, Ok(ack(1, 0, 3)), acked);

        // Requested before the ack: server did not have the vote yet
        engine.on_snapshot(&snapshot(Some(vote("a", "b"))), start, acked);
        let ballot = engine.ballot().unwrap();
        assert!(ballot.has_voted);
        assert_eq!(ballot.tally, Tally { up: 1, down: 0 });

        // Requested after the ack: the server is authoritative
        let later = acked + Duration::from_secs(3);
        let effects = engine.on_snapshot(&snapshot(Some(vote("a", "b"))), later, later);
        assert!(!engine.ballot().unwrap().has_voted);
        assert!(ui(&effects).contains(&&UiEvent::VoteButtons { enabled: true }));
        assert!(engine.begin_cast_vote().is_ok());
    }

    #[test]
    fn test_cast_failure_keeps_buttons() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let epoch = engine.begin_cast_vote().unwrap();
        engine.complete_cast_vote(
            epoch,
            VoteDirection::Up,
            Err(ApiError::Transport("connection reset".to_string())),
            start,
        );

        assert!(!engine.ballot().unwrap().has_voted);
        assert!(engine.begin_cast_vote().is_ok());
    }

    #[test]
    fn test_last_vote_concludes() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let epoch = engine.begin_cast_vote().unwrap();
        let mut last = ack(2, 1, 3);
        last.result = Some(VoteResult::ImpostorEliminated);
        engine.complete_cast_vote(epoch, VoteDirection::Up, Ok(last), start);

        assert_eq!(engine.state(), VoteState::Processing);
        assert_eq!(
            engine.ballot().unwrap().result,
            Some(VoteResult::ImpostorEliminated)
        );
    }

    #[test]
    fn test_ack_for_replaced_vote_is_dropped() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let epoch = engine.begin_cast_vote().unwrap();
        engine.on_snapshot(&snapshot(Some(vote("d", "a"))), start, start);
        let effects = engine.complete_cast_vote(epoch, VoteDirection::Up, Ok(ack(1, 0, 3)), start);

        assert!(effects.is_empty());
        assert!(!engine.ballot().unwrap().has_voted);
        // The in-flight slot was released
        assert!(engine.begin_cast_vote().is_ok());
    }
}
