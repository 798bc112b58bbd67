//! Voting lifecycle engine.
//!
//! One accusation at a time moves through
//! `Idle -> Voting -> Processing -> Results -> Idle`, with `Finished` as the
//! terminal state once the game ends. The engine is sans-IO: every method takes
//! the current time and returns [`VoteEffect`]s for the session to carry out.
//! The server's snapshot always wins over local phases (see `reconcile`), and
//! local timers only ever trigger status checks (see `timers`).

mod actions;
mod reconcile;
mod timers;

pub use timers::{whole_secs, Countdown, ResultsTimer};

use tokio::time::Instant;

use crate::config::VoteTiming;
use crate::presenter::{verdict, UiEvent};
use crate::types::*;

/// Discriminant of [`VotePhase`], for callers that only need the state name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteState {
    Idle,
    Voting,
    Processing,
    Results,
    Finished,
}

/// Local view of the vote being tracked
#[derive(Debug, Clone, PartialEq)]
pub struct Ballot {
    pub key: VoteKey,
    pub initiator_name: String,
    pub suspect_name: String,
    pub is_player_suspect: bool,
    pub has_voted: bool,
    /// When our own vote was acknowledged. Snapshots requested before this
    /// cannot revert `has_voted`.
    voted_at: Option<Instant>,
    pub tally: Tally,
    pub votes_cast: u32,
    pub votes_needed: Option<u32>,
    pub result: Option<VoteResult>,
}

impl Ballot {
    fn from_snapshot(vote: &VoteSnapshot, self_id: &str, has_voted: bool) -> Self {
        Self {
            key: vote.key(),
            initiator_name: vote.initiator_name.clone(),
            suspect_name: vote.suspect_name.clone(),
            is_player_suspect: vote.suspect_id == self_id,
            has_voted,
            voted_at: None,
            tally: vote.tally,
            votes_cast: vote.votes_cast,
            votes_needed: vote.votes_needed,
            result: vote.result,
        }
    }

    pub fn suspect_id(&self) -> &str {
        &self.key.suspect_id
    }

    pub fn can_vote(&self) -> bool {
        !self.is_player_suspect && !self.has_voted
    }

    /// Server reported a result, or every eligible voter has voted
    pub fn is_concluded(&self) -> bool {
        self.result.is_some() || all_votes_in(self.votes_cast, self.votes_needed)
    }

    fn progress(&self) -> UiEvent {
        UiEvent::VoteProgress {
            tally: self.tally,
            votes_cast: self.votes_cast,
            votes_needed: self.votes_needed,
        }
    }
}

/// The vote lifecycle. Illegal combinations (a countdown outside `Voting`, a
/// ballot while `Idle`) are unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum VotePhase {
    Idle,
    Voting { ballot: Ballot, countdown: Countdown },
    /// Fixed pause before results; only server cancellation or game end interrupt it
    Processing { ballot: Ballot, until: Instant },
    Results { ballot: Ballot, timer: ResultsTimer },
    /// The game ended; no further vote UI
    Finished,
}

impl VotePhase {
    pub fn state(&self) -> VoteState {
        match self {
            VotePhase::Idle => VoteState::Idle,
            VotePhase::Voting { .. } => VoteState::Voting,
            VotePhase::Processing { .. } => VoteState::Processing,
            VotePhase::Results { .. } => VoteState::Results,
            VotePhase::Finished => VoteState::Finished,
        }
    }

    pub fn ballot(&self) -> Option<&Ballot> {
        match self {
            VotePhase::Voting { ballot, .. }
            | VotePhase::Processing { ballot, .. }
            | VotePhase::Results { ballot, .. } => Some(ballot),
            VotePhase::Idle | VotePhase::Finished => None,
        }
    }

    fn into_ballot(self) -> Option<Ballot> {
        match self {
            VotePhase::Voting { ballot, .. }
            | VotePhase::Processing { ballot, .. }
            | VotePhase::Results { ballot, .. } => Some(ballot),
            VotePhase::Idle | VotePhase::Finished => None,
        }
    }
}

/// Local invariant violations, reported before any remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VoteRejection {
    #[error("no vote is running")]
    NotVoting,
    #[error("a vote is already running")]
    VoteInProgress,
    #[error("you cannot vote on yourself")]
    SelfVote,
    #[error("you cannot accuse yourself")]
    SelfAccusation,
    #[error("you already voted")]
    AlreadyVoted,
    #[error("another vote action is still being sent")]
    ActionInFlight,
    #[error("that player is already eliminated")]
    SuspectEliminated,
    #[error("the game is over")]
    GameFinished,
}

/// Work the session carries out on behalf of the engine
#[derive(Debug, Clone, PartialEq)]
pub enum VoteEffect {
    /// Query the vote status endpoint; hand the outcome back with this epoch
    FetchStatus { epoch: u64 },
    /// Clear the concluded vote on the server, then force a game poll
    ClearVote,
    Ui(UiEvent),
}

pub struct VoteEngine {
    self_id: PlayerId,
    player_name: String,
    role: Role,
    timing: VoteTiming,
    phase: VotePhase,
    /// Incremented on every entry to `Voting`; completions from an older vote are dropped
    epoch: u64,
    /// Serializes start/cast requests
    action_in_flight: bool,
    pending_suspect: Option<PlayerId>,
    status_in_flight: bool,
    /// A status check came due while one was outstanding
    status_recheck: bool,
    clear_in_flight: bool,
    /// Concluded vote whose clear has not shown up in a snapshot yet
    dismissed: Option<VoteKey>,
}

impl VoteEngine {
    pub fn new(self_id: impl Into<PlayerId>, timing: VoteTiming) -> Self {
        Self {
            self_id: self_id.into(),
            player_name: String::new(),
            role: Role::Unknown,
            timing,
            phase: VotePhase::Idle,
            epoch: 0,
            action_in_flight: false,
            pending_suspect: None,
            status_in_flight: false,
            status_recheck: false,
            clear_in_flight: false,
            dismissed: None,
        }
    }

    pub fn phase(&self) -> &VotePhase {
        &self.phase
    }

    pub fn state(&self) -> VoteState {
        self.phase.state()
    }

    pub fn ballot(&self) -> Option<&Ballot> {
        self.phase.ballot()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            VoteState::Voting | VoteState::Processing | VoteState::Results
        )
    }

    /// Advance local timers
    pub fn tick(&mut self, now: Instant) -> Vec<VoteEffect> {
        let mut effects = Vec::new();
        let mut check_due = false;
        let mut processing_done = false;
        let mut results_done = false;

        match &mut self.phase {
            VotePhase::Voting { countdown, .. } => {
                if countdown.take_display(now) {
                    effects.push(VoteEffect::Ui(UiEvent::VoteTimer {
                        remaining_secs: countdown.remaining_secs(now),
                        warning: countdown.is_warning(now),
                    }));
                }
                check_due = countdown.take_check(now);
            }
            VotePhase::Processing { until, .. } => {
                processing_done = now >= *until;
            }
            VotePhase::Results { timer, .. } => {
                if timer.take_display(now) && !timer.is_expired(now) {
                    effects.push(VoteEffect::Ui(UiEvent::ResultsCountdown {
                        remaining_secs: timer.remaining_secs(now),
                        total_secs: timer.total_secs(),
                    }));
                }
                results_done = timer.is_expired(now);
            }
            VotePhase::Idle | VotePhase::Finished => {}
        }

        if check_due {
            self.request_status(&mut effects);
        }
        if processing_done {
            self.enter_results(now, &mut effects);
        }
        if results_done {
            self.finish_results(&mut effects);
        }
        effects
    }

    /// Earliest instant at which `tick` has something to do
    pub fn next_wakeup(&self) -> Option<Instant> {
        match &self.phase {
            VotePhase::Voting { countdown, .. } => countdown.next_wakeup(),
            VotePhase::Processing { until, .. } => Some(*until),
            VotePhase::Results { timer, .. } => Some(timer.next_wakeup()),
            VotePhase::Idle | VotePhase::Finished => None,
        }
    }

    /// The game ended: drop any vote and never show vote UI again
    pub fn halt(&mut self) -> Vec<VoteEffect> {
        let mut effects = Vec::new();
        if self.state() == VoteState::Finished {
            return effects;
        }
        if self.is_active() {
            tracing::info!("Game ended during vote, abandoning it");
            effects.push(VoteEffect::Ui(UiEvent::VoteOverlayHidden));
        }
        self.phase = VotePhase::Finished;
        self.dismissed = None;
        self.status_recheck = false;
        effects
    }

    /// The page became visible again: re-check a running vote right away
    pub fn resync(&mut self) -> Vec<VoteEffect> {
        let mut effects = Vec::new();
        if self.state() == VoteState::Voting {
            self.request_status(&mut effects);
        }
        effects
    }

    /// Warning to show when the player tries to leave mid-vote
    pub fn leave_warning(&self) -> Option<String> {
        match &self.phase {
            VotePhase::Voting { ballot, .. } if ballot.can_vote() => Some(format!(
                "A vote against {} is running and you have not voted yet.",
                ballot.suspect_name
            )),
            _ => None,
        }
    }

    /// The clear request finished (after its retries)
    pub fn clear_completed(&mut self, succeeded: bool) {
        self.clear_in_flight = false;
        if !succeeded {
            tracing::warn!("Vote clear failed, the next poll will retry");
        }
    }

    fn request_status(&mut self, effects: &mut Vec<VoteEffect>) {
        if self.status_in_flight {
            self.status_recheck = true;
            return;
        }
        self.status_in_flight = true;
        effects.push(VoteEffect::FetchStatus { epoch: self.epoch });
    }

    fn request_clear(&mut self, effects: &mut Vec<VoteEffect>) {
        if self.clear_in_flight {
            return;
        }
        self.clear_in_flight = true;
        effects.push(VoteEffect::ClearVote);
    }

    fn enter_voting(&mut self, ballot: Ballot, now: Instant, effects: &mut Vec<VoteEffect>) {
        self.epoch += 1;
        self.status_recheck = false;
        tracing::info!(
            "Vote {} started: {} accused {}",
            self.epoch,
            ballot.initiator_name,
            ballot.suspect_name
        );

        let countdown = Countdown::start(now, &self.timing);
        effects.push(VoteEffect::Ui(UiEvent::VoteStarted {
            suspect_id: ballot.key.suspect_id.clone(),
            suspect_name: ballot.suspect_name.clone(),
            initiator_name: ballot.initiator_name.clone(),
            is_player_suspect: ballot.is_player_suspect,
            can_vote: ballot.can_vote(),
        }));
        effects.push(VoteEffect::Ui(UiEvent::VoteButtons {
            enabled: ballot.can_vote(),
        }));
        effects.push(VoteEffect::Ui(ballot.progress()));
        effects.push(VoteEffect::Ui(UiEvent::VoteTimer {
            remaining_secs: countdown.remaining_secs(now),
            warning: countdown.is_warning(now),
        }));

        let concluded = ballot.is_concluded();
        self.phase = VotePhase::Voting { ballot, countdown };
        if concluded {
            self.enter_processing(now, effects);
        }
    }

    fn enter_processing(&mut self, now: Instant, effects: &mut Vec<VoteEffect>) {
        let phase = std::mem::replace(&mut self.phase, VotePhase::Idle);
        let Some(ballot) = phase.into_ballot() else {
            return;
        };

        tracing::info!(
            "Vote against {} concluded ({}/{:?} cast), processing",
            ballot.suspect_name,
            ballot.votes_cast,
            ballot.votes_needed
        );
        effects.push(VoteEffect::Ui(UiEvent::VoteButtons { enabled: false }));
        effects.push(VoteEffect::Ui(UiEvent::VoteProcessing {
            suspect_name: ballot.suspect_name.clone(),
        }));
        self.phase = VotePhase::Processing {
            ballot,
            until: now + self.timing.processing,
        };
    }

    fn enter_results(&mut self, now: Instant, effects: &mut Vec<VoteEffect>) {
        let phase = std::mem::replace(&mut self.phase, VotePhase::Idle);
        let Some(ballot) = phase.into_ballot() else {
            return;
        };

        tracing::info!(
            "Vote result for {}: {:?} ({} up, {} down)",
            ballot.suspect_name,
            ballot.result,
            ballot.tally.up,
            ballot.tally.down
        );
        let timer = ResultsTimer::start(now, &self.timing);
        effects.push(VoteEffect::Ui(UiEvent::VoteResults {
            suspect_name: ballot.suspect_name.clone(),
            tally: ballot.tally,
            result: ballot.result,
            verdict: verdict(ballot.result, self.role),
        }));
        effects.push(VoteEffect::Ui(UiEvent::ResultsCountdown {
            remaining_secs: timer.total_secs(),
            total_secs: timer.total_secs(),
        }));
        self.phase = VotePhase::Results { ballot, timer };
    }

    fn finish_results(&mut self, effects: &mut Vec<VoteEffect>) {
        let phase = std::mem::replace(&mut self.phase, VotePhase::Idle);
        let Some(ballot) = phase.into_ballot() else {
            return;
        };

        tracing::info!("Results shown, clearing vote against {}", ballot.suspect_name);
        effects.push(VoteEffect::Ui(UiEvent::VoteOverlayHidden));
        self.dismissed = Some(ballot.key);
        self.request_clear(effects);
    }

    /// Drop the tracked vote without results
    fn cancel(&mut self, effects: &mut Vec<VoteEffect>) {
        if !self.is_active() {
            return;
        }
        if let Some(ballot) = self.ballot() {
            tracing::info!(
                "Vote against {} closed by server, back to idle",
                ballot.suspect_name
            );
        }
        self.phase = VotePhase::Idle;
        effects.push(VoteEffect::Ui(UiEvent::VoteOverlayHidden));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn vote(initiator: &str, suspect: &str) -> VoteSnapshot {
        VoteSnapshot {
            initiator_id: Some(initiator.to_string()),
            initiator_name: initiator.to_uppercase(),
            suspect_id: suspect.to_string(),
            suspect_name: suspect.to_uppercase(),
            votes: BTreeMap::new(),
            tally: Tally::default(),
            votes_cast: 0,
            votes_needed: Some(3),
            result: None,
            overlay_hidden: false,
        }
    }

    pub fn with_votes(mut vote: VoteSnapshot, votes: &[(&str, VoteDirection)]) -> VoteSnapshot {
        for (id, direction) in votes {
            vote.votes.insert(id.to_string(), *direction);
        }
        vote.tally = Tally::from_votes(&vote.votes);
        vote.votes_cast = vote.votes.len() as u32;
        vote
    }

    pub fn snapshot(active_vote: Option<VoteSnapshot>) -> GameSnapshot {
        GameSnapshot {
            status: GameStatus::Started,
            player_name: "C".to_string(),
            your_role: Role::Innocent,
            secret_word: Some("Kaktus".to_string()),
            current_player_turn: Some("A".to_string()),
            is_master: false,
            history: Vec::new(),
            eliminated_player_ids: Default::default(),
            active_vote,
            end_reason: None,
            winner: None,
        }
    }

    pub fn ui(effects: &[VoteEffect]) -> Vec<&UiEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                VoteEffect::Ui(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Engine for player `c` already in `Voting` on A's accusation of B
    pub fn voting_engine(start: Instant) -> VoteEngine {
        let mut engine = VoteEngine::new("c", VoteTiming::default());
        engine.on_snapshot(&snapshot(Some(vote("a", "b"))), start, start);
        engine
    }

    #[test]
    fn test_starts_idle() {
        let engine = VoteEngine::new("c", VoteTiming::default());
        assert_eq!(engine.state(), VoteState::Idle);
        assert_eq!(engine.next_wakeup(), None);
        assert_eq!(engine.leave_warning(), None);
    }

    #[test]
    fn test_status_checks_during_countdown() {
        let start = Instant::now();
        let mut engine = voting_engine(start);
        let epoch = engine.epoch();

        let effects = engine.tick(start + Duration::from_secs(5));
        assert!(effects.contains(&VoteEffect::FetchStatus { epoch }));

        // Outstanding check: the next one is deferred, not duplicated
        let effects = engine.tick(start + Duration::from_secs(10));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, VoteEffect::FetchStatus { .. })));

        let effects = engine.apply_vote_status(
            epoch,
            start + Duration::from_secs(5),
            Ok(VoteStatus::Active {
                vote: vote("a", "b"),
                already_voted: false,
            }),
            start + Duration::from_secs(10),
        );
        assert!(effects.contains(&VoteEffect::FetchStatus { epoch }));
    }

    #[test]
    fn test_countdown_expiry_only_checks_status() {
        let start = Instant::now();
        let mut engine = voting_engine(start);
        let epoch = engine.epoch();

        for second in 1..=30 {
            let now = start + Duration::from_secs(second);
            for effect in engine.tick(now) {
                if let VoteEffect::FetchStatus { epoch } = effect {
                    engine.apply_vote_status(
                        epoch,
                        now,
                        Ok(VoteStatus::Active {
                            vote: vote("a", "b"),
                            already_voted: false,
                        }),
                        now,
                    );
                }
            }
        }

        assert_eq!(engine.state(), VoteState::Voting);
        assert_eq!(engine.epoch(), epoch);
        assert_eq!(engine.next_wakeup(), None);
    }

    #[test]
    fn test_timer_warning_below_ten_seconds() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let mut warnings = Vec::new();
        for second in 1..=30 {
            for event in ui(&engine.tick(start + Duration::from_secs(second))) {
                if let UiEvent::VoteTimer {
                    remaining_secs,
                    warning,
                } = event
                {
                    warnings.push((*remaining_secs, *warning));
                }
            }
        }

        assert_eq!(warnings.len(), 30);
        assert!(warnings.contains(&(11, false)));
        assert!(warnings.contains(&(10, true)));
        assert_eq!(warnings.last(), Some(&(0, true)));
    }

    #[test]
    fn test_processing_then_results_then_clear() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let mut concluded = vote("a", "b");
        concluded.result = Some(VoteResult::PlayerEliminated);
        engine.on_snapshot(&snapshot(Some(concluded.clone())), start, start);
        assert_eq!(engine.state(), VoteState::Processing);
        assert_eq!(engine.next_wakeup(), Some(start + Duration::from_millis(1500)));

        let effects = engine.tick(start + Duration::from_millis(1500));
        assert_eq!(engine.state(), VoteState::Results);
        assert!(ui(&effects).iter().any(|e| matches!(
            e,
            UiEvent::VoteResults {
                result: Some(VoteResult::PlayerEliminated),
                ..
            }
        )));

        let results_end = start + Duration::from_millis(9500);
        let mut effects = Vec::new();
        let mut last_wakeup = None;
        while let Some(at) = engine.next_wakeup() {
            last_wakeup = Some(at);
            effects.extend(engine.tick(at));
        }
        assert_eq!(last_wakeup, Some(results_end));
        assert_eq!(engine.state(), VoteState::Idle);
        assert_eq!(
            effects
                .iter()
                .filter(|e| **e == VoteEffect::ClearVote)
                .count(),
            1
        );

        let countdowns: Vec<u64> = ui(&effects)
            .iter()
            .filter_map(|e| match e {
                UiEvent::ResultsCountdown { remaining_secs, .. } => Some(*remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_halt_is_terminal() {
        let start = Instant::now();
        let mut engine = voting_engine(start);

        let effects = engine.halt();
        assert_eq!(engine.state(), VoteState::Finished);
        assert_eq!(ui(&effects), vec![&UiEvent::VoteOverlayHidden]);
        assert_eq!(engine.next_wakeup(), None);

        let effects = engine.on_snapshot(&snapshot(Some(vote("a", "b"))), start, start);
        assert!(effects.is_empty());
        assert_eq!(engine.state(), VoteState::Finished);
        assert!(engine.halt().is_empty());
    }

    #[test]
    fn test_leave_warning_only_while_able_to_vote() {
        let start = Instant::now();
        let engine = voting_engine(start);
        assert!(engine.leave_warning().is_some());

        let mut suspect = VoteEngine::new("b", VoteTiming::default());
        suspect.on_snapshot(&snapshot(Some(vote("a", "b"))), start, start);
        assert_eq!(suspect.leave_warning(), None);

        let mut voted = VoteEngine::new("c", VoteTiming::default());
        let cast = with_votes(vote("a", "b"), &[("c", VoteDirection::Up)]);
        voted.on_snapshot(&snapshot(Some(cast)), start, start);
        assert_eq!(voted.leave_warning(), None);
    }

    #[test]
    fn test_resync_requests_status_only_while_voting() {
        let start = Instant::now();
        let mut idle = VoteEngine::new("c", VoteTiming::default());
        assert!(idle.resync().is_empty());

        let mut engine = voting_engine(start);
        let epoch = engine.epoch();
        assert_eq!(engine.resync(), vec![VoteEffect::FetchStatus { epoch }]);
    }
}
