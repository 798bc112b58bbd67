//! Game state poller.
//!
//! Owns the last known-good [`GameSnapshot`] and roster. The session drives it:
//! `try_begin` before a fetch, `complete` with the outcome. A failed poll never
//! touches the stored snapshot.

use std::time::Duration;
use tokio::time::Instant;

use crate::api::{ApiError, GameApi};
use crate::config::PollConfig;
use crate::types::*;

/// Raw result of one poll round trip
#[derive(Debug, Clone)]
pub struct PollFetch {
    pub view: GameView,
    /// `None` when the roster call failed
    pub roster: Option<Vec<PlayerView>>,
    /// When the game view request was issued
    pub requested_at: Instant,
}

/// What a completed poll means for the session
#[derive(Debug, Clone, PartialEq)]
pub enum PollUpdate {
    /// A running-game snapshot was stored
    Snapshot {
        turn_changed: bool,
        roster_failed: bool,
        /// First success after the interval had been degraded
        recovered: bool,
    },
    /// The game ended. Reported once; polling is stopped.
    Finished(GameOver),
    /// The player was removed from the game; polling is stopped.
    Removed { message: Option<String> },
    Failed {
        error: ApiError,
        failures: u32,
        /// The interval was degraded by this failure
        degraded_now: bool,
    },
    /// Arrived after the poller was stopped
    Ignored,
}

/// Fetch the game view and, for a running game, the roster.
///
/// A roster failure does not fail the poll. `votes_needed` of an open vote is
/// derived from the roster since the game view does not carry it.
pub async fn fetch(api: &dyn GameApi, identity: &SessionIdentity) -> Result<PollFetch, ApiError> {
    let requested_at = Instant::now();
    let mut view = api.game_view(identity).await?;

    let roster = match &view {
        GameView::Running(_) => match api.players(&identity.game_id).await {
            Ok(players) => Some(players),
            Err(e) => {
                tracing::warn!("Roster fetch for game {} failed: {}", identity.game_id, e);
                None
            }
        },
        _ => None,
    };

    if let (GameView::Running(snapshot), Some(players)) = (&mut view, &roster) {
        if let Some(vote) = snapshot.active_vote.as_mut() {
            vote.votes_needed = Some(votes_needed(
                players,
                &snapshot.eliminated_player_ids,
                &vote.suspect_id,
            ));
        }
    }

    Ok(PollFetch {
        view,
        roster,
        requested_at,
    })
}

/// Eligible voters: everyone still in the game except the suspect
pub fn votes_needed(
    roster: &[PlayerView],
    eliminated: &std::collections::BTreeSet<PlayerId>,
    suspect_id: &str,
) -> u32 {
    roster
        .iter()
        .filter(|p| !p.eliminated && !eliminated.contains(&p.player_id))
        .filter(|p| p.player_id != suspect_id)
        .count() as u32
}

pub struct GamePoller {
    config: PollConfig,
    in_flight: bool,
    /// A forced poll arrived while one was in flight
    followup: bool,
    consecutive_failures: u32,
    degraded: bool,
    stopped: bool,
    snapshot: Option<GameSnapshot>,
    roster: Vec<PlayerView>,
    last_turn: Option<Option<String>>,
}

impl GamePoller {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            in_flight: false,
            followup: false,
            consecutive_failures: 0,
            degraded: false,
            stopped: false,
            snapshot: None,
            roster: Vec::new(),
            last_turn: None,
        }
    }

    /// Claim the in-flight slot. False if a poll is outstanding or polling stopped.
    pub fn try_begin(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        if self.in_flight {
            tracing::debug!("Poll tick suppressed, previous poll still in flight");
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Request an immediate poll. If one is already in flight, another runs
    /// right after it completes.
    pub fn force(&mut self) -> bool {
        if self.try_begin() {
            return true;
        }
        if !self.stopped {
            self.followup = true;
        }
        false
    }

    /// True once per forced poll that was deferred behind an in-flight one
    pub fn take_followup(&mut self) -> bool {
        std::mem::take(&mut self.followup) && !self.stopped
    }

    pub fn complete(&mut self, outcome: Result<PollFetch, ApiError>) -> PollUpdate {
        self.in_flight = false;
        if self.stopped {
            return PollUpdate::Ignored;
        }

        let fetch = match outcome {
            Ok(fetch) => fetch,
            Err(error) => {
                self.consecutive_failures += 1;
                let degraded_now =
                    !self.degraded && self.consecutive_failures > self.config.max_failures;
                if degraded_now {
                    self.degraded = true;
                    tracing::warn!(
                        "{} consecutive poll failures, slowing polling to {:?}",
                        self.consecutive_failures,
                        self.config.degraded_interval
                    );
                } else {
                    tracing::warn!(
                        "Poll failed ({} in a row): {}",
                        self.consecutive_failures,
                        error
                    );
                }
                return PollUpdate::Failed {
                    error,
                    failures: self.consecutive_failures,
                    degraded_now,
                };
            }
        };

        self.consecutive_failures = 0;
        let recovered = std::mem::take(&mut self.degraded);
        if recovered {
            tracing::info!("Polling recovered, back to {:?}", self.config.interval);
        }

        match fetch.view {
            GameView::Finished(game_over) => {
                tracing::info!("Game finished, winner {:?}", game_over.winner);
                self.stop();
                PollUpdate::Finished(game_over)
            }
            GameView::Removed { message } => {
                tracing::info!("Player removed from game");
                self.stop();
                PollUpdate::Removed { message }
            }
            GameView::Running(snapshot) => {
                let roster_failed = fetch.roster.is_none();
                self.roster = fetch.roster.unwrap_or_default();

                let turn = snapshot.current_player_turn.clone();
                let turn_changed = self.last_turn.as_ref() != Some(&turn);
                self.last_turn = Some(turn);
                self.snapshot = Some(snapshot);

                PollUpdate::Snapshot {
                    turn_changed,
                    roster_failed,
                    recovered,
                }
            }
        }
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        self.followup = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn interval(&self) -> Duration {
        if self.degraded {
            self.config.degraded_interval
        } else {
            self.config.interval
        }
    }

    pub fn snapshot(&self) -> Option<&GameSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn roster(&self) -> &[PlayerView] {
        &self.roster
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Eliminated according to either the roster or the last snapshot
    pub fn is_eliminated(&self, player_id: &str) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.is_eliminated(player_id))
            || self
                .roster
                .iter()
                .any(|p| p.player_id == player_id && p.eliminated)
    }
}
