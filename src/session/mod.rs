//! Per-session driver.
//!
//! A [`Session`] owns the poller, the vote engine and the connection tracker
//! for one `(game, player)` pair and runs them on a single task. That task
//! selects over the game poll interval, the vote engine's next timer, user
//! commands and completions of in-flight remote calls. Remote calls run in a
//! `JoinSet` so ending the session aborts whatever is still outstanding.

mod identity;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::api::{ApiError, ApiResult, GameApi};
use crate::config::ClientConfig;
use crate::poller::{self, GamePoller, PollFetch, PollUpdate};
use crate::presenter::{self, NoticeLevel, Suspect, UiEvent, WordRejection};
use crate::retry::retry;
use crate::status::ConnectionTracker;
use crate::types::*;
use crate::vote::{VoteEffect, VoteEngine, VoteRejection};

/// Session could not be established
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("initialization failed after {attempts} attempt(s): {reason}")]
    Initialization { attempts: u32, reason: String },
    #[error("player {player_id} not found in game after {attempts} attempt(s)")]
    PlayerNotFound { player_id: PlayerId, attempts: u32 },
}

/// A user action refused before anything was sent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Vote(#[from] VoteRejection),
    #[error(transparent)]
    Word(#[from] WordRejection),
    #[error("session has ended")]
    Closed,
}

/// Why a session task stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Finished(GameOver),
    Removed,
    Left,
}

enum Command {
    StartVote {
        suspect_id: PlayerId,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    CastVote {
        direction: VoteDirection,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    SubmitWord {
        word: String,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    Resync,
    LeaveWarning {
        reply: oneshot::Sender<Option<String>>,
    },
    Shutdown,
}

/// Outcome of a remote call spawned by the session
enum Completion {
    Poll(Result<PollFetch, ApiError>),
    VoteStatus {
        epoch: u64,
        requested_at: Instant,
        result: ApiResult<VoteStatus>,
    },
    StartVote(ApiResult<VoteStarted>),
    CastVote {
        epoch: u64,
        direction: VoteDirection,
        result: ApiResult<CastVoteAck>,
    },
    SubmitWord {
        word: String,
        result: ApiResult<WordOutcome>,
    },
    ClearVote(bool),
}

pub struct Session;

impl Session {
    /// Identify the player, then start polling on a background task.
    ///
    /// Fails without starting any polling when the identity lookup is
    /// exhausted or rejected.
    pub async fn start(
        api: Arc<dyn GameApi>,
        identity: SessionIdentity,
        config: ClientConfig,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Result<SessionHandle, SessionError> {
        tracing::info!(
            "Starting session for player {} in game {} via {}",
            identity.player_id,
            identity.game_id,
            api.name()
        );

        let player =
            match identity::lookup(api.as_ref(), &identity, &config.identity_retry, &ui).await {
                Ok(player) => player,
                Err(e) => {
                    let _ = ui.send(UiEvent::Fatal {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };
        let _ = ui.send(UiEvent::PlayerIdentified {
            player_id: player.player_id.clone(),
            name: player.name.clone(),
            is_master: player.is_master,
        });

        let (tx, rx) = mpsc::channel(32);
        let task = SessionTask {
            engine: VoteEngine::new(identity.player_id.clone(), config.vote.clone()),
            poller: GamePoller::new(config.poll.clone()),
            tracker: ConnectionTracker::new(),
            inflight: JoinSet::new(),
            word_in_flight: false,
            suspects: Vec::new(),
            reschedule: None,
            api,
            identity,
            config,
            ui,
        };

        Ok(SessionHandle {
            commands: tx,
            task: tokio::spawn(task.run(rx)),
        })
    }
}

/// Handle to a running session
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<SessionEnd>,
}

impl SessionHandle {
    /// Accuse a player. `Ok` means the request was sent; the outcome arrives
    /// as UI events.
    pub async fn start_vote(&self, suspect_id: impl Into<PlayerId>) -> Result<(), ActionError> {
        let suspect_id = suspect_id.into();
        self.request(|reply| Command::StartVote { suspect_id, reply })
            .await?
    }

    pub async fn cast_vote(&self, direction: VoteDirection) -> Result<(), ActionError> {
        self.request(|reply| Command::CastVote { direction, reply })
            .await?
    }

    pub async fn submit_word(&self, word: impl Into<String>) -> Result<(), ActionError> {
        let word = word.into();
        self.request(|reply| Command::SubmitWord { word, reply })
            .await?
    }

    /// The page became visible again
    pub async fn resync(&self) -> Result<(), ActionError> {
        self.commands
            .send(Command::Resync)
            .await
            .map_err(|_| ActionError::Closed)
    }

    /// Warning to show before leaving, if leaving now would skip a vote
    pub async fn leave_warning(&self) -> Option<String> {
        self.request(|reply| Command::LeaveWarning { reply })
            .await
            .ok()
            .flatten()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the session task has stopped taking commands
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    /// Stop polling, cancel in-flight calls and wait for the task
    pub async fn shutdown(self) -> SessionEnd {
        let _ = self.commands.send(Command::Shutdown).await;
        self.wait().await
    }

    /// Wait for the session to end on its own (game over or removal)
    pub async fn wait(self) -> SessionEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => {
                tracing::error!("Session task failed: {}", e);
                SessionEnd::Left
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ActionError::Closed)?;
        rx.await.map_err(|_| ActionError::Closed)
    }
}

struct SessionTask {
    api: Arc<dyn GameApi>,
    identity: SessionIdentity,
    config: ClientConfig,
    ui: mpsc::UnboundedSender<UiEvent>,
    poller: GamePoller,
    engine: VoteEngine,
    tracker: ConnectionTracker,
    inflight: JoinSet<Completion>,
    word_in_flight: bool,
    suspects: Vec<Suspect>,
    /// New poll period to apply after the current event
    reschedule: Option<Duration>,
}

fn poll_timer(start: Instant, period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> SessionEnd {
        let mut poll_interval = poll_timer(Instant::now(), self.poller.interval());

        let end = loop {
            let wakeup = self.engine.next_wakeup();

            tokio::select! {
                _ = poll_interval.tick() => {
                    self.start_poll();
                }

                _ = async {
                    match wakeup {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let effects = self.engine.tick(Instant::now());
                    self.apply(effects);
                }

                Some(joined) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    match joined {
                        Ok(completion) => {
                            if let Some(end) = self.complete(completion) {
                                break end;
                            }
                        }
                        Err(e) => {
                            if !e.is_cancelled() {
                                tracing::error!("Remote call task failed: {}", e);
                            }
                        }
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break SessionEnd::Left,
                        Some(command) => self.handle_command(command),
                    }
                }
            }

            if let Some(period) = self.reschedule.take() {
                tracing::debug!("Poll interval now {:?}", period);
                poll_interval = poll_timer(Instant::now() + period, period);
            }
        };

        tracing::info!(
            "Session for player {} ended: {:?}",
            self.identity.player_id,
            end
        );
        self.inflight.abort_all();
        end
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui.send(event);
    }

    fn set_status(&self, change: Option<ConnectionStatus>) {
        if let Some(status) = change {
            self.emit(UiEvent::Connection { status });
        }
    }

    fn call_started(&mut self) {
        let change = self.tracker.begin();
        self.set_status(change);
    }

    fn call_finished(&mut self, ok: bool) {
        let change = if ok {
            self.tracker.succeeded()
        } else {
            self.tracker.failed()
        };
        self.set_status(change);
    }

    fn start_poll(&mut self) {
        if self.poller.try_begin() {
            self.spawn_poll();
        }
    }

    fn force_poll(&mut self) {
        if self.poller.force() {
            self.spawn_poll();
        }
    }

    fn spawn_poll(&mut self) {
        self.call_started();
        let api = self.api.clone();
        let identity = self.identity.clone();
        self.inflight.spawn(async move {
            Completion::Poll(poller::fetch(api.as_ref(), &identity).await)
        });
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartVote { suspect_id, reply } => {
                let _ = reply.send(self.start_vote(suspect_id));
            }
            Command::CastVote { direction, reply } => {
                let _ = reply.send(self.cast_vote(direction));
            }
            Command::SubmitWord { word, reply } => {
                let _ = reply.send(self.submit_word(&word));
            }
            Command::Resync => {
                tracing::debug!("Resync requested");
                let effects = self.engine.resync();
                self.apply(effects);
            }
            Command::LeaveWarning { reply } => {
                let _ = reply.send(self.engine.leave_warning());
            }
            Command::Shutdown => {}
        }
    }

    fn start_vote(&mut self, suspect_id: PlayerId) -> Result<(), ActionError> {
        if suspect_id != self.identity.player_id && self.poller.is_eliminated(&suspect_id) {
            return Err(VoteRejection::SuspectEliminated.into());
        }
        self.engine.begin_start_vote(&suspect_id)?;

        tracing::info!("Accusing {}", suspect_id);
        self.call_started();
        let api = self.api.clone();
        let identity = self.identity.clone();
        self.inflight.spawn(async move {
            Completion::StartVote(api.start_vote(&identity, &suspect_id).await)
        });
        Ok(())
    }

    fn cast_vote(&mut self, direction: VoteDirection) -> Result<(), ActionError> {
        let epoch = self.engine.begin_cast_vote()?;

        self.call_started();
        let api = self.api.clone();
        let identity = self.identity.clone();
        self.inflight.spawn(async move {
            Completion::CastVote {
                epoch,
                direction,
                result: api.cast_vote(&identity, direction).await,
            }
        });
        Ok(())
    }

    fn submit_word(&mut self, raw: &str) -> Result<(), ActionError> {
        let is_my_turn = self.poller.snapshot().is_some_and(|s| s.is_my_turn());
        let word = presenter::validate_word(raw, is_my_turn)?;
        if self.word_in_flight {
            return Err(WordRejection::AlreadySubmitting.into());
        }

        self.word_in_flight = true;
        self.call_started();
        let api = self.api.clone();
        let identity = self.identity.clone();
        self.inflight.spawn(async move {
            let result = api.submit_word(&identity, &word).await;
            Completion::SubmitWord { word, result }
        });
        Ok(())
    }

    fn apply(&mut self, effects: Vec<VoteEffect>) {
        for effect in effects {
            match effect {
                VoteEffect::Ui(event) => self.emit(event),
                VoteEffect::FetchStatus { epoch } => {
                    self.call_started();
                    let api = self.api.clone();
                    let identity = self.identity.clone();
                    self.inflight.spawn(async move {
                        let requested_at = Instant::now();
                        let result = api.vote_status(&identity).await;
                        Completion::VoteStatus {
                            epoch,
                            requested_at,
                            result,
                        }
                    });
                }
                VoteEffect::ClearVote => {
                    self.call_started();
                    let api = self.api.clone();
                    let game_id = self.identity.game_id.clone();
                    let policy = self.config.clear_retry;
                    self.inflight.spawn(async move {
                        let result = retry(
                            &policy,
                            "clear vote",
                            |_| {
                                let api = api.clone();
                                let game_id = game_id.clone();
                                async move { api.clear_vote(&game_id).await }
                            },
                            |attempt, e| {
                                tracing::warn!("Clearing vote failed (attempt {}): {}", attempt, e)
                            },
                        )
                        .await;
                        Completion::ClearVote(result.is_ok())
                    });
                }
            }
        }
    }

    /// Returns `Some` when the session is over
    fn complete(&mut self, completion: Completion) -> Option<SessionEnd> {
        let now = Instant::now();

        match completion {
            Completion::Poll(outcome) => return self.complete_poll(outcome, now),
            Completion::VoteStatus {
                epoch,
                requested_at,
                result,
            } => {
                self.call_finished(result.is_ok());
                let effects = self.engine.apply_vote_status(epoch, requested_at, result, now);
                self.apply(effects);
            }
            Completion::StartVote(result) => {
                self.call_finished(result.is_ok());
                let effects = self.engine.complete_start_vote(result, now);
                self.apply(effects);
            }
            Completion::CastVote {
                epoch,
                direction,
                result,
            } => {
                self.call_finished(result.is_ok());
                let effects = self.engine.complete_cast_vote(epoch, direction, result, now);
                self.apply(effects);
            }
            Completion::SubmitWord { word, result } => {
                self.word_in_flight = false;
                self.call_finished(result.is_ok());
                match result {
                    Ok(outcome) => {
                        tracing::info!("Word '{}' accepted", word);
                        self.emit(UiEvent::WordAccepted { word });
                        if let Some(notice) = presenter::word_outcome_notice(&outcome) {
                            self.emit(notice);
                        }
                        self.force_poll();
                    }
                    Err(e) => {
                        tracing::warn!("Submitting word failed: {}", e);
                        self.emit(UiEvent::notice(
                            NoticeLevel::Error,
                            format!("Could not submit word: {}", e),
                        ));
                    }
                }
            }
            Completion::ClearVote(succeeded) => {
                self.call_finished(succeeded);
                self.engine.clear_completed(succeeded);
                self.force_poll();
            }
        }
        None
    }

    fn complete_poll(
        &mut self,
        outcome: Result<PollFetch, ApiError>,
        now: Instant,
    ) -> Option<SessionEnd> {
        let requested_at = outcome.as_ref().map(|fetch| fetch.requested_at).ok();

        match self.poller.complete(outcome) {
            PollUpdate::Snapshot {
                turn_changed,
                roster_failed,
                recovered,
            } => {
                self.call_finished(!roster_failed);
                if recovered {
                    let interval = self.poller.interval();
                    self.reschedule = Some(interval);
                    self.emit(UiEvent::PollRecovered {
                        interval_ms: interval.as_millis() as u64,
                    });
                }
                if roster_failed {
                    self.emit(UiEvent::notice(
                        NoticeLevel::Warning,
                        "Player list unavailable",
                    ));
                }

                let Some(snapshot) = self.poller.snapshot().cloned() else {
                    return None;
                };
                self.publish_snapshot(&snapshot, turn_changed);

                let effects =
                    self.engine
                        .on_snapshot(&snapshot, requested_at.unwrap_or(now), now);
                self.apply(effects);
            }
            PollUpdate::Finished(game_over) => {
                self.call_finished(true);
                let effects = self.engine.halt();
                self.apply(effects);
                self.emit(UiEvent::GameOver {
                    summary: presenter::game_summary(&self.identity, &game_over),
                });
                return Some(SessionEnd::Finished(game_over));
            }
            PollUpdate::Removed { message } => {
                self.call_finished(true);
                let effects = self.engine.halt();
                self.apply(effects);
                self.emit(UiEvent::Removed {
                    message: presenter::removal_message(message),
                });
                return Some(SessionEnd::Removed);
            }
            PollUpdate::Failed {
                error,
                failures,
                degraded_now,
            } => {
                self.call_finished(false);
                self.emit(UiEvent::PollFailed {
                    failures,
                    error: error.to_string(),
                });
                if degraded_now {
                    let interval = self.poller.interval();
                    self.reschedule = Some(interval);
                    self.emit(UiEvent::PollDegraded {
                        interval_ms: interval.as_millis() as u64,
                    });
                }
            }
            PollUpdate::Ignored => {}
        }

        if self.poller.take_followup() && self.poller.try_begin() {
            self.spawn_poll();
        }
        None
    }

    fn publish_snapshot(&mut self, snapshot: &GameSnapshot, turn_changed: bool) {
        self.emit(UiEvent::GameUpdated {
            snapshot: snapshot.clone(),
            roster: self.poller.roster().to_vec(),
        });

        if turn_changed {
            self.emit(UiEvent::TurnChanged {
                current_player: snapshot.current_player_turn.clone(),
                is_my_turn: snapshot.is_my_turn(),
            });
        }

        let suspects = if snapshot.is_my_turn() {
            presenter::eligible_suspects(
                &self.identity.player_id,
                self.poller.roster(),
                snapshot,
            )
        } else {
            Vec::new()
        };
        if suspects != self.suspects {
            self.suspects = suspects.clone();
            self.emit(UiEvent::SuspectsChanged { suspects });
        }
    }
}
