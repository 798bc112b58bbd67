//! Wire format of the game server's HTTP API.
//!
//! Response bodies are loose (most fields optional, several shapes per
//! endpoint), so every response is decoded into a permissive DTO first and then
//! converted into the strict types in [`crate::types`].

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ========== Requests ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWordRequest {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartVoteRequest {
    pub game_id: GameId,
    pub initiator_id: PlayerId,
    pub suspect_id: PlayerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub game_id: GameId,
    pub voter_id: PlayerId,
    pub vote: VoteDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearVoteRequest {
    pub game_id: GameId,
}

// ========== Responses ==========

/// Error indicator that any endpoint may return instead of its payload
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RosterResponse {
    #[serde(default)]
    pub players: Vec<PlayerView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ActiveVoteBody {
    pub initiator_id: Option<PlayerId>,
    pub initiator_name: Option<String>,
    pub suspect_id: Option<PlayerId>,
    pub suspect_name: Option<String>,
    pub votes: BTreeMap<PlayerId, VoteDirection>,
    pub result: Option<VoteResult>,
    pub overlay_hidden: bool,
}

impl ActiveVoteBody {
    /// `votes_needed` is not part of the game view; the poller derives it from the roster.
    pub fn into_snapshot(self) -> Option<VoteSnapshot> {
        let suspect_id = self.suspect_id?;
        let tally = Tally::from_votes(&self.votes);
        Some(VoteSnapshot {
            initiator_id: self.initiator_id,
            initiator_name: self.initiator_name.unwrap_or_else(|| "???".to_string()),
            suspect_name: self.suspect_name.unwrap_or_else(|| "???".to_string()),
            suspect_id,
            votes_cast: self.votes.len() as u32,
            votes: self.votes,
            tally,
            votes_needed: None,
            result: self.result,
            overlay_hidden: self.overlay_hidden,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GameViewResponse {
    /// `"eliminated"` when the player was removed from the game
    pub status: Option<String>,
    pub message: Option<String>,
    pub game_status: Option<GameStatus>,
    pub player_name: Option<String>,
    pub your_role: Option<Role>,
    pub your_word: Option<String>,
    /// Secret word, only revealed once the game is finished
    pub word: Option<String>,
    pub current_player: Option<String>,
    pub is_master: bool,
    pub history: Vec<HistoryEntry>,
    pub eliminated_players: Vec<PlayerId>,
    pub active_vote: Option<ActiveVoteBody>,
    pub winner: Option<Winner>,
    pub end_reason: Option<EndReason>,
    pub impostor_id: Option<PlayerId>,
}

impl GameViewResponse {
    pub fn into_view(self) -> GameView {
        if self.game_status == Some(GameStatus::Finished) {
            return GameView::Finished(GameOver {
                winner: self.winner,
                end_reason: self.end_reason,
                your_role: self.your_role.unwrap_or_default(),
                secret_word: self.word.or(self.your_word),
                impostor_id: self.impostor_id,
                history: self.history,
                eliminated_player_ids: self.eliminated_players.into_iter().collect(),
            });
        }

        if self.status.as_deref() == Some("eliminated") {
            return GameView::Removed {
                message: self.message,
            };
        }

        GameView::Running(GameSnapshot {
            status: self.game_status.unwrap_or_default(),
            player_name: self.player_name.unwrap_or_default(),
            your_role: self.your_role.unwrap_or_default(),
            secret_word: self.your_word,
            current_player_turn: self.current_player,
            is_master: self.is_master,
            history: self.history,
            eliminated_player_ids: self.eliminated_players.into_iter().collect(),
            active_vote: self.active_vote.and_then(ActiveVoteBody::into_snapshot),
            end_reason: self.end_reason,
            winner: self.winner,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitWordResponse {
    pub status: Option<String>,
    pub next_turn_index: Option<u32>,
    pub winner: Option<Winner>,
    pub reason: Option<EndReason>,
}

impl SubmitWordResponse {
    pub fn into_outcome(self) -> WordOutcome {
        if self.status.as_deref() == Some("game_over") {
            WordOutcome::GameOver {
                winner: self.winner,
                reason: self.reason,
            }
        } else {
            WordOutcome::Accepted {
                next_turn_index: self.next_turn_index,
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartVoteResponse {
    pub status: Option<String>,
    pub suspect: Option<PlayerId>,
    pub suspect_name: Option<String>,
    pub initiator_name: Option<String>,
}

impl StartVoteResponse {
    /// Fails with the unexpected status when the server did not open a vote
    pub fn into_started(self) -> Result<VoteStarted, String> {
        match self.status.as_deref() {
            Some("vote_started") => Ok(VoteStarted {
                suspect_id: self.suspect,
                suspect_name: self.suspect_name,
                initiator_name: self.initiator_name,
            }),
            other => Err(format!(
                "unexpected start_vote status: {}",
                other.unwrap_or("none")
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CastVoteResponse {
    pub status: Option<String>,
    pub up_votes: u32,
    pub down_votes: u32,
    pub total_votes: u32,
    pub total_possible_votes: u32,
    pub all_voted: bool,
    pub result: Option<VoteResult>,
}

impl From<CastVoteResponse> for CastVoteAck {
    fn from(response: CastVoteResponse) -> Self {
        CastVoteAck {
            tally: Tally {
                up: response.up_votes,
                down: response.down_votes,
            },
            votes_cast: response.total_votes,
            votes_needed: response.total_possible_votes,
            all_voted: response.all_voted,
            result: response.result,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TallyBody {
    pub up: u32,
    pub down: u32,
}

#[derive(Debug, Deserialize)]
pub struct VoterBody {
    #[serde(default)]
    pub name: Option<String>,
    pub vote: VoteDirection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VoteStatusResponse {
    pub active: bool,
    pub initiator_id: Option<PlayerId>,
    pub initiator_name: Option<String>,
    pub suspect_id: Option<PlayerId>,
    pub suspect_name: Option<String>,
    pub already_voted: bool,
    pub votes: Option<TallyBody>,
    pub votes_cast: Option<u32>,
    pub votes_needed: Option<u32>,
    pub voters: BTreeMap<PlayerId, VoterBody>,
    pub result: Option<VoteResult>,
    pub overlay_hidden: bool,
}

impl VoteStatusResponse {
    pub fn into_status(self) -> VoteStatus {
        let suspect_id = match self.suspect_id {
            Some(id) if self.active => id,
            _ => return VoteStatus::Inactive,
        };

        let votes: BTreeMap<PlayerId, VoteDirection> = self
            .voters
            .into_iter()
            .map(|(id, voter)| (id, voter.vote))
            .collect();
        let tally = match self.votes {
            Some(counts) => Tally {
                up: counts.up,
                down: counts.down,
            },
            None => Tally::from_votes(&votes),
        };

        VoteStatus::Active {
            already_voted: self.already_voted,
            vote: VoteSnapshot {
                initiator_id: self.initiator_id,
                initiator_name: self.initiator_name.unwrap_or_else(|| "???".to_string()),
                suspect_id,
                suspect_name: self.suspect_name.unwrap_or_else(|| "???".to_string()),
                votes_cast: self.votes_cast.unwrap_or(votes.len() as u32),
                votes,
                tally,
                votes_needed: self.votes_needed,
                result: self.result,
                overlay_hidden: self.overlay_hidden,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_view(json: &str) -> GameView {
        serde_json::from_str::<GameViewResponse>(json)
            .unwrap()
            .into_view()
    }

    #[test]
    fn test_running_view_with_active_vote() {
        let view = parse_view(
            r#"{
                "player_name": "Alice",
                "your_role": "normal",
                "your_word": "Kaktus",
                "game_status": "started",
                "current_player": "Alice",
                "is_master": true,
                "history": [{"player_id": "a", "word": "green"}],
                "eliminated_players": [],
                "active_vote": {
                    "initiator_id": "a",
                    "initiator_name": "Alice",
                    "suspect_id": "b",
                    "suspect_name": "Bob",
                    "votes": {"c": "up", "d": "down"},
                    "result": null,
                    "overlay_hidden": false
                }
            }"#,
        );

        let GameView::Running(snapshot) = view else {
            panic!("Expected running view");
        };
        assert_eq!(snapshot.your_role, Role::Innocent);
        assert_eq!(snapshot.secret_word.as_deref(), Some("Kaktus"));
        assert!(snapshot.is_my_turn());
        assert_eq!(snapshot.history.len(), 1);

        let vote = snapshot.active_vote.expect("active vote");
        assert_eq!(vote.suspect_id, "b");
        assert_eq!(vote.tally, Tally { up: 1, down: 1 });
        assert_eq!(vote.votes_cast, 2);
        assert_eq!(vote.votes_needed, None);
        assert!(vote.has_voted("c"));
        assert!(!vote.has_voted("a"));
    }

    #[test]
    fn test_finished_view() {
        let view = parse_view(
            r#"{
                "game_status": "finished",
                "winner": "impostor",
                "end_reason": "word_guessed",
                "your_role": "impostor",
                "word": "Kaktus",
                "impostor_id": "e",
                "history": [],
                "eliminated_players": ["b"]
            }"#,
        );

        let GameView::Finished(over) = view else {
            panic!("Expected finished view");
        };
        assert_eq!(over.winner, Some(Winner::Impostor));
        assert_eq!(over.end_reason, Some(EndReason::WordGuessed));
        assert_eq!(over.secret_word.as_deref(), Some("Kaktus"));
        assert!(over.eliminated_player_ids.contains("b"));
    }

    #[test]
    fn test_removed_view() {
        let view = parse_view(r#"{"status": "eliminated", "message": "You were voted out"}"#);
        assert_eq!(
            view,
            GameView::Removed {
                message: Some("You were voted out".to_string())
            }
        );
    }

    #[test]
    fn test_vote_status_inactive() {
        let status: VoteStatusResponse = serde_json::from_str(r#"{"active": false}"#).unwrap();
        assert_eq!(status.into_status(), VoteStatus::Inactive);
    }

    #[test]
    fn test_vote_status_with_result() {
        let status: VoteStatusResponse = serde_json::from_str(
            r#"{
                "active": true,
                "initiator_id": "a",
                "initiator_name": "Alice",
                "suspect_id": "b",
                "suspect_name": "Bob",
                "already_voted": true,
                "can_vote": false,
                "votes": {"up": 2, "down": 1},
                "votes_cast": 3,
                "votes_needed": 3,
                "voters": {
                    "a": {"name": "Alice", "vote": "up"},
                    "c": {"name": "Carol", "vote": "up"},
                    "d": {"name": "Dave", "vote": "down"}
                },
                "result": "player_eliminated",
                "overlay_hidden": false,
                "eliminated_player": {"id": "b", "name": "Bob", "was_impostor": false}
            }"#,
        )
        .unwrap();

        let VoteStatus::Active {
            vote,
            already_voted,
        } = status.into_status()
        else {
            panic!("Expected active vote");
        };
        assert!(already_voted);
        assert_eq!(vote.tally, Tally { up: 2, down: 1 });
        assert_eq!(vote.votes_needed, Some(3));
        assert_eq!(vote.result, Some(VoteResult::PlayerEliminated));
        assert_eq!(vote.votes.get("d"), Some(&VoteDirection::Down));
    }

    #[test]
    fn test_cast_vote_ack() {
        let response: CastVoteResponse = serde_json::from_str(
            r#"{"status": "vote_recorded", "up_votes": 1, "down_votes": 0,
                "total_votes": 1, "total_possible_votes": 3, "all_voted": false}"#,
        )
        .unwrap();
        let ack = CastVoteAck::from(response);
        assert_eq!(ack.votes_cast, 1);
        assert_eq!(ack.votes_needed, 3);
        assert_eq!(ack.result, None);
    }

    #[test]
    fn test_start_vote_requires_started_status() {
        let response: StartVoteResponse =
            serde_json::from_str(r#"{"status": "something_else"}"#).unwrap();
        assert!(response.into_started().is_err());

        let response: StartVoteResponse = serde_json::from_str(
            r#"{"status": "vote_started", "suspect": "b", "suspect_name": "Bob", "initiator_name": "Alice"}"#,
        )
        .unwrap();
        let started = response.into_started().unwrap();
        assert_eq!(started.initiator_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_word_game_over() {
        let response: SubmitWordResponse = serde_json::from_str(
            r#"{"status": "game_over", "winner": "impostor", "reason": "word_guessed"}"#,
        )
        .unwrap();
        assert_eq!(
            response.into_outcome(),
            WordOutcome::GameOver {
                winner: Some(Winner::Impostor),
                reason: Some(EndReason::WordGuessed),
            }
        );
    }
}
