use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;

/// Server-issued identity carried on every request after join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

impl SessionIdentity {
    pub fn new(game_id: impl Into<GameId>, player_id: impl Into<PlayerId>) -> Self {
        Self {
            game_id: game_id.into(),
            player_id: player_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Role {
    #[default]
    Unknown,
    Impostor,
    Innocent,
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "impostor" => Role::Impostor,
            // The server calls innocent players "normal"
            "normal" | "innocent" => Role::Innocent,
            _ => Role::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum GameStatus {
    Lobby,
    #[default]
    Started,
    Finished,
}

impl From<String> for GameStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lobby" => GameStatus::Lobby,
            "finished" => GameStatus::Finished,
            _ => GameStatus::Started,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Winner {
    Impostor,
    Players,
    Unknown,
}

impl From<String> for Winner {
    fn from(value: String) -> Self {
        match value.as_str() {
            "impostor" => Winner::Impostor,
            "players" => Winner::Players,
            _ => Winner::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum EndReason {
    WordGuessed,
    ImpostorFound,
    NotEnoughPlayers,
    Other,
}

impl From<String> for EndReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "word_guessed" => EndReason::WordGuessed,
            "impostor_found" => EndReason::ImpostorFound,
            "not_enough_players" => EndReason::NotEnoughPlayers,
            _ => EndReason::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

/// Classified outcome of a concluded vote
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum VoteResult {
    ImpostorEliminated,
    ImpostorWins,
    PlayerEliminated,
    VoteFailed,
}

impl From<String> for VoteResult {
    fn from(value: String) -> Self {
        match value.as_str() {
            "impostor_eliminated" => VoteResult::ImpostorEliminated,
            "impostor_wins" => VoteResult::ImpostorWins,
            "player_eliminated" => VoteResult::PlayerEliminated,
            // "vote_failed", "no_consensus": the suspect stays in the game
            _ => VoteResult::VoteFailed,
        }
    }
}

/// Tri-state connection indicator
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connected,
    Polling,
    Error,
}

/// Roster entry as served by the player list endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerView {
    pub player_id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub eliminated: bool,
    #[serde(default)]
    pub is_master: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub player_id: PlayerId,
    pub word: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tally {
    pub up: u32,
    pub down: u32,
}

impl Tally {
    pub fn from_votes(votes: &BTreeMap<PlayerId, VoteDirection>) -> Self {
        votes.values().fold(Tally::default(), |mut tally, direction| {
            match direction {
                VoteDirection::Up => tally.up += 1,
                VoteDirection::Down => tally.down += 1,
            }
            tally
        })
    }
}

/// Identifies one accusation independent of its progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteKey {
    pub initiator_id: Option<PlayerId>,
    pub suspect_id: PlayerId,
}

/// Server view of an open vote. Only exists while the server has a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteSnapshot {
    pub initiator_id: Option<PlayerId>,
    pub initiator_name: String,
    pub suspect_id: PlayerId,
    pub suspect_name: String,
    pub votes: BTreeMap<PlayerId, VoteDirection>,
    pub tally: Tally,
    pub votes_cast: u32,
    /// Unknown when the roster could not be fetched
    pub votes_needed: Option<u32>,
    pub result: Option<VoteResult>,
    pub overlay_hidden: bool,
}

impl VoteSnapshot {
    pub fn key(&self) -> VoteKey {
        VoteKey {
            initiator_id: self.initiator_id.clone(),
            suspect_id: self.suspect_id.clone(),
        }
    }

    pub fn has_voted(&self, player_id: &str) -> bool {
        self.votes.contains_key(player_id)
    }

    pub fn all_votes_cast(&self) -> bool {
        all_votes_in(self.votes_cast, self.votes_needed)
    }

    /// True once the server reported a result or every eligible voter has voted
    pub fn is_concluded(&self) -> bool {
        self.result.is_some() || self.all_votes_cast()
    }
}

/// Every eligible voter has voted. An unknown total never counts as complete.
pub fn all_votes_in(votes_cast: u32, votes_needed: Option<u32>) -> bool {
    matches!(votes_needed, Some(needed) if needed > 0 && votes_cast >= needed)
}

/// Authoritative per-player game view, replaced wholesale on every poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSnapshot {
    pub status: GameStatus,
    pub player_name: String,
    pub your_role: Role,
    /// Absent for the impostor
    pub secret_word: Option<String>,
    /// Display name of the player whose turn it is
    pub current_player_turn: Option<String>,
    pub is_master: bool,
    pub history: Vec<HistoryEntry>,
    pub eliminated_player_ids: BTreeSet<PlayerId>,
    pub active_vote: Option<VoteSnapshot>,
    pub end_reason: Option<EndReason>,
    pub winner: Option<Winner>,
}

impl GameSnapshot {
    pub fn is_my_turn(&self) -> bool {
        !self.player_name.is_empty()
            && self.current_player_turn.as_deref() == Some(self.player_name.as_str())
    }

    pub fn is_impostor(&self) -> bool {
        self.your_role == Role::Impostor
    }

    pub fn is_eliminated(&self, player_id: &str) -> bool {
        self.eliminated_player_ids.contains(player_id)
    }
}

/// Terminal view served once the game has finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameOver {
    pub winner: Option<Winner>,
    pub end_reason: Option<EndReason>,
    pub your_role: Role,
    pub secret_word: Option<String>,
    pub impostor_id: Option<PlayerId>,
    pub history: Vec<HistoryEntry>,
    pub eliminated_player_ids: BTreeSet<PlayerId>,
}

/// The three shapes of the per-player game view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameView {
    Running(GameSnapshot),
    Finished(GameOver),
    /// The player was voted out and takes no further turns
    Removed { message: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordOutcome {
    Accepted {
        next_turn_index: Option<u32>,
    },
    GameOver {
        winner: Option<Winner>,
        reason: Option<EndReason>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteStarted {
    pub suspect_id: Option<PlayerId>,
    pub suspect_name: Option<String>,
    pub initiator_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastVoteAck {
    pub tally: Tally,
    pub votes_cast: u32,
    pub votes_needed: u32,
    pub all_voted: bool,
    pub result: Option<VoteResult>,
}

/// Out-of-band vote status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteStatus {
    Inactive,
    Active {
        vote: VoteSnapshot,
        already_voted: bool,
    },
}
