//! Presentation commands.
//!
//! The engine never renders anything itself. It emits [`UiEvent`]s into a
//! channel and whatever sits on the other end (the terminal client, a web
//! bridge) draws them. The classification helpers here decide wording and tone
//! from the player's role so every front-end shows the same verdicts.

use serde::Serialize;

use crate::types::*;

/// UI update commands, serialized as `{"t": "<variant>", ...}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum UiEvent {
    Connection {
        status: ConnectionStatus,
    },
    PlayerIdentified {
        player_id: PlayerId,
        name: String,
        is_master: bool,
    },
    IdentityLookupFailed {
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    /// The session cannot continue
    Fatal {
        message: String,
    },
    GameUpdated {
        snapshot: GameSnapshot,
        roster: Vec<PlayerView>,
    },
    TurnChanged {
        current_player: Option<String>,
        is_my_turn: bool,
    },
    /// Players that may be accused right now. Empty when it is not our turn.
    SuspectsChanged {
        suspects: Vec<Suspect>,
    },
    PollFailed {
        failures: u32,
        error: String,
    },
    PollDegraded {
        interval_ms: u64,
    },
    PollRecovered {
        interval_ms: u64,
    },
    VoteStarted {
        suspect_id: PlayerId,
        suspect_name: String,
        initiator_name: String,
        /// Show the waiting view instead of vote buttons
        is_player_suspect: bool,
        can_vote: bool,
    },
    VoteTimer {
        remaining_secs: u64,
        warning: bool,
    },
    VoteProgress {
        tally: Tally,
        votes_cast: u32,
        votes_needed: Option<u32>,
    },
    VoteCastConfirmed {
        direction: VoteDirection,
    },
    VoteButtons {
        enabled: bool,
    },
    VoteProcessing {
        suspect_name: String,
    },
    VoteResults {
        suspect_name: String,
        tally: Tally,
        result: Option<VoteResult>,
        verdict: Verdict,
    },
    ResultsCountdown {
        remaining_secs: u64,
        total_secs: u64,
    },
    VoteOverlayHidden,
    Notice {
        level: NoticeLevel,
        message: String,
    },
    WordAccepted {
        word: String,
    },
    GameOver {
        summary: GameSummary,
    },
    Removed {
        message: String,
    },
}

impl UiEvent {
    pub fn notice(level: NoticeLevel, message: impl Into<String>) -> Self {
        UiEvent::Notice {
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// How an outcome feels from this player's seat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Win,
    Lose,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub tone: Tone,
    pub message: String,
}

impl Verdict {
    fn new(tone: Tone, message: &str) -> Self {
        Self {
            tone,
            message: message.to_string(),
        }
    }
}

/// Classify a vote result for a player with the given role
pub fn verdict(result: Option<VoteResult>, role: Role) -> Verdict {
    let impostor = role == Role::Impostor;
    match result {
        Some(VoteResult::ImpostorEliminated) if impostor => {
            Verdict::new(Tone::Lose, "You were exposed as the impostor!")
        }
        Some(VoteResult::ImpostorEliminated) => {
            Verdict::new(Tone::Win, "The impostor was found! You win!")
        }
        Some(VoteResult::ImpostorWins) if impostor => {
            Verdict::new(Tone::Win, "You won as the impostor!")
        }
        Some(VoteResult::ImpostorWins) => Verdict::new(Tone::Lose, "The impostor won!"),
        Some(VoteResult::PlayerEliminated) if impostor => {
            Verdict::new(Tone::Win, "An innocent player was eliminated!")
        }
        Some(VoteResult::PlayerEliminated) => {
            Verdict::new(Tone::Neutral, "An innocent player was eliminated.")
        }
        Some(VoteResult::VoteFailed) => {
            Verdict::new(Tone::Neutral, "Vote failed. The player stays in the game.")
        }
        None => Verdict::new(Tone::Neutral, "Vote concluded."),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suspect {
    pub player_id: PlayerId,
    pub name: String,
}

/// Players that `self_id` may accuse: everyone else still in the game
pub fn eligible_suspects(
    self_id: &str,
    roster: &[PlayerView],
    snapshot: &GameSnapshot,
) -> Vec<Suspect> {
    roster
        .iter()
        .filter(|p| p.player_id != self_id)
        .filter(|p| !p.eliminated && !snapshot.is_eliminated(&p.player_id))
        .map(|p| Suspect {
            player_id: p.player_id.clone(),
            name: p.name.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WordRejection {
    #[error("enter a word first")]
    Empty,
    #[error("only letters and digits are allowed")]
    InvalidCharacters,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("your previous word is still being sent")]
    AlreadySubmitting,
}

/// Trim and check a word before it is sent
pub fn validate_word(raw: &str, is_my_turn: bool) -> Result<String, WordRejection> {
    if !is_my_turn {
        return Err(WordRejection::NotYourTurn);
    }

    let word = raw.trim();
    if word.is_empty() {
        return Err(WordRejection::Empty);
    }
    if !word.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(WordRejection::InvalidCharacters);
    }

    Ok(word.to_string())
}

/// Notice for a word submission that ended the game
pub fn word_outcome_notice(outcome: &WordOutcome) -> Option<UiEvent> {
    match outcome {
        WordOutcome::GameOver {
            winner: Some(Winner::Impostor),
            ..
        } => Some(UiEvent::notice(
            NoticeLevel::Success,
            "You won! You guessed the secret word!",
        )),
        _ => None,
    }
}

/// Query parameters for the external results page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectParams {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub result: String,
    pub winner: String,
    pub word: String,
    pub is_impostor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSummary {
    pub tone: Tone,
    pub message: String,
    pub secret_word: String,
    pub redirect: RedirectParams,
}

pub fn game_summary(identity: &SessionIdentity, game_over: &GameOver) -> GameSummary {
    let impostor = game_over.your_role == Role::Impostor;
    let word_guessed = game_over.end_reason == Some(EndReason::WordGuessed);

    let (tone, message) = match (impostor, game_over.winner) {
        (true, Some(Winner::Impostor)) if word_guessed => {
            (Tone::Win, "You guessed the word and won!")
        }
        (true, Some(Winner::Impostor)) => (Tone::Win, "You won! The players could not find you."),
        (true, Some(Winner::Players)) => (Tone::Lose, "Game over! You were exposed."),
        (false, Some(Winner::Impostor)) if word_guessed => {
            (Tone::Lose, "Game over! The impostor guessed the word.")
        }
        (false, Some(Winner::Impostor)) => (Tone::Lose, "Game over! The impostor won."),
        (false, Some(Winner::Players)) => (
            Tone::Win,
            "Congratulations! You found the impostor and won the game!",
        ),
        (_, Some(Winner::Unknown) | None) => (Tone::Neutral, "The game has ended."),
    };

    let secret_word = game_over
        .secret_word
        .clone()
        .unwrap_or_else(|| "???".to_string());

    let result = match game_over.end_reason {
        Some(EndReason::WordGuessed) => "word_guessed",
        Some(EndReason::ImpostorFound) => "impostor_found",
        Some(EndReason::NotEnoughPlayers) => "not_enough_players",
        Some(EndReason::Other) | None => "game_ended",
    };
    let winner = match game_over.winner {
        Some(Winner::Impostor) => "impostor",
        Some(Winner::Players) => "players",
        Some(Winner::Unknown) | None => "unknown",
    };

    GameSummary {
        tone,
        message: message.to_string(),
        secret_word: secret_word.clone(),
        redirect: RedirectParams {
            game_id: identity.game_id.clone(),
            player_id: identity.player_id.clone(),
            result: result.to_string(),
            winner: winner.to_string(),
            word: secret_word,
            is_impostor: impostor,
        },
    }
}

pub fn removal_message(message: Option<String>) -> String {
    message.unwrap_or_else(|| "You were voted out and take no further turns.".to_string())
}
