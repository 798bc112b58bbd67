//! Transport client for the game server.
//!
//! [`GameApi`] is the seam between the sync engine and the network: the
//! session only ever talks to an `Arc<dyn GameApi>`, so tests can swap the
//! HTTP implementation for an in-memory fake.

mod http;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::*;

pub use http::HttpGameApi;

/// Result type for remote calls
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur during a remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No response at all (connection refused, DNS, reset)
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success status without an error body
    #[error("server returned status {0}")]
    Status(u16),

    /// Well-formed response carrying an error indicator
    #[error("rejected by server: {0}")]
    Rejected(String),

    #[error("response parsing failed: {0}")]
    Decode(String),
}

impl ApiError {
    /// Transport-level failures are worth retrying; application rejections are not
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Transport(_) | ApiError::Timeout(_) | ApiError::Status(_)
        )
    }
}

/// Remote operations consumed by the client
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Fetch the player roster of a game
    async fn players(&self, game_id: &str) -> ApiResult<Vec<PlayerView>>;

    /// Fetch the authoritative per-player game view
    async fn game_view(&self, identity: &SessionIdentity) -> ApiResult<GameView>;

    /// Submit a word for the current turn
    async fn submit_word(&self, identity: &SessionIdentity, word: &str) -> ApiResult<WordOutcome>;

    /// Accuse a player, opening a vote
    async fn start_vote(&self, identity: &SessionIdentity, suspect_id: &str)
        -> ApiResult<VoteStarted>;

    async fn cast_vote(
        &self,
        identity: &SessionIdentity,
        direction: VoteDirection,
    ) -> ApiResult<CastVoteAck>;

    async fn vote_status(&self, identity: &SessionIdentity) -> ApiResult<VoteStatus>;

    /// Remove a concluded vote. Idempotent.
    async fn clear_vote(&self, game_id: &str) -> ApiResult<()>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "game-api"
    }
}
