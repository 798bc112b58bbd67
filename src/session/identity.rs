//! Identity lookup at session start.
//!
//! The player must show up in the game's roster before anything else runs.
//! Transport failures and a roster that does not list us yet are retried; an
//! application rejection (unknown game) ends the attempt immediately.

use tokio::sync::mpsc::UnboundedSender;

use super::SessionError;
use crate::api::{ApiError, GameApi};
use crate::presenter::UiEvent;
use crate::retry::{retry, RetryPolicy, Retryable};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
enum LookupError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("player {0} is not in the roster")]
    NotInRoster(PlayerId),
}

impl Retryable for LookupError {
    fn is_retryable(&self) -> bool {
        match self {
            LookupError::Api(e) => e.is_transient(),
            LookupError::NotInRoster(_) => true,
        }
    }
}

/// Find our own roster entry, retrying per `policy`. Every failed attempt is
/// surfaced to the UI.
pub async fn lookup(
    api: &dyn GameApi,
    identity: &SessionIdentity,
    policy: &RetryPolicy,
    ui: &UnboundedSender<UiEvent>,
) -> Result<PlayerView, SessionError> {
    let max_attempts = policy.max_attempts.max(1);

    let result = retry(
        policy,
        "identity lookup",
        |attempt| async move {
            tracing::debug!(
                "Looking up player {} in game {} (attempt {})",
                identity.player_id,
                identity.game_id,
                attempt
            );
            let players = api.players(&identity.game_id).await?;
            players
                .into_iter()
                .find(|p| p.player_id == identity.player_id)
                .ok_or_else(|| LookupError::NotInRoster(identity.player_id.clone()))
        },
        |attempt, error| {
            let _ = ui.send(UiEvent::IdentityLookupFailed {
                attempt,
                max_attempts,
                error: error.to_string(),
            });
        },
    )
    .await;

    match result {
        Ok(player) => {
            tracing::info!("Identified as {} ({})", player.name, player.player_id);
            Ok(player)
        }
        Err(e) => {
            tracing::error!("Identity lookup failed: {}", e);
            Err(match e.last {
                LookupError::NotInRoster(player_id) => SessionError::PlayerNotFound {
                    player_id,
                    attempts: e.attempts,
                },
                LookupError::Api(error) => SessionError::Initialization {
                    attempts: e.attempts,
                    reason: error.to_string(),
                },
            })
        }
    }
}
