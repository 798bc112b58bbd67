use super::*;
use crate::protocol::*;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Instant;

/// Correlates client log lines with server access logs
const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// HTTP implementation of [`GameApi`]
pub struct HttpGameApi {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpGameApi {
    /// Create a client for the server at `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self {
            base_url,
            client,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let request = self.client.get(self.url(path));
        self.execute(request, path).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> ApiResult<T> {
        let request = self.client.post(self.url(path)).json(body);
        self.execute(request, path).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        path: &str,
    ) -> ApiResult<T> {
        let request_id = ulid::Ulid::new().to_string();
        let start = Instant::now();

        let response = request
            .header(REQUEST_ID_HEADER, &request_id)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;

        tracing::debug!(
            "{} {} -> {} in {}ms",
            request_id,
            path,
            status,
            start.elapsed().as_millis()
        );

        decode_body(status, &bytes)
    }

    fn classify(&self, error: reqwest::Error) -> ApiError {
        if error.is_timeout() {
            ApiError::Timeout(self.timeout)
        } else {
            ApiError::Transport(error.to_string())
        }
    }
}

/// A 5xx is a transport failure even with an error body, so it stays retryable.
/// Otherwise an `error` field wins over the status code.
fn decode_body<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> ApiResult<T> {
    if status.is_server_error() {
        if let Ok(ErrorBody {
            error: Some(message),
        }) = serde_json::from_slice::<ErrorBody>(bytes)
        {
            tracing::warn!("Server error {}: {}", status, message);
        }
        return Err(ApiError::Status(status.as_u16()));
    }

    if let Ok(ErrorBody {
        error: Some(message),
    }) = serde_json::from_slice::<ErrorBody>(bytes)
    {
        return Err(ApiError::Rejected(message));
    }

    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }

    serde_json::from_slice(bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn players(&self, game_id: &str) -> ApiResult<Vec<PlayerView>> {
        let roster: RosterResponse = self.get(&format!("/players_in_game/{}", game_id)).await?;
        Ok(roster.players)
    }

    async fn game_view(&self, identity: &SessionIdentity) -> ApiResult<GameView> {
        let response: GameViewResponse = self
            .get(&format!(
                "/game_state/{}/{}",
                identity.game_id, identity.player_id
            ))
            .await?;
        Ok(response.into_view())
    }

    async fn submit_word(&self, identity: &SessionIdentity, word: &str) -> ApiResult<WordOutcome> {
        let request = SubmitWordRequest {
            game_id: identity.game_id.clone(),
            player_id: identity.player_id.clone(),
            word: word.to_string(),
        };
        let response: SubmitWordResponse = self.post("/submit_word", &request).await?;
        Ok(response.into_outcome())
    }

    async fn start_vote(
        &self,
        identity: &SessionIdentity,
        suspect_id: &str,
    ) -> ApiResult<VoteStarted> {
        let request = StartVoteRequest {
            game_id: identity.game_id.clone(),
            initiator_id: identity.player_id.clone(),
            suspect_id: suspect_id.to_string(),
        };
        let response: StartVoteResponse = self.post("/start_vote", &request).await?;
        response.into_started().map_err(ApiError::Rejected)
    }

    async fn cast_vote(
        &self,
        identity: &SessionIdentity,
        direction: VoteDirection,
    ) -> ApiResult<CastVoteAck> {
        let request = CastVoteRequest {
            game_id: identity.game_id.clone(),
            voter_id: identity.player_id.clone(),
            vote: direction,
        };
        let response: CastVoteResponse = self.post("/cast_vote", &request).await?;
        Ok(response.into())
    }

    async fn vote_status(&self, identity: &SessionIdentity) -> ApiResult<VoteStatus> {
        let response: VoteStatusResponse = self
            .get(&format!(
                "/vote_status/{}/{}",
                identity.game_id, identity.player_id
            ))
            .await?;
        Ok(response.into_status())
    }

    async fn clear_vote(&self, game_id: &str) -> ApiResult<()> {
        let request = ClearVoteRequest {
            game_id: game_id.to_string(),
        };
        let _ack: serde_json::Value = self.post("/clear_vote", &request).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
