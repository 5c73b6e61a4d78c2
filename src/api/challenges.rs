use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{Challenge, Identity, NewChallenge, UserId};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub user_id: String,
    pub minecraft_uuid: String,
    pub auction_uuid: String,
}

pub async fn register_challenge(
    State(state): State<AppState>,
    Json(body): Json<ChallengeRequest>,
) -> Result<(StatusCode, Json<Challenge>), AppError> {
    let request = NewChallenge {
        user_id: UserId::new(body.user_id)?,
        minecraft_uuid: Identity::new(body.minecraft_uuid)?,
        auction_uuid: body.auction_uuid.trim().to_string(),
    };
    let challenge = state.challenges.register(request).await?;
    Ok((StatusCode::CREATED, Json(challenge)))
}
