use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{ConnectionRequest, Identity, User, UserId};
use crate::error::AppError;

const DEFAULT_PAGE_SIZE: i64 = 1_000;
const MAX_PAGE_SIZE: i64 = 1_000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountQuery {
    pub mc_uuid: Option<String>,
}

impl AccountQuery {
    fn identity(&self) -> Result<Identity, AppError> {
        let raw = self
            .mc_uuid
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("mcUuid is required".into()))?;
        Ok(Identity::new(raw)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub amount: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    /// Validated `(limit, offset)`.
    fn bounds(&self) -> Result<(i64, i64), AppError> {
        let amount = self.amount.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0);
        if !(1..=MAX_PAGE_SIZE).contains(&amount) {
            return Err(AppError::BadRequest(format!(
                "amount must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        if offset < 0 {
            return Err(AppError::BadRequest("offset must be >= 0".into()));
        }
        Ok((amount, offset))
    }
}

pub async fn request_link(
    Path(user_id): Path<String>,
    Query(params): Query<AccountQuery>,
    State(state): State<AppState>,
) -> Result<Json<ConnectionRequest>, AppError> {
    let identity = params.identity()?;
    let request = state
        .connect
        .register_or_refresh(&user_id, identity.as_str())
        .await?;
    Ok(Json(request))
}

pub async fn get_user(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let user_id = UserId::new(user_id)?;
    let user = state
        .repo
        .find_user(&user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;
    Ok(Json(user))
}

pub async fn get_owner(
    Path(mc_uuid): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let identity = Identity::new(mc_uuid)?;
    let user = state
        .repo
        .latest_verified_owner(&identity)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no verified user for {}", identity)))?;
    Ok(Json(user))
}

pub async fn get_users(
    Query(params): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    let (amount, offset) = params.bounds()?;
    Ok(Json(state.repo.list_users(amount, offset).await?))
}

pub async fn get_connected_users(
    Query(params): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, AppError> {
    let (amount, offset) = params.bounds()?;
    let users = state.repo.users_with_verified_links(amount, offset).await?;
    Ok(Json(users))
}

pub async fn force_verify(
    Path(user_id): Path<String>,
    Query(params): Query<AccountQuery>,
    State(state): State<AppState>,
) -> Result<Json<User>, AppError> {
    let user_id = UserId::new(user_id)?;
    let identity = params.identity()?;
    let user = state
        .connect
        .force_verify(&user_id, &identity, Utc::now())
        .await?;
    Ok(Json(user))
}

pub async fn remove_link(
    Path(user_id): Path<String>,
    Query(params): Query<AccountQuery>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let user_id = UserId::new(user_id)?;
    let identity = params.identity()?;
    state
        .connect
        .remove_link(&user_id, &identity, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
