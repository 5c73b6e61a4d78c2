//! Challenge operations for the repository.

use crate::domain::{Challenge, Identity, NewChallenge, UserId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{decode_err, from_ms, to_ms, Repository};

const CHALLENGE_COLUMNS: &str =
    "id, minecraft_uuid, auction_uuid, bought_by, created_at, bought_at, completed_at, closed_at, user_id";

fn row_to_challenge(row: &SqliteRow) -> Result<Challenge, sqlx::Error> {
    let minecraft_uuid: String = row.try_get("minecraft_uuid")?;
    let bought_by: Option<String> = row.try_get("bought_by")?;
    let user_id: String = row.try_get("user_id")?;

    Ok(Challenge {
        id: row.try_get("id")?,
        minecraft_uuid: Identity::new(minecraft_uuid).map_err(decode_err)?,
        auction_uuid: row.try_get("auction_uuid")?,
        bought_by: bought_by.map(|b| Identity::new(b)).transpose().map_err(decode_err)?,
        created_at: from_ms(row.try_get("created_at")?),
        bought_at: row.try_get::<Option<i64>, _>("bought_at")?.map(from_ms),
        completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_ms),
        closed_at: row.try_get::<Option<i64>, _>("closed_at")?.map(from_ms),
        user_id: UserId::new(user_id).map_err(decode_err)?,
    })
}

impl Repository {
    /// Persist a new challenge.
    ///
    /// # Errors
    /// Fails with a unique violation when the auction is already designated.
    pub async fn insert_challenge(
        &self,
        challenge: &NewChallenge,
        now: DateTime<Utc>,
    ) -> Result<Challenge, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO challenges (minecraft_uuid, auction_uuid, created_at, user_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(challenge.minecraft_uuid.as_str())
        .bind(challenge.auction_uuid.as_str())
        .bind(to_ms(now))
        .bind(challenge.user_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(Challenge {
            id: result.last_insert_rowid(),
            minecraft_uuid: challenge.minecraft_uuid.clone(),
            auction_uuid: challenge.auction_uuid.clone(),
            bought_by: None,
            created_at: from_ms(to_ms(now)),
            bought_at: None,
            completed_at: None,
            closed_at: None,
            user_id: challenge.user_id.clone(),
        })
    }

    /// Challenges whose auction has not closed yet.
    pub async fn open_challenges(&self) -> Result<Vec<Challenge>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM challenges WHERE closed_at IS NULL ORDER BY id ASC",
            CHALLENGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_challenge).collect()
    }

    pub async fn get_challenge(&self, auction_uuid: &str) -> Result<Option<Challenge>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM challenges WHERE auction_uuid = ?",
            CHALLENGE_COLUMNS
        ))
        .bind(auction_uuid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_challenge).transpose()
    }

    /// Record who bought the designated auction; `completed_at` is `None` for rejected purchases.
    pub async fn close_challenge(
        &self,
        id: i64,
        bought_by: &Identity,
        bought_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE challenges
            SET bought_by = ?, bought_at = ?, completed_at = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(bought_by.as_str())
        .bind(to_ms(bought_at))
        .bind(completed_at.map(to_ms))
        .bind(to_ms(closed_at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Close a challenge whose auction ended without a buyer.
    pub async fn close_unsold_challenge(
        &self,
        id: i64,
        closed_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE challenges SET closed_at = ? WHERE id = ?")
            .bind(to_ms(closed_at))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Completed challenges of `user_id` bought by `bought_by` since `since`.
    pub async fn count_completed_challenges(
        &self,
        user_id: &UserId,
        bought_by: &Identity,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM challenges
            WHERE user_id = ? AND bought_by = ? AND completed_at IS NOT NULL AND completed_at >= ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(bought_by.as_str())
        .bind(to_ms(since))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
