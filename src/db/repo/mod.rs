//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `mod.rs` - User and link operations
//! - `challenges.rs` - Challenge operations

mod challenges;

use crate::domain::{Identity, Link, LinkId, User, UserId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

/// A link together with its owner, as read back after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedLink {
    pub link: Link,
    pub owner: UserId,
    /// Verified links sharing the identity, this one included.
    pub verified_count: i64,
    /// False when the link was already verified before this call.
    pub newly_verified: bool,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn decode_err(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

fn row_to_link(row: &SqliteRow) -> Result<Link, sqlx::Error> {
    let identity: String = row.try_get("account_uuid")?;
    Ok(Link {
        id: LinkId::new(row.try_get("id")?),
        user_id: row.try_get("user_id")?,
        identity: Identity::new(identity).map_err(decode_err)?,
        verified: row.try_get::<i64, _>("verified")? != 0,
        created_at: from_ms(row.try_get("created_at")?),
        updated_at: from_ms(row.try_get("updated_at")?),
        last_requested_at: from_ms(row.try_get("last_requested_at")?),
    })
}

const LINK_COLUMNS: &str =
    "l.id, l.user_id, l.account_uuid, l.verified, l.created_at, l.updated_at, l.last_requested_at";

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Round-trip a trivial query to check the pool.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // User operations
    // =========================================================================

    /// Load a user and all of its links.
    pub async fn find_user(&self, external_id: &UserId) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query("SELECT id FROM users WHERE external_id = ?")
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: i64 = row.try_get("id")?;
        let accounts = self.links_for_user(id).await?;

        Ok(Some(User {
            id,
            external_id: external_id.clone(),
            accounts,
        }))
    }

    /// Load a user, creating it on first sight.
    pub async fn get_or_create_user(&self, external_id: &UserId) -> Result<User, sqlx::Error> {
        sqlx::query("INSERT INTO users (external_id) VALUES (?) ON CONFLICT(external_id) DO NOTHING")
            .bind(external_id.as_str())
            .execute(&self.pool)
            .await?;

        self.find_user(external_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    async fn links_for_user(&self, user_id: i64) -> Result<Vec<Link>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM links l WHERE l.user_id = ? ORDER BY l.id ASC",
            LINK_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_link).collect()
    }

    /// Most recently updated user that verified `identity`.
    pub async fn latest_verified_owner(
        &self,
        identity: &Identity,
    ) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT u.external_id
            FROM links l JOIN users u ON u.id = l.user_id
            WHERE l.account_uuid = ? AND l.verified = 1
            ORDER BY l.updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let external_id: String = row.try_get("external_id")?;
                let external_id = UserId::new(external_id).map_err(decode_err)?;
                self.find_user(&external_id).await
            }
            None => Ok(None),
        }
    }

    /// Page through every user with all of its links.
    pub async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>, sqlx::Error> {
        self.page_users(false, limit, offset).await
    }

    /// Page through users owning at least one verified link; only verified links are included.
    pub async fn users_with_verified_links(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        self.page_users(true, limit, offset).await
    }

    async fn page_users(
        &self,
        verified_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        let filter = if verified_only {
            "WHERE EXISTS (SELECT 1 FROM links l WHERE l.user_id = u.id AND l.verified = 1)"
        } else {
            ""
        };
        let user_rows = sqlx::query(&format!(
            "SELECT u.id, u.external_id FROM users u {} ORDER BY u.id ASC LIMIT ? OFFSET ?",
            filter
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut users = BTreeMap::new();
        for row in &user_rows {
            let id: i64 = row.try_get("id")?;
            let external_id: String = row.try_get("external_id")?;
            users.insert(
                id,
                User {
                    id,
                    external_id: UserId::new(external_id).map_err(decode_err)?,
                    accounts: Vec::new(),
                },
            );
        }

        for user in users.values_mut() {
            user.accounts = self
                .links_for_user(user.id)
                .await?
                .into_iter()
                .filter(|l| l.verified || !verified_only)
                .collect();
        }

        Ok(users.into_values().collect())
    }

    // =========================================================================
    // Link operations
    // =========================================================================

    pub async fn insert_link(
        &self,
        user_id: i64,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Link, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO links (user_id, account_uuid, verified, created_at, updated_at, last_requested_at)
            VALUES (?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(identity.as_str())
        .bind(to_ms(now))
        .bind(to_ms(now))
        .bind(to_ms(now))
        .execute(&self.pool)
        .await?;

        Ok(Link {
            id: LinkId::new(result.last_insert_rowid()),
            user_id,
            identity: identity.clone(),
            verified: false,
            created_at: from_ms(to_ms(now)),
            updated_at: from_ms(to_ms(now)),
            last_requested_at: from_ms(to_ms(now)),
        })
    }

    /// Record a new link request.
    pub async fn touch_link(&self, link_id: LinkId, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE links SET last_requested_at = ? WHERE id = ?")
            .bind(to_ms(now))
            .bind(link_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_link(&self, link_id: LinkId) -> Result<Option<Link>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM links l WHERE l.id = ?", LINK_COLUMNS))
            .bind(link_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_link).transpose()
    }

    /// Flag a link verified and read back its owner and the identity's verified count.
    ///
    /// Runs in one transaction. Verifying an already verified link only refreshes
    /// `updated_at`. Returns `None` when the link does not exist.
    pub async fn verify_link(
        &self,
        link_id: LinkId,
        now: DateTime<Utc>,
    ) -> Result<Option<VerifiedLink>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<(i64,)> = sqlx::query_as("SELECT verified FROM links WHERE id = ?")
            .bind(link_id.as_i64())
            .fetch_optional(&mut *tx)
            .await?;
        let Some((previous,)) = previous else {
            return Ok(None);
        };

        let updated = sqlx::query("UPDATE links SET verified = 1, updated_at = ? WHERE id = ?")
            .bind(to_ms(now))
            .bind(link_id.as_i64())
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(&format!(
            "SELECT {}, u.external_id FROM links l JOIN users u ON u.id = l.user_id WHERE l.id = ?",
            LINK_COLUMNS
        ))
        .bind(link_id.as_i64())
        .fetch_one(&mut *tx)
        .await?;
        let link = row_to_link(&row)?;
        let owner: String = row.try_get("external_id")?;

        let (verified_count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM links WHERE account_uuid = ? AND verified = 1")
                .bind(link.identity.as_str())
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        Ok(Some(VerifiedLink {
            link,
            owner: UserId::new(owner).map_err(decode_err)?,
            verified_count,
            newly_verified: previous == 0,
        }))
    }

    /// Unverified links requested after `since`, used to warm the pending cache.
    pub async fn recent_unverified_links(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Link>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM links l WHERE l.verified = 0 AND l.last_requested_at > ? ORDER BY l.last_requested_at ASC",
            LINK_COLUMNS
        ))
        .bind(to_ms(since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_link).collect()
    }

    pub async fn delete_link(&self, link_id: LinkId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?")
            .bind(link_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    async fn setup_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn ident(s: &str) -> Identity {
        Identity::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_user_is_idempotent() {
        let (repo, _temp) = setup_repo().await;
        let first = repo.get_or_create_user(&uid("42")).await.unwrap();
        let second = repo.get_or_create_user(&uid("42")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_insert_and_touch_link() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.get_or_create_user(&uid("42")).await.unwrap();
        let link = repo.insert_link(user.id, &ident("abc"), t0()).await.unwrap();

        let later = t0() + Duration::minutes(3);
        assert!(repo.touch_link(link.id, later).await.unwrap());

        let stored = repo.get_link(link.id).await.unwrap().unwrap();
        assert_eq!(stored.last_requested_at, later);
        assert_eq!(stored.created_at, t0());
        assert!(!stored.verified);
    }

    #[tokio::test]
    async fn test_verify_link_counts_shared_identity() {
        let (repo, _temp) = setup_repo().await;
        let alice = repo.get_or_create_user(&uid("alice")).await.unwrap();
        let bob = repo.get_or_create_user(&uid("bob")).await.unwrap();
        let a = repo.insert_link(alice.id, &ident("abc"), t0()).await.unwrap();
        let b = repo.insert_link(bob.id, &ident("abc"), t0()).await.unwrap();

        let first = repo.verify_link(a.id, t0()).await.unwrap().unwrap();
        assert!(first.newly_verified);
        assert_eq!(first.owner, uid("alice"));
        assert_eq!(first.verified_count, 1);

        let second = repo.verify_link(b.id, t0()).await.unwrap().unwrap();
        assert_eq!(second.verified_count, 2);
    }

    #[tokio::test]
    async fn test_verify_link_twice_keeps_single_verified_row() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.get_or_create_user(&uid("42")).await.unwrap();
        let link = repo.insert_link(user.id, &ident("abc"), t0()).await.unwrap();

        repo.verify_link(link.id, t0()).await.unwrap();
        let again = repo
            .verify_link(link.id, t0() + Duration::minutes(1))
            .await
            .unwrap()
            .unwrap();
        assert!(again.link.verified);
        assert!(!again.newly_verified);
        assert_eq!(again.verified_count, 1);
        assert_eq!(again.link.updated_at, t0() + Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_verify_missing_link() {
        let (repo, _temp) = setup_repo().await;
        assert!(repo.verify_link(LinkId::new(99), t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_unverified_links() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.get_or_create_user(&uid("42")).await.unwrap();
        let old = repo.insert_link(user.id, &ident("old"), t0()).await.unwrap();
        let fresh = repo
            .insert_link(user.id, &ident("fresh"), t0() + Duration::minutes(20))
            .await
            .unwrap();
        let done = repo
            .insert_link(user.id, &ident("done"), t0() + Duration::minutes(20))
            .await
            .unwrap();
        repo.verify_link(done.id, t0()).await.unwrap();

        let links = repo
            .recent_unverified_links(t0() + Duration::minutes(10))
            .await
            .unwrap();
        let ids: Vec<_> = links.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![fresh.id]);
        assert!(!ids.contains(&old.id));
    }

    #[tokio::test]
    async fn test_latest_verified_owner_and_listing() {
        let (repo, _temp) = setup_repo().await;
        let alice = repo.get_or_create_user(&uid("alice")).await.unwrap();
        let bob = repo.get_or_create_user(&uid("bob")).await.unwrap();
        let a = repo.insert_link(alice.id, &ident("abc"), t0()).await.unwrap();
        repo.insert_link(alice.id, &ident("unverified"), t0())
            .await
            .unwrap();
        let b = repo.insert_link(bob.id, &ident("abc"), t0()).await.unwrap();
        repo.verify_link(a.id, t0()).await.unwrap();
        repo.verify_link(b.id, t0() + Duration::minutes(1))
            .await
            .unwrap();

        let owner = repo
            .latest_verified_owner(&ident("abc"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.external_id, uid("bob"));
        assert!(repo
            .latest_verified_owner(&ident("nobody"))
            .await
            .unwrap()
            .is_none());

        let users = repo.users_with_verified_links(10, 0).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].accounts.len(), 1);
        assert_eq!(repo.users_with_verified_links(10, 1).await.unwrap().len(), 1);

        let all = repo.list_users(10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].external_id, uid("alice"));
        assert_eq!(all[0].accounts.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_link() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.get_or_create_user(&uid("42")).await.unwrap();
        let link = repo.insert_link(user.id, &ident("abc"), t0()).await.unwrap();
        assert!(repo.delete_link(link.id).await.unwrap());
        assert!(!repo.delete_link(link.id).await.unwrap());
        assert!(repo.get_link(link.id).await.unwrap().is_none());
    }
}
