use crate::domain::{Account, AccountId, AccountIdentity, Follow};
use crate::migrations::apply_migrations;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// SQLite caps the number of bound parameters per statement, so `IN (...)`
/// queries are issued in chunks of this size.
const MAX_IN_PARAMS: usize = 500;

#[async_trait]
pub trait RepoTrait: Send + Sync {
    async fn find_account_by_handle(&self, handle: &str) -> Result<Option<Account>, RepoError>;

    async fn find_account_by_id(&self, id: AccountId) -> Result<Option<Account>, RepoError>;

    /// Inserts the identities whose id is not stored yet and returns how many
    /// were inserted. Stored accounts are never overwritten.
    async fn insert_new_accounts(&self, identities: &[AccountIdentity])
        -> Result<usize, RepoError>;

    async fn mark_refreshed(
        &self,
        identity: &AccountIdentity,
        at: &DateTime<Utc>,
    ) -> Result<(), RepoError>;

    /// Moves a never refreshed account off its handle so another account can
    /// take it. Returns false when the account is missing or refreshed.
    async fn release_stale_handle(&self, id: AccountId) -> Result<bool, RepoError>;

    async fn known_account_ids(
        &self,
        ids: &HashSet<AccountId>,
    ) -> Result<HashSet<AccountId>, RepoError>;

    async fn get_accounts(&self, ids: &HashSet<AccountId>) -> Result<Vec<Account>, RepoError>;

    /// Inserts the follows that are not stored yet, atomically, and returns
    /// how many were inserted.
    async fn add_follows_if_absent(&self, follows: &[Follow]) -> Result<usize, RepoError>;

    async fn get_followee_ids(&self, follower: AccountId)
        -> Result<HashSet<AccountId>, RepoError>;

    async fn get_follower_ids(&self, followee: AccountId)
        -> Result<HashSet<AccountId>, RepoError>;

    async fn count_accounts(&self) -> Result<u64, RepoError>;

    async fn count_follows(&self) -> Result<u64, RepoError>;
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid migration file name: {0}")]
    InvalidMigration(String),
    #[error("Invalid timestamp stored for account {0}: {1}")]
    InvalidTimestamp(i64, String),
    #[error("Account {0} is not stored")]
    AccountNotFound(AccountId),
}

pub struct Repo {
    pool: SqlitePool,
}

impl Repo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database and brings the schema up to
    /// date.
    pub async fn open(database_url: &str) -> Result<Self, RepoError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Single connection: the tool is sequential and in-memory databases
        // only live as long as their connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        apply_migrations(&pool).await?;
        info!("Cache database ready at {}", database_url);

        Ok(Self::new(pool))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RepoTrait for Repo {
    async fn find_account_by_handle(&self, handle: &str) -> Result<Option<Account>, RepoError> {
        let row = sqlx::query(
            r#"
            SELECT id, handle, display_name, last_refreshed, discovered_at
            FROM accounts
            WHERE handle = ?
            "#,
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_account_by_id(&self, id: AccountId) -> Result<Option<Account>, RepoError> {
        let row = sqlx::query(
            r#"
            SELECT id, handle, display_name, last_refreshed, discovered_at
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_new_accounts(
        &self,
        identities: &[AccountIdentity],
    ) -> Result<usize, RepoError> {
        if identities.is_empty() {
            return Ok(0);
        }

        let discovered_at = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for identity in identities {
            let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM accounts WHERE id = ?)")
                .bind(identity.id.0)
                .fetch_one(&mut *tx)
                .await?;

            if exists != 0 {
                continue;
            }

            // A handle already used by another id means the remote graph
            // renamed someone; the stored row wins until it is refreshed.
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO accounts (id, handle, display_name, last_refreshed, discovered_at)
                VALUES (?, ?, ?, NULL, ?)
                "#,
            )
            .bind(identity.id.0)
            .bind(&identity.handle)
            .bind(&identity.display_name)
            .bind(&discovered_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                debug!(
                    "Skipping account {}: handle @{} belongs to another account",
                    identity.id, identity.handle
                );
            } else {
                inserted += 1;
            }
        }

        tx.commit().await?;
        debug!("Inserted {} of {} accounts", inserted, identities.len());

        Ok(inserted)
    }

    async fn mark_refreshed(
        &self,
        identity: &AccountIdentity,
        at: &DateTime<Utc>,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET handle = ?, display_name = ?, last_refreshed = ?
            WHERE id = ?
            "#,
        )
        .bind(&identity.handle)
        .bind(&identity.display_name)
        .bind(at.to_rfc3339())
        .bind(identity.id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::AccountNotFound(identity.id));
        }

        Ok(())
    }

    async fn release_stale_handle(&self, id: AccountId) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET handle = ?
            WHERE id = ? AND last_refreshed IS NULL
            "#,
        )
        .bind(detached_handle(id))
        .bind(id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn known_account_ids(
        &self,
        ids: &HashSet<AccountId>,
    ) -> Result<HashSet<AccountId>, RepoError> {
        let mut known = HashSet::new();
        let ids: Vec<AccountId> = ids.iter().copied().collect();

        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM accounts WHERE id IN (");
            push_ids(&mut query, chunk);

            let rows = query.build().fetch_all(&self.pool).await?;
            known.extend(rows.iter().map(|row| AccountId(row.get::<i64, _>("id"))));
        }

        Ok(known)
    }

    async fn get_accounts(&self, ids: &HashSet<AccountId>) -> Result<Vec<Account>, RepoError> {
        let mut accounts = Vec::with_capacity(ids.len());
        let ids: Vec<AccountId> = ids.iter().copied().collect();

        for chunk in ids.chunks(MAX_IN_PARAMS) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT id, handle, display_name, last_refreshed, discovered_at FROM accounts WHERE id IN (",
            );
            push_ids(&mut query, chunk);

            let rows = query.build().fetch_all(&self.pool).await?;
            for row in &rows {
                accounts.push(row_to_account(row)?);
            }
        }

        Ok(accounts)
    }

    async fn add_follows_if_absent(&self, follows: &[Follow]) -> Result<usize, RepoError> {
        if follows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for follow in follows {
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE follower = ? AND followee = ?)",
            )
            .bind(follow.follower.0)
            .bind(follow.followee.0)
            .fetch_one(&mut *tx)
            .await?;

            if exists != 0 {
                continue;
            }

            sqlx::query("INSERT INTO follows (follower, followee) VALUES (?, ?)")
                .bind(follow.follower.0)
                .bind(follow.followee.0)
                .execute(&mut *tx)
                .await?;

            inserted += 1;
        }

        tx.commit().await?;
        info!("Updating db with {} follows", inserted);

        Ok(inserted)
    }

    async fn get_followee_ids(
        &self,
        follower: AccountId,
    ) -> Result<HashSet<AccountId>, RepoError> {
        let rows = sqlx::query("SELECT followee FROM follows WHERE follower = ?")
            .bind(follower.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| AccountId(row.get::<i64, _>("followee")))
            .collect())
    }

    async fn get_follower_ids(
        &self,
        followee: AccountId,
    ) -> Result<HashSet<AccountId>, RepoError> {
        let rows = sqlx::query("SELECT follower FROM follows WHERE followee = ?")
            .bind(followee.0)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| AccountId(row.get::<i64, _>("follower")))
            .collect())
    }

    async fn count_accounts(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_follows(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM follows")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

/// Placeholder handle for an account whose handle was taken over. `#` never
/// appears in a real handle, so it cannot collide.
fn detached_handle(id: AccountId) -> String {
    format!("#{}", id)
}

fn push_ids(query: &mut QueryBuilder<'_, Sqlite>, ids: &[AccountId]) {
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(id.0);
    }
    separated.push_unseparated(")");
}

fn row_to_account(row: &SqliteRow) -> Result<Account, RepoError> {
    let id: i64 = row.get("id");
    let last_refreshed: Option<String> = row.get("last_refreshed");
    let discovered_at: String = row.get("discovered_at");

    Ok(Account {
        id: AccountId(id),
        handle: row.get("handle"),
        display_name: row.get("display_name"),
        last_refreshed: last_refreshed
            .map(|value| parse_timestamp(id, &value))
            .transpose()?,
        discovered_at: parse_timestamp(id, &discovered_at)?,
    })
}

fn parse_timestamp(id: i64, value: &str) -> Result<DateTime<Utc>, RepoError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepoError::InvalidTimestamp(id, value.to_string()))
}
