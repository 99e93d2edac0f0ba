use crate::repo::RepoError;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

/// Schema migrations, applied in order of their numeric prefix.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_accounts.sql",
        include_str!("../migrations/001_create_accounts.sql"),
    ),
    (
        "002_create_follows.sql",
        include_str!("../migrations/002_create_follows.sql"),
    ),
];

pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), RepoError> {
    // Ensure the migration row exists
    ensure_migration_row(pool).await?;

    let mut entries = MIGRATIONS
        .iter()
        .map(|(name, contents)| Ok((extract_migration_number(name)?, *name, *contents)))
        .collect::<Result<Vec<_>, RepoError>>()?;

    entries.sort_by_key(|(number, _, _)| *number);

    let current_migration_number = get_current_migration_number(pool).await?;
    debug!("Current schema version: {}", current_migration_number);

    for (migration_number, name, contents) in entries {
        if migration_number > current_migration_number {
            run_migration(pool, name, contents, migration_number).await?;
        }
    }

    Ok(())
}

async fn ensure_migration_row(pool: &SqlitePool) -> Result<(), RepoError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            latest_migration INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO migrations (id, latest_migration) VALUES (1, 0)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn get_current_migration_number(pool: &SqlitePool) -> Result<i32, RepoError> {
    let row = sqlx::query("SELECT latest_migration FROM migrations WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    Ok(row
        .map(|row| row.get::<i32, _>("latest_migration"))
        .unwrap_or(0))
}

fn extract_migration_number(name: &str) -> Result<i32, RepoError> {
    let prefix = name.split('_').next().unwrap_or_default();
    prefix
        .parse::<i32>()
        .map_err(|_| RepoError::InvalidMigration(name.to_string()))
}

/// Runs every statement of a migration and bumps the version in one
/// transaction.
async fn run_migration(
    pool: &SqlitePool,
    name: &str,
    contents: &str,
    migration_number: i32,
) -> Result<(), RepoError> {
    let mut tx = pool.begin().await?;

    for statement in contents.split(';') {
        if statement.trim().is_empty() {
            continue;
        }

        sqlx::query(statement).execute(&mut *tx).await?;
    }

    sqlx::query("UPDATE migrations SET latest_migration = ? WHERE id = 1")
        .bind(migration_number)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!("Migration applied: {}", name);

    Ok(())
}
