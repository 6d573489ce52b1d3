use crate::model::{RepoUrl, RepoUrlPattern, TrackedRepository, User};
use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{info, instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL, full durability and cascading foreign keys on every pooled connection.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
pub fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_or_create_user(pool: &Pool, external_id: i64) -> Result<User> {
    let mut tx = pool.begin().await?;
    if let Some(user) = find_user_tx(&mut tx, external_id).await? {
        tx.commit().await?;
        return Ok(user);
    }

    // A concurrent creator may win the race; the unique index keeps one row.
    sqlx::query("INSERT INTO users (external_id) VALUES (?) ON CONFLICT(external_id) DO NOTHING")
        .bind(external_id)
        .execute(&mut *tx)
        .await
        .context("user creation failed")?;
    let user = find_user_tx(&mut tx, external_id)
        .await?
        .context("user missing right after creation")?;
    tx.commit().await?;
    info!(external_id, user_id = user.id, "registered user");
    Ok(user)
}

async fn find_user_tx(tx: &mut Transaction<'_, Sqlite>, external_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, external_id, created_at FROM users WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(user)
}

/// Repositories the user is subscribed to, oldest subscription first.
#[instrument(skip(pool))]
pub async fn list_user_subscriptions(pool: &Pool, user_id: i64) -> Result<Vec<TrackedRepository>> {
    let repos = sqlx::query_as::<_, TrackedRepository>(
        "SELECT r.id, r.url, r.short_name, r.latest_tag, r.created_at, r.updated_at
         FROM repositories r
         JOIN subscriptions s ON s.repository_id = r.id
         WHERE s.user_id = ?
         ORDER BY s.id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(repos)
}

/// Subscribe the user to every accepted URL in `text`.
/// Returns the number of newly created subscriptions.
#[instrument(skip(pool, pattern))]
pub async fn add_subscriptions(
    pool: &Pool,
    pattern: &RepoUrlPattern,
    user_id: i64,
    text: &str,
) -> Result<usize> {
    let (accepted, rejected) = pattern.extract(text);
    for token in rejected {
        warn!(url = token, "repository skipped by check");
    }

    let mut tx = pool.begin().await?;
    let mut created = 0;
    for repo_url in accepted {
        let repository_id = get_or_create_repository_tx(&mut tx, &repo_url).await?;
        if find_subscription_tx(&mut tx, user_id, repository_id)
            .await?
            .is_some()
        {
            continue;
        }
        let inserted = sqlx::query(
            "INSERT INTO subscriptions (user_id, repository_id) VALUES (?, ?)
             ON CONFLICT(user_id, repository_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(repository_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("subscription creation failed for {}", repo_url.url))?
        .rows_affected();
        if inserted > 0 {
            created += 1;
            info!(user_id, url = repo_url.url, "subscribe user");
        }
    }
    tx.commit().await?;
    Ok(created)
}

/// Unsubscribe the user from every accepted URL in `text`. Unknown repositories
/// and missing subscriptions are skipped. Returns the number of removed links.
#[instrument(skip(pool, pattern))]
pub async fn remove_subscriptions(
    pool: &Pool,
    pattern: &RepoUrlPattern,
    user_id: i64,
    text: &str,
) -> Result<usize> {
    let (accepted, rejected) = pattern.extract(text);
    for token in rejected {
        warn!(url = token, "repository skipped by check");
    }

    let mut tx = pool.begin().await?;
    let mut removed = 0;
    for repo_url in accepted {
        let Some(repository_id) = find_repository_id_tx(&mut tx, &repo_url).await? else {
            info!(url = repo_url.url, "repository doesn't exist");
            continue;
        };
        let Some(subscription_id) = find_subscription_tx(&mut tx, user_id, repository_id).await?
        else {
            continue;
        };
        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(subscription_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("unsubscribe failed for {}", repo_url.url))?;
        removed += 1;
        info!(user_id, url = repo_url.url, "unsubscribe user");
    }
    tx.commit().await?;
    Ok(removed)
}

/// Drop every subscription of the user. Repositories and other users are untouched.
#[instrument(skip(pool))]
pub async fn remove_all_subscriptions(pool: &Pool, user_id: i64) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM subscriptions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("removing subscriptions failed")?
        .rows_affected();
    tx.commit().await?;
    info!(user_id, removed, "removed all subscriptions");
    Ok(removed)
}

#[instrument(skip_all)]
pub async fn list_repositories(pool: &Pool) -> Result<Vec<TrackedRepository>> {
    let repos = sqlx::query_as::<_, TrackedRepository>(
        "SELECT id, url, short_name, latest_tag, created_at, updated_at
         FROM repositories ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await
    .context("get all repositories failed")?;
    Ok(repos)
}

/// Users subscribed to one repository.
#[instrument(skip(pool))]
pub async fn list_subscribers(pool: &Pool, repository_id: i64) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(
        "SELECT u.id, u.external_id, u.created_at
         FROM users u
         JOIN subscriptions s ON s.user_id = u.id
         WHERE s.repository_id = ?
         ORDER BY u.id ASC",
    )
    .bind(repository_id)
    .fetch_all(pool)
    .await
    .context("get all subscribers failed")?;
    Ok(users)
}

#[instrument(skip(pool))]
pub async fn update_tag(pool: &Pool, repository_id: i64, tag: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE repositories SET latest_tag = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(tag)
    .bind(repository_id)
    .execute(&mut *tx)
    .await
    .context("repository update failed")?
    .rows_affected();
    if updated == 0 {
        anyhow::bail!("repository {repository_id} not found");
    }
    tx.commit().await?;
    Ok(())
}

async fn get_or_create_repository_tx(
    tx: &mut Transaction<'_, Sqlite>,
    repo_url: &RepoUrl<'_>,
) -> Result<i64> {
    if let Some(id) = find_repository_id_tx(tx, repo_url).await? {
        return Ok(id);
    }
    // No conflict target: a clash on either unique key is skipped.
    sqlx::query("INSERT INTO repositories (url, short_name) VALUES (?, ?) ON CONFLICT DO NOTHING")
        .bind(repo_url.url)
        .bind(repo_url.short_name)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("repository creation failed for {}", repo_url.url))?;
    let id = find_repository_id_tx(tx, repo_url)
        .await?
        .with_context(|| format!("repository {} missing right after creation", repo_url.url))?;
    info!(url = repo_url.url, "created new repository");
    Ok(id)
}

/// Repositories are identified by short name; any accepted URL spelling of the
/// same `owner/name` resolves to one row.
async fn find_repository_id_tx(
    tx: &mut Transaction<'_, Sqlite>,
    repo_url: &RepoUrl<'_>,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM repositories WHERE short_name = ? OR url = ? ORDER BY id LIMIT 1",
    )
    .bind(repo_url.short_name)
    .bind(repo_url.url)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(id)
}

async fn find_subscription_tx(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: i64,
    repository_id: i64,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM subscriptions WHERE user_id = ? AND repository_id = ?",
    )
    .bind(user_id)
    .bind(repository_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn count(pool: &Pool, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
    }

    #[test]
    fn prepare_sqlite_url_passes_through_memory_and_other_schemes() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn prepare_sqlite_url_creates_parent_and_keeps_query() {
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested").join("watchbot.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, url);
        assert!(td.path().join("nested").exists());
    }

    #[tokio::test]
    async fn get_or_create_user_is_idempotent() {
        let pool = setup_pool().await;
        let first = get_or_create_user(&pool, 42).await.unwrap();
        let second = get_or_create_user(&pool, 42).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM users").await, 1);
    }

    #[tokio::test]
    async fn update_tag_sets_latest_tag() {
        let pool = setup_pool().await;
        let user = get_or_create_user(&pool, 1).await.unwrap();
        add_subscriptions(&pool, &RepoUrlPattern::github(), user.id, "https://github.com/octo/cli")
            .await
            .unwrap();
        let repo = list_repositories(&pool).await.unwrap().remove(0);
        assert_eq!(repo.latest_tag, None);

        update_tag(&pool, repo.id, "v1.0.0").await.unwrap();
        let repo = list_repositories(&pool).await.unwrap().remove(0);
        assert_eq!(repo.latest_tag.as_deref(), Some("v1.0.0"));
    }

    #[tokio::test]
    async fn update_tag_unknown_repository_fails() {
        let pool = setup_pool().await;
        assert!(update_tag(&pool, 999, "v1").await.is_err());
    }

    #[tokio::test]
    async fn subscriptions_cascade_with_parents() {
        let pool = setup_pool().await;
        let user = get_or_create_user(&pool, 7).await.unwrap();
        add_subscriptions(&pool, &RepoUrlPattern::github(), user.id, "https://github.com/a/b")
            .await
            .unwrap();
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM subscriptions").await, 1);

        sqlx::query("DELETE FROM repositories")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(count(&pool, "SELECT COUNT(*) FROM subscriptions").await, 0);
    }
}
