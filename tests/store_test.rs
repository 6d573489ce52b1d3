use release_watchbot::db;
use release_watchbot::model::RepoUrlPattern;
use sqlx::sqlite::SqlitePoolOptions;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn subscription_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn repository_count(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn subscribe_twice_keeps_one_link() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let user = db::get_or_create_user(&pool, 100).await.unwrap();

    let created = db::add_subscriptions(&pool, &pattern, user.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    assert_eq!(created, 1);
    let created = db::add_subscriptions(&pool, &pattern, user.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    assert_eq!(created, 0);

    assert_eq!(subscription_count(&pool).await, 1);
    assert_eq!(repository_count(&pool).await, 1);
}

#[tokio::test]
async fn duplicate_url_in_one_message_creates_one_link() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let user = db::get_or_create_user(&pool, 100).await.unwrap();

    let created = db::add_subscriptions(
        &pool,
        &pattern,
        user.id,
        "https://github.com/octo/cli https://github.com/octo/cli",
    )
    .await
    .unwrap();
    assert_eq!(created, 1);
    assert_eq!(subscription_count(&pool).await, 1);
}

#[tokio::test]
async fn malformed_tokens_are_skipped() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let user = db::get_or_create_user(&pool, 100).await.unwrap();

    let created = db::add_subscriptions(
        &pool,
        &pattern,
        user.id,
        "https://github.com/a/b not-a-url https://github.com/c/d",
    )
    .await
    .unwrap();
    assert_eq!(created, 2);

    let repos = db::list_user_subscriptions(&pool, user.id).await.unwrap();
    let names: Vec<_> = repos.iter().map(|r| r.short_name.as_str()).collect();
    assert_eq!(names, vec!["a/b", "c/d"]);
    assert!(repos.iter().all(|r| r.latest_tag.is_none()));
    assert_eq!(subscription_count(&pool).await, 2);
}

#[tokio::test]
async fn repositories_are_shared_between_users() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let alice = db::get_or_create_user(&pool, 1).await.unwrap();
    let bob = db::get_or_create_user(&pool, 2).await.unwrap();

    db::add_subscriptions(&pool, &pattern, alice.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    db::add_subscriptions(&pool, &pattern, bob.id, "https://github.com/octo/cli")
        .await
        .unwrap();

    assert_eq!(repository_count(&pool).await, 1);
    let repo = db::list_repositories(&pool).await.unwrap().remove(0);
    let subscribers = db::list_subscribers(&pool, repo.id).await.unwrap();
    let ids: Vec<_> = subscribers.iter().map(|u| u.external_id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn unsubscribe_unknown_url_is_noop() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let user = db::get_or_create_user(&pool, 100).await.unwrap();
    db::add_subscriptions(&pool, &pattern, user.id, "https://github.com/octo/cli")
        .await
        .unwrap();

    // Repository unknown to the store.
    let removed = db::remove_subscriptions(&pool, &pattern, user.id, "https://github.com/x/y")
        .await
        .unwrap();
    assert_eq!(removed, 0);

    // Repository known, but this user never subscribed.
    let other = db::get_or_create_user(&pool, 200).await.unwrap();
    let removed = db::remove_subscriptions(&pool, &pattern, other.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    assert_eq!(removed, 0);

    assert_eq!(subscription_count(&pool).await, 1);
    assert_eq!(repository_count(&pool).await, 1);
}

#[tokio::test]
async fn unsubscribe_removes_only_the_link() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let user = db::get_or_create_user(&pool, 100).await.unwrap();
    db::add_subscriptions(
        &pool,
        &pattern,
        user.id,
        "https://github.com/a/b https://github.com/c/d",
    )
    .await
    .unwrap();

    let removed = db::remove_subscriptions(&pool, &pattern, user.id, "junk https://github.com/a/b")
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let repos = db::list_user_subscriptions(&pool, user.id).await.unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].short_name, "c/d");
    assert_eq!(repository_count(&pool).await, 2);
}

#[tokio::test]
async fn remove_all_leaves_other_users_untouched() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();
    let alice = db::get_or_create_user(&pool, 1).await.unwrap();
    let bob = db::get_or_create_user(&pool, 2).await.unwrap();
    db::add_subscriptions(
        &pool,
        &pattern,
        alice.id,
        "https://github.com/a/b https://github.com/c/d",
    )
    .await
    .unwrap();
    db::add_subscriptions(&pool, &pattern, bob.id, "https://github.com/a/b")
        .await
        .unwrap();

    let removed = db::remove_all_subscriptions(&pool, alice.id).await.unwrap();
    assert_eq!(removed, 2);

    assert!(db::list_user_subscriptions(&pool, alice.id)
        .await
        .unwrap()
        .is_empty());
    let bob_repos = db::list_user_subscriptions(&pool, bob.id).await.unwrap();
    assert_eq!(bob_repos.len(), 1);
    assert_eq!(bob_repos[0].short_name, "a/b");
    assert_eq!(repository_count(&pool).await, 2);

    // Removing again is harmless.
    assert_eq!(db::remove_all_subscriptions(&pool, alice.id).await.unwrap(), 0);
}

#[tokio::test]
async fn url_spellings_of_one_repository_share_a_row() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::new(r"^https://github\.com/([\w-]+/[\w-]+)/?$").unwrap();
    let alice = db::get_or_create_user(&pool, 1).await.unwrap();
    let bob = db::get_or_create_user(&pool, 2).await.unwrap();

    db::add_subscriptions(&pool, &pattern, alice.id, "https://github.com/octo/cli/")
        .await
        .unwrap();
    let created = db::add_subscriptions(&pool, &pattern, bob.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    assert_eq!(created, 1);

    assert_eq!(repository_count(&pool).await, 1);
    let repo = db::list_repositories(&pool).await.unwrap().remove(0);
    assert_eq!(repo.short_name, "octo/cli");
    assert_eq!(db::list_subscribers(&pool, repo.id).await.unwrap().len(), 2);

    // Either spelling unsubscribes.
    let removed = db::remove_subscriptions(&pool, &pattern, alice.id, "https://github.com/octo/cli")
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert_eq!(subscription_count(&pool).await, 1);
}

#[tokio::test]
async fn failed_write_rolls_back_the_whole_call() {
    let pool = setup_pool().await;
    let pattern = RepoUrlPattern::github();

    // No such user: the first repository is created, then the link insert
    // violates the users foreign key.
    let err = db::add_subscriptions(
        &pool,
        &pattern,
        999,
        "https://github.com/a/b https://github.com/c/d",
    )
    .await;
    assert!(err.is_err());

    // Nothing from the failed call survived, not even the first repository.
    assert_eq!(repository_count(&pool).await, 0);
    assert_eq!(subscription_count(&pool).await, 0);
}
