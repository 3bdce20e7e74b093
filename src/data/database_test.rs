//! Database tests

use super::*;
use chrono::Utc;
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn sample_mention(source: &str, target: &str) -> Mention {
    Mention {
        id: EntityId::new().0,
        source_url: source.to_string(),
        target_url: target.to_string(),
        sent_by: "203.0.113.7".to_string(),
        target_object: None,
        hcard_id: None,
        post_type: None,
        quote: None,
        validated: true,
        approved: false,
        has_been_read: false,
        notes: String::new(),
        published: Utc::now(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

#[tokio::test]
async fn test_mention_upsert_is_idempotent_on_pair() {
    let (db, _temp_dir) = create_test_db().await;

    let mention = sample_mention("https://peer.org/post/42", "https://us.org/a/1/");
    db.upsert_mention(&mention).await.unwrap();

    // Same pair again with a fresh id: must update, not duplicate
    let mut again = sample_mention("https://peer.org/post/42", "https://us.org/a/1/");
    again.validated = false;
    again.post_type = Some("reply".to_string());
    let stored = db.upsert_mention(&again).await.unwrap();

    assert_eq!(stored.id, mention.id);
    assert!(!stored.validated);
    assert_eq!(stored.post_type.as_deref(), Some("reply"));

    let all = db.find_mentions(&[]).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_mention_upsert_never_overwrites_approved() {
    let (db, _temp_dir) = create_test_db().await;

    let mut mention = sample_mention("https://peer.org/a", "https://us.org/a/1/");
    mention.approved = true;
    db.upsert_mention(&mention).await.unwrap();

    let mut reprocessed = sample_mention("https://peer.org/a", "https://us.org/a/1/");
    reprocessed.approved = false;
    let stored = db.upsert_mention(&reprocessed).await.unwrap();

    assert!(stored.approved, "re-verification must not reset approval");
}

#[tokio::test]
async fn test_public_mentions_filter_unapproved_and_unvalidated() {
    let (db, _temp_dir) = create_test_db().await;

    let mut approved = sample_mention("https://a.org/1", "https://us.org/a/1/");
    approved.approved = true;
    db.upsert_mention(&approved).await.unwrap();

    let unapproved = sample_mention("https://b.org/1", "https://us.org/a/1/");
    db.upsert_mention(&unapproved).await.unwrap();

    let mut unvalidated = sample_mention("https://c.org/1", "https://us.org/a/1/");
    unvalidated.validated = false;
    unvalidated.approved = true;
    db.upsert_mention(&unvalidated).await.unwrap();

    let visible = db
        .get_public_mentions_for_urls(&["https://us.org/a/1/".to_string()])
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].source_url, "https://a.org/1");

    assert!(db
        .any_mentions_for_urls(&["https://us.org/a/1/".to_string()])
        .await
        .unwrap());
}

#[tokio::test]
async fn test_find_mentions_rejects_unknown_filter_column() {
    let (db, _temp_dir) = create_test_db().await;

    let error = db
        .find_mentions(&[("notes; DROP TABLE mentions".to_string(), "x".to_string())])
        .await
        .expect_err("unvetted column names must not reach SQL");
    assert!(matches!(error, crate::error::AppError::Validation(_)));
}

#[tokio::test]
async fn test_delete_mentions_for_object_cascades() {
    let (db, _temp_dir) = create_test_db().await;

    let mut mention = sample_mention("https://peer.org/a", "https://us.org/a/1/");
    mention.target_object = Some("blog.Article/1".to_string());
    db.upsert_mention(&mention).await.unwrap();

    let deleted = db.delete_mentions_for_object("blog.Article/1").await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.count_mentions().await.unwrap(), 0);
}

#[tokio::test]
async fn test_hcard_upsert_matches_on_homepage_and_name() {
    let (db, _temp_dir) = create_test_db().await;

    let card = HCard {
        id: EntityId::new().0,
        name: Some("Jane".to_string()),
        avatar: None,
        homepage: Some("https://janebloggs.org".to_string()),
        json: "{}".to_string(),
        created_at: Utc::now(),
    };
    let first = db.upsert_hcard(&card).await.unwrap();

    // Same pair with an avatar now known: updates in place
    let mut update = card.clone();
    update.avatar = Some("https://janebloggs.org/me.jpg".to_string());
    let second = db.upsert_hcard(&update).await.unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.avatar.as_deref(), Some("https://janebloggs.org/me.jpg"));

    // Same homepage, different name: a distinct actor
    let mut other = card.clone();
    other.name = Some("John".to_string());
    let third = db.upsert_hcard(&other).await.unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn test_hcard_upsert_rejects_empty_card() {
    let (db, _temp_dir) = create_test_db().await;

    let card = HCard {
        id: EntityId::new().0,
        name: Some("   ".to_string()),
        avatar: None,
        homepage: None,
        json: "{}".to_string(),
        created_at: Utc::now(),
    };
    let error = db.upsert_hcard(&card).await.expect_err("empty card must fail");
    assert!(matches!(error, crate::error::AppError::NotEnoughData(_)));
}

#[tokio::test]
async fn test_prepare_outgoing_status_reuses_oldest_duplicate() {
    let (db, _temp_dir) = create_test_db().await;

    let first = db
        .prepare_outgoing_status("/article/1/", "https://peer.org/")
        .await
        .unwrap();

    // Simulate a legacy duplicate with a later created_at
    sqlx::query(
        "INSERT INTO outgoing_statuses (id, source_url, target_url, created_at) \
         VALUES (?, '/article/1/', 'https://peer.org/', ?)",
    )
    .bind(EntityId::new().0)
    .bind(Utc::now() + chrono::Duration::seconds(10))
    .execute(db_pool(&db))
    .await
    .unwrap();

    let chosen = db
        .prepare_outgoing_status("/article/1/", "https://peer.org/")
        .await
        .unwrap();
    assert_eq!(chosen.id, first.id, "must deterministically pick the oldest row");

    let all = db.get_outgoing_statuses("/article/1/").await.unwrap();
    assert_eq!(all.len(), 2, "duplicates are left untouched");
}

#[tokio::test]
async fn test_outgoing_status_retry_round_trip() {
    let (db, _temp_dir) = create_test_db().await;

    let mut status = db
        .prepare_outgoing_status("/article/1/", "https://peer.org/")
        .await
        .unwrap();
    status.retry.record_failure(Utc::now(), 5);
    status.status_message = Some("Target unreachable".to_string());
    db.update_outgoing_status(&status).await.unwrap();

    let awaiting = db.get_awaiting_outgoing_statuses().await.unwrap();
    assert_eq!(awaiting.len(), 1);
    assert_eq!(awaiting[0].retry.retry_attempt_count, 1);

    // A fresh scan resets the retry state
    let reset = db
        .prepare_outgoing_status("/article/1/", "https://peer.org/")
        .await
        .unwrap();
    assert_eq!(reset.retry.retry_attempt_count, 0);
    assert!(db.get_awaiting_outgoing_statuses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_incoming_unique_on_pair() {
    let (db, _temp_dir) = create_test_db().await;

    let first = db
        .upsert_pending_incoming("https://peer.org/a", "https://us.org/a/1/", "ip1")
        .await
        .unwrap();
    let second = db
        .upsert_pending_incoming("https://peer.org/a", "https://us.org/a/1/", "ip2")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.sent_by, "ip2");
    assert_eq!(db.count_pending_incoming().await.unwrap(), 1);

    db.delete_pending_incoming("https://peer.org/a", "https://us.org/a/1/")
        .await
        .unwrap();
    assert_eq!(db.count_pending_incoming().await.unwrap(), 0);
}

#[tokio::test]
async fn test_pending_outgoing_replaces_text() {
    let (db, _temp_dir) = create_test_db().await;

    db.upsert_pending_outgoing("https://us.org/article/1/", "<p>old</p>")
        .await
        .unwrap();
    db.upsert_pending_outgoing("https://us.org/article/1/", "<p>new</p>")
        .await
        .unwrap();

    let pending = db.list_pending_outgoing().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].text, "<p>new</p>");

    db.delete_pending_outgoing("https://us.org/article/1/")
        .await
        .unwrap();
    assert_eq!(db.count_pending_outgoing().await.unwrap(), 0);
}

/// Access the raw pool for tests that need to seed legacy shapes.
fn db_pool(db: &Database) -> &sqlx::Pool<sqlx::Sqlite> {
    db.pool()
}
