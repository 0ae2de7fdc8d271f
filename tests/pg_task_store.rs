//! PgTaskStore against a real PostgreSQL
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test pg_task_store -- --ignored
//!
//! Each test works in its own throwaway schema, so the database's existing
//! spider_task table is never touched.

use futures::future::join_all;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tpl_spider::config::ClaimOrder;
use tpl_spider::db::models::{NewTask, TaskStatus};
use tpl_spider::db::{database_url_from_env, spider_tasks};
use tpl_spider::store::{PgTaskStore, TaskStore};

const LEASE: Duration = Duration::from_secs(600);
const MIGRATION: &str = include_str!("../migrations/0001_create_spider_task.sql");

struct TestDb {
    pool: PgPool,
    admin: PgPool,
    schema: String,
}

impl TestDb {
    async fn new() -> Self {
        dotenvy::dotenv().ok();
        let url = database_url_from_env().expect("DATABASE_URL must be set");
        let schema = format!("tpl_spider_test_{:016x}", rand::random::<u64>());

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("connect");
        sqlx::query(&format!("CREATE SCHEMA {}", schema))
            .execute(&admin)
            .await
            .expect("create schema");

        let options = PgConnectOptions::from_str(&url)
            .expect("parse DATABASE_URL")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect_with(options)
            .await
            .expect("connect to test schema");
        sqlx::raw_sql(MIGRATION)
            .execute(&pool)
            .await
            .expect("apply migration");

        Self {
            pool,
            admin,
            schema,
        }
    }

    fn store(&self) -> PgTaskStore {
        PgTaskStore::new(self.pool.clone(), LEASE, ClaimOrder::NewestFirst)
    }

    async fn insert(&self, id: &str) {
        let mut conn = self.pool.acquire().await.unwrap();
        spider_tasks::insert_task(&mut conn, &NewTask::new(id, vec!["http://example.com".to_string()]))
            .await
            .unwrap();
    }

    async fn execute(&self, sql: &str, id: &str) {
        sqlx::query(sql).bind(id).execute(&self.pool).await.unwrap();
    }

    async fn teardown(self) {
        self.pool.close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop schema");
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn claim_fresh_then_finalize_completed() {
    let db = TestDb::new().await;
    db.insert("t1").await;
    let store = db.store();

    let task = store.claim_fresh_task().await.expect("task claimed");
    assert_eq!(task.id, "t1");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.seeds, vec!["http://example.com".to_string()]);

    store
        .finalize("t1", Some("archive.zip"), TaskStatus::Completed)
        .await
        .unwrap();

    let mut conn = db.pool.acquire().await.unwrap();
    let row = spider_tasks::get_task_by_id(&mut conn, "t1").await.unwrap().unwrap();
    assert_eq!(row.status, "C");
    assert_eq!(row.result.as_deref(), Some("archive.zip"));
    drop(conn);

    assert!(store.claim_fresh_task().await.is_none());
    db.teardown().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn stale_task_is_reclaimed_with_refreshed_heartbeat() {
    let db = TestDb::new().await;
    db.insert("t2").await;
    db.execute(
        "UPDATE spider_task SET status = 'P', gmt_modified = NOW() - INTERVAL '1200 seconds' WHERE id = $1",
        "t2",
    )
    .await;
    let store = db.store();

    let before = chrono::Utc::now() - chrono::Duration::seconds(5);
    let task = store.claim_timed_out_task().await.expect("stale task reclaimed");
    assert_eq!(task.id, "t2");
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.modified_at > before);

    assert!(store.claim_timed_out_task().await.is_none());
    db.teardown().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_fresh_claims_have_one_winner() {
    let db = TestDb::new().await;
    db.insert("only").await;
    let store = Arc::new(db.store());

    let claims = join_all((0..10).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.claim_fresh_task().await })
    }))
    .await;

    let winners = claims
        .into_iter()
        .filter_map(|joined| joined.unwrap())
        .count();
    assert_eq!(winners, 1);
    assert_eq!(store.stats().faults, 0);
    db.teardown().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn malformed_row_is_failed_at_claim() {
    let db = TestDb::new().await;
    db.insert("bad").await;
    db.execute("UPDATE spider_task SET seeds = 'not json' WHERE id = $1", "bad")
        .await;
    let store = db.store();

    assert!(store.claim_fresh_task().await.is_none());
    assert_eq!(store.stats().rejected, 1);

    let mut conn = db.pool.acquire().await.unwrap();
    let failed = spider_tasks::count_by_status(&mut conn, TaskStatus::Failed)
        .await
        .unwrap();
    assert_eq!(failed, 1);
    drop(conn);
    db.teardown().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn malformed_row_does_not_hide_the_next_task() {
    let db = TestDb::new().await;
    db.insert("good").await;
    db.execute(
        "UPDATE spider_task SET gmt_created = NOW() - INTERVAL '60 seconds' WHERE id = $1",
        "good",
    )
    .await;
    db.insert("bad").await;
    db.execute("UPDATE spider_task SET seeds = '[]' WHERE id = $1", "bad")
        .await;
    let store = db.store();

    // Newest first: the malformed row is seen first and skipped in the same call
    let task = store.claim_fresh_task().await.expect("good task claimed");
    assert_eq!(task.id, "good");

    let stats = store.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.claims, 1);
    db.teardown().await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn finalize_twice_leaves_same_row() {
    let db = TestDb::new().await;
    db.insert("t1").await;
    let store = db.store();
    store.claim_fresh_task().await.unwrap();

    store.finalize("t1", None, TaskStatus::Failed).await.unwrap();
    store.finalize("t1", None, TaskStatus::Failed).await.unwrap();

    let mut conn = db.pool.acquire().await.unwrap();
    let row = spider_tasks::get_task_by_id(&mut conn, "t1").await.unwrap().unwrap();
    assert_eq!(row.status, "E");
    assert_eq!(row.result, None);
    drop(conn);
    db.teardown().await;
}
