//! Create a pending spider_task for testing the tpl-spider worker
//!
//! Usage: cargo run --bin create_test_task -- [SEED_URL...]

use tpl_spider::db::models::{CrawlOptions, NewTask, TaskStatus};
use tpl_spider::db::{create_pool_from_env, spider_tasks};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env
    dotenvy::dotenv().ok();

    let mut seeds: Vec<String> = std::env::args().skip(1).collect();
    if seeds.is_empty() {
        seeds.push("https://example.com".to_string());
    }

    println!("Connecting to database...");
    let pool = create_pool_from_env().await?;
    let mut conn = pool.acquire().await?;
    println!("✓ Connected to database");

    let task_id = format!("test-{:016x}", rand::random::<u64>());
    let task = NewTask::new(task_id.clone(), seeds).with_options(CrawlOptions {
        user_agent_class: Some("pc".to_string()),
        ..Default::default()
    });

    println!("\nCreating test task for: {:?}", task.seeds);
    spider_tasks::insert_task(&mut *conn, &task).await?;

    let row = spider_tasks::get_task_by_id(&mut *conn, &task_id)
        .await?
        .ok_or("inserted task not found")?;

    println!("✓ Test task created:");
    println!("  ID: {}", row.id);
    println!("  Seeds: {}", row.seeds);
    println!("  Status: {}", row.status);

    let pending = spider_tasks::count_by_status(&mut *conn, TaskStatus::Pending).await?;
    println!("\nTotal pending tasks: {}", pending);

    println!("\nNext steps:");
    println!("  Run worker: cargo run --release -- <BASE_DIR> --once");

    Ok(())
}
