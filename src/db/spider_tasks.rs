//! spider_task database operations
//!
//! Claim queries are meant to run inside a REPEATABLE READ transaction (see
//! [`set_repeatable_read`]); two transactions racing for the same row then
//! fail one of them with a serialization error instead of both claiming it.

use crate::config::ClaimOrder;
use crate::db::models::{NewTask, TaskRow, TaskStatus};
use crate::error::Result;
use sqlx::{PgConnection, Row};
use std::time::Duration;

const TASK_COLUMNS: &str = "id, seeds, ip, user_id_str, user_agent, status, is_grab_out_link, \
     to_single_page, is_full_site, is_ref_model, encoding, to_framework, \
     gmt_modified, gmt_created, file_id, result";

/// Must be the first statement of the transaction
pub async fn set_repeatable_read(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        .execute(conn)
        .await?;

    Ok(())
}

/// Re-arm the lease of one in-progress task whose heartbeat is older than `lease`.
///
/// Status is left untouched.
pub async fn claim_timed_out(
    conn: &mut PgConnection,
    lease: Duration,
    order: ClaimOrder,
) -> Result<Option<TaskRow>> {
    let sql = format!(
        r#"
        UPDATE spider_task SET gmt_modified = NOW()
        WHERE id IN (
            SELECT id FROM spider_task
            WHERE status = $1
              AND gmt_modified < NOW() - make_interval(secs => $2)
            ORDER BY gmt_created {}
            LIMIT 1
        )
        RETURNING {}
        "#,
        order.sql_direction(),
        TASK_COLUMNS
    );

    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(TaskStatus::InProgress.code())
        .bind(lease.as_secs_f64())
        .fetch_optional(conn)
        .await?;

    Ok(row)
}

/// Flip one pending task to in-progress and stamp its heartbeat
pub async fn claim_pending(conn: &mut PgConnection, order: ClaimOrder) -> Result<Option<TaskRow>> {
    let sql = format!(
        r#"
        UPDATE spider_task SET status = $2, gmt_modified = NOW()
        WHERE id IN (
            SELECT id FROM spider_task
            WHERE status = $1
            ORDER BY gmt_created {}
            LIMIT 1
        )
        RETURNING {}
        "#,
        order.sql_direction(),
        TASK_COLUMNS
    );

    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(TaskStatus::Pending.code())
        .bind(TaskStatus::InProgress.code())
        .fetch_optional(conn)
        .await?;

    Ok(row)
}

/// Write the terminal status and result. Unconditional, so repeating it is harmless.
pub async fn finalize(
    conn: &mut PgConnection,
    task_id: &str,
    result: Option<&str>,
    status: TaskStatus,
) -> Result<u64> {
    let done = sqlx::query("UPDATE spider_task SET status = $2, result = $3 WHERE id = $1")
        .bind(task_id)
        .bind(status.code())
        .bind(result)
        .execute(conn)
        .await?;

    Ok(done.rows_affected())
}

/// Insert a pending task
pub async fn insert_task(conn: &mut PgConnection, task: &NewTask) -> Result<()> {
    let seeds = serde_json::to_string(&task.seeds)?;
    let options = &task.options;

    sqlx::query(
        r#"
        INSERT INTO spider_task (
            id, seeds, ip, user_id_str, user_agent, status,
            is_grab_out_link, to_single_page, is_full_site, is_ref_model,
            encoding, to_framework, file_id, gmt_created, gmt_modified
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
        "#,
    )
    .bind(&task.id)
    .bind(seeds)
    .bind(&options.client_ip)
    .bind(&options.notify_email)
    .bind(&options.user_agent_class)
    .bind(TaskStatus::Pending.code())
    .bind(options.grab_out_site_link)
    .bind(options.to_single_page)
    .bind(options.full_site)
    .bind(options.ref_model)
    .bind(&options.encoding)
    .bind(&options.to_framework)
    .bind(&options.file_id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get a task by ID
pub async fn get_task_by_id(conn: &mut PgConnection, task_id: &str) -> Result<Option<TaskRow>> {
    let sql = format!("SELECT {} FROM spider_task WHERE id = $1", TASK_COLUMNS);
    let row = sqlx::query_as::<_, TaskRow>(&sql)
        .bind(task_id)
        .fetch_optional(conn)
        .await?;

    Ok(row)
}

/// Count tasks in a given status for monitoring
pub async fn count_by_status(conn: &mut PgConnection, status: TaskStatus) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM spider_task WHERE status = $1")
        .bind(status.code())
        .fetch_one(conn)
        .await?;

    Ok(row.get("count"))
}

#[cfg(test)]
mod tests {
    // Tests require a running database - see tests/pg_task_store.rs
}
