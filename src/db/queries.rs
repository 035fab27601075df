use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::models::work_item::WorkItemStatus;

/// Raw `verification_work_items` row; the payload is still sealed.
#[derive(Debug, Clone, FromRow)]
pub struct WorkItemRow {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub status: String,
    pub match_count: Option<i32>,
    pub error: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert a new pending work item
pub async fn insert_work_item(
    pool: &PgPool,
    id: Uuid,
    sealed_payload: &[u8],
    content_type: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO verification_work_items (id, payload, content_type, status)
        VALUES ($1, $2, $3, 'pending')
        "#,
    )
    .bind(id)
    .bind(sealed_payload)
    .bind(content_type)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a work item by ID
pub async fn get_work_item(pool: &PgPool, id: Uuid) -> Result<Option<WorkItemRow>, sqlx::Error> {
    sqlx::query_as::<_, WorkItemRow>(
        r#"
        SELECT id, payload, content_type, status, match_count, error, attempts,
               created_at, updated_at
        FROM verification_work_items
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Perform the terminal transition. Only a pending row is updated, so the
/// transition happens at most once; returns whether this call performed it.
pub async fn finish_work_item(
    pool: &PgPool,
    id: Uuid,
    status: WorkItemStatus,
    match_count: Option<i32>,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE verification_work_items
        SET status = $1,
            match_count = $2,
            error = $3,
            updated_at = NOW()
        WHERE id = $4 AND status = 'pending'
        "#,
    )
    .bind(status.to_string())
    .bind(match_count)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Increment attempt count
pub async fn increment_attempts(pool: &PgPool, id: Uuid) -> Result<i32, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE verification_work_items
        SET attempts = attempts + 1
        WHERE id = $1
        RETURNING attempts
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    row.try_get("attempts")
}

/// Count work items still waiting on the worker
pub async fn count_pending(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row = sqlx::query("SELECT COUNT(*) AS pending FROM verification_work_items WHERE status = 'pending'")
        .fetch_one(pool)
        .await?;

    row.try_get("pending")
}
