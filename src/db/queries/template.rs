//! Template database queries

use anyhow::Result;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::Template;

/// Get a template by ID
pub async fn get_template(exec: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Template>> {
    let template = sqlx::query_as::<_, Template>(
        r#"
        SELECT id, name, language, status, created_at, updated_at
        FROM templates
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;

    Ok(template)
}
