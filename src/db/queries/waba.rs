//! WABA phone number database queries

use anyhow::Result;
use sqlx::PgExecutor;

use crate::types::WabaPhone;

/// The outbound phone identity for the account. Prefers the row flagged as
/// default, otherwise the oldest registered number.
pub async fn get_default_phone(exec: impl PgExecutor<'_>) -> Result<Option<WabaPhone>> {
    let phone = sqlx::query_as::<_, WabaPhone>(
        r#"
        SELECT id, phone_number, phone_number_id, display_name, is_default,
               created_at, updated_at
        FROM waba_phones
        ORDER BY is_default DESC, created_at
        LIMIT 1
        "#,
    )
    .fetch_optional(exec)
    .await?;

    Ok(phone)
}
