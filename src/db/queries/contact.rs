//! Contact database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::types::Contact;

const CONTACT_COLUMNS: &str = r#"
    id, phone_number, status, last_message_at, last_incoming_message_at,
    unread_count, created_at, updated_at
"#;

/// Get a contact by ID
pub async fn get_contact(exec: impl PgExecutor<'_>, id: Uuid) -> Result<Option<Contact>> {
    let contact = sqlx::query_as::<_, Contact>(&format!(
        "SELECT {} FROM contacts WHERE id = $1",
        CONTACT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(exec)
    .await?;

    Ok(contact)
}

/// Stamp the contact after a successful outbound send
pub async fn mark_sent(exec: impl PgExecutor<'_>, id: Uuid, now: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE contacts
        SET status = 'sent', last_message_at = $2, updated_at = $2
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;

    Ok(())
}
