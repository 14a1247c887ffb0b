use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewNotification, Status};
use crate::schema::notifications;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Post-commit hook for complaint status changes: appends one unread
/// notification for the owner. Callers run this after the status update has
/// committed and only log a failure; the parent mutation is never rolled
/// back on its account.
pub fn record_status_change(
    conn: &mut PgConnection,
    owner_id: Uuid,
    complaint_title: &str,
    new_status: Status,
) -> Result<(), NotifyError> {
    let notification = NewNotification {
        id: Uuid::new_v4(),
        user_id: owner_id,
        title: "Complaint Status Updated".to_string(),
        message: format!(
            "Your complaint \"{complaint_title}\" status has been changed to {new_status}."
        ),
        read: false,
    };

    diesel::insert_into(notifications::table)
        .values(&notification)
        .execute(conn)?;

    Ok(())
}
