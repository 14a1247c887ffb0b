use axum::{extract::State, Json};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::AppResult,
    models::Notification,
    schema::notifications,
    state::AppState,
};

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: NaiveDateTime,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Notification> = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .order(notifications::created_at.desc())
        .load(&mut conn)?;

    let response = rows
        .into_iter()
        .map(|n| NotificationResponse {
            id: n.id,
            title: n.title,
            message: n.message,
            read: n.read,
            created_at: n.created_at,
        })
        .collect();

    Ok(Json(response))
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

/// Idempotent: only currently-unread rows are touched, so a second call
/// reports zero updates.
pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkAllReadResponse>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::read.eq(false)),
    )
    .set(notifications::read.eq(true))
    .execute(&mut conn)?;

    Ok(Json(MarkAllReadResponse { updated }))
}
