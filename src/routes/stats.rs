use axum::{extract::State, Json};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::Serialize;

use crate::{
    auth::AuthenticatedUser,
    error::AppResult,
    models::Status,
    schema::{complaints, users},
    state::AppState,
};

#[derive(Serialize)]
pub struct OverviewResponse {
    pub total_complaints: i64,
    pub pending_complaints: i64,
    pub in_progress_complaints: i64,
    pub resolved_complaints: i64,
    pub total_users: i64,
}

/// Admin dashboard counts.
pub async fn overview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<OverviewResponse>> {
    user.require_admin()?;

    let mut conn = state.db()?;
    let total_complaints: i64 = complaints::table.select(count_star()).first(&mut conn)?;
    let pending_complaints = count_by_status(&mut conn, Status::Pending)?;
    let in_progress_complaints = count_by_status(&mut conn, Status::InProgress)?;
    let resolved_complaints = count_by_status(&mut conn, Status::Resolved)?;
    let total_users: i64 = users::table.select(count_star()).first(&mut conn)?;

    Ok(Json(OverviewResponse {
        total_complaints,
        pending_complaints,
        in_progress_complaints,
        resolved_complaints,
        total_users,
    }))
}

fn count_by_status(conn: &mut diesel::PgConnection, status: Status) -> AppResult<i64> {
    let count = complaints::table
        .filter(complaints::status.eq(status.as_str()))
        .select(count_star())
        .first(conn)?;
    Ok(count)
}
