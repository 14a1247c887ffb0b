use std::time::Duration;

use axum::{
    extract::{FromRequest, Multipart, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Category, Complaint, NewComplaint, Status},
    notify,
    routes::uploads::UploadedFile,
    schema::{complaints, users},
    state::AppState,
};

const ATTACHMENT_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize)]
pub struct OwnerInfo {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct ComplaintResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub status: String,
    pub attachments: Vec<String>,
    pub created_by: OwnerInfo,
    pub assigned_to: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Deserialize, Default)]
struct CreateComplaintBody {
    title: String,
    description: String,
    category: String,
}

/// Multipart when attachments ride along (≤ 5 files, images/PDF only),
/// plain JSON otherwise.
pub async fn create_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    request: Request,
) -> AppResult<(StatusCode, Json<ComplaintResponse>)> {
    let (body, files) = parse_create_request(&state, request).await?;

    let mut fields = Vec::new();
    if body.title.trim().is_empty() {
        fields.push(("title".to_string(), "must not be empty".to_string()));
    }
    if body.description.trim().is_empty() {
        fields.push(("description".to_string(), "must not be empty".to_string()));
    }
    let category: Option<Category> = body.category.parse().ok();
    if category.is_none() {
        fields.push((
            "category".to_string(),
            "must be one of the known categories".to_string(),
        ));
    }
    if !fields.is_empty() {
        return Err(AppError::validation(fields));
    }
    let category = category.expect("validated above");

    if files.len() > state.config.max_attachments_per_complaint {
        return Err(AppError::bad_request(format!(
            "at most {} attachments are allowed",
            state.config.max_attachments_per_complaint
        )));
    }

    let mut attachment_keys = Vec::with_capacity(files.len());
    for upload in &files {
        let content_type = upload.ensure_allowed(state.config.max_attachment_bytes)?;
        let key = upload.storage_key("attachments");
        state
            .storage
            .put_object(&key, upload.bytes.clone(), Some(content_type))
            .await?;
        attachment_keys.push(key);
    }

    let new_complaint = NewComplaint {
        id: Uuid::new_v4(),
        title: body.title.trim().to_string(),
        description: body.description.trim().to_string(),
        category: category.as_str().to_string(),
        status: Status::Pending.as_str().to_string(),
        attachments: attachment_keys,
        created_by: user.user_id,
    };

    let mut conn = state.db()?;
    let complaint: Complaint = diesel::insert_into(complaints::table)
        .values(&new_complaint)
        .get_result(&mut conn)?;

    let owner = owner_info(&mut conn, complaint.created_by)?;
    info!(
        complaint_id = %complaint.id,
        category = %complaint.category,
        attachments = complaint.attachments.len(),
        "complaint created"
    );

    let response = complaint_response(&state, complaint, owner).await;
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
pub struct ListComplaintsQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub mine: Option<bool>,
}

/// Newest-first, optionally filtered; `mine=true` restricts to the caller's
/// own complaints.
pub async fn list_complaints(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListComplaintsQuery>,
) -> AppResult<Json<Vec<ComplaintResponse>>> {
    let status = query
        .status
        .as_deref()
        .map(|raw| raw.parse::<Status>())
        .transpose()
        .map_err(AppError::bad_request)?;
    let category = query
        .category
        .as_deref()
        .map(|raw| raw.parse::<Category>())
        .transpose()
        .map_err(AppError::bad_request)?;

    let mut conn = state.db()?;
    let mut selection = complaints::table
        .inner_join(users::table)
        .select((
            complaints::all_columns,
            (users::id, users::name, users::email, users::role),
        ))
        .order(complaints::created_at.desc())
        .into_boxed();

    if let Some(status) = status {
        selection = selection.filter(complaints::status.eq(status.as_str()));
    }
    if let Some(category) = category {
        selection = selection.filter(complaints::category.eq(category.as_str()));
    }
    if query.mine.unwrap_or(false) {
        selection = selection.filter(complaints::created_by.eq(user.user_id));
    }

    let rows: Vec<(Complaint, (Uuid, String, String, String))> = selection.load(&mut conn)?;
    Ok(Json(rows_to_responses(&state, rows).await))
}

/// Every complaint from every user, for cross-user browsing. Excluding the
/// caller's own rows is left to the caller.
pub async fn list_all_complaints(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<Json<Vec<ComplaintResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<(Complaint, (Uuid, String, String, String))> = complaints::table
        .inner_join(users::table)
        .select((
            complaints::all_columns,
            (users::id, users::name, users::email, users::role),
        ))
        .order(complaints::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(rows_to_responses(&state, rows).await))
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
}

/// Admin-only; any of the three values is accepted (Resolved may go back to
/// Pending). The owner notification is a post-commit side effect: its
/// failure is logged and never fails or reverts the status update.
pub async fn set_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(complaint_id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> AppResult<Json<ComplaintResponse>> {
    let mut conn = state.db()?;
    let complaint: Complaint = complaints::table
        .find(complaint_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    user.require_admin()?;

    let new_status: Status = payload
        .status
        .parse()
        .map_err(AppError::bad_request)?;

    let updated: Complaint = diesel::update(complaints::table.find(complaint_id))
        .set((
            complaints::status.eq(new_status.as_str()),
            complaints::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    info!(
        complaint_id = %complaint_id,
        from = %complaint.status,
        to = %new_status,
        "complaint status updated"
    );

    if let Err(err) = notify::record_status_change(
        &mut conn,
        updated.created_by,
        &updated.title,
        new_status,
    ) {
        error!(complaint_id = %complaint_id, error = %err, "failed to record status notification");
    }

    let owner = owner_info(&mut conn, updated.created_by)?;
    Ok(Json(complaint_response(&state, updated, owner).await))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub user_id: Uuid,
}

pub async fn assign_complaint(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(complaint_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<ComplaintResponse>> {
    user.require_admin()?;

    let mut conn = state.db()?;
    let updated: Complaint = match diesel::update(complaints::table.find(complaint_id))
        .set((
            complaints::assigned_to.eq(Some(payload.user_id)),
            complaints::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
        .optional()
    {
        Ok(Some(complaint)) => complaint,
        Ok(None) => return Err(AppError::not_found()),
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::ForeignKeyViolation,
            _,
        )) => {
            return Err(AppError::bad_request("assignee does not exist"));
        }
        Err(err) => return Err(AppError::from(err)),
    };

    let owner = owner_info(&mut conn, updated.created_by)?;
    Ok(Json(complaint_response(&state, updated, owner).await))
}

fn owner_info(conn: &mut diesel::PgConnection, owner_id: Uuid) -> AppResult<OwnerInfo> {
    let (id, name, email, role) = users::table
        .find(owner_id)
        .select((users::id, users::name, users::email, users::role))
        .first(conn)?;
    Ok(OwnerInfo {
        id,
        name,
        email,
        role,
    })
}

async fn rows_to_responses(
    state: &AppState,
    rows: Vec<(Complaint, (Uuid, String, String, String))>,
) -> Vec<ComplaintResponse> {
    let mut responses = Vec::with_capacity(rows.len());
    for (complaint, (id, name, email, role)) in rows {
        let owner = OwnerInfo {
            id,
            name,
            email,
            role,
        };
        responses.push(complaint_response(state, complaint, owner).await);
    }
    responses
}

/// Attachment keys are resolved to short-lived presigned URLs on the way
/// out; a presign failure drops the link rather than the whole response.
async fn complaint_response(
    state: &AppState,
    complaint: Complaint,
    owner: OwnerInfo,
) -> ComplaintResponse {
    let mut attachments = Vec::with_capacity(complaint.attachments.len());
    for key in &complaint.attachments {
        match state
            .storage
            .presign_get_object(key, ATTACHMENT_URL_TTL)
            .await
        {
            Ok(url) => attachments.push(url),
            Err(err) => {
                error!(key = %key, error = %err, "failed to presign attachment");
            }
        }
    }

    ComplaintResponse {
        id: complaint.id,
        title: complaint.title,
        description: complaint.description,
        category: complaint.category,
        status: complaint.status,
        attachments,
        created_by: owner,
        assigned_to: complaint.assigned_to,
        created_at: complaint.created_at,
        updated_at: complaint.updated_at,
    }
}

async fn parse_create_request(
    state: &AppState,
    request: Request,
) -> AppResult<(CreateComplaintBody, Vec<UploadedFile>)> {
    let multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !multipart {
        let Json(body) = Json::<CreateComplaintBody>::from_request(request, state)
            .await
            .map_err(|err| AppError::bad_request(format!("invalid complaint payload: {err}")))?;
        return Ok((body, Vec::new()));
    }

    let mut parts = Multipart::from_request(request, state)
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?;

    let mut body = CreateComplaintBody::default();
    let mut files = Vec::new();

    while let Some(field) = parts
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("attachments") => files.push(UploadedFile::from_field(field).await?),
            Some("title") => body.title = text(field, "title").await?,
            Some("description") => body.description = text(field, "description").await?,
            Some("category") => body.category = text(field, "category").await?,
            _ => {}
        }
    }

    Ok((body, files))
}

async fn text(field: axum::extract::multipart::Field<'_>, name: &str) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid {name} field: {err}")))
}
