use std::time::Duration;

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    Json,
};
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{otp, password, tokens, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewUser, Role, User},
    routes::uploads::UploadedFile,
    schema::users::dsl,
    state::AppState,
    utils::json::{classify_nullable, NullableValue},
};

const AVATAR_URL_TTL: Duration = Duration::from_secs(3600);
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub roll_no: Option<String>,
    pub staff_id: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Deserialize, Default)]
struct SignupBody {
    name: String,
    email: String,
    password: String,
    role: Option<String>,
    roll_no: Option<String>,
    staff_id: Option<String>,
}

struct SignupForm {
    body: SignupBody,
    avatar: Option<UploadedFile>,
}

/// Signup accepts multipart (when an avatar file rides along) or plain JSON.
pub async fn signup(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<(StatusCode, Json<TokenPairResponse>)> {
    let form = parse_signup_request(&state, request).await?;

    let mut fields = Vec::new();
    if form.body.name.trim().is_empty() {
        fields.push(("name".to_string(), "must not be empty".to_string()));
    }
    if !form.body.email.contains('@') {
        fields.push(("email".to_string(), "must be a valid email".to_string()));
    }
    if form.body.password.len() < MIN_PASSWORD_LEN {
        fields.push((
            "password".to_string(),
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    if !fields.is_empty() {
        return Err(AppError::validation(fields));
    }

    let role = match form.body.role.as_deref() {
        None => Role::Student,
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_request("role must be student or admin"))?,
    };

    let avatar_key = match &form.avatar {
        Some(upload) => {
            let content_type = upload.ensure_allowed(state.config.max_attachment_bytes)?;
            let key = upload.storage_key("avatars");
            state
                .storage
                .put_object(&key, upload.bytes.clone(), Some(content_type))
                .await?;
            Some(key)
        }
        None => None,
    };

    let password_hash = password::hash_password(&form.body.password)?;
    let email = form.body.email.trim().to_ascii_lowercase();

    let new_user = NewUser {
        id: Uuid::new_v4(),
        name: form.body.name.trim().to_string(),
        email: email.clone(),
        password_hash,
        role: role.as_str().to_string(),
        roll_no: form.body.roll_no.filter(|v| !v.trim().is_empty()),
        staff_id: form.body.staff_id.filter(|v| !v.trim().is_empty()),
        avatar_url: avatar_key,
    };

    let mut conn = state.db()?;
    match diesel::insert_into(dsl::users)
        .values(&new_user)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            // The avatar was written before the insert; don't leave it
            // orphaned in the bucket.
            if let Some(key) = &new_user.avatar_url {
                if let Err(err) = state.storage.delete_object(key).await {
                    warn!(key = %key, error = %err, "failed to remove orphaned avatar");
                }
            }
            return Err(AppError::conflict("email already registered"));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let tokens = issue_token_pair(&state, &mut conn, new_user.id, role.as_str())?;
    info!(user_id = %new_user.id, role = %role, "user signed up");

    Ok((StatusCode::CREATED, Json(tokens)))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<TokenPairResponse>> {
    let mut conn = state.db()?;

    // Unknown email and wrong password produce byte-identical failures so
    // callers cannot enumerate accounts.
    let email = payload.email.trim().to_ascii_lowercase();
    let user: User = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(invalid_credentials)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| invalid_credentials())?;
    if !valid {
        return Err(invalid_credentials());
    }

    let tokens = issue_token_pair(&state, &mut conn, user.id, &user.role)?;
    info!(user_id = %user.id, "login succeeded");

    Ok(Json(tokens))
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Issues a fresh access token; the refresh token itself is not rotated
/// here. Login is the only place the single refresh slot is replaced.
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> AppResult<Json<AccessTokenResponse>> {
    let claims = state
        .tokens
        .verify_refresh(&payload.refresh_token)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;
    let user: User = dsl::users
        .find(claims.sub)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    // Revocation-by-overwrite: only the digest currently stored on the user
    // row is honored, even for otherwise well-formed unexpired tokens.
    let presented = tokens::token_digest(&payload.refresh_token);
    if user.refresh_token_hash.as_deref() != Some(presented.as_str()) {
        return Err(AppError::unauthorized());
    }

    let access_token = state.tokens.access_token(user.id, &user.role)?;
    Ok(Json(AccessTokenResponse { access_token }))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    diesel::update(dsl::users.find(user.user_id))
        .set((
            dsl::refresh_token_hash.eq(None::<String>),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    Ok(Json(MessageResponse {
        message: "logged out".to_string(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;
    Ok(Json(profile_response(&state, record).await))
}

/// Merges name / roll_no / avatar into the caller's profile. Email is
/// immutable on this path. Accepts multipart (avatar) or JSON, where a JSON
/// null clears roll_no.
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    request: Request,
) -> AppResult<Json<ProfileResponse>> {
    let mut conn = state.db()?;
    let existing: User = dsl::users.find(user.user_id).first(&mut conn)?;

    let (name, roll_no, avatar) = parse_profile_request(&state, request).await?;

    let avatar_key = match &avatar {
        Some(upload) => {
            let content_type = upload.ensure_allowed(state.config.max_attachment_bytes)?;
            let key = upload.storage_key("avatars");
            state
                .storage
                .put_object(&key, upload.bytes.clone(), Some(content_type))
                .await?;
            Some(key)
        }
        None => existing.avatar_url.clone(),
    };

    let name = match name {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => existing.name.clone(),
    };
    let roll_no = match roll_no {
        ProfileField::Keep => existing.roll_no.clone(),
        ProfileField::Clear => None,
        ProfileField::Set(value) => Some(value),
    };

    let updated: User = diesel::update(dsl::users.find(user.user_id))
        .set((
            dsl::name.eq(name),
            dsl::roll_no.eq(roll_no),
            dsl::avatar_url.eq(avatar_key),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)?;

    Ok(Json(profile_response(&state, updated).await))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.new_password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation([(
            "new_password".to_string(),
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        )]));
    }

    let mut conn = state.db()?;
    let record: User = dsl::users.find(user.user_id).first(&mut conn)?;

    let valid = password::verify_password(&payload.current_password, &record.password_hash)
        .map_err(|_| AppError::bad_request("current password incorrect"))?;
    if !valid {
        return Err(AppError::bad_request("current password incorrect"));
    }

    let password_hash = password::hash_password(&payload.new_password)?;
    diesel::update(dsl::users.find(user.user_id))
        .set((
            dsl::password_hash.eq(password_hash),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    Ok(Json(MessageResponse {
        message: "password updated".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Always answers 200 with the same body whether or not the account exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let response = MessageResponse {
        message: "If the account exists, an OTP has been emailed".to_string(),
    };

    let email = payload.email.trim().to_ascii_lowercase();
    let mut conn = state.db()?;
    let user: Option<User> = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?;

    let Some(user) = user else {
        return Ok(Json(response));
    };

    // A new request supersedes any earlier code: the stored digest is
    // overwritten and the verified marker reset.
    let code = otp::generate_otp();
    let now = Utc::now();
    let expires_at = now + ChronoDuration::minutes(state.config.otp_expiry_minutes);
    diesel::update(dsl::users.find(user.id))
        .set((
            dsl::otp_hash.eq(Some(otp::otp_digest(&code))),
            dsl::otp_expires_at.eq(Some(expires_at.naive_utc())),
            dsl::reset_verified_until.eq(None::<NaiveDateTime>),
            dsl::updated_at.eq(now.naive_utc()),
        ))
        .execute(&mut conn)?;

    let html = format!(
        "<p>Your OTP is <b>{code}</b>. It expires in {} minutes.</p>",
        state.config.otp_expiry_minutes
    );
    if let Err(err) = state
        .mailer
        .send(&user.email, "Password Reset OTP", &html)
        .await
    {
        // The response shape never changes on mailer failure.
        warn!(user_id = %user.id, error = %err, "failed to dispatch OTP email");
    }

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> AppResult<Json<MessageResponse>> {
    let invalid = || AppError::bad_request("otp invalid or expired");

    let email = payload.email.trim().to_ascii_lowercase();
    let mut conn = state.db()?;
    let user: User = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(invalid)?;

    let now = Utc::now().naive_utc();
    let live = matches!(user.otp_expires_at, Some(expires) if expires > now);
    if !live {
        return Err(invalid());
    }
    if user.otp_hash.as_deref() != Some(otp::otp_digest(&payload.otp).as_str()) {
        return Err(invalid());
    }

    // Single-use: the digest is cleared here; the reset endpoint is gated on
    // the verified marker instead of call ordering.
    let verified_until = Utc::now() + ChronoDuration::minutes(state.config.reset_window_minutes);
    diesel::update(dsl::users.find(user.id))
        .set((
            dsl::otp_hash.eq(None::<String>),
            dsl::otp_expires_at.eq(None::<NaiveDateTime>),
            dsl::reset_verified_until.eq(Some(verified_until.naive_utc())),
            dsl::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    Ok(Json(MessageResponse {
        message: "otp verified".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::validation([(
            "password".to_string(),
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        )]));
    }

    let email = payload.email.trim().to_ascii_lowercase();
    let mut conn = state.db()?;
    let user: User = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("user not found"))?;

    let now = Utc::now().naive_utc();
    let verified = matches!(user.reset_verified_until, Some(until) if until > now);
    if !verified {
        return Err(AppError::bad_request("otp verification required"));
    }

    // A completed reset also revokes the live session.
    let password_hash = password::hash_password(&payload.password)?;
    diesel::update(dsl::users.find(user.id))
        .set((
            dsl::password_hash.eq(password_hash),
            dsl::otp_hash.eq(None::<String>),
            dsl::otp_expires_at.eq(None::<NaiveDateTime>),
            dsl::reset_verified_until.eq(None::<NaiveDateTime>),
            dsl::refresh_token_hash.eq(None::<String>),
            dsl::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    info!(user_id = %user.id, "password reset completed");

    Ok(Json(MessageResponse {
        message: "password has been reset".to_string(),
    }))
}

fn invalid_credentials() -> AppError {
    AppError::bad_request("invalid credentials")
}

/// Mints both tokens and overwrites the user's single refresh slot with the
/// new digest, implicitly revoking whatever was there before.
fn issue_token_pair(
    state: &AppState,
    conn: &mut diesel::PgConnection,
    user_id: Uuid,
    role: &str,
) -> AppResult<TokenPairResponse> {
    let access_token = state.tokens.access_token(user_id, role)?;
    let refresh_token = state.tokens.refresh_token(user_id)?;

    diesel::update(dsl::users.find(user_id))
        .set((
            dsl::refresh_token_hash.eq(Some(tokens::token_digest(&refresh_token))),
            dsl::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    Ok(TokenPairResponse {
        access_token,
        refresh_token,
        role: role.to_string(),
    })
}

async fn profile_response(state: &AppState, user: User) -> ProfileResponse {
    let avatar_url = match &user.avatar_url {
        Some(key) => state
            .storage
            .presign_get_object(key, AVATAR_URL_TTL)
            .await
            .ok(),
        None => None,
    };

    ProfileResponse {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
        roll_no: user.roll_no,
        staff_id: user.staff_id,
        avatar_url,
        created_at: user.created_at,
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("multipart/form-data"))
        .unwrap_or(false)
}

async fn parse_signup_request(state: &AppState, request: Request) -> AppResult<SignupForm> {
    if !is_multipart(&request) {
        let Json(body) = Json::<SignupBody>::from_request(request, state)
            .await
            .map_err(|err| AppError::bad_request(format!("invalid signup payload: {err}")))?;
        return Ok(SignupForm { body, avatar: None });
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?;

    let mut body = SignupBody::default();
    let mut avatar = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("avatar") => avatar = Some(UploadedFile::from_field(field).await?),
            Some("name") => body.name = field_text(field, "name").await?,
            Some("email") => body.email = field_text(field, "email").await?,
            Some("password") => body.password = field_text(field, "password").await?,
            Some("role") => body.role = Some(field_text(field, "role").await?),
            Some("roll_no") => body.roll_no = Some(field_text(field, "roll_no").await?),
            Some("staff_id") => body.staff_id = Some(field_text(field, "staff_id").await?),
            _ => {}
        }
    }

    Ok(SignupForm { body, avatar })
}

enum ProfileField {
    Keep,
    Clear,
    Set(String),
}

async fn parse_profile_request(
    state: &AppState,
    request: Request,
) -> AppResult<(Option<String>, ProfileField, Option<UploadedFile>)> {
    if !is_multipart(&request) {
        let Json(body) = Json::<serde_json::Value>::from_request(request, state)
            .await
            .map_err(|err| AppError::bad_request(format!("invalid profile payload: {err}")))?;

        let name = match classify_nullable(body.get("name")).map_err(AppError::bad_request)? {
            NullableValue::String(value) => Some(value),
            _ => None,
        };
        let roll_no = match classify_nullable(body.get("roll_no")).map_err(AppError::bad_request)? {
            NullableValue::Omitted => ProfileField::Keep,
            NullableValue::Null => ProfileField::Clear,
            NullableValue::String(value) => ProfileField::Set(value),
        };
        return Ok((name, roll_no, None));
    }

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?;

    let mut name = None;
    let mut roll_no = ProfileField::Keep;
    let mut avatar = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart data: {err}")))?
    {
        let field_name = field.name().map(|n| n.to_string());
        match field_name.as_deref() {
            Some("avatar") => avatar = Some(UploadedFile::from_field(field).await?),
            Some("name") => name = Some(field_text(field, "name").await?),
            Some("roll_no") => roll_no = ProfileField::Set(field_text(field, "roll_no").await?),
            _ => {}
        }
    }

    Ok((name, roll_no, avatar))
}

async fn field_text(field: axum::extract::multipart::Field<'_>, name: &str) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid {name} field: {err}")))
}
