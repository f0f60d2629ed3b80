// handlers.rs
use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::AppError;
use crate::identity::{
    clear_guest_identity, random_salt, resolve_voter_id, EnvironmentSignals, GuestCache,
    MemoryCache, ResolveContext, ResolvedVoter, GUEST_ID_KEY,
};
use crate::models::{
    CommentRequest, CommentView, CreatePollRequest, FeedQuery, FollowState, PollView, Profile,
    ProfileView, Session, UsernameRequest, VoteRequest,
};
use crate::services;
use crate::state::AppState;
use crate::validate::{validate_poll_text, MediaFile};

/// `axum::Json` whose rejections answer with the usual `{"error": ...}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

/// Header carrying a guest id the client resolved earlier.
pub const GUEST_HEADER: &str = "x-guest-id";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn guest_header(headers: &HeaderMap) -> Option<Uuid> {
    let value = headers.get(GUEST_HEADER)?.to_str().ok()?;
    Uuid::parse_str(value.trim()).ok()
}

async fn current_session(state: &AppState, headers: &HeaderMap) -> Result<Option<Session>, AppError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    let session = state
        .auth
        .get_session(token)
        .await
        .inspect_err(|e| error!("Error checking session: {e}"))?;
    Ok(session)
}

/// The resolved identity behind a request.
///
/// Only confirms identities the client already holds; guests are minted by
/// [`resolve_identity`].
pub struct Viewer(pub ResolvedVoter);

impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = current_session(state, &parts.headers).await?;
        let mut cache = guest_header(&parts.headers)
            .map(MemoryCache::with_guest)
            .unwrap_or_default();

        let voter = resolve_voter_id(
            ResolveContext {
                session: session.as_ref(),
                signals: None,
                salt: "",
                now: Utc::now(),
            },
            &mut cache,
            state.guests.as_ref(),
        )
        .await;
        Ok(Viewer(voter))
    }
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    #[serde(default)]
    pub guest_id: Option<Uuid>,
    #[serde(default)]
    pub signals: Option<EnvironmentSignals>,
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    #[serde(flatten)]
    pub voter: ResolvedVoter,
    /// Set when a signed-in client still held a guest id; it should drop it.
    pub clear_guest: bool,
}

/// Resolve the caller to a user or guest, creating a guest if needed
pub async fn resolve_identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<IdentityRequest>,
) -> Result<(HeaderMap, Json<IdentityResponse>), AppError> {
    let session = current_session(&state, &headers).await?;

    let mut cache = request
        .guest_id
        .or_else(|| guest_header(&headers))
        .map(MemoryCache::with_guest)
        .unwrap_or_default();
    let held_guest = cache.get(GUEST_ID_KEY).is_some();

    let salt = random_salt();
    let voter = resolve_voter_id(
        ResolveContext {
            session: session.as_ref(),
            signals: request.signals.as_ref(),
            salt: &salt,
            now: Utc::now(),
        },
        &mut cache,
        state.guests.as_ref(),
    )
    .await;

    let clear_guest = session.is_some() && held_guest;
    if clear_guest {
        debug!("Signed-in client handed over its guest identity");
        clear_guest_identity(&mut cache);
    }

    let mut response_headers = HeaderMap::new();
    if let Some(value) = cache
        .get(GUEST_ID_KEY)
        .and_then(|id| HeaderValue::from_str(&id).ok())
    {
        response_headers.insert(GUEST_HEADER, value);
    }

    Ok((response_headers, Json(IdentityResponse { voter, clear_guest })))
}

/// End the current session
pub async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::AuthRequired)?;
    state
        .auth
        .sign_out(token)
        .await
        .inspect_err(|e| error!("Error signing out: {e}"))?;
    Ok(StatusCode::NO_CONTENT)
}

/// The signed-in user's own profile
pub async fn current_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Profile>, AppError> {
    let token = bearer_token(&headers).ok_or(AppError::AuthRequired)?;
    let profile = state
        .auth
        .get_user(token)
        .await
        .inspect_err(|e| error!("Error fetching current user: {e}"))?
        .ok_or(AppError::AuthRequired)?;
    Ok(Json(profile))
}

/// Fetch the poll feed
pub async fn list_polls(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<PollView>>, AppError> {
    let polls = services::feed(state.polls.as_ref(), query.sort, &viewer).await?;
    Ok(Json(polls))
}

pub async fn get_poll(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(poll_id): Path<Uuid>,
) -> Result<Json<PollView>, AppError> {
    let poll = services::poll_detail(state.polls.as_ref(), poll_id, &viewer).await?;
    Ok(Json(poll))
}

/// Create a poll (signed-in users only)
pub async fn create_poll(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Json(mut request): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), AppError> {
    let author_id = viewer.user_id().ok_or(AppError::AuthRequired)?;

    let media = std::mem::take(&mut request.media)
        .into_iter()
        .map(|upload| {
            let bytes = STANDARD.decode(upload.data.as_bytes()).ok()?;
            Some(MediaFile {
                file_name: upload.file_name,
                content_type: upload.content_type,
                bytes,
            })
        })
        .collect::<Option<Vec<_>>>();
    let Some(media) = media else {
        // Title and option problems are reported ahead of unreadable media.
        validate_poll_text(&request.title, &request.options)?;
        return Err(AppError::MalformedPayload);
    };

    let poll = services::create_poll(
        state.polls.as_ref(),
        state.media.as_ref(),
        author_id,
        request,
        media,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

/// Vote for an option
pub async fn cast_vote(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(poll_id): Path<Uuid>,
    Json(vote): Json<VoteRequest>,
) -> Result<Json<PollView>, AppError> {
    let poll = services::cast_vote(state.polls.as_ref(), poll_id, vote.option_id, &viewer).await?;
    Ok(Json(poll))
}

pub async fn add_comment(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(poll_id): Path<Uuid>,
    Json(comment): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentView>), AppError> {
    let comment = services::add_comment(
        state.polls.as_ref(),
        poll_id,
        &comment.body,
        comment.parent_id,
        &viewer,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ProfileView>, AppError> {
    let profile = services::profile(state.polls.as_ref(), user_id, &viewer).await?;
    Ok(Json(profile))
}

/// Follow or unfollow a user
pub async fn toggle_follow(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Path(user_id): Path<Uuid>,
) -> Result<Json<FollowState>, AppError> {
    let follow = services::toggle_follow(state.polls.as_ref(), user_id, &viewer).await?;
    Ok(Json(follow))
}

pub async fn update_username(
    State(state): State<AppState>,
    Viewer(viewer): Viewer,
    Json(request): Json<UsernameRequest>,
) -> Result<StatusCode, AppError> {
    services::update_username(state.polls.as_ref(), &request.username, &viewer).await?;
    Ok(StatusCode::NO_CONTENT)
}
