use crate::config::ApiConfig;
use crate::error::{CatalogError, CatalogResult};
use crate::media_gateway::{MediaKind, MediaStore};
use crate::record_store::{CommentThread, Genre, NewComment, NewReply, RecordStore, UserRole};
use crate::song_listing::{MediaAccess, SongEntry, SongListing};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub listing: Arc<SongListing>,
    pub store: Arc<dyn RecordStore>,
    pub media: Arc<dyn MediaStore>,
    pub max_upload_bytes: usize,
}

/// Query parameters for the song list
#[derive(Debug, Deserialize)]
pub struct ListSongsQuery {
    pub skip: Option<String>,
    pub take: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSongsResponse {
    pub songs: Vec<SongResponse>,
    pub has_more: bool,
}

/// Song with its media links in API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongResponse {
    pub id: Uuid,
    pub title: String,
    pub artist: String,
    pub artist_id: Uuid,
    pub genre_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub audio_url: Option<String>,
    pub audio_expires_at: Option<DateTime<Utc>>,
    pub audio_available: bool,
    pub image_url: Option<String>,
    pub image_expires_at: Option<DateTime<Utc>>,
    pub image_available: bool,
}

fn split_access(access: MediaAccess) -> (Option<String>, Option<DateTime<Utc>>, bool) {
    match access {
        Ok(link) => (Some(link.url), Some(link.expires_at), true),
        Err(_) => (None, None, false),
    }
}

impl From<SongEntry> for SongResponse {
    fn from(entry: SongEntry) -> Self {
        let (audio_url, audio_expires_at, audio_available) = split_access(entry.audio);
        let (image_url, image_expires_at, image_available) = split_access(entry.image);
        let record = entry.record;

        Self {
            id: record.id,
            title: record.title,
            artist: record.artist_name,
            artist_id: record.artist_id,
            genre_id: record.genre_id,
            created_at: record.created_at,
            audio_url,
            audio_expires_at,
            audio_available,
            image_url,
            image_expires_at,
            image_available,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub song_id: Option<String>,
    pub user_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplyRequest {
    pub comment_id: Option<String>,
    pub user_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResponse {
    pub id: Uuid,
    pub song_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyResponse {
    pub id: Uuid,
    pub comment_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThreadResponse {
    #[serde(flatten)]
    pub comment: CommentResponse,
    pub replies: Vec<ReplyResponse>,
}

impl From<CommentThread> for CommentThreadResponse {
    fn from(thread: CommentThread) -> Self {
        let c = thread.comment;
        Self {
            comment: CommentResponse {
                id: c.id,
                song_id: c.song_id,
                user_id: c.user_id,
                content: c.content,
                created_at: c.created_at,
            },
            replies: thread
                .replies
                .into_iter()
                .map(|r| ReplyResponse {
                    id: r.id,
                    comment_id: r.comment_id,
                    user_id: r.user_id,
                    content: r.content,
                    created_at: r.created_at,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommentsResponse {
    pub comments: Vec<CommentThreadResponse>,
}

#[derive(Debug, Serialize)]
pub struct GenresResponse {
    pub genres: Vec<Genre>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub content_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub role: UserRole,
    /// Present when a role was asked about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_role: Option<bool>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/songs", get(list_songs))
        .route("/songs/:song_id/comments", get(list_comments))
        .route("/comments", post(create_comment))
        .route("/replies", post(create_reply))
        .route("/media", post(upload_media).layer(upload_limit))
        .route("/media/:content_id", delete(delete_media))
        .route("/genres", get(list_genres))
        .route("/users/:external_id", get(get_user))
        .route("/users/:external_id/role", get(check_role))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "catalog-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Load the next page of songs
#[instrument(skip(state))]
async fn list_songs(
    State(state): State<AppState>,
    params: Result<Query<ListSongsQuery>, QueryRejection>,
) -> CatalogResult<Json<ListSongsResponse>> {
    let Query(params) = params?;
    let skip = parse_int("skip", params.skip.as_deref())?;
    let take = parse_int("take", params.take.as_deref())?;

    let page = state
        .listing
        .list_songs(skip, take)
        .await?
        .map(SongResponse::from);

    Ok(Json(ListSongsResponse {
        songs: page.data,
        has_more: page.has_more,
    }))
}

/// Comment threads of one song
#[instrument(skip(state))]
async fn list_comments(
    State(state): State<AppState>,
    song_id: Result<Path<String>, PathRejection>,
) -> CatalogResult<Json<CommentsResponse>> {
    let Path(song_id) = song_id?;
    let song_id = parse_uuid("songId", &song_id)?;
    let threads = state.store.list_comment_threads(song_id).await?;

    Ok(Json(CommentsResponse {
        comments: threads.into_iter().map(Into::into).collect(),
    }))
}

#[instrument(skip(state, payload))]
async fn create_comment(
    State(state): State<AppState>,
    payload: Result<Json<CreateCommentRequest>, JsonRejection>,
) -> CatalogResult<(StatusCode, Json<CommentResponse>)> {
    let Json(request) = payload?;

    let comment = NewComment {
        song_id: parse_uuid("songId", required("songId", request.song_id)?.as_str())?,
        author_external_id: required("userId", request.user_id)?,
        content: required("content", request.content)?,
    };

    let created = state.store.create_comment(comment).await?;

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: created.id,
            song_id: created.song_id,
            user_id: created.user_id,
            content: created.content,
            created_at: created.created_at,
        }),
    ))
}

#[instrument(skip(state, payload))]
async fn create_reply(
    State(state): State<AppState>,
    payload: Result<Json<CreateReplyRequest>, JsonRejection>,
) -> CatalogResult<(StatusCode, Json<ReplyResponse>)> {
    let Json(request) = payload?;

    let reply = NewReply {
        comment_id: parse_uuid("commentId", required("commentId", request.comment_id)?.as_str())?,
        author_external_id: required("userId", request.user_id)?,
        content: required("content", request.content)?,
    };

    let created = state.store.create_reply(reply).await?;

    Ok((
        StatusCode::CREATED,
        Json(ReplyResponse {
            id: created.id,
            comment_id: created.comment_id,
            user_id: created.user_id,
            content: created.content,
            created_at: created.created_at,
        }),
    ))
}

/// Store the raw request body as a media object
#[instrument(skip(state, headers, body))]
async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> CatalogResult<(StatusCode, Json<UploadResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CatalogError::InvalidArgument("Missing Content-Type header".to_string()))?
        .to_string();

    let body = body.map_err(|e| {
        CatalogError::InvalidArgument(format!(
            "Unreadable upload (limit {} bytes): {}",
            state.max_upload_bytes,
            e.body_text()
        ))
    })?;

    if body.is_empty() {
        return Err(CatalogError::InvalidArgument("Empty upload".to_string()));
    }

    let (content_id, kind) = state.media.upload(body, &content_type).await?;

    Ok((StatusCode::CREATED, Json(UploadResponse { content_id, kind })))
}

#[instrument(skip(state))]
async fn delete_media(
    State(state): State<AppState>,
    content_id: Result<Path<String>, PathRejection>,
) -> CatalogResult<StatusCode> {
    let Path(content_id) = content_id?;
    state.media.delete(&content_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_genres(State(state): State<AppState>) -> CatalogResult<Json<GenresResponse>> {
    let genres = state.store.list_genres().await?;
    Ok(Json(GenresResponse { genres }))
}

#[instrument(skip(state))]
async fn get_user(
    State(state): State<AppState>,
    external_id: Result<Path<String>, PathRejection>,
) -> CatalogResult<Json<UserResponse>> {
    let Path(external_id) = external_id?;
    let user = state
        .store
        .find_user(&external_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("User {external_id}")))?;

    Ok(Json(UserResponse {
        id: user.id,
        external_id: user.external_id,
        name: user.name,
        email: user.email,
        image_url: user.image_url,
        role: user.role,
        created_at: user.created_at,
    }))
}

/// Report a user's role, and optionally whether it meets a required role
#[instrument(skip(state))]
async fn check_role(
    State(state): State<AppState>,
    external_id: Result<Path<String>, PathRejection>,
    params: Result<Query<RoleQuery>, QueryRejection>,
) -> CatalogResult<Json<RoleResponse>> {
    let Path(external_id) = external_id?;
    let Query(params) = params?;
    let required: Option<UserRole> = params.role.as_deref().map(|r| r.parse()).transpose()?;

    let user = state
        .store
        .find_user(&external_id)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("User {external_id}")))?;

    Ok(Json(RoleResponse {
        role: user.role,
        has_role: required.map(|r| user.role.satisfies(r)),
    }))
}

/// A present, non-blank field, returned as written
fn required(field: &str, value: Option<String>) -> CatalogResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CatalogError::InvalidArgument(format!("Missing required field: {field}")))
}

fn parse_int(field: &str, value: Option<&str>) -> CatalogResult<i64> {
    let raw = value
        .ok_or_else(|| CatalogError::InvalidArgument(format!("Missing query parameter: {field}")))?;

    raw.trim()
        .parse()
        .map_err(|_| {
            CatalogError::InvalidArgument(format!("{field} must be an integer, got {raw:?}"))
        })
}

fn parse_uuid(field: &str, value: &str) -> CatalogResult<Uuid> {
    Uuid::parse_str(value.trim())
        .map_err(|_| CatalogError::InvalidArgument(format!("{field} is not a valid id")))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting catalog API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
