use crate::config::DatabaseConfig;
use crate::error::{CatalogError, CatalogResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Persisted song
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SongRecord {
    pub id: Uuid,
    pub title: String,
    pub artist_id: Uuid,
    /// Display name of the uploading artist
    pub artist_name: String,
    pub genre_id: Option<Uuid>,
    /// Content identifier of the audio object on the media gateway
    pub audio_cid: String,
    /// Content identifier of the cover image
    pub image_cid: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
}

/// Privilege level of a user, ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Listener,
    Artist,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Listener => "listener",
            UserRole::Artist => "artist",
            UserRole::Admin => "admin",
        }
    }

    /// Whether this role grants at least the privileges of `required`
    pub fn satisfies(&self, required: UserRole) -> bool {
        *self >= required
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "listener" => Ok(UserRole::Listener),
            "artist" => Ok(UserRole::Artist),
            "admin" => Ok(UserRole::Admin),
            other => Err(CatalogError::InvalidArgument(format!("Unknown role: {other}"))),
        }
    }
}

/// Platform user, keyed externally by the identity provider's subject
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub name: String,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    external_id: String,
    name: String,
    email: Option<String>,
    image_url: Option<String>,
    role: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = CatalogError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(|_| {
            CatalogError::Internal(format!("User {} has unknown role {:?}", row.id, row.role))
        })?;

        Ok(User {
            id: row.id,
            external_id: row.external_id,
            name: row.name,
            email: row.email,
            image_url: row.image_url,
            role,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub song_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Reply {
    pub id: Uuid,
    pub comment_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A comment with its replies, oldest first
#[derive(Debug, Clone, PartialEq)]
pub struct CommentThread {
    pub comment: Comment,
    pub replies: Vec<Reply>,
}

/// New comment; the author is identified by the identity provider's subject
#[derive(Debug, Clone)]
pub struct NewComment {
    pub song_id: Uuid,
    pub author_external_id: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct NewReply {
    pub comment_id: Uuid,
    pub author_external_id: String,
    pub content: String,
}

/// Access to the persisted catalog
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Songs ordered newest first (`created_at DESC, id DESC`), starting at
    /// `offset`, at most `limit` rows
    async fn list_songs(&self, offset: i64, limit: i64) -> CatalogResult<Vec<SongRecord>>;

    /// All genres ordered by name
    async fn list_genres(&self) -> CatalogResult<Vec<Genre>>;

    /// Comment threads of a song, oldest first. `NotFound` if the song is absent.
    async fn list_comment_threads(&self, song_id: Uuid) -> CatalogResult<Vec<CommentThread>>;

    async fn create_comment(&self, comment: NewComment) -> CatalogResult<Comment>;

    async fn create_reply(&self, reply: NewReply) -> CatalogResult<Reply>;

    async fn find_user(&self, external_id: &str) -> CatalogResult<Option<User>>;

    /// Cheap connectivity probe for readiness checks
    async fn ping(&self) -> CatalogResult<()>;
}

/// PostgreSQL implementation of [`RecordStore`]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self))]
    async fn list_songs(&self, offset: i64, limit: i64) -> CatalogResult<Vec<SongRecord>> {
        let songs = sqlx::query_as::<_, SongRecord>(
            r#"
            SELECT s.id, s.title, s.artist_id, u.name AS artist_name,
                   s.genre_id, s.audio_cid, s.image_cid, s.created_at
            FROM songs s
            JOIN users u ON u.id = s.artist_id
            ORDER BY s.created_at DESC, s.id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = songs.len(), "Fetched songs");
        Ok(songs)
    }

    async fn list_genres(&self) -> CatalogResult<Vec<Genre>> {
        let genres = sqlx::query_as::<_, Genre>("SELECT id, name FROM genres ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(genres)
    }

    #[instrument(skip(self))]
    async fn list_comment_threads(&self, song_id: Uuid) -> CatalogResult<Vec<CommentThread>> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM songs WHERE id = $1")
            .bind(song_id)
            .fetch_optional(&self.pool)
            .await?;

        if exists.is_none() {
            return Err(CatalogError::NotFound(format!("Song {song_id}")));
        }

        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, song_id, user_id, content, created_at
            FROM comments
            WHERE song_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(song_id)
        .fetch_all(&self.pool)
        .await?;

        let comment_ids: Vec<Uuid> = comments.iter().map(|c| c.id).collect();

        let replies = sqlx::query_as::<_, Reply>(
            r#"
            SELECT id, comment_id, user_id, content, created_at
            FROM replies
            WHERE comment_id = ANY($1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(&comment_ids[..])
        .fetch_all(&self.pool)
        .await?;

        Ok(group_replies(comments, replies))
    }

    #[instrument(skip(self, comment), fields(song_id = %comment.song_id))]
    async fn create_comment(&self, comment: NewComment) -> CatalogResult<Comment> {
        // Resolve the author in the same statement; no row means no such user
        let created = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (id, song_id, user_id, content, created_at)
            SELECT $1, $2, u.id, $3, NOW()
            FROM users u
            WHERE u.external_id = $4
            RETURNING id, song_id, user_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(comment.song_id)
        .bind(&comment.content)
        .bind(&comment.author_external_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            CatalogError::NotFound(format!("User {}", comment.author_external_id))
        })?;

        metrics::counter!("catalog.comments.created").increment(1);
        debug!(comment_id = %created.id, "Comment created");

        Ok(created)
    }

    #[instrument(skip(self, reply), fields(comment_id = %reply.comment_id))]
    async fn create_reply(&self, reply: NewReply) -> CatalogResult<Reply> {
        let created = sqlx::query_as::<_, Reply>(
            r#"
            INSERT INTO replies (id, comment_id, user_id, content, created_at)
            SELECT $1, $2, u.id, $3, NOW()
            FROM users u
            WHERE u.external_id = $4
            RETURNING id, comment_id, user_id, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(reply.comment_id)
        .bind(&reply.content)
        .bind(&reply.author_external_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::NotFound(format!("User {}", reply.author_external_id)))?;

        metrics::counter!("catalog.replies.created").increment(1);
        debug!(reply_id = %created.id, "Reply created");

        Ok(created)
    }

    async fn find_user(&self, external_id: &str) -> CatalogResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, external_id, name, email, image_url, role, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn ping(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Attach replies to their comments, keeping both orders
pub(crate) fn group_replies(comments: Vec<Comment>, replies: Vec<Reply>) -> Vec<CommentThread> {
    let mut by_comment: HashMap<Uuid, Vec<Reply>> = HashMap::new();
    for reply in replies {
        by_comment.entry(reply.comment_id).or_default().push(reply);
    }

    comments
        .into_iter()
        .map(|comment| CommentThread {
            replies: by_comment.remove(&comment.id).unwrap_or_default(),
            comment,
        })
        .collect()
}
