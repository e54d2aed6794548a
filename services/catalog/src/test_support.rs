//! In-memory doubles shared by the unit tests

use crate::error::{CatalogError, CatalogResult, ResolutionError};
use crate::listing_cache::{to_chrono, Clock, ManualClock};
use crate::media_gateway::{
    classify_content_type, MediaKind, MediaLink, MediaLinkResolver, MediaStore,
    MockMediaLinkResolver,
};
use crate::record_store::{
    group_replies, Comment, CommentThread, Genre, NewComment, NewReply, RecordStore, Reply,
    SongRecord, User, UserRole,
};
use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct State {
    songs: Vec<SongRecord>,
    genres: Vec<Genre>,
    users: Vec<User>,
    comments: Vec<Comment>,
    replies: Vec<Reply>,
}

/// [`RecordStore`] over plain vectors, counting song queries
#[derive(Default)]
pub struct MemoryRecordStore {
    state: Mutex<State>,
    song_queries: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryRecordStore {
    pub fn with_songs(songs: Vec<SongRecord>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().songs = songs;
        store
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_song(&self, song: SongRecord) {
        self.state.lock().unwrap().songs.push(song);
    }

    pub fn add_genre(&self, name: &str) -> Genre {
        let genre = Genre {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state.lock().unwrap().genres.push(genre.clone());
        genre
    }

    pub fn add_user(&self, external_id: &str, role: UserRole) -> User {
        let user = User {
            id: Uuid::new_v4(),
            external_id: external_id.to_string(),
            name: format!("User {external_id}"),
            email: None,
            image_url: None,
            role,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().users.push(user.clone());
        user
    }

    pub fn song_queries(&self) -> usize {
        self.song_queries.load(Ordering::SeqCst)
    }

    fn user_id(state: &State, external_id: &str) -> CatalogResult<Uuid> {
        state
            .users
            .iter()
            .find(|u| u.external_id == external_id)
            .map(|u| u.id)
            .ok_or_else(|| CatalogError::NotFound(format!("User {external_id}")))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_songs(&self, offset: i64, limit: i64) -> CatalogResult<Vec<SongRecord>> {
        self.song_queries.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut songs = self.state.lock().unwrap().songs.clone();
        songs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        Ok(songs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn list_genres(&self) -> CatalogResult<Vec<Genre>> {
        let mut genres = self.state.lock().unwrap().genres.clone();
        genres.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(genres)
    }

    async fn list_comment_threads(&self, song_id: Uuid) -> CatalogResult<Vec<CommentThread>> {
        let state = self.state.lock().unwrap();

        if !state.songs.iter().any(|s| s.id == song_id) {
            return Err(CatalogError::NotFound(format!("Song {song_id}")));
        }

        let comments: Vec<Comment> = state
            .comments
            .iter()
            .filter(|c| c.song_id == song_id)
            .cloned()
            .collect();

        Ok(group_replies(comments, state.replies.clone()))
    }

    async fn create_comment(&self, comment: NewComment) -> CatalogResult<Comment> {
        let mut state = self.state.lock().unwrap();
        let user_id = Self::user_id(&state, &comment.author_external_id)?;

        if !state.songs.iter().any(|s| s.id == comment.song_id) {
            return Err(CatalogError::NotFound(format!("Song {}", comment.song_id)));
        }

        let created = Comment {
            id: Uuid::new_v4(),
            song_id: comment.song_id,
            user_id,
            content: comment.content,
            created_at: Utc::now(),
        };
        state.comments.push(created.clone());
        Ok(created)
    }

    async fn create_reply(&self, reply: NewReply) -> CatalogResult<Reply> {
        let mut state = self.state.lock().unwrap();
        let user_id = Self::user_id(&state, &reply.author_external_id)?;

        if !state.comments.iter().any(|c| c.id == reply.comment_id) {
            return Err(CatalogError::NotFound(format!("Comment {}", reply.comment_id)));
        }

        let created = Reply {
            id: Uuid::new_v4(),
            comment_id: reply.comment_id,
            user_id,
            content: reply.content,
            created_at: Utc::now(),
        };
        state.replies.push(created.clone());
        Ok(created)
    }

    async fn find_user(&self, external_id: &str) -> CatalogResult<Option<User>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn ping(&self) -> CatalogResult<()> {
        Ok(())
    }
}

/// `n` songs, one minute apart, with distinct media identifiers
pub fn sample_songs(n: usize) -> Vec<SongRecord> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let artist_id = Uuid::new_v4();

    (0..n)
        .map(|i| {
            let id = Uuid::new_v4();
            SongRecord {
                id,
                title: format!("Track {i}"),
                artist_id,
                artist_name: "The Testers".to_string(),
                genre_id: None,
                audio_cid: format!("{id}.mp3"),
                image_cid: format!("{id}.jpg"),
                created_at: base + chrono::Duration::minutes(i as i64),
            }
        })
        .collect()
}

/// Resolver whose links live `validity` on `clock` and carry a call counter,
/// so a re-resolution is visible in the URL. Identifiers in `failing` are
/// reported unknown.
pub fn counting_resolver(
    clock: Arc<ManualClock>,
    validity: Duration,
    failing: &[String],
) -> (MockMediaLinkResolver, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();
    let failing = failing.to_vec();

    let mut resolver = MockMediaLinkResolver::new();
    resolver.expect_resolve().returning(move |content_id, _kind| {
        let n = calls.fetch_add(1, Ordering::SeqCst);

        if failing.iter().any(|f| f == content_id) {
            return Err(ResolutionError::UnknownContent(content_id.to_string()));
        }

        Ok(MediaLink {
            content_id: content_id.to_string(),
            url: format!("https://gateway.test/media/{content_id}?sig={n}"),
            expires_at: clock.now() + to_chrono(validity),
        })
    });

    (resolver, counter)
}

/// Resolver that never answers in time
pub struct SlowResolver(pub Duration);

#[async_trait]
impl MediaLinkResolver for SlowResolver {
    async fn resolve(&self, content_id: &str, _kind: MediaKind) -> Result<MediaLink, ResolutionError> {
        tokio::time::sleep(self.0).await;
        Err(ResolutionError::Unreachable(content_id.to_string()))
    }
}

/// [`MediaStore`] keeping objects in a map
#[derive(Default)]
pub struct MemoryMediaStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryMediaStore {
    pub fn contains(&self, content_id: &str) -> bool {
        self.objects.lock().unwrap().contains_key(content_id)
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn upload(&self, data: Bytes, content_type: &str) -> CatalogResult<(String, MediaKind)> {
        let (kind, extension) = classify_content_type(content_type).ok_or_else(|| {
            CatalogError::InvalidArgument(format!("Unsupported media type: {content_type}"))
        })?;

        let content_id = format!("{}.{}", Uuid::new_v4(), extension);
        self.objects.lock().unwrap().insert(content_id.clone(), data);
        Ok((content_id, kind))
    }

    async fn delete(&self, content_id: &str) -> CatalogResult<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(content_id)
            .map(|_| ())
            .ok_or_else(|| CatalogError::NotFound(format!("Media {content_id}")))
    }
}
