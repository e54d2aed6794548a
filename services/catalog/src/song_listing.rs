//! Paginated song listing hydrated with media access links.
//!
//! A page is computed once per window and cached until the earliest media
//! link it contains expires (or a configured cap, whichever comes first).
//! Link resolution failures degrade the affected entry only.

use crate::config::{ListingConfig, MediaConfig};
use crate::error::{CatalogError, CatalogResult, ResolutionError};
use crate::listing_cache::{to_chrono, Clock, ExpiringCache};
use crate::media_gateway::{MediaKind, MediaLink, MediaLinkResolver};
use crate::pagination::{Page, PageWindow};
use crate::record_store::{RecordStore, SongRecord};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Outcome of resolving one media link
pub type MediaAccess = Result<MediaLink, ResolutionError>;

/// A song with its resolved (or unavailable) media links
#[derive(Debug, Clone, PartialEq)]
pub struct SongEntry {
    pub record: SongRecord,
    pub audio: MediaAccess,
    pub image: MediaAccess,
}

impl SongEntry {
    fn accesses(&self) -> [&MediaAccess; 2] {
        [&self.audio, &self.image]
    }
}

pub type ListingResult = Page<SongEntry>;

pub type ListingCache = ExpiringCache<PageWindow, ListingResult>;

/// Tunables for [`SongListing`]
#[derive(Debug, Clone)]
pub struct ListingSettings {
    pub max_take: i64,
    pub max_cache_ttl: Duration,
    pub failure_cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub store_timeout: Duration,
    pub resolve_timeout: Duration,
    pub resolve_concurrency: usize,
}

impl ListingSettings {
    pub fn from_config(listing: &ListingConfig, media: &MediaConfig) -> Self {
        Self {
            max_take: listing.max_take,
            max_cache_ttl: listing.max_cache_ttl(),
            failure_cache_ttl: listing.failure_cache_ttl(),
            cache_max_entries: listing.cache_max_entries,
            store_timeout: listing.store_timeout(),
            resolve_timeout: media.resolve_timeout(),
            resolve_concurrency: listing.resolve_concurrency.max(1),
        }
    }
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            max_take: 100,
            max_cache_ttl: Duration::from_secs(300),
            failure_cache_ttl: Duration::from_secs(15),
            cache_max_entries: 1024,
            store_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(3),
            resolve_concurrency: 8,
        }
    }
}

/// Assembles pages of songs from the record store and the media resolver
pub struct SongListing {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn MediaLinkResolver>,
    cache: ListingCache,
    clock: Arc<dyn Clock>,
    settings: ListingSettings,
}

impl SongListing {
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn MediaLinkResolver>,
        clock: Arc<dyn Clock>,
        settings: ListingSettings,
    ) -> Self {
        Self {
            cache: ExpiringCache::new(clock.clone(), settings.cache_max_entries),
            store,
            resolver,
            clock,
            settings,
        }
    }

    /// List `take` songs starting at `skip`, newest first
    #[instrument(skip(self))]
    pub async fn list_songs(&self, skip: i64, take: i64) -> CatalogResult<ListingResult> {
        let window = PageWindow::new(skip, take, self.settings.max_take)?;

        if let Some(cached) = self.cache.get(&window) {
            metrics::counter!("catalog.listing.cache_hits").increment(1);
            debug!("Serving cached page");
            return Ok(cached);
        }
        metrics::counter!("catalog.listing.cache_misses").increment(1);

        let records = timeout(
            self.settings.store_timeout,
            self.store.list_songs(window.skip(), window.fetch_limit()),
        )
        .await
        .map_err(|_| {
            CatalogError::Timeout(format!(
                "Song query exceeded {:?}",
                self.settings.store_timeout
            ))
        })??;

        let page = Page::from_overfetch(records, &window);
        let has_more = page.has_more;

        let started = std::time::Instant::now();
        let entries = self.hydrate(page.data).await;
        metrics::histogram!("catalog.listing.hydrate_seconds")
            .record(started.elapsed().as_secs_f64());

        let result = Page {
            data: entries,
            has_more,
        };

        let expires_at = self.cache_expiry(&result);
        debug!(entries = result.len(), has_more, %expires_at, "Caching assembled page");
        self.cache.put_until(window, result.clone(), expires_at);

        Ok(result)
    }

    /// Drop every cached page
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Resolve audio and image links for every record, preserving order
    async fn hydrate(&self, records: Vec<SongRecord>) -> Vec<SongEntry> {
        stream::iter(records)
            .map(|record| async move {
                let (audio, image) = futures::join!(
                    self.resolve(&record.audio_cid, MediaKind::Audio),
                    self.resolve(&record.image_cid, MediaKind::Image),
                );
                SongEntry {
                    record,
                    audio,
                    image,
                }
            })
            .buffered(self.settings.resolve_concurrency)
            .collect()
            .await
    }

    async fn resolve(&self, content_id: &str, kind: MediaKind) -> MediaAccess {
        let result = match timeout(
            self.settings.resolve_timeout,
            self.resolver.resolve(content_id, kind),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ResolutionError::Timeout(content_id.to_string())),
        };

        if let Err(ref e) = result {
            warn!(content_id = %content_id, kind = ?kind, error = %e, "Media link unavailable");
            metrics::counter!("catalog.media.resolution_failures").increment(1);
        }

        result
    }

    /// When a page stops being servable: never past its earliest link
    /// expiry, and sooner when it carries unavailable media so those get
    /// retried
    fn cache_expiry(&self, page: &ListingResult) -> DateTime<Utc> {
        let mut cap = self.settings.max_cache_ttl;
        let mut earliest: Option<DateTime<Utc>> = None;

        for access in page.data.iter().flat_map(SongEntry::accesses) {
            match access {
                Ok(link) => {
                    earliest = Some(earliest.map_or(link.expires_at, |e| e.min(link.expires_at)));
                }
                Err(_) => cap = cap.min(self.settings.failure_cache_ttl),
            }
        }

        let capped = self.clock.now() + to_chrono(cap);
        earliest.map_or(capped, |expiry| expiry.min(capped))
    }
}
