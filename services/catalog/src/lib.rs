//! Encore Catalog Service
//!
//! Backend for the Encore music sharing platform. Serves the song catalog,
//! comments, genres and user roles from PostgreSQL, stores audio and cover
//! images on an S3-compatible pinning gateway, and hands out time-limited
//! access links for that media.
//!
//! ## Features
//!
//! - **Load-more song listing**: offset pages of songs hydrated with signed
//!   audio and image links, with a `hasMore` flag computed by over-fetching
//! - **Listing cache**: pages are cached per window until their earliest link
//!   expires, so repeated scrolling does not re-sign every link
//! - **Graceful degradation**: a link that cannot be resolved marks that one
//!   song's media unavailable instead of failing the page
//! - **Media upload/delete**: raw uploads with multipart transfer for large
//!   audio files
//!
//! ## Architecture
//!
//! ```text
//!   HTTP API (axum)
//!        │
//!        ▼
//! ┌──────────────┐     ┌──────────────┐      ┌──────────────┐
//! │ Song         │────▶│ Record       │─────▶│ PostgreSQL   │
//! │ Listing      │     │ Store        │      └──────────────┘
//! └──────────────┘     └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐     ┌──────────────┐      ┌──────────────┐
//! │ Listing      │     │ Media        │─────▶│ Pinning      │
//! │ Cache        │     │ Gateway      │      │ Gateway (S3) │
//! └──────────────┘     └──────────────┘      └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod listing_cache;
pub mod media_gateway;
pub mod pagination;
pub mod record_store;
pub mod song_listing;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::{CatalogError, CatalogResult, ResolutionError};
pub use listing_cache::{Clock, ExpiringCache, SystemClock};
pub use media_gateway::{MediaGateway, MediaKind, MediaLink, MediaLinkResolver, MediaStore};
pub use pagination::{Page, PageWindow};
pub use record_store::{PgRecordStore, RecordStore, SongRecord};
pub use song_listing::{ListingResult, ListingSettings, SongEntry, SongListing};
