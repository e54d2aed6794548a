use crate::config::MediaConfig;
use crate::error::{CatalogError, CatalogResult, ResolutionError};
use crate::listing_cache::{to_chrono, Clock};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Kind of media object; each kind has its own link validity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
}

/// Time-limited access URL for a content identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaLink {
    pub content_id: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Turns content identifiers into access URLs
///
/// Every call is a round trip to the gateway; callers cache.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaLinkResolver: Send + Sync {
    async fn resolve(&self, content_id: &str, kind: MediaKind)
        -> Result<MediaLink, ResolutionError>;
}

/// Write side of the media gateway used by the upload endpoints
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Store an object, returning its new content identifier and kind
    async fn upload(&self, data: Bytes, content_type: &str) -> CatalogResult<(String, MediaKind)>;

    /// Remove an object; `NotFound` if it does not exist
    async fn delete(&self, content_id: &str) -> CatalogResult<()>;
}

/// Client for the S3-compatible pinning gateway holding audio and images
pub struct MediaGateway {
    client: S3Client,
    bucket: String,
    config: MediaConfig,
    clock: Arc<dyn Clock>,
}

impl MediaGateway {
    pub async fn new(config: &MediaConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint_url,
            "Media gateway initialized"
        );

        Ok(Self::with_client(client, config, clock))
    }

    /// Wrap an already configured S3 client
    pub fn with_client(client: S3Client, config: &MediaConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
            clock,
        }
    }

    /// Object key for a content identifier
    fn object_key(&self, content_id: &str) -> String {
        format!("{}/{}", self.config.key_prefix.trim_end_matches('/'), content_id)
    }

    /// Validity of links handed out for `kind`
    pub fn link_ttl(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Audio => self.config.audio_link_ttl(),
            MediaKind::Image => self.config.image_link_ttl(),
        }
    }

    /// Store a media object, returning its new content identifier
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn upload(
        &self,
        data: Bytes,
        content_type: &str,
    ) -> CatalogResult<(String, MediaKind)> {
        let (kind, extension) = classify_content_type(content_type).ok_or_else(|| {
            CatalogError::InvalidArgument(format!("Unsupported media type: {content_type}"))
        })?;

        if data.is_empty() {
            return Err(CatalogError::InvalidArgument("Empty upload".to_string()));
        }

        let content_id = format!("{}.{}", Uuid::new_v4(), extension);
        let key = self.object_key(&content_id);

        if data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(&data, &key, content_type).await?;
        } else {
            self.simple_upload(data.clone(), &key, content_type).await?;
        }

        metrics::counter!("catalog.media.uploaded").increment(1);
        metrics::counter!("catalog.media.uploaded_bytes").increment(data.len() as u64);

        info!(content_id = %content_id, kind = ?kind, "Media uploaded");

        Ok((content_id, kind))
    }

    async fn simple_upload(&self, data: Bytes, key: &str, content_type: &str) -> CatalogResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| gateway_failure("upload media", e))?;

        Ok(())
    }

    async fn multipart_upload(
        &self,
        data: &Bytes,
        key: &str,
        content_type: &str,
    ) -> CatalogResult<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| gateway_failure("create multipart upload", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| CatalogError::Internal("No upload ID in response".to_string()))?
            .to_string();

        match self.upload_parts(data, key, &upload_id).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| gateway_failure("complete multipart upload", e))?;

                Ok(())
            }
            Err(e) => {
                // Leave no dangling parts behind on the gateway
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(error = %abort_err, key = %key, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        data: &Bytes,
        key: &str,
        upload_id: &str,
    ) -> CatalogResult<Vec<CompletedPart>> {
        let part_size = self.config.part_size_bytes.max(1);
        let mut completed_parts = Vec::new();

        for (index, start) in (0..data.len()).step_by(part_size).enumerate() {
            let end = (start + part_size).min(data.len());
            let part_number = index as i32 + 1;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice(start..end)))
                .send()
                .await
                .map_err(|e| gateway_failure("upload part", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }

    /// Remove a media object. `NotFound` if the gateway does not know it.
    #[instrument(skip(self))]
    pub async fn delete(&self, content_id: &str) -> CatalogResult<()> {
        validate_content_id(content_id)
            .map_err(|e| CatalogError::InvalidArgument(e.to_string()))?;

        if !self.exists(content_id).await? {
            return Err(CatalogError::NotFound(format!("Media {content_id}")));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(content_id))
            .send()
            .await
            .map_err(|e| gateway_failure("delete media", e))?;

        metrics::counter!("catalog.media.deleted").increment(1);
        debug!(content_id = %content_id, "Media deleted");
        Ok(())
    }

    /// Check whether the gateway holds `content_id`
    pub async fn exists(&self, content_id: &str) -> CatalogResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(content_id))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(gateway_failure("check media existence", e))
                }
            }
        }
    }
}

#[async_trait]
impl MediaStore for MediaGateway {
    async fn upload(&self, data: Bytes, content_type: &str) -> CatalogResult<(String, MediaKind)> {
        MediaGateway::upload(self, data, content_type).await
    }

    async fn delete(&self, content_id: &str) -> CatalogResult<()> {
        MediaGateway::delete(self, content_id).await
    }
}

#[async_trait]
impl MediaLinkResolver for MediaGateway {
    #[instrument(skip(self))]
    async fn resolve(
        &self,
        content_id: &str,
        kind: MediaKind,
    ) -> Result<MediaLink, ResolutionError> {
        validate_content_id(content_id)?;

        if self.config.verify_exists {
            match self.exists(content_id).await {
                Ok(true) => {}
                Ok(false) => return Err(ResolutionError::UnknownContent(content_id.to_string())),
                Err(e) => return Err(ResolutionError::Unreachable(e.to_string())),
            }
        }

        let ttl = self.link_ttl(kind);
        let presigning_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| ResolutionError::Unreachable(format!("Invalid presigning config: {e}")))?;

        // Taken before signing so the reported expiry never overshoots the real one
        let issued_at = self.clock.now();

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(content_id))
            .presigned(presigning_config)
            .await
            .map_err(|e| ResolutionError::Unreachable(e.to_string()))?;

        Ok(MediaLink {
            content_id: content_id.to_string(),
            url: presigned.uri().to_string(),
            expires_at: issued_at + to_chrono(ttl),
        })
    }
}

fn gateway_failure(action: &str, e: impl std::fmt::Display) -> CatalogError {
    CatalogError::Internal(format!("Failed to {action}: {e}"))
}

/// Reject identifiers that could escape the media prefix.
/// Accepted shape: `<name>.<ext>` of ASCII alphanumerics, `-` and `_`.
pub fn validate_content_id(content_id: &str) -> Result<(), ResolutionError> {
    let invalid = || ResolutionError::InvalidIdentifier(content_id.to_string());

    if content_id.is_empty() || content_id.len() > 128 {
        return Err(invalid());
    }

    let (stem, extension) = content_id.rsplit_once('.').ok_or_else(invalid)?;

    let component_ok = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };

    if component_ok(stem) && component_ok(extension) {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Map an upload's content type to its media kind and file extension
pub fn classify_content_type(content_type: &str) -> Option<(MediaKind, &'static str)> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.as_str() {
        "audio/mpeg" | "audio/mp3" => Some((MediaKind::Audio, "mp3")),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some((MediaKind::Audio, "wav")),
        "audio/ogg" => Some((MediaKind::Audio, "ogg")),
        "audio/flac" | "audio/x-flac" => Some((MediaKind::Audio, "flac")),
        "audio/aac" => Some((MediaKind::Audio, "aac")),
        "audio/mp4" | "audio/x-m4a" => Some((MediaKind::Audio, "m4a")),
        "image/jpeg" | "image/jpg" => Some((MediaKind::Image, "jpg")),
        "image/png" => Some((MediaKind::Image, "png")),
        "image/webp" => Some((MediaKind::Image, "webp")),
        "image/gif" => Some((MediaKind::Image, "gif")),
        _ => None,
    }
}
