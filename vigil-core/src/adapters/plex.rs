use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{check_status, ItemBatch, MediaServerAdapter, TokenBucket};
use crate::error::{MonitorError, Result};
use vigil_model::{
    ActiveStream, ExternalIds, ItemDetails, Library, LibraryItemCache,
    MediaType, Server, SessionState, TranscodeInfo, WatchHistoryEntry,
};

/// Page size for library enumeration.
const CONTAINER_SIZE: i64 = 200;

/// Adapter for Plex Media Server.
///
/// Auth is the `X-Plex-Token` header; `Accept: application/json` pins the
/// JSON representation of the `MediaContainer` envelope (Plex otherwise
/// answers XML). Library paging uses `X-Plex-Container-Start/Size`.
pub struct PlexAdapter {
    server_id: uuid::Uuid,
    base_url: String,
    token: String,
    client: Client,
    bucket: TokenBucket,
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Deserialize, Default)]
struct SessionContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<SessionMetadata>,
}

#[derive(Deserialize, Default)]
struct SessionMetadata {
    #[serde(rename = "ratingKey", default)]
    rating_key: String,
    #[serde(rename = "grandparentRatingKey")]
    grandparent_rating_key: Option<String>,
    #[serde(rename = "sessionKey", default)]
    session_key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "grandparentTitle")]
    grandparent_title: Option<String>,
    #[serde(rename = "type", default)]
    media_type: String,
    duration: Option<i64>,
    #[serde(rename = "viewOffset")]
    view_offset: Option<i64>,
    thumb: Option<String>,
    #[serde(rename = "User")]
    user: Option<PlexUser>,
    #[serde(rename = "Player")]
    player: Option<PlexPlayer>,
    #[serde(rename = "Session")]
    session: Option<PlexSession>,
    #[serde(rename = "Media", default)]
    media: Vec<PlexMedia>,
    #[serde(rename = "TranscodeSession")]
    transcode_session: Option<PlexTranscodeSession>,
}

#[derive(Deserialize, Default)]
struct PlexUser {
    #[serde(default)]
    title: String,
}

#[derive(Deserialize, Default)]
struct PlexPlayer {
    #[serde(default)]
    address: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    state: String,
}

#[derive(Deserialize, Default)]
struct PlexSession {
    #[serde(default)]
    id: String,
}

#[derive(Deserialize, Default)]
struct PlexMedia {
    #[serde(rename = "videoCodec", default)]
    video_codec: String,
    #[serde(rename = "audioCodec", default)]
    audio_codec: String,
    #[serde(default)]
    container: String,
    bitrate: Option<i64>,
    #[serde(rename = "videoResolution")]
    video_resolution: Option<String>,
    #[serde(rename = "Part", default)]
    parts: Vec<PlexPart>,
}

#[derive(Deserialize, Default)]
struct PlexPart {
    decision: Option<String>,
    size: Option<i64>,
    file: Option<String>,
}

#[derive(Deserialize, Default)]
struct PlexTranscodeSession {
    #[serde(rename = "videoDecision", default)]
    video_decision: String,
    #[serde(rename = "audioDecision", default)]
    audio_decision: String,
    #[serde(rename = "videoCodec", default)]
    video_codec: String,
    #[serde(rename = "audioCodec", default)]
    audio_codec: String,
    #[serde(default)]
    container: String,
    #[serde(rename = "transcodeHwDecoding", default)]
    hw_decoding: bool,
    #[serde(rename = "transcodeHwEncoding", default)]
    hw_encoding: bool,
}

#[derive(Deserialize, Default)]
struct HistoryContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<HistoryMetadata>,
}

#[derive(Deserialize, Default)]
struct HistoryMetadata {
    #[serde(rename = "ratingKey", default)]
    rating_key: String,
    #[serde(rename = "grandparentRatingKey")]
    grandparent_rating_key: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(rename = "grandparentTitle")]
    grandparent_title: Option<String>,
    #[serde(rename = "type", default)]
    media_type: String,
    duration: Option<i64>,
    #[serde(rename = "viewedAt")]
    viewed_at: Option<i64>,
    #[serde(rename = "accountID")]
    account_id: Option<i64>,
    #[serde(rename = "historyKey", default)]
    history_key: String,
}

#[derive(Deserialize, Default)]
struct DirectoryContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<PlexDirectory>,
}

#[derive(Deserialize, Default)]
struct PlexDirectory {
    #[serde(default)]
    key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    library_type: String,
}

#[derive(Deserialize, Default)]
struct ItemContainer {
    #[serde(rename = "totalSize")]
    total_size: Option<i64>,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<ItemMetadata>,
}

#[derive(Deserialize, Default)]
struct ItemMetadata {
    #[serde(rename = "ratingKey", default)]
    rating_key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    media_type: String,
    year: Option<i32>,
    #[serde(rename = "addedAt")]
    added_at: Option<i64>,
    #[serde(rename = "leafCount")]
    leaf_count: Option<i32>,
    #[serde(rename = "parentRatingKey")]
    parent_rating_key: Option<String>,
    summary: Option<String>,
    #[serde(rename = "Media", default)]
    media: Vec<PlexMedia>,
    #[serde(rename = "Guid", default)]
    guids: Vec<PlexGuid>,
}

#[derive(Deserialize, Default)]
struct PlexGuid {
    #[serde(default)]
    id: String,
}

fn plex_media_type(raw: &str) -> MediaType {
    match raw {
        "movie" => MediaType::Movie,
        "show" => MediaType::Series,
        "episode" => MediaType::Episode,
        "track" => MediaType::Track,
        _ => MediaType::Other,
    }
}

fn external_ids(guids: &[PlexGuid]) -> ExternalIds {
    let mut ids = ExternalIds::default();
    for guid in guids {
        if let Some(id) = guid.id.strip_prefix("tmdb://") {
            ids.tmdb = Some(id.to_string());
        } else if let Some(id) = guid.id.strip_prefix("tvdb://") {
            ids.tvdb = Some(id.to_string());
        } else if let Some(id) = guid.id.strip_prefix("imdb://") {
            ids.imdb = Some(id.to_string());
        }
    }
    ids
}

fn normalize_ip(raw: &str) -> String {
    raw.strip_prefix("::ffff:").unwrap_or(raw).to_string()
}

impl PlexAdapter {
    pub fn new(server: &Server, client: Client, bucket: TokenBucket) -> Self {
        Self {
            server_id: server.id,
            base_url: server.base_url().to_string(),
            token: server.api_key.clone(),
            client,
            bucket,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.bucket.acquire().await;
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    fn stream_from_session(
        &self,
        session: SessionMetadata,
        now: DateTime<Utc>,
    ) -> ActiveStream {
        let progress_ms = session.view_offset.unwrap_or(0);
        let started_at = now - chrono::Duration::milliseconds(progress_ms);
        // Plex session keys are unique per playback, so the key plus the
        // playing item is a stable identity without a start bucket.
        let vendor_session = session
            .session
            .as_ref()
            .map(|s| s.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| session.session_key.clone());
        let session_id = format!("{vendor_session}:{}", session.rating_key);

        let player = session.player.unwrap_or_default();
        let state = match player.state.as_str() {
            "paused" => SessionState::Paused,
            "buffering" => SessionState::Buffering,
            _ => SessionState::Playing,
        };

        let media = session.media.first();
        let part_decision = media
            .and_then(|m| m.parts.first())
            .and_then(|p| p.decision.clone())
            .unwrap_or_else(|| "directplay".to_string());
        let transcode = match &session.transcode_session {
            Some(ts) => TranscodeInfo {
                video_decision: ts.video_decision.clone(),
                audio_decision: ts.audio_decision.clone(),
                source_video_codec: media
                    .map(|m| m.video_codec.clone())
                    .unwrap_or_default(),
                source_audio_codec: media
                    .map(|m| m.audio_codec.clone())
                    .unwrap_or_default(),
                source_container: media
                    .map(|m| m.container.clone())
                    .unwrap_or_default(),
                target_video_codec: ts.video_codec.clone(),
                target_audio_codec: ts.audio_codec.clone(),
                target_container: ts.container.clone(),
                hw_decode: ts.hw_decoding,
                hw_encode: ts.hw_encoding,
                bitrate_kbps: media.and_then(|m| m.bitrate),
            },
            None => TranscodeInfo {
                video_decision: part_decision.clone(),
                audio_decision: part_decision,
                source_video_codec: media
                    .map(|m| m.video_codec.clone())
                    .unwrap_or_default(),
                source_audio_codec: media
                    .map(|m| m.audio_codec.clone())
                    .unwrap_or_default(),
                source_container: media
                    .map(|m| m.container.clone())
                    .unwrap_or_default(),
                bitrate_kbps: media.and_then(|m| m.bitrate),
                ..Default::default()
            },
        };

        ActiveStream {
            server_id: self.server_id,
            session_id,
            user_name: session.user.map(|u| u.title).unwrap_or_default(),
            state,
            item_id: session.rating_key,
            grandparent_item_id: session.grandparent_rating_key,
            title: session.title,
            grandparent_title: session.grandparent_title,
            media_type: session.media_type,
            duration_ms: session.duration,
            progress_ms,
            transcode,
            player: player.product,
            platform: player.platform,
            ip_address: normalize_ip(&player.address),
            // Plex thumb paths are server-relative; the persistence layer
            // rewrites them to a proxy path.
            thumb_url: session.thumb,
            started_at,
            last_poll_seen: None,
        }
    }
}

#[async_trait]
impl MediaServerAdapter for PlexAdapter {
    async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>> {
        let envelope: Envelope<SessionContainer> =
            self.get_json("/status/sessions", &[]).await?;
        let now = Utc::now();
        Ok(envelope
            .container
            .metadata
            .into_iter()
            .map(|session| self.stream_from_session(session, now))
            .collect())
    }

    async fn list_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WatchHistoryEntry>> {
        let mut query = vec![("sort", "viewedAt:desc".to_string())];
        if let Some(since) = since {
            query.push(("viewedAt>", since.timestamp().to_string()));
        }
        let envelope: Envelope<HistoryContainer> = self
            .get_json("/status/sessions/history/all", &query)
            .await?;

        let mut entries = Vec::new();
        for record in envelope.container.metadata {
            let stopped_at = record
                .viewed_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
                .unwrap_or_else(Utc::now);
            let duration = record.duration;
            let started_at = stopped_at
                - chrono::Duration::milliseconds(duration.unwrap_or(0));
            entries.push(WatchHistoryEntry {
                id: 0,
                server_id: self.server_id,
                session_id: format!("history:{}", record.history_key),
                // Plex history carries the account id, not a display name.
                user_name: record
                    .account_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                item_id: record.rating_key,
                grandparent_item_id: record.grandparent_rating_key,
                title: record.title,
                grandparent_title: record.grandparent_title,
                media_type: record.media_type,
                duration_ms: duration,
                watched_ms: duration.unwrap_or(0),
                transcode: TranscodeInfo::default(),
                player: String::new(),
                platform: String::new(),
                ip_address: String::new(),
                started_at,
                stopped_at,
                city: None,
                country: None,
                isp: None,
            });
        }
        Ok(entries)
    }

    async fn list_libraries(&self) -> Result<Vec<Library>> {
        let envelope: Envelope<DirectoryContainer> =
            self.get_json("/library/sections", &[]).await?;
        Ok(envelope
            .container
            .directories
            .into_iter()
            .map(|dir| Library {
                id: dir.key,
                name: dir.title,
                media_type: plex_media_type(&dir.library_type),
                item_count: None,
            })
            .collect())
    }

    async fn list_library_items(
        &self,
        library: &Library,
        cursor: Option<String>,
    ) -> Result<ItemBatch> {
        let start: i64 = match cursor {
            Some(raw) => raw.parse().map_err(|_| {
                MonitorError::internal(format!("bad plex cursor {raw:?}"))
            })?,
            None => 0,
        };
        let envelope: Envelope<ItemContainer> = self
            .get_json(
                &format!("/library/sections/{}/all", library.id),
                &[
                    ("X-Plex-Container-Start", start.to_string()),
                    ("X-Plex-Container-Size", CONTAINER_SIZE.to_string()),
                    ("includeGuids", "1".to_string()),
                ],
            )
            .await?;

        let container = envelope.container;
        let now = Utc::now();
        let items: Vec<LibraryItemCache> = container
            .metadata
            .into_iter()
            .map(|item| {
                let media = item.media.first();
                LibraryItemCache {
                    id: 0,
                    server_id: self.server_id,
                    library_id: library.id.clone(),
                    item_id: item.rating_key.clone(),
                    media_type: plex_media_type(&item.media_type),
                    title: item.title,
                    year: item.year,
                    added_at: item
                        .added_at
                        .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                    video_resolution: media
                        .and_then(|m| m.video_resolution.clone()),
                    file_size: media
                        .and_then(|m| m.parts.first())
                        .and_then(|p| p.size),
                    last_watched_at: None,
                    play_count: 0,
                    episode_count: item.leaf_count,
                    parent_item_id: item.parent_rating_key,
                    external_ids: external_ids(&item.guids),
                    synced_at: now,
                }
            })
            .collect();

        let consumed = start + items.len() as i64;
        let next = match container.total_size {
            Some(total) if consumed < total && !items.is_empty() => {
                Some(consumed.to_string())
            }
            _ => None,
        };
        Ok(ItemBatch {
            items,
            next,
            total: container.total_size,
        })
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.bucket.acquire().await;
        let response = self
            .client
            .delete(format!("{}/library/metadata/{item_id}", self.base_url))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_item_details(&self, item_id: &str) -> Result<ItemDetails> {
        let envelope: Envelope<ItemContainer> = self
            .get_json(
                &format!("/library/metadata/{item_id}"),
                &[("includeGuids", "1".to_string())],
            )
            .await?;
        let item = envelope
            .container
            .metadata
            .into_iter()
            .next()
            .ok_or_else(|| {
                MonitorError::not_found(format!("plex item {item_id}"))
            })?;
        let media = item.media.first();
        Ok(ItemDetails {
            item_id: item.rating_key.clone(),
            title: item.title,
            media_type: Some(plex_media_type(&item.media_type)),
            year: item.year,
            overview: item.summary,
            file_path: media
                .and_then(|m| m.parts.first())
                .and_then(|p| p.file.clone()),
            file_size: media
                .and_then(|m| m.parts.first())
                .and_then(|p| p.size),
            video_resolution: media.and_then(|m| m.video_resolution.clone()),
            external_ids: external_ids(&item.guids),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.bucket.acquire().await;
        let response = self
            .client
            .get(format!("{}/identity", self.base_url))
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
