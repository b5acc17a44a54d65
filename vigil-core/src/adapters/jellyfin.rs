use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::emby::{
    collection_media_type, emby_media_type, item_to_cache, provider_ids,
    stream_from_emby_session, EmbySession, EmbyTranscodingInfo, ItemsPage,
};
use super::{check_status, ItemBatch, MediaServerAdapter, TokenBucket};
use crate::error::{MonitorError, Result};
use vigil_model::{
    ActiveStream, ItemDetails, Library, LibraryItemCache, Server,
    TranscodeInfo, WatchHistoryEntry,
};

const PAGE_SIZE: i64 = 200;
const ITEM_FIELDS: &str = "ProviderIds,DateCreated,MediaSources,Path,Overview";

/// Adapter for Jellyfin.
///
/// The endpoint family is Emby's, but auth uses the `Authorization:
/// MediaBrowser Token="…"` scheme and `TranscodingInfo` reports hardware
/// acceleration, which Emby's does not.
pub struct JellyfinAdapter {
    server_id: uuid::Uuid,
    base_url: String,
    token: String,
    client: Client,
    bucket: TokenBucket,
}

/// Jellyfin session shape: Emby's fields plus the hardware-accel quirk.
///
/// The outer `TranscodingInfo` shadows the flattened one, so the full
/// payload lands here and is reinjected into the base session before the
/// shared mapper runs.
#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct JellyfinSession {
    #[serde(flatten)]
    base: EmbySession,
    transcoding_info: Option<JellyfinTranscodingInfo>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct JellyfinTranscodingInfo {
    #[serde(flatten)]
    base: EmbyTranscodingInfo,
    hardware_acceleration_type: Option<String>,
}

impl JellyfinSession {
    fn into_parts(self) -> (EmbySession, bool) {
        let hw_accel = hw_accel_active(&self.transcoding_info);
        let mut base = self.base;
        base.transcoding_info = self.transcoding_info.map(|info| info.base);
        (base, hw_accel)
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct JellyfinVirtualFolder {
    #[serde(default)]
    name: String,
    #[serde(default)]
    item_id: String,
    #[serde(default)]
    collection_type: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct JellyfinUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

fn hw_accel_active(info: &Option<JellyfinTranscodingInfo>) -> bool {
    info.as_ref()
        .and_then(|i| i.hardware_acceleration_type.as_deref())
        .is_some_and(|accel| !accel.is_empty() && accel != "none")
}

impl JellyfinAdapter {
    pub fn new(server: &Server, client: Client, bucket: TokenBucket) -> Self {
        Self {
            server_id: server.id,
            base_url: server.base_url().to_string(),
            token: server.api_key.clone(),
            client,
            bucket,
        }
    }

    fn auth_header(&self) -> String {
        format!("MediaBrowser Token=\"{}\"", self.token)
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
            .header("Authorization", self.auth_header())
            .query(query)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MediaServerAdapter for JellyfinAdapter {
    async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>> {
        let sessions: Vec<JellyfinSession> =
            self.get_json("/Sessions", &[]).await?;
        let now = Utc::now();
        Ok(sessions
            .into_iter()
            .filter_map(|session| {
                let (base, hw_accel) = session.into_parts();
                stream_from_emby_session(self.server_id, base, hw_accel, now)
            })
            .collect())
    }

    async fn list_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WatchHistoryEntry>> {
        let users: Vec<JellyfinUser> = self.get_json("/Users", &[]).await?;
        let mut entries = Vec::new();
        for user in users {
            let page: ItemsPage = self
                .get_json(
                    &format!("/Users/{}/Items", user.id),
                    &[
                        ("Recursive", "true".to_string()),
                        ("Filters", "IsPlayed".to_string()),
                        ("IncludeItemTypes", "Movie,Episode".to_string()),
                        ("Fields", ITEM_FIELDS.to_string()),
                    ],
                )
                .await?;
            for item in page.items {
                let Some(user_data) = &item.user_data else {
                    continue;
                };
                let Some(played_at) = user_data.last_played_date else {
                    continue;
                };
                if let Some(since) = since
                    && played_at < since
                {
                    continue;
                }
                let duration = item.run_time_ticks.map(|t| t / 10_000);
                entries.push(WatchHistoryEntry {
                    id: 0,
                    server_id: self.server_id,
                    session_id: format!("import:{}:{}", user.id, item.id),
                    user_name: user.name.clone(),
                    item_id: item.id.clone(),
                    grandparent_item_id: item.series_id.clone(),
                    title: item.name.clone(),
                    grandparent_title: None,
                    media_type: item.item_type.to_ascii_lowercase(),
                    duration_ms: duration,
                    watched_ms: duration.unwrap_or(0),
                    transcode: TranscodeInfo::default(),
                    player: String::new(),
                    platform: String::new(),
                    ip_address: String::new(),
                    started_at: played_at
                        - chrono::Duration::milliseconds(
                            duration.unwrap_or(0),
                        ),
                    stopped_at: played_at,
                    city: None,
                    country: None,
                    isp: None,
                });
            }
        }
        Ok(entries)
    }

    async fn list_libraries(&self) -> Result<Vec<Library>> {
        let folders: Vec<JellyfinVirtualFolder> =
            self.get_json("/Library/VirtualFolders", &[]).await?;
        Ok(folders
            .into_iter()
            .map(|folder| Library {
                id: folder.item_id,
                name: folder.name,
                media_type: collection_media_type(&folder.collection_type),
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
                MonitorError::internal(format!("bad jellyfin cursor {raw:?}"))
            })?,
            None => 0,
        };
        let page: ItemsPage = self
            .get_json(
                "/Items",
                &[
                    ("ParentId", library.id.clone()),
                    ("Recursive", "true".to_string()),
                    ("IncludeItemTypes", "Movie,Series,Episode".to_string()),
                    ("Fields", ITEM_FIELDS.to_string()),
                    ("StartIndex", start.to_string()),
                    ("Limit", PAGE_SIZE.to_string()),
                ],
            )
            .await?;

        let now = Utc::now();
        let items: Vec<LibraryItemCache> = page
            .items
            .iter()
            .map(|item| item_to_cache(self.server_id, &library.id, item, now))
            .collect();

        let consumed = start + items.len() as i64;
        let next = if consumed < page.total_record_count && !items.is_empty() {
            Some(consumed.to_string())
        } else {
            None
        };
        Ok(ItemBatch {
            items,
            next,
            total: Some(page.total_record_count),
        })
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.bucket.acquire().await;
        let response = self
            .client
            .delete(format!("{}/Items/{item_id}", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_item_details(&self, item_id: &str) -> Result<ItemDetails> {
        let page: ItemsPage = self
            .get_json(
                "/Items",
                &[
                    ("Ids", item_id.to_string()),
                    ("Fields", ITEM_FIELDS.to_string()),
                ],
            )
            .await?;
        let item = page.items.into_iter().next().ok_or_else(|| {
            MonitorError::not_found(format!("jellyfin item {item_id}"))
        })?;
        let source = item.media_sources.first();
        let height = source.and_then(|s| {
            s.media_streams
                .iter()
                .find(|stream| stream.stream_type == "Video")
                .and_then(|stream| stream.height)
        });
        Ok(ItemDetails {
            item_id: item.id.clone(),
            title: item.name.clone(),
            media_type: Some(emby_media_type(&item.item_type)),
            year: item.production_year,
            overview: item.overview.clone(),
            file_path: item.path.clone(),
            file_size: source.and_then(|s| s.size),
            video_resolution: height.map(|h| h.to_string()),
            external_ids: provider_ids(&item.provider_ids),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.bucket.acquire().await;
        let response = self
            .client
            .get(format!("{}/System/Info", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
