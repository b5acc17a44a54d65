use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{
    check_status, started_at_bucket, ItemBatch, MediaServerAdapter,
    TokenBucket,
};
use crate::error::{MonitorError, Result};
use vigil_model::{
    ActiveStream, ExternalIds, ItemDetails, Library, LibraryItemCache,
    MediaType, Server, SessionState, TranscodeInfo, WatchHistoryEntry,
};

const PAGE_SIZE: i64 = 200;
const ITEM_FIELDS: &str = "ProviderIds,DateCreated,MediaSources,Path,Overview";

/// Adapter for Emby.
///
/// Auth is the `X-Emby-Token` header. Emby reuses its device session id
/// across playbacks, so session identity folds in the playing item and the
/// start bucket.
pub struct EmbyAdapter {
    server_id: uuid::Uuid,
    base_url: String,
    token: String,
    client: Client,
    bucket: TokenBucket,
}

/// Ticks are 100ns units.
fn ticks_to_ms(ticks: i64) -> i64 {
    ticks / 10_000
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbySession {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) user_name: String,
    #[serde(default)]
    pub(crate) client: String,
    #[serde(default)]
    pub(crate) device_name: String,
    #[serde(default)]
    pub(crate) remote_end_point: String,
    pub(crate) play_state: Option<EmbyPlayState>,
    pub(crate) now_playing_item: Option<EmbyNowPlaying>,
    pub(crate) transcoding_info: Option<EmbyTranscodingInfo>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyPlayState {
    pub(crate) position_ticks: Option<i64>,
    #[serde(default)]
    pub(crate) is_paused: bool,
    #[serde(default)]
    pub(crate) play_method: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyNowPlaying {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(rename = "Type", default)]
    pub(crate) item_type: String,
    pub(crate) series_id: Option<String>,
    pub(crate) series_name: Option<String>,
    pub(crate) run_time_ticks: Option<i64>,
    #[serde(default)]
    pub(crate) container: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyTranscodingInfo {
    #[serde(default)]
    pub(crate) video_codec: String,
    #[serde(default)]
    pub(crate) audio_codec: String,
    #[serde(default)]
    pub(crate) container: String,
    pub(crate) bitrate: Option<i64>,
    #[serde(default)]
    pub(crate) is_video_direct: bool,
    #[serde(default)]
    pub(crate) is_audio_direct: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct VirtualFolder {
    #[serde(default)]
    name: String,
    #[serde(default)]
    item_id: String,
    #[serde(default)]
    collection_type: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct ItemsPage {
    #[serde(default)]
    pub(crate) items: Vec<EmbyItem>,
    #[serde(default)]
    pub(crate) total_record_count: i64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyItem {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(rename = "Type", default)]
    pub(crate) item_type: String,
    pub(crate) production_year: Option<i32>,
    pub(crate) date_created: Option<DateTime<Utc>>,
    pub(crate) series_id: Option<String>,
    pub(crate) recursive_item_count: Option<i32>,
    pub(crate) path: Option<String>,
    pub(crate) overview: Option<String>,
    pub(crate) run_time_ticks: Option<i64>,
    #[serde(default)]
    pub(crate) provider_ids: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub(crate) media_sources: Vec<EmbyMediaSource>,
    pub(crate) user_data: Option<EmbyUserData>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyMediaSource {
    pub(crate) size: Option<i64>,
    #[serde(default)]
    pub(crate) media_streams: Vec<EmbyMediaStream>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyMediaStream {
    #[serde(rename = "Type", default)]
    pub(crate) stream_type: String,
    pub(crate) height: Option<i32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EmbyUserData {
    pub(crate) last_played_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) play_count: i64,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct EmbyUser {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

pub(crate) fn emby_media_type(raw: &str) -> MediaType {
    match raw {
        "Movie" => MediaType::Movie,
        "Series" => MediaType::Series,
        "Episode" => MediaType::Episode,
        "Audio" => MediaType::Track,
        _ => MediaType::Other,
    }
}

pub(crate) fn provider_ids(
    map: &std::collections::HashMap<String, String>,
) -> ExternalIds {
    let get = |key: &str| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
    };
    ExternalIds {
        tmdb: get("Tmdb"),
        tvdb: get("Tvdb"),
        imdb: get("Imdb"),
    }
}

pub(crate) fn collection_media_type(raw: &str) -> MediaType {
    match raw {
        "movies" => MediaType::Movie,
        "tvshows" => MediaType::Series,
        "music" => MediaType::Track,
        _ => MediaType::Other,
    }
}

pub(crate) fn strip_endpoint_port(raw: &str) -> String {
    let trimmed = raw.strip_prefix("::ffff:").unwrap_or(raw);
    // "host:port" for IPv4; bracketed for IPv6 with port.
    if let Some(host) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(host, _)| host)
    {
        return host.to_string();
    }
    match trimmed.split_once(':') {
        Some((host, port))
            if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            host.to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Map an Emby session onto the canonical stream, shared with the Jellyfin
/// adapter which differs in auth and hardware-accel reporting only.
pub(crate) fn stream_from_emby_session(
    server_id: uuid::Uuid,
    session: EmbySession,
    hw_accel: bool,
    now: DateTime<Utc>,
) -> Option<ActiveStream> {
    let item = session.now_playing_item?;
    let play_state = session.play_state.unwrap_or_default();
    let progress_ms = play_state.position_ticks.map(ticks_to_ms).unwrap_or(0);
    let started_at = now - chrono::Duration::milliseconds(progress_ms);
    let session_id = format!(
        "{}:{}:{}",
        session.id,
        item.id,
        started_at_bucket(started_at)
    );

    let state = if play_state.is_paused {
        SessionState::Paused
    } else {
        SessionState::Playing
    };

    let transcode = match &session.transcoding_info {
        Some(info) => TranscodeInfo {
            video_decision: if info.is_video_direct {
                "copy".to_string()
            } else {
                "transcode".to_string()
            },
            audio_decision: if info.is_audio_direct {
                "copy".to_string()
            } else {
                "transcode".to_string()
            },
            source_container: item.container.clone(),
            target_video_codec: info.video_codec.clone(),
            target_audio_codec: info.audio_codec.clone(),
            target_container: info.container.clone(),
            hw_decode: hw_accel,
            hw_encode: hw_accel,
            bitrate_kbps: info.bitrate.map(|b| b / 1000),
            ..Default::default()
        },
        None => {
            // DirectStream remuxes the container; DirectPlay touches nothing.
            let decision = if play_state.play_method == "DirectStream" {
                "copy"
            } else {
                "directplay"
            };
            TranscodeInfo {
                video_decision: decision.to_string(),
                audio_decision: decision.to_string(),
                source_container: item.container.clone(),
                ..Default::default()
            }
        }
    };

    Some(ActiveStream {
        server_id,
        session_id,
        user_name: session.user_name,
        state,
        item_id: item.id.clone(),
        grandparent_item_id: item.series_id,
        title: item.name,
        grandparent_title: item.series_name,
        media_type: item.item_type.to_ascii_lowercase(),
        duration_ms: item.run_time_ticks.map(ticks_to_ms),
        progress_ms,
        transcode,
        player: session.client,
        platform: session.device_name,
        ip_address: strip_endpoint_port(&session.remote_end_point),
        thumb_url: Some(format!("/Items/{}/Images/Primary", item.id)),
        started_at,
        last_poll_seen: None,
    })
}

pub(crate) fn item_to_cache(
    server_id: uuid::Uuid,
    library_id: &str,
    item: &EmbyItem,
    now: DateTime<Utc>,
) -> LibraryItemCache {
    let source = item.media_sources.first();
    let height = source.and_then(|s| {
        s.media_streams
            .iter()
            .find(|stream| stream.stream_type == "Video")
            .and_then(|stream| stream.height)
    });
    LibraryItemCache {
        id: 0,
        server_id,
        library_id: library_id.to_string(),
        item_id: item.id.clone(),
        media_type: emby_media_type(&item.item_type),
        title: item.name.clone(),
        year: item.production_year,
        added_at: item.date_created,
        video_resolution: height.map(|h| h.to_string()),
        file_size: source.and_then(|s| s.size),
        last_watched_at: None,
        play_count: 0,
        episode_count: item.recursive_item_count,
        parent_item_id: item.series_id.clone(),
        external_ids: provider_ids(&item.provider_ids),
        synced_at: now,
    }
}

impl EmbyAdapter {
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
            .header("X-Emby-Token", &self.token)
            .query(query)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl MediaServerAdapter for EmbyAdapter {
    async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>> {
        let sessions: Vec<EmbySession> = self.get_json("/Sessions", &[]).await?;
        let now = Utc::now();
        Ok(sessions
            .into_iter()
            .filter_map(|session| {
                stream_from_emby_session(self.server_id, session, false, now)
            })
            .collect())
    }

    async fn list_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WatchHistoryEntry>> {
        // Emby has no global history endpoint; played items per user with
        // their `UserData` is the closest importable signal.
        let users: Vec<EmbyUser> = self.get_json("/Users", &[]).await?;
        let mut entries = Vec::new();
        for user in users {
            let page: ItemsPage = self
                .get_json(
                    &format!("/Users/{}/Items", user.id),
                    &[
                        ("Recursive", "true".to_string()),
                        ("Filters", "IsPlayed".to_string()),
                        (
                            "IncludeItemTypes",
                            "Movie,Episode".to_string(),
                        ),
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
                let duration = item.run_time_ticks.map(ticks_to_ms);
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
        let folders: Vec<VirtualFolder> =
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
                MonitorError::internal(format!("bad emby cursor {raw:?}"))
            })?,
            None => 0,
        };
        let page: ItemsPage = self
            .get_json(
                "/Items",
                &[
                    ("ParentId", library.id.clone()),
                    ("Recursive", "true".to_string()),
                    (
                        "IncludeItemTypes",
                        "Movie,Series,Episode".to_string(),
                    ),
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
            .header("X-Emby-Token", &self.token)
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
            MonitorError::not_found(format!("emby item {item_id}"))
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
            .header("X-Emby-Token", &self.token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_PAYLOAD: &str = r#"[
        {
            "Id": "device-1",
            "UserName": "bob",
            "Client": "Emby Theater",
            "DeviceName": "HTPC",
            "RemoteEndPoint": "198.51.100.7:49152",
            "PlayState": {
                "PositionTicks": 6000000000,
                "IsPaused": false,
                "PlayMethod": "Transcode"
            },
            "NowPlayingItem": {
                "Id": "901",
                "Name": "Some Movie",
                "Type": "Movie",
                "RunTimeTicks": 72000000000,
                "Container": "mkv"
            },
            "TranscodingInfo": {
                "VideoCodec": "h264",
                "AudioCodec": "aac",
                "Container": "ts",
                "Bitrate": 8000000,
                "IsVideoDirect": false,
                "IsAudioDirect": true
            }
        },
        { "Id": "idle-device", "UserName": "carol" }
    ]"#;

    #[test]
    fn decodes_sessions_and_skips_idle() {
        let sessions: Vec<EmbySession> =
            serde_json::from_str(SESSION_PAYLOAD).unwrap();
        let now = Utc::now();
        let server_id = uuid::Uuid::new_v4();
        let streams: Vec<ActiveStream> = sessions
            .into_iter()
            .filter_map(|s| stream_from_emby_session(server_id, s, false, now))
            .collect();

        assert_eq!(streams.len(), 1);
        let stream = &streams[0];
        assert_eq!(stream.user_name, "bob");
        assert_eq!(stream.ip_address, "198.51.100.7");
        assert_eq!(stream.progress_ms, 600_000);
        assert_eq!(stream.duration_ms, Some(7_200_000));
        assert_eq!(stream.transcode.video_decision, "transcode");
        assert_eq!(stream.transcode.audio_decision, "copy");
        assert!(stream.session_id.starts_with("device-1:901:"));
    }

    #[test]
    fn provider_ids_are_case_insensitive() {
        let mut map = std::collections::HashMap::new();
        map.insert("IMDB".to_string(), "tt42".to_string());
        map.insert("Tvdb".to_string(), "7".to_string());
        let ids = provider_ids(&map);
        assert_eq!(ids.preferred(), Some(("tvdb", "7")));
    }

    #[test]
    fn endpoint_port_stripping() {
        assert_eq!(strip_endpoint_port("198.51.100.7:123"), "198.51.100.7");
        assert_eq!(strip_endpoint_port("198.51.100.7"), "198.51.100.7");
        assert_eq!(strip_endpoint_port("[2001:db8::1]:443"), "2001:db8::1");
        assert_eq!(strip_endpoint_port("2001:db8::1"), "2001:db8::1");
        assert_eq!(strip_endpoint_port("::ffff:10.0.0.1"), "10.0.0.1");
    }
}
