use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Simple enum for library item media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Series,
    Episode,
    Track,
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "series",
            MediaType::Episode => "episode",
            MediaType::Track => "track",
            MediaType::Other => "other",
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaType::Movie),
            "series" | "show" => Ok(MediaType::Series),
            "episode" => Ok(MediaType::Episode),
            "track" | "audio" => Ok(MediaType::Track),
            "other" => Ok(MediaType::Other),
            other => Err(ModelError::UnknownVariant {
                kind: "media type",
                value: other.to_string(),
            }),
        }
    }
}

/// A library (section) on one media server, as reported by its adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub name: String,
    pub media_type: MediaType,
    pub item_count: Option<i64>,
}

/// External metadata identifiers for one item.
///
/// Cross-server matching prefers TMDB, then TVDB, then IMDB.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    pub tmdb: Option<String>,
    pub tvdb: Option<String>,
    pub imdb: Option<String>,
}

impl ExternalIds {
    /// The highest-priority non-empty id, with its provider tag.
    pub fn preferred(&self) -> Option<(&'static str, &str)> {
        if let Some(id) = self.tmdb.as_deref().filter(|s| !s.is_empty()) {
            return Some(("tmdb", id));
        }
        if let Some(id) = self.tvdb.as_deref().filter(|s| !s.is_empty()) {
            return Some(("tvdb", id));
        }
        if let Some(id) = self.imdb.as_deref().filter(|s| !s.is_empty()) {
            return Some(("imdb", id));
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.preferred().is_none()
    }
}

/// Materialised view of one library item.
///
/// Natural key is `(server_id, library_id, item_id)`. Created and refreshed
/// by maintenance sync; removed when absent from the source library after a
/// successful full pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItemCache {
    pub id: i64,
    pub server_id: Uuid,
    pub library_id: String,
    pub item_id: String,
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i32>,
    pub added_at: Option<DateTime<Utc>>,
    pub video_resolution: Option<String>,
    pub file_size: Option<i64>,
    pub last_watched_at: Option<DateTime<Utc>>,
    pub play_count: i64,
    /// Series only.
    pub episode_count: Option<i32>,
    /// Series linkage for episode rows (vendor id of the owning series).
    pub parent_item_id: Option<String>,
    pub external_ids: ExternalIds,
    pub synced_at: DateTime<Utc>,
}

/// Enrichment detail for a single item, fetched on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item_id: String,
    pub title: String,
    pub media_type: Option<MediaType>,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub video_resolution: Option<String>,
    pub external_ids: ExternalIds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_external_id_priority() {
        let ids = ExternalIds {
            tmdb: Some("123".into()),
            tvdb: Some("456".into()),
            imdb: Some("tt789".into()),
        };
        assert_eq!(ids.preferred(), Some(("tmdb", "123")));

        let ids = ExternalIds {
            tmdb: Some(String::new()),
            tvdb: Some("456".into()),
            imdb: None,
        };
        assert_eq!(ids.preferred(), Some(("tvdb", "456")));

        assert_eq!(ExternalIds::default().preferred(), None);
    }
}
