use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// The vendor flavour of a media server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Plex,
    Emby,
    Jellyfin,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerKind::Plex => "plex",
            ServerKind::Emby => "emby",
            ServerKind::Jellyfin => "jellyfin",
        }
    }
}

impl Display for ServerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plex" => Ok(ServerKind::Plex),
            "emby" => Ok(ServerKind::Emby),
            "jellyfin" => Ok(ServerKind::Jellyfin),
            other => Err(ModelError::UnknownVariant {
                kind: "server kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A monitored media server endpoint.
///
/// Owned by the persistence layer; mutated only through admin operations.
/// Deleting a server cascades to its watch history and library cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub kind: ServerKind,
    pub url: String,
    /// Vendor API token. Never serialized into API responses by the server
    /// layer; present here because adapters need it.
    pub api_key: String,
    /// Vendor machine identifier, when the vendor exposes one.
    pub machine_id: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Server {
    /// Base URL with any trailing slash removed, ready for path joins.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [ServerKind::Plex, ServerKind::Emby, ServerKind::Jellyfin] {
            assert_eq!(kind.as_str().parse::<ServerKind>().unwrap(), kind);
        }
        assert!("kodi".parse::<ServerKind>().is_err());
    }
}
