use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::ids::SessionKey;

/// Playback state as reported by the vendor.
///
/// `Stopped` never originates from a vendor; the session lifecycle infers it
/// when a session disappears from enough consecutive polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Playing,
    Paused,
    Buffering,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Buffering => "buffering",
            SessionState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playing" => Ok(SessionState::Playing),
            "paused" => Ok(SessionState::Paused),
            "buffering" => Ok(SessionState::Buffering),
            "stopped" => Ok(SessionState::Stopped),
            other => Err(ModelError::UnknownVariant {
                kind: "session state",
                value: other.to_string(),
            }),
        }
    }
}

/// Transcoding descriptors for one stream.
///
/// `video_decision`/`audio_decision` are the vendor's verdicts
/// (`directplay`, `copy`, `transcode`); source and target descriptors are
/// kept separate. Missing vendor data stays at the zero value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeInfo {
    pub video_decision: String,
    pub audio_decision: String,
    pub source_video_codec: String,
    pub source_audio_codec: String,
    pub source_container: String,
    pub target_video_codec: String,
    pub target_audio_codec: String,
    pub target_container: String,
    pub hw_decode: bool,
    pub hw_encode: bool,
    pub bitrate_kbps: Option<i64>,
}

impl TranscodeInfo {
    pub fn is_transcoding(&self) -> bool {
        self.video_decision == "transcode" || self.audio_decision == "transcode"
    }
}

/// In-memory snapshot of a current playback, as normalised by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveStream {
    pub server_id: Uuid,
    pub session_id: String,
    pub user_name: String,
    pub state: SessionState,
    /// Vendor item identifier of the playing media.
    pub item_id: String,
    /// For episodes, the vendor identifier of the owning series.
    pub grandparent_item_id: Option<String>,
    pub title: String,
    /// Series title for episodes, empty otherwise.
    pub grandparent_title: Option<String>,
    pub media_type: String,
    pub duration_ms: Option<i64>,
    pub progress_ms: i64,
    pub transcode: TranscodeInfo,
    pub player: String,
    pub platform: String,
    pub ip_address: String,
    pub thumb_url: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Stamped by the lifecycle on each poll; never persisted.
    #[serde(skip)]
    pub last_poll_seen: Option<DateTime<Utc>>,
}

impl ActiveStream {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.server_id, self.session_id.clone())
    }

    /// Progress as a fraction of duration, when the duration is known.
    pub fn progress_fraction(&self) -> Option<f64> {
        match self.duration_ms {
            Some(duration) if duration > 0 => {
                Some((self.progress_ms as f64 / duration as f64).min(1.0))
            }
            _ => None,
        }
    }
}
