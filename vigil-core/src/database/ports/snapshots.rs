use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use vigil_model::{ActiveStream, SessionKey};

/// A persisted copy of one in-memory session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub stream: ActiveStream,
    pub watched_ms: i64,
    pub last_poll_seen: DateTime<Utc>,
}

/// Durable mirror of the lifecycle's in-memory session map.
///
/// Written on every poll upsert and cleared on stop, it exists solely so
/// startup recovery can flush sessions that were active when the process
/// died, with `stopped_at = last_poll_seen`.
#[async_trait]
pub trait SessionSnapshotRepository: Send + Sync {
    async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<()>;
    async fn remove(&self, key: &SessionKey) -> Result<()>;
    /// Read and delete every snapshot.
    async fn drain(&self) -> Result<Vec<SessionSnapshot>>;
}
