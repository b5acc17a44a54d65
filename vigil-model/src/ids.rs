use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Composite identity of one continuous playback on one server.
///
/// The `session_id` half is whatever the adapter decided is stable for the
/// duration of the playback, which is not necessarily the raw vendor session
/// key (some vendors reuse keys across reconnects).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub server_id: Uuid,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(server_id: Uuid, session_id: impl Into<String>) -> Self {
        Self {
            server_id,
            session_id: session_id.into(),
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_id, self.session_id)
    }
}
