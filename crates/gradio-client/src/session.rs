use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SESSION_HASH_LEN: usize = 11;

/// Correlation key the server uses to route queue events back to one client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHash(String);

impl SessionHash {
    pub fn generate() -> Self {
        let mut raw = Uuid::new_v4().simple().to_string();
        raw.truncate(SESSION_HASH_LEN);
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
