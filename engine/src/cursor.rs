//! Sync progress marker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token for "last successfully synced point" against the remote.
///
/// The engine never interprets the token; it only stores what the transport
/// returned and hands it back on the next fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(Option<String>);

impl SyncCursor {
    /// The cursor of a device that has never synced.
    pub fn initial() -> Self {
        Self(None)
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn from_token(token: Option<String>) -> Self {
        Self(token)
    }

    pub fn token(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_initial(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(token) => f.write_str(token),
            None => f.write_str("<initial>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_cursor() {
        let cursor = SyncCursor::initial();
        assert!(cursor.is_initial());
        assert_eq!(cursor.token(), None);
        assert_eq!(cursor, SyncCursor::default());
    }

    #[test]
    fn serializes_as_bare_token() {
        assert_eq!(serde_json::to_string(&SyncCursor::new("42")).unwrap(), "\"42\"");
        assert_eq!(serde_json::to_string(&SyncCursor::initial()).unwrap(), "null");

        let parsed: SyncCursor = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(parsed.token(), Some("abc"));
    }
}
