use serde::{Deserialize, Serialize};

/// Sparse auxiliary record kept per event id. Written by external
/// moderation collaborators; the core only reads it. Absence of a marker
/// means the event is neutral.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationMarker {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_since: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_media: Vec<String>,
}

impl ModerationMarker {
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        self.blocked_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_marker_serializes_sparse() {
        let marker = ModerationMarker::default();
        assert_eq!(serde_json::to_string(&marker).expect("serialize"), "{}");
        assert!(!marker.is_blocked());
    }

    #[test]
    fn blocked_roundtrip() {
        let marker = ModerationMarker {
            blocked_at: Some(1_700_000_000),
            pending_since: None,
            referenced_media: vec!["https://cdn.example/a.png".to_owned()],
        };

        let json = serde_json::to_string(&marker).expect("serialize");
        let back: ModerationMarker = serde_json::from_str(&json).expect("deserialize");

        assert!(back.is_blocked());
        assert_eq!(back, marker);
    }
}
