use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{EventId, Pubkey, Sig};
use crate::kind::Kind;

/// One tag: an ordered list of strings whose first element is the tag name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Vec<String>);

impl Tag {
    #[must_use]
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// A signed social event. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub pubkey: Pubkey,
    pub created_at: u64,
    pub kind: Kind,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: Sig,
}

impl Event {
    /// Canonical serialization hashed into `id`: the compact JSON array
    /// `[0, pubkey, created_at, kind, tags, content]`.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&(
            0_u8,
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ))
        .unwrap_or_default()
    }

    #[must_use]
    pub fn compute_id(&self) -> EventId {
        let digest = Sha256::digest(self.canonical_bytes());
        EventId::from_bytes(digest.into())
    }

    /// Whether the declared `id` matches the canonical hash.
    #[must_use]
    pub fn id_matches(&self) -> bool {
        self.compute_id() == self.id
    }

    /// First value of the first tag named `name`.
    #[must_use]
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// The addressable discriminator: value of the first `d` tag, empty
    /// string when absent.
    #[must_use]
    pub fn d_tag(&self) -> &str {
        self.tag_value("d").unwrap_or("")
    }

    /// Replacement ordering: newer `created_at` wins; on equal timestamps
    /// the lexicographically smaller id wins so replays converge.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.created_at > other.created_at
            || (self.created_at == other.created_at && self.id < other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event {
            id: EventId::from_bytes([0; 32]),
            pubkey: "d91191e30e00444b942c0e82cad470b32af171764c2275bee0bd99377efd4075"
                .parse()
                .expect("valid pubkey"),
            created_at: 1_700_000_000,
            kind: Kind(1),
            tags: vec![
                Tag::new(["e", "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36"]),
                Tag::new(["t", "nectar"]),
            ],
            content: "hello \"world\"\n".to_owned(),
            sig: Sig::from_bytes([0; 64]),
        }
    }

    #[test]
    fn canonical_form_is_the_compact_array() {
        let event = sample();
        let canonical = String::from_utf8(event.canonical_bytes()).expect("utf-8");

        assert_eq!(
            canonical,
            concat!(
                "[0,\"d91191e30e00444b942c0e82cad470b32af171764c2275bee0bd99377efd4075\",",
                "1700000000,1,",
                "[[\"e\",\"5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36\"],",
                "[\"t\",\"nectar\"]],",
                "\"hello \\\"world\\\"\\n\"]",
            )
        );
    }

    #[test]
    fn computed_id_matches_reference_vector() {
        let event = sample();

        // SHA-256 of the canonical array above, computed independently.
        assert_eq!(
            event.compute_id().to_hex(),
            "ce773d81a2d99b052901ec05862a9fc954f41e2964db43303695f71ec1aa0a38"
        );
    }

    #[test]
    fn wire_roundtrip_preserves_tag_order() {
        let mut event = sample();
        event.id = event.compute_id();

        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(event, back);
        assert_eq!(back.tags[0].name(), Some("e"));
        assert_eq!(back.tags[1].name(), Some("t"));
    }

    #[test]
    fn supersedes_prefers_newer_then_smaller_id() {
        let mut older = sample();
        older.id = EventId::from_bytes([9; 32]);

        let mut newer = sample();
        newer.created_at += 1;
        newer.id = EventId::from_bytes([7; 32]);

        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));

        let mut tied = sample();
        tied.id = EventId::from_bytes([1; 32]);
        assert!(tied.supersedes(&older));
        assert!(!older.supersedes(&tied));
    }

    #[test]
    fn d_tag_defaults_to_empty() {
        let event = sample();
        assert_eq!(event.d_tag(), "");

        let mut addressed = sample();
        addressed.tags.push(Tag::new(["d", "post-A"]));
        assert_eq!(addressed.d_tag(), "post-A");
    }
}
