use core::fmt;

use serde::{Deserialize, Serialize};

use crate::event::Tag;

/// Event kind as carried on the wire.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(pub u32);

impl Kind {
    pub const METADATA: Self = Self(0);
    pub const CONTACTS: Self = Self(3);
    pub const DELETION: Self = Self(5);
    pub const HTTP_AUTH: Self = Self(27235);

    /// Storage category derived from the numeric kind range.
    #[must_use]
    pub const fn category(self) -> KindCategory {
        match self.0 {
            0 | 3 => KindCategory::Replaceable,
            10_000..=19_999 => KindCategory::Replaceable,
            20_000..=29_999 => KindCategory::Ephemeral,
            30_000..=39_999 => KindCategory::Addressable,
            _ => KindCategory::Regular,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Kind {
    fn from(kind: u32) -> Self {
        Self(kind)
    }
}

/// How the store treats an event of a given kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KindCategory {
    /// Kept as-is, one row per event.
    Regular,
    /// Only the newest per `(pubkey, kind)` survives.
    Replaceable,
    /// Dispatched to subscriptions, never persisted.
    Ephemeral,
    /// Only the newest per `(pubkey, kind, d)` survives.
    Addressable,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("kind {kind} requires a `{tag}` tag")]
pub struct MissingTag {
    pub kind: Kind,
    pub tag: &'static str,
}

/// Per-kind required-tag table. Kinds not listed accept any tag set.
pub fn check_required_tags(kind: Kind, tags: &[Tag]) -> Result<(), MissingTag> {
    let has = |name: &str| tags.iter().any(|t| t.name() == Some(name));

    match kind {
        Kind::DELETION => {
            if has("e") || has("a") {
                Ok(())
            } else {
                Err(MissingTag { kind, tag: "e" })
            }
        }
        Kind::HTTP_AUTH => {
            for tag in ["u", "method"] {
                if !has(tag) {
                    return Err(MissingTag { kind, tag });
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(parts: &[&str]) -> Tag {
        Tag(parts.iter().map(|p| (*p).to_owned()).collect())
    }

    #[test]
    fn category_boundaries() {
        assert_eq!(Kind(1).category(), KindCategory::Regular);
        assert_eq!(Kind(5).category(), KindCategory::Regular);
        assert_eq!(Kind(9_999).category(), KindCategory::Regular);
        assert_eq!(Kind(0).category(), KindCategory::Replaceable);
        assert_eq!(Kind(3).category(), KindCategory::Replaceable);
        assert_eq!(Kind(10_000).category(), KindCategory::Replaceable);
        assert_eq!(Kind(19_999).category(), KindCategory::Replaceable);
        assert_eq!(Kind(20_000).category(), KindCategory::Ephemeral);
        assert_eq!(Kind(29_999).category(), KindCategory::Ephemeral);
        assert_eq!(Kind(30_000).category(), KindCategory::Addressable);
        assert_eq!(Kind(39_999).category(), KindCategory::Addressable);
        assert_eq!(Kind(40_000).category(), KindCategory::Regular);
    }

    #[test]
    fn deletion_requires_reference() {
        assert!(check_required_tags(Kind::DELETION, &[]).is_err());
        assert!(check_required_tags(Kind::DELETION, &[tag(&["e", "aa"])]).is_ok());
        assert!(check_required_tags(Kind::DELETION, &[tag(&["a", "0:ab:"])]).is_ok());
    }

    #[test]
    fn http_auth_requires_url_and_method() {
        let url = tag(&["u", "https://relay.example/upload"]);
        let method = tag(&["method", "PUT"]);

        assert!(check_required_tags(Kind::HTTP_AUTH, std::slice::from_ref(&url)).is_err());
        assert!(check_required_tags(Kind::HTTP_AUTH, &[url, method]).is_ok());
    }
}
