use std::collections::BTreeMap;

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::event::Event;
use crate::ids::{EventId, Pubkey};
use crate::kind::Kind;

/// Hard cap on results returned for a single filter.
pub const DEFAULT_QUERY_CAP: usize = 500;

/// Structural intersection of match criteria; every present field must
/// match. Tag criteria are keyed by tag name without the wire `#` prefix:
/// values within one name are unioned, names are intersected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<EventId>>,
    pub authors: Option<Vec<Pubkey>>,
    pub kinds: Option<Vec<Kind>>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<usize>,
}

impl Filter {
    /// Effective result cap: `min(limit, 500)`, with absent or zero limits
    /// falling back to the default cap.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None | Some(0) => DEFAULT_QUERY_CAP,
            Some(n) => n.min(DEFAULT_QUERY_CAP),
        }
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }

        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }

        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }

        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        for (name, values) in &self.tags {
            let hit = event.tags.iter().any(|tag| {
                tag.name() == Some(name.as_str())
                    && tag.value().is_some_and(|v| values.iter().any(|w| w == v))
            });

            if !hit {
                return false;
            }
        }

        true
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        if let Some(ids) = &self.ids {
            map.serialize_entry("ids", ids)?;
        }
        if let Some(authors) = &self.authors {
            map.serialize_entry("authors", authors)?;
        }
        if let Some(kinds) = &self.kinds {
            map.serialize_entry("kinds", kinds)?;
        }
        for (name, values) in &self.tags {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        if let Some(since) = self.since {
            map.serialize_entry("since", &since)?;
        }
        if let Some(until) = self.until {
            map.serialize_entry("until", &until)?;
        }
        if let Some(limit) = self.limit {
            map.serialize_entry("limit", &limit)?;
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        let mut filter = Self::default();

        for (key, value) in raw {
            match key.as_str() {
                "ids" => filter.ids = Some(parse_vec(value).map_err(D::Error::custom)?),
                "authors" => filter.authors = Some(parse_vec(value).map_err(D::Error::custom)?),
                "kinds" => {
                    filter.kinds =
                        Some(serde_json::from_value(value).map_err(D::Error::custom)?);
                }
                "since" => filter.since = Some(parse_u64(&value).map_err(D::Error::custom)?),
                "until" => filter.until = Some(parse_u64(&value).map_err(D::Error::custom)?),
                "limit" => {
                    filter.limit =
                        Some(usize::try_from(parse_u64(&value).map_err(D::Error::custom)?)
                            .map_err(D::Error::custom)?);
                }
                _ => {
                    if let Some(name) = key.strip_prefix('#') {
                        if name.is_empty() {
                            return Err(D::Error::custom("empty tag name in filter"));
                        }
                        let values: Vec<String> =
                            serde_json::from_value(value).map_err(D::Error::custom)?;
                        let _prev = filter.tags.insert(name.to_owned(), values);
                    }
                    // Unknown plain keys are ignored for forward compatibility.
                }
            }
        }

        Ok(filter)
    }
}

fn parse_vec<T: std::str::FromStr>(value: Value) -> Result<Vec<T>, String>
where
    T::Err: std::fmt::Display,
{
    let strings: Vec<String> =
        serde_json::from_value(value).map_err(|e| format!("expected string array: {e}"))?;

    strings
        .iter()
        .map(|s| s.parse().map_err(|e| format!("{e}")))
        .collect()
}

fn parse_u64(value: &Value) -> Result<u64, String> {
    value
        .as_u64()
        .ok_or_else(|| format!("expected unsigned integer, got {value}"))
}
