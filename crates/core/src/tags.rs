//! Ordered tag lists stored as flat key/value tag maps.
//!
//! Object stores only expose flat string key/value tags. An ordered tag list
//! `[t0, t1, ...]` is written as `{"tag-0": t0, "tag-1": t1, ...}`.
//!
//! Decoding ignores key names and returns values in the map's iteration order,
//! so tags written by other tools are read back as well, in whatever order the
//! backend reports them.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Key prefix for encoded tag positions.
pub const TAG_KEY_PREFIX: &str = "tag-";

/// A flat, insertion-ordered string map as exchanged with object stores.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagMap(Vec<(String, String)>);

impl TagMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a map from pairs in iteration order; a repeated key keeps its first
    /// position and takes the last value.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::new();
        for (key, value) in pairs {
            map.insert(key, value);
        }
        map
    }

    /// Insert or replace a value. Replacing keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for TagMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Serialize for TagMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TagMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TagMapVisitor;

        impl<'de> Visitor<'de> for TagMapVisitor {
            type Value = TagMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of string keys to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TagMap, A::Error> {
                let mut map = TagMap::new();
                while let Some((key, value)) = access.next_entry::<String, String>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(TagMapVisitor)
    }
}

/// Encode an ordered tag list as `tag-<index>` entries.
pub fn encode<S: AsRef<str>>(tags: &[S]) -> TagMap {
    TagMap(
        tags.iter()
            .enumerate()
            .map(|(i, tag)| (format!("{TAG_KEY_PREFIX}{i}"), tag.as_ref().to_string()))
            .collect(),
    )
}

/// Decode a backend tag map into an ordered tag list.
///
/// Keys are discarded. Empty values are dropped unless they sit under a
/// `tag-<index>` key, which is how [`encode`] writes an empty tag.
pub fn decode(map: &TagMap) -> Vec<String> {
    map.iter()
        .filter(|(key, value)| !value.is_empty() || is_position_key(key))
        .map(|(_, value)| value.to_string())
        .collect()
}

fn is_position_key(key: &str) -> bool {
    key.strip_prefix(TAG_KEY_PREFIX)
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()))
}
