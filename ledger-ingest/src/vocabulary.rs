//! Controlled vocabulary, special-case dictionary and forced overrides
//!
//! All three are loaded once per run from JSON resources and are immutable
//! afterwards. A resource that is missing or malformed degrades matching; it
//! never stops ingestion, so the public loaders log and return an empty
//! structure instead of failing.

use crate::error::{IngestError, IngestResult};
use crate::normalize::{
    canonicalize_comparison_form, canonicalize_key, collapse_whitespace, repair_encoding,
    split_segments, to_pipe_form, IGNORED_MARKER, KEY_DELIMITER,
};
use ledger_common::config::ResourcePaths;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Ordered set of canonical planning keys
///
/// Load order is the tie-break of the direct tier: the first key found in a
/// narrative wins.
#[derive(Debug, Clone, Default)]
pub struct ControlledVocabulary {
    keys: Vec<String>,
    key_set: HashSet<String>,
    /// Pipe form → canonical key
    pipe_index: HashMap<String, String>,
}

impl ControlledVocabulary {
    /// Build from raw key strings; repairs, canonicalizes and drops duplicates
    pub fn from_keys<I, S>(raw_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = Self::default();
        for raw in raw_keys {
            let repaired = repair_encoding(raw.as_ref());
            let spaced = collapse_whitespace(&repaired.replace(KEY_DELIMITER, " * "));
            if split_segments(&spaced).is_empty() {
                continue;
            }
            let key = canonicalize_key(&spaced);
            if vocabulary.key_set.insert(key.clone()) {
                vocabulary
                    .pipe_index
                    .entry(to_pipe_form(&key))
                    .or_insert_with(|| key.clone());
                vocabulary.keys.push(key);
            }
        }
        vocabulary
    }

    /// Load a JSON array of key strings; logs and returns empty on failure
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(vocabulary) => {
                info!(path = %path.display(), keys = vocabulary.len(), "Planning keys loaded");
                vocabulary
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Planning keys unavailable; continuing with empty vocabulary");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> IngestResult<Self> {
        let value = read_json_resource(path)?;
        let entries = value
            .as_array()
            .ok_or_else(|| IngestError::Resource("expected a JSON array of keys".to_string()))?;
        Ok(Self::from_keys(entries.iter().map(value_as_text)))
    }

    /// Canonical keys in load order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_set.contains(key)
    }

    /// Canonical key whose pipe form equals `piped`
    pub fn lookup_pipe(&self, piped: &str) -> Option<&str> {
        self.pipe_index.get(piped).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Narrative fragment (comparison form) → canonical key, in load order
#[derive(Debug, Clone, Default)]
pub struct SpecialCaseDictionary {
    entries: Vec<(String, String)>,
}

impl SpecialCaseDictionary {
    /// Build from `(fragment, key)` pairs, preserving order
    ///
    /// A fragment seen twice keeps its first position and takes the later key.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (fragment, key) in pairs {
            let fragment = canonicalize_comparison_form(fragment.as_ref());
            if fragment.is_empty() {
                continue;
            }
            let key = canonicalize_key(&repair_encoding(key.as_ref()));
            match entries.iter_mut().find(|(existing, _)| *existing == fragment) {
                Some(entry) => entry.1 = key,
                None => entries.push((fragment, key)),
            }
        }
        Self { entries }
    }

    /// Load a JSON object of fragment → key; logs and returns empty on failure
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(dictionary) => {
                info!(path = %path.display(), entries = dictionary.len(), "Special cases loaded");
                dictionary
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Special cases unavailable; continuing without them");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> IngestResult<Self> {
        let value = read_json_resource(path)?;
        let object = value.as_object().ok_or_else(|| {
            IngestError::Resource("expected a JSON object of fragment to key".to_string())
        })?;
        Ok(Self::from_pairs(
            object.iter().map(|(k, v)| (k.as_str(), value_as_text(v))),
        ))
    }

    /// First entry whose fragment occurs in any of `haystacks`
    pub fn find_in(&self, haystacks: &[&str]) -> Option<&str> {
        self.entries
            .iter()
            .find(|(fragment, _)| haystacks.iter().any(|h| h.contains(fragment.as_str())))
            .map(|(_, key)| key.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Record identifier → canonical key, applied after the cascade
#[derive(Debug, Clone, Default)]
pub struct ForcedOverrideMap {
    overrides: HashMap<String, String>,
}

impl ForcedOverrideMap {
    /// Build from `(record id, key)` pairs
    ///
    /// Ids are trimmed. Keys may use `|` as delimiter; they are repaired and
    /// canonicalized, except the bare ignored marker which is kept as is.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let overrides = pairs
            .into_iter()
            .map(|(id, key)| (id.as_ref().trim().to_string(), normalize_override(key.as_ref())))
            .collect();
        Self { overrides }
    }

    /// Load a JSON object of record id → key; logs and returns empty on failure
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(map) => {
                info!(path = %path.display(), overrides = map.len(), "Forced overrides loaded");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Forced overrides unavailable; continuing without them");
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> IngestResult<Self> {
        let value = read_json_resource(path)?;
        let object = value.as_object().ok_or_else(|| {
            IngestError::Resource("expected a JSON object of record id to key".to_string())
        })?;
        Ok(Self::from_pairs(
            object.iter().map(|(k, v)| (k.as_str(), value_as_text(v))),
        ))
    }

    pub fn get(&self, record_id: &str) -> Option<&str> {
        self.overrides.get(record_id.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// The three matching resources of one run
#[derive(Debug, Clone, Default)]
pub struct MatchingResources {
    pub vocabulary: ControlledVocabulary,
    pub special_cases: SpecialCaseDictionary,
    pub overrides: ForcedOverrideMap,
}

impl MatchingResources {
    /// Load every resource; paths should already be resolved against the root folder
    pub fn load(paths: &ResourcePaths) -> Self {
        Self {
            vocabulary: ControlledVocabulary::load(&paths.vocabulary),
            special_cases: SpecialCaseDictionary::load(&paths.special_cases),
            overrides: ForcedOverrideMap::load(&paths.forced_overrides),
        }
    }
}

fn normalize_override(raw: &str) -> String {
    if raw.trim() == IGNORED_MARKER {
        return IGNORED_MARKER.to_string();
    }
    canonicalize_key(&repair_encoding(&raw.replace('|', "*")))
}

/// Read a UTF-8 JSON resource, tolerating a byte-order mark
fn read_json_resource(path: &Path) -> IngestResult<Value> {
    let content = std::fs::read_to_string(path)?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    Ok(serde_json::from_str(content)?)
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
