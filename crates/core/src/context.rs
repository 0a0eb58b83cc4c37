//! Session Context
//!
//! Optional structured data that the room creator attaches to the room as
//! metadata. It is decoded once, when the session starts, and never changes
//! afterwards. Anything that is not a JSON object degrades to the empty
//! context instead of failing the session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

/// Reasons the room metadata could not be turned into a context.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("room metadata is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("room metadata must be a JSON object, got {0}")]
    NotAMapping(&'static str),
}

/// Key/value data parsed from room metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext(Map<String, Value>);

impl SessionContext {
    /// Strictly decodes room metadata.
    ///
    /// Returns `Ok(None)` when the metadata is absent or blank.
    pub fn from_metadata(metadata: Option<&str>) -> Result<Option<Self>, ContextError> {
        let Some(raw) = metadata.map(str::trim).filter(|m| !m.is_empty()) else {
            return Ok(None);
        };

        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(Some(Self(map))),
            other => Err(ContextError::NotAMapping(json_kind(&other))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for SessionContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Lenient form used by the session entrypoint.
///
/// A decoding failure is logged once at warning level and the empty context
/// is returned.
pub fn parse_room_metadata(metadata: Option<&str>) -> SessionContext {
    match SessionContext::from_metadata(metadata) {
        Ok(Some(context)) => {
            info!(keys = context.len(), "Loaded context from room metadata");
            context
        }
        Ok(None) => SessionContext::default(),
        Err(e) => {
            warn!(error = %e, "Could not parse room metadata, continuing without context");
            SessionContext::default()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
