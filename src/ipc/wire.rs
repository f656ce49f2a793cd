//! Wire shapes for the fixed IPC method set a remote runner service
//! answers: matches, actions, and raw raster image data for inline icons.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A match as reported by a remote service's `Match` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMatch {
    pub id: String,
    pub text: String,
    pub icon_name: String,
    pub category_relevance: i32,
    pub relevance: f64,
    pub properties: HashMap<String, RemoteValue>,
}

/// An action as reported by a remote service's `Actions` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAction {
    pub id: String,
    pub text: String,
    pub icon_name: String,
}

/// Raw raster data, as carried by an `icon-data` match property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteImage {
    pub width: u32,
    pub height: u32,
    pub row_stride: u32,
    pub has_alpha: bool,
    pub bits_per_sample: u32,
    pub channels: u32,
    pub data: Vec<u8>,
}

/// A loosely-typed wire value, covering the recognized `RemoteMatch`
/// property keys: `urls`, `category`, `subtext`, `multiline`, `actions`,
/// `icon-data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteValue {
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
    Image(RemoteImage),
}

impl RemoteValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RemoteValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RemoteValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            RemoteValue::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&RemoteImage> {
        match self {
            RemoteValue::Image(img) => Some(img),
            _ => None,
        }
    }
}

/// A recognized `Config()` reply key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub match_regex: Option<String>,
    pub min_letter_count: Option<usize>,
    pub trigger_words: Vec<String>,
    pub actions_requested_once: bool,
}

/// One call in the fixed method set a remote service answers on its object
/// path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcRequest {
    Match { query: String },
    Actions,
    Run { match_id: String, action_id: String },
    Teardown,
    Config,
}

/// The reply counterpart of [`IpcRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcReply {
    Matches(Vec<RemoteMatch>),
    Actions(Vec<RemoteAction>),
    Ack,
    Config(RemoteConfig),
}
