//! Session, message and tool types as exchanged with the chatbot backend

pub mod body;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation session bound to one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub tool_id: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Payload for lazily creating a session on first send.
///
/// The backend records `title` as the first user message and derives the
/// display title from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionCreate {
    pub title: String,
    pub tool_id: String,
}

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
    #[serde(default)]
    pub pages: Option<u32>,
}

/// Configured backend pipeline a session talks to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub configuration: Value,
}

// ============================================================================
// Messages
// ============================================================================

/// A message in a session log.
///
/// Error replies pushed by the backend carry no `id` and no `session_id`;
/// such messages are displayable but cannot be rated or regenerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Assistant-originated (`true`) or user-originated (`false`)
    pub is_system: bool,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub sources: Vec<MessageSource>,
    /// Raw rating value; see [`Rating`] for the sentinels
    #[serde(default)]
    pub rating: Option<i32>,
}

impl Message {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    /// Decoded rating, `None` when the message was never rated
    pub fn rating(&self) -> Option<Rating> {
        self.rating.map(Rating::from_value)
    }
}

/// User feedback on an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rating {
    Like,
    Dislike,
}

impl Rating {
    pub const LIKE_VALUE: i32 = 5;
    pub const DISLIKE_VALUE: i32 = 0;

    /// Wire value sent in the rate request body
    pub fn value(self) -> i32 {
        match self {
            Rating::Like => Self::LIKE_VALUE,
            Rating::Dislike => Self::DISLIKE_VALUE,
        }
    }

    /// Any positive stored value reads as liked
    pub fn from_value(value: i32) -> Self {
        if value > Self::DISLIKE_VALUE {
            Rating::Like
        } else {
            Rating::Dislike
        }
    }
}

/// Knowledge chunk cited by an assistant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSource {
    pub id: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_title: Option<String>,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub chunk: Option<u32>,
    #[serde(default)]
    pub total_chunks: Option<u32>,
}

/// Where a citation points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLink<'a> {
    /// Followable web link
    External(&'a str),
    /// Reference into ingested content (file path, document key, or nothing)
    Internal(Option<&'a str>),
}

impl MessageSource {
    pub fn link(&self) -> SourceLink<'_> {
        match self.url.as_deref() {
            Some(url) if url.starts_with("http") => SourceLink::External(url),
            other => SourceLink::Internal(other.filter(|u| !u.is_empty())),
        }
    }

    /// "source title / subtitle" label used for tooltips
    pub fn caption(&self) -> String {
        let base = self.source_title.as_deref().unwrap_or(&self.title);
        match self.subtitle.as_deref() {
            Some(subtitle) if !subtitle.is_empty() => format!("{base} / {subtitle}"),
            _ => base.to_string(),
        }
    }
}

/// Timestamps arrive either as RFC 3339 or as naive ISO-8601 (UTC implied)
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    #[allow(clippy::ref_option)] // signature dictated by serde(with)
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        parse(&raw).map(Some).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }
}
