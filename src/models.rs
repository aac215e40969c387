//! Post model
//!
//! A post is kept in two shapes at once: the identity fields the pipeline
//! needs (`id`, `author_id`, `created_at`) and the untouched provider
//! payload, so the stash can persist exactly what the API returned.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MalformedPost {
    #[error("post is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("post field `{field}` is not a valid id: {value}")]
    BadId { field: &'static str, value: String },

    #[error("post field `created_at` is not a valid timestamp: {0}")]
    BadTimestamp(String),
}

/// One item returned by the search or subscription API.
///
/// Identity fields are parsed out once at the wire boundary; everything
/// else rides along verbatim in `raw` and is never mutated.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: u64,
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
    raw: Value,
}

impl Post {
    /// Parse a provider payload into a `Post`, keeping the payload verbatim.
    ///
    /// Ids arrive as JSON numbers or decimal strings depending on the
    /// endpoint; `created_at` is RFC 3339 or integer epoch seconds.
    pub fn from_raw(raw: Value) -> Result<Self, MalformedPost> {
        let id = parse_id(&raw, "id")?;
        let author_id = parse_id(&raw, "author_id")?;
        let created_at = parse_created_at(&raw)?;

        Ok(Self {
            id,
            author_id,
            created_at,
            raw,
        })
    }

    /// The provider payload exactly as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn parse_id(raw: &Value, field: &'static str) -> Result<u64, MalformedPost> {
    let value = raw.get(field).ok_or(MalformedPost::MissingField(field))?;
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(|| MalformedPost::BadId {
            field,
            value: n.to_string(),
        }),
        Value::String(s) => s.parse::<u64>().map_err(|_| MalformedPost::BadId {
            field,
            value: s.clone(),
        }),
        other => Err(MalformedPost::BadId {
            field,
            value: other.to_string(),
        }),
    }
}

fn parse_created_at(raw: &Value) -> Result<DateTime<Utc>, MalformedPost> {
    let value = raw
        .get("created_at")
        .ok_or(MalformedPost::MissingField("created_at"))?;
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| MalformedPost::BadTimestamp(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| MalformedPost::BadTimestamp(n.to_string())),
        other => Err(MalformedPost::BadTimestamp(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_ids_and_rfc3339_timestamp() {
        let raw = json!({
            "id": 1346889436626259968u64,
            "author_id": 2244994945u64,
            "created_at": "2021-01-06T18:40:40Z",
            "text": "learn to build an app"
        });

        let post = Post::from_raw(raw.clone()).unwrap();
        assert_eq!(post.id, 1346889436626259968);
        assert_eq!(post.author_id, 2244994945);
        assert_eq!(post.created_at.to_rfc3339(), "2021-01-06T18:40:40+00:00");
        assert_eq!(post.raw(), &raw);
    }

    #[test]
    fn parses_string_ids_and_epoch_timestamp() {
        let raw = json!({
            "id": "42",
            "author_id": "7",
            "created_at": 1609958440
        });

        let post = Post::from_raw(raw).unwrap();
        assert_eq!(post.id, 42);
        assert_eq!(post.author_id, 7);
        assert_eq!(post.created_at.timestamp(), 1609958440);
    }

    #[test]
    fn missing_field_is_named() {
        let err =
            Post::from_raw(json!({ "id": 1, "created_at": "2021-01-06T18:40:40Z" })).unwrap_err();
        assert!(matches!(err, MalformedPost::MissingField("author_id")));
    }

    #[test]
    fn rejects_non_numeric_string_id() {
        let err = Post::from_raw(json!({
            "id": "not-an-id",
            "author_id": 7,
            "created_at": "2021-01-06T18:40:40Z"
        }))
        .unwrap_err();
        assert!(matches!(err, MalformedPost::BadId { field: "id", .. }));
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let err = Post::from_raw(json!({
            "id": 1,
            "author_id": 7,
            "created_at": "yesterday"
        }))
        .unwrap_err();
        assert!(matches!(err, MalformedPost::BadTimestamp(_)));
    }
}
