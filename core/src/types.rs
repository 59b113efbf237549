//! Domain DTOs for the study API.
//!
//! # Design
//! Cards are open JSON objects: the server owns the schema and the client
//! only needs the `id` field, so `Card` wraps a `serde_json::Map` instead of
//! fixing a struct layout. Filters and sort criteria are likewise opaque
//! values owned by the caller. Ids arrive either as JSON numbers or strings
//! and are kept in whichever form the server used.

use std::fmt;

use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Identifier of a card or media record.
///
/// Numeric ids hold any JSON number, so u64 ids above `i64::MAX` and
/// float-encoded ids such as `12.0` survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(Number),
    Text(String),
}

pub type CardId = RecordId;
pub type MediaId = RecordId;

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Number(n) => write!(f, "{n}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Number(n.into())
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Text(s)
    }
}

/// Random 15-digit decimal id for a card the server has not seen yet.
///
/// Kept below 10^15 so it stays exact in an IEEE double on the other end.
pub fn temporary_id() -> String {
    let n: u64 = rand::thread_rng().gen_range(0..1_000_000_000_000_000);
    n.to_string()
}

/// A flashcard as an open set of JSON fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Card(Map<String, Value>);

impl Card {
    /// An empty card carrying a fresh temporary id.
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(temporary_id()));
        Card(fields)
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Card(fields)
    }

    pub fn id(&self) -> Option<CardId> {
        self.0
            .get("id")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    /// Overwrite every field present in `canonical`; fields missing from it
    /// keep their local value.
    pub fn merge_from(&mut self, canonical: Card) {
        for (key, value) in canonical.0 {
            self.0.insert(key, value);
        }
    }
}

/// Days since the Unix epoch in the local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnixDay(pub i64);

impl UnixDay {
    pub fn today() -> Self {
        let now = Local::now();
        let local_secs = now.timestamp() + i64::from(now.offset().local_minus_utc());
        UnixDay(local_secs.div_euclid(86_400))
    }
}

impl fmt::Display for UnixDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing metadata attached to edits and reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub seconds: u32,
    pub date: UnixDay,
}

impl Metadata {
    pub fn today(seconds: u32) -> Self {
        Self {
            seconds,
            date: UnixDay::today(),
        }
    }
}

/// Review grade as understood by the server's scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grade(pub String);

impl From<&str> for Grade {
    fn from(s: &str) -> Self {
        Grade(s.to_string())
    }
}

/// Caller-owned filter set. An empty JSON object means "no filtering".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(pub Value);

impl Default for Filters {
    fn default() -> Self {
        Filters(Value::Object(Map::new()))
    }
}

/// Caller-owned sort criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort(pub Value);

/// Sort and filters read together by the listing endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub sort: Sort,
    pub filters: Filters,
}

/// Username/password pair sent to the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub media_id: MediaId,
}

/// The card to review now and the one after it. Either may be absent when
/// fewer than two cards are due.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Option<Card>>", into = "Vec<Option<Card>>")]
pub struct NextTwoDue {
    pub current: Option<Card>,
    pub next: Option<Card>,
}

impl From<Vec<Option<Card>>> for NextTwoDue {
    fn from(cards: Vec<Option<Card>>) -> Self {
        let mut cards = cards.into_iter();
        Self {
            current: cards.next().flatten(),
            next: cards.next().flatten(),
        }
    }
}

impl From<NextTwoDue> for Vec<Option<Card>> {
    fn from(pair: NextTwoDue) -> Self {
        vec![pair.current, pair.next]
    }
}

/// Binary media fetched from the protected media endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card(value: Value) -> Card {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn merge_replaces_present_fields_and_keeps_absent_ones() {
        let mut local = card(json!({"id": "123456789012345", "front": "Q", "draft": true}));
        local.merge_from(card(json!({"id": "999", "front": "Q", "back": "A"})));
        assert_eq!(
            serde_json::to_value(&local).unwrap(),
            json!({"id": "999", "front": "Q", "back": "A", "draft": true})
        );
    }

    #[test]
    fn merge_matches_server_record_when_keys_cover_local_card() {
        let mut local = card(json!({"id": "123", "front": "Q"}));
        local.merge_from(card(json!({"id": "999", "front": "Q", "back": "A"})));
        assert_eq!(
            serde_json::to_value(&local).unwrap(),
            json!({"id": "999", "front": "Q", "back": "A"})
        );
    }

    #[test]
    fn new_card_has_fifteen_digit_or_shorter_numeric_id() {
        let c = Card::new();
        let Some(RecordId::Text(id)) = c.id() else {
            panic!("expected text id");
        };
        assert!(id.len() <= 15);
        assert!(id.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn record_id_keeps_server_representation() {
        let n: RecordId = serde_json::from_str("42").unwrap();
        let s: RecordId = serde_json::from_str(r#""42""#).unwrap();
        assert_eq!(n, RecordId::from(42));
        assert_eq!(s, RecordId::Text("42".to_string()));
        assert_eq!(serde_json::to_string(&n).unwrap(), "42");
        assert_eq!(n.to_string(), s.to_string());
    }

    #[test]
    fn record_id_accepts_large_and_float_numbers() {
        let big: RecordId = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(big.to_string(), u64::MAX.to_string());
        assert_eq!(serde_json::to_string(&big).unwrap(), "18446744073709551615");

        let float: RecordId = serde_json::from_str("12.0").unwrap();
        assert!(matches!(float, RecordId::Number(ref n) if n.as_f64() == Some(12.0)));
        assert_eq!(serde_json::to_string(&float).unwrap(), "12.0");
        assert_ne!(float, RecordId::from(12));
    }

    #[test]
    fn next_two_due_accepts_nulls_and_short_lists() {
        let pair: NextTwoDue = serde_json::from_str(r#"[{"id": 1}, null]"#).unwrap();
        assert_eq!(pair.current.unwrap().id(), Some(RecordId::from(1)));
        assert!(pair.next.is_none());

        let empty: NextTwoDue = serde_json::from_str("[]").unwrap();
        assert_eq!(empty, NextTwoDue::default());
    }

    #[test]
    fn default_filters_serialize_as_empty_object() {
        assert_eq!(serde_json::to_string(&Filters::default()).unwrap(), "{}");
    }

    #[test]
    fn metadata_serializes_date_as_plain_number() {
        let m = Metadata {
            seconds: 12,
            date: UnixDay(19_000),
        };
        assert_eq!(serde_json::to_value(m).unwrap(), json!({"seconds": 12, "date": 19000}));
    }
}
