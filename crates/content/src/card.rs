//! Structured payloads referenced by card markers.
//!
//! Cards arrive on the metadata event before (or while) the text that
//! references them streams in. The wire shape is loose: `type` may be a kind
//! we have never seen, ids may be strings or numbers, and every other field
//! is carried through untouched.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CardKind {
    Quote,
    Article,
    Image,
    Event,
    Unknown,
}

impl CardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Article => "article",
            Self::Image => "image",
            Self::Event => "event",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "quote" => Self::Quote,
            "article" => Self::Article,
            "image" => Self::Image,
            "event" => Self::Event,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CardKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CardKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One card from the metadata event. Fields beyond `type` and `id` are kept
/// as raw JSON for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataCard {
    #[serde(rename = "type")]
    pub kind: CardKind,
    #[serde(deserialize_with = "flexible_id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DataCard {
    pub fn new(kind: CardKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn title(&self) -> Option<&str> {
        self.field_str("title")
    }
}

/// Accepts `"abc"`, `42`, or `4.5` and stores the id as a string.
pub fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string or numeric id")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_string<E: de::Error>(self, value: String) -> Result<String, E> {
            Ok(value)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<String, E> {
            Ok(value.to_string())
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<String, E> {
            Ok(value.to_string())
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// The cards known to a message, deduplicated by `(kind, id)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardSet {
    cards: Vec<DataCard>,
}

impl CardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cards(cards: impl IntoIterator<Item = DataCard>) -> Self {
        let mut set = Self::new();
        set.merge(cards);
        set
    }

    /// Adds cards not already present. Existing cards are never replaced, so
    /// the set only ever grows. Returns how many cards were added.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = DataCard>) -> usize {
        let mut added = 0;
        for card in incoming {
            if self.find(card.kind, &card.id).is_none() {
                self.cards.push(card);
                added += 1;
            }
        }
        added
    }

    pub fn find(&self, kind: CardKind, id: &str) -> Option<&DataCard> {
        self.cards
            .iter()
            .find(|card| card.kind == kind && card.id == id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataCard> {
        self.cards.iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserializes_string_and_numeric_ids() {
        let card: DataCard =
            serde_json::from_str(r#"{"type":"article","id":123,"title":"Q2 recap"}"#)
                .expect("card decodes");
        assert_eq!(card.kind, CardKind::Article);
        assert_eq!(card.id, "123");
        assert_eq!(card.title(), Some("Q2 recap"));

        let card: DataCard =
            serde_json::from_str(r#"{"type":"event","id":"ev-9"}"#).expect("card decodes");
        assert_eq!(card.id, "ev-9");
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let card: DataCard =
            serde_json::from_str(r#"{"type":"sparkline","id":"s1"}"#).expect("card decodes");
        assert_eq!(card.kind, CardKind::Unknown);
    }

    #[test]
    fn extra_fields_round_trip() {
        let raw = r#"{"type":"quote","id":"AAPL","price":189.23,"changePercent":1.2}"#;
        let card: DataCard = serde_json::from_str(raw).expect("card decodes");
        assert_eq!(card.field_f64("price"), Some(189.23));
        let encoded = serde_json::to_value(&card).expect("card encodes");
        assert_eq!(encoded["changePercent"], 1.2);
        assert_eq!(encoded["type"], "quote");
    }

    #[test]
    fn merge_keeps_first_card_for_a_key() {
        let mut set = CardSet::new();
        let added = set.merge([
            DataCard::new(CardKind::Article, "a1").with_field("title", "first"),
            DataCard::new(CardKind::Event, "a1"),
        ]);
        assert_eq!(added, 2);

        let added = set.merge([DataCard::new(CardKind::Article, "a1").with_field("title", "second")]);
        assert_eq!(added, 0);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.find(CardKind::Article, "a1").and_then(DataCard::title),
            Some("first")
        );
    }

    #[test]
    fn find_distinguishes_kind() {
        let set = CardSet::from_cards([DataCard::new(CardKind::Image, "7")]);
        assert!(set.find(CardKind::Image, "7").is_some());
        assert!(set.find(CardKind::Event, "7").is_none());
    }
}
