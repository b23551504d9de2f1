//! Wire events for one streamed reply.
//!
//! Events are JSON objects discriminated by a snake_case `type` field with
//! camelCase payload fields. Decoding is deliberately forgiving: ids may be
//! strings or numbers, most fields may be missing, and an event of a type we
//! do not know decodes to [`ProtocolEvent::Unknown`] so the session can drop
//! it without tearing down the stream.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tessera_content::DataCard;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Reasoning progress shown before the reply body streams.
    Thinking {
        #[serde(default)]
        phase: Option<String>,
        #[serde(default)]
        content: String,
    },
    /// Cards and conversation bookkeeping. May arrive before, between, or
    /// after content deltas; cards only ever accumulate.
    #[serde(rename_all = "camelCase")]
    Metadata {
        #[serde(default)]
        data_cards: Vec<DataCard>,
        #[serde(default)]
        event_data: Option<Value>,
        #[serde(default, deserialize_with = "opt_flexible_id")]
        conversation_id: Option<String>,
        #[serde(default)]
        new_conversation: bool,
        #[serde(default)]
        timestamp: Option<Value>,
        #[serde(default)]
        intelligence: Option<Value>,
    },
    /// A markdown text delta.
    Content { content: String },
    /// Chart pushed as a discrete block, bypassing the text buffer.
    #[serde(rename_all = "camelCase")]
    ChartBlock {
        symbol: String,
        #[serde(default = "default_time_range")]
        time_range: String,
    },
    #[serde(rename_all = "camelCase")]
    ArticleBlock {
        #[serde(deserialize_with = "tessera_content::card::flexible_id")]
        card_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ImageBlock {
        #[serde(deserialize_with = "tessera_content::card::flexible_id")]
        card_id: String,
    },
    #[serde(rename_all = "camelCase")]
    EventBlock {
        #[serde(deserialize_with = "tessera_content::card::flexible_id")]
        card_id: String,
    },
    HorizontalRule,
    /// Terminal success.
    #[serde(rename_all = "camelCase")]
    Done {
        #[serde(default, deserialize_with = "opt_flexible_id")]
        conversation_id: Option<String>,
        #[serde(default, deserialize_with = "opt_flexible_id")]
        message_id: Option<String>,
    },
    /// Terminal failure.
    Error {
        #[serde(default)]
        error: String,
    },
    #[serde(other)]
    Unknown,
}

fn default_time_range() -> String {
    "1D".to_string()
}

fn opt_flexible_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| match value {
        Value::String(id) => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }))
}
