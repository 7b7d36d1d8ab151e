use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SESSION_PREFIX: &str = "session::";
pub const EVENT_PREFIX: &str = "event::";
pub const RECORD_PREFIX: &str = "record::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Any entity stored with CouchDB's `_id` and `_rev` bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, body: T) -> Self {
        Self {
            id,
            rev: None,
            body,
        }
    }
}

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn event_prefix(session_id: Uuid) -> String {
    format!("{EVENT_PREFIX}{session_id}::")
}

/// Zero-padded so `_all_docs` key order matches sequence order.
pub fn event_doc_id(session_id: Uuid, server_sequence: u64) -> String {
    format!("{}{server_sequence:020}", event_prefix(session_id))
}

pub fn record_doc_id(session_id: Uuid) -> String {
    format!("{RECORD_PREFIX}{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_share_the_session_prefix() {
        let session = Uuid::new_v4();
        let id = event_doc_id(session, 42);
        assert!(id.starts_with(&event_prefix(session)));
        assert!(event_doc_id(session, 9) < event_doc_id(session, 10));
    }

    #[test]
    fn document_flattens_body_next_to_bookkeeping() {
        #[derive(Serialize, Deserialize)]
        struct Body {
            name: String,
        }
        let doc = CouchDocument::new("x".into(), Body { name: "n".into() });
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["_id"], "x");
        assert_eq!(value["name"], "n");
        assert!(value.get("_rev").is_none());
    }
}
