//! Subscribe/update wire protocol.
//!
//! One JSON object per frame. Client frames are internally tagged on `type`;
//! server frames carry `{type, data}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::serialize::EditableRow;

/// Frames a client may send on the subscribe channel.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Register a live query for this connection.
    Subscribe { sql: String },
    /// Drop every live query held by this connection.
    Unsubscribe,
    /// Apply a single-cell edit through its handle.
    Edit {
        #[serde(rename = "editHandle")]
        edit_handle: String,
        column: String,
        value: Value,
    },
}

/// Payload of the `subscribed` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribedData {
    pub id: String,
    pub tables: Vec<String>,
    #[serde(rename = "pkCols")]
    pub pk_cols: BTreeMap<String, Vec<String>>,
    pub rewrote: String,
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    pub error: String,
}

/// Frames the server pushes to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    Subscribed(SubscribedData),
    Unsubscribed(String),
    Update(Vec<EditableRow>),
    Edited(String),
    Error(ErrorData),
}

impl ServerFrame {
    /// Shorthand for an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error(ErrorData {
            error: message.into(),
        })
    }
}
