//! Messages the page sends to the worker.

use serde::Deserialize;
use serde_json::Value;

/// A recognised control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Activate the newly installed generation now.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
}

impl ControlMessage {
    /// Interpret a structured message; anything unrecognised yields `None`.
    pub fn parse(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Interpret a raw JSON message.
    pub fn parse_str(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}
