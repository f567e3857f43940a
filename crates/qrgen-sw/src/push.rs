//! Push messages and the notifications they produce.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ServiceWorkerError;

const DEFAULT_TITLE: &str = "QR Code Generator";
const DEFAULT_BODY: &str = "QR Code Generator notification";
const ICON: &str = "/icon-192x192.png";
const BADGE: &str = "/badge-72x72.png";

/// Notification action that opens the app.
pub const EXPLORE_ACTION: &str = "explore";
/// Notification action that only dismisses.
pub const CLOSE_ACTION: &str = "close";

/// JSON payload of a push message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub primary_key: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub date_of_arrival: u64,
    pub primary_key: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// A notification for the host to display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// Build the notification for a push payload received at `now_ms`.
    pub fn from_payload(payload: PushPayload, now_ms: u64) -> Self {
        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: ICON.to_string(),
        };

        // Falsy keys (null, 0, "", false) fall back to 1.
        let primary_key = match payload.primary_key {
            Some(key) if is_truthy(&key) => key,
            _ => Value::from(1),
        };

        Self {
            title: non_empty(payload.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            options: NotificationOptions {
                body: non_empty(payload.body).unwrap_or_else(|| DEFAULT_BODY.to_string()),
                icon: ICON.to_string(),
                badge: BADGE.to_string(),
                vibrate: vec![100, 50, 100],
                data: NotificationData {
                    date_of_arrival: now_ms,
                    primary_key,
                },
                actions: vec![
                    action(EXPLORE_ACTION, "Open App"),
                    action(CLOSE_ACTION, "Close"),
                ],
            },
        }
    }

    /// Parse raw push data.
    pub fn from_push_data(data: &[u8], now_ms: u64) -> Result<Self, ServiceWorkerError> {
        let payload: PushPayload = serde_json::from_slice(data)
            .map_err(|e| ServiceWorkerError::InvalidMessage(format!("push payload: {e}")))?;
        Ok(Self::from_payload(payload, now_ms))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_for_empty_payload() {
        let n = Notification::from_push_data(b"{}", 1_700_000_000_000).unwrap();

        assert_eq!(n.title, "QR Code Generator");
        assert_eq!(n.options.body, "QR Code Generator notification");
        assert_eq!(n.options.icon, "/icon-192x192.png");
        assert_eq!(n.options.badge, "/badge-72x72.png");
        assert_eq!(n.options.vibrate, vec![100, 50, 100]);
        assert_eq!(n.options.data.primary_key, json!(1));
        assert_eq!(n.options.data.date_of_arrival, 1_700_000_000_000);

        let actions: Vec<&str> = n.options.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["explore", "close"]);
    }

    #[test]
    fn test_payload_fields_used() {
        let data = br#"{"title":"Update ready","body":"v2.1 is out","primaryKey":"release-21"}"#;
        let n = Notification::from_push_data(data, 0).unwrap();

        assert_eq!(n.title, "Update ready");
        assert_eq!(n.options.body, "v2.1 is out");
        assert_eq!(n.options.data.primary_key, json!("release-21"));
    }

    #[test]
    fn test_falsy_primary_key_falls_back() {
        let n = Notification::from_push_data(br#"{"primaryKey":0}"#, 0).unwrap();
        assert_eq!(n.options.data.primary_key, json!(1));
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            Notification::from_push_data(b"<html>", 0),
            Err(ServiceWorkerError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_serializes_camel_case() {
        let n = Notification::from_payload(PushPayload::default(), 42);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["options"]["data"]["dateOfArrival"], json!(42));
    }
}
