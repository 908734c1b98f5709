//! Notification payloads and wire headers.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// APNs push type, carried in the `apns-push-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushType {
    /// User-visible alert.
    #[default]
    Alert,
    /// Silent background refresh.
    Background,
    /// Location query.
    Location,
    /// VoIP invitation.
    Voip,
    /// Watch complication update.
    Complication,
    /// File provider update.
    FileProvider,
    /// Device management.
    Mdm,
    /// Live Activity update.
    LiveActivity,
    /// Push-to-talk.
    PushToTalk,
}

impl PushType {
    /// The header/payload value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::Location => "location",
            Self::Voip => "voip",
            Self::Complication => "complication",
            Self::FileProvider => "fileprovider",
            Self::Mdm => "mdm",
            Self::LiveActivity => "liveactivity",
            Self::PushToTalk => "pushtotalk",
        }
    }
}

/// The `alert` dictionary.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Alert {
    /// Alert title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Alert body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Alert subtitle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

/// The `aps` dictionary.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Aps {
    /// Alert content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    /// Badge count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<u32>,
    /// Sound name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Background fetch flag.
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    pub content_available: Option<u8>,
    /// Notification service extension flag.
    #[serde(rename = "mutable-content", skip_serializing_if = "Option::is_none")]
    pub mutable_content: Option<u8>,
    /// Action category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Thread identifier for grouping.
    #[serde(rename = "thread-id", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl Aps {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A built notification, ready for the wire: the request headers and the
/// compiled JSON body. A body of `{}` is never written as a DATA frame.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltNotification {
    /// `apns-*` request headers.
    pub headers: HashMap<String, String>,
    /// Compiled JSON body.
    pub body: String,
}

impl BuiltNotification {
    /// Whether the body carries any payload worth a DATA frame.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty() && self.body != "{}"
    }
}

/// A push notification under construction.
///
/// Builder-style setters mirror the wire: header fields become `apns-*`
/// request headers, payload fields are compiled into the JSON body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    /// `apns-id` header.
    pub id: Option<String>,
    /// `apns-expiration` header (unix seconds; 0 for immediate expiry).
    pub expiration: Option<u64>,
    /// `apns-priority` header (10 immediate, 5 conserving, 1 background).
    pub priority: Option<u8>,
    /// `apns-topic` header.
    pub topic: Option<String>,
    /// `apns-push-type` header.
    pub push_type: Option<PushType>,
    /// `apns-collapse-id` header.
    pub collapse_id: Option<String>,
    /// `apns-request-id` header.
    pub request_id: Option<String>,
    /// `apns-channel-id` header.
    pub channel_id: Option<String>,
    /// The `aps` dictionary.
    pub aps: Aps,
    payload: Map<String, Value>,
}

impl Notification {
    /// Create an empty notification. Compiles to `{}`, which is elided
    /// from the wire; channel reads and deletes rely on this.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alert title and body.
    pub fn alert(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.aps.alert = Some(Alert {
            title: Some(title.into()),
            body: Some(body.into()),
            subtitle: None,
        });
        self
    }

    /// Set the raw alert body only.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        let alert = self.aps.alert.get_or_insert_with(Alert::default);
        alert.body = Some(body.into());
        self
    }

    /// Set the badge count.
    pub fn badge(mut self, badge: u32) -> Self {
        self.aps.badge = Some(badge);
        self
    }

    /// Set the sound.
    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        self.aps.sound = Some(sound.into());
        self
    }

    /// Mark as content-available (background refresh).
    pub fn content_available(mut self) -> Self {
        self.aps.content_available = Some(1);
        self
    }

    /// Mark as mutable-content.
    pub fn mutable_content(mut self) -> Self {
        self.aps.mutable_content = Some(1);
        self
    }

    /// Set the action category.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.aps.category = Some(category.into());
        self
    }

    /// Set the thread identifier.
    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.aps.thread_id = Some(thread_id.into());
        self
    }

    /// Set the `apns-id` header.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the `apns-expiration` header.
    pub fn expiration(mut self, expiration: u64) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set the `apns-priority` header.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the `apns-topic` header.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the `apns-push-type` header.
    pub fn push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    /// Set the `apns-collapse-id` header.
    pub fn collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    /// Set the `apns-request-id` header.
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the `apns-channel-id` header.
    pub fn channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// Set the channel message storage policy (channel creation).
    pub fn message_storage_policy(mut self, policy: u8) -> Self {
        self.payload
            .insert("message-storage-policy".to_string(), policy.into());
        self
    }

    /// Add a custom payload entry at the top level of the body.
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// The `apns-*` request headers for this notification.
    pub fn headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(id) = &self.id {
            headers.insert("apns-id".to_string(), id.clone());
        }
        if let Some(expiration) = self.expiration {
            headers.insert("apns-expiration".to_string(), expiration.to_string());
        }
        if let Some(priority) = self.priority {
            headers.insert("apns-priority".to_string(), priority.to_string());
        }
        if let Some(topic) = &self.topic {
            headers.insert("apns-topic".to_string(), topic.clone());
        }
        if let Some(push_type) = self.push_type {
            headers.insert("apns-push-type".to_string(), push_type.as_str().to_string());
        }
        if let Some(collapse_id) = &self.collapse_id {
            headers.insert("apns-collapse-id".to_string(), collapse_id.clone());
        }
        if let Some(request_id) = &self.request_id {
            headers.insert("apns-request-id".to_string(), request_id.clone());
        }
        if let Some(channel_id) = &self.channel_id {
            headers.insert("apns-channel-id".to_string(), channel_id.clone());
        }
        headers
    }

    /// Compile the JSON body. An empty notification compiles to `{}`.
    pub fn compile(&self) -> String {
        let mut body = Map::new();
        if !self.aps.is_empty() {
            body.insert(
                "aps".to_string(),
                serde_json::to_value(&self.aps).unwrap_or(Value::Null),
            );
        }
        for (key, value) in &self.payload {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body).to_string()
    }

    /// Ensure the compiled body carries a `push-type`, as channel
    /// creation requires. Defaults to `alert` when no push type is set.
    pub fn add_push_type_if_needed(&mut self) {
        if !self.payload.contains_key("push-type") {
            let push_type = self.push_type.unwrap_or_default();
            self.payload
                .insert("push-type".to_string(), push_type.as_str().into());
        }
    }

    /// Drop everything channel management does not understand: the `aps`
    /// dictionary, device-delivery headers, and custom payload except
    /// `message-storage-policy` and `push-type`.
    pub fn strip_channel_unrelated(&mut self) {
        self.aps = Aps::default();
        self.id = None;
        self.expiration = None;
        self.priority = None;
        self.topic = None;
        self.push_type = None;
        self.collapse_id = None;
        self.payload
            .retain(|key, _| key == "message-storage-policy" || key == "push-type");
    }

    /// Build the wire form: headers plus compiled body.
    pub fn built(&self) -> BuiltNotification {
        BuiltNotification {
            headers: self.headers(),
            body: self.compile(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_notification_compiles_to_empty_object() {
        let built = Notification::new().built();
        assert_eq!(built.body, "{}");
        assert!(!built.has_body());
        assert!(built.headers.is_empty());
    }

    #[test]
    fn alert_payload() {
        let body = Notification::new()
            .alert("Hello", "World")
            .badge(1)
            .sound("default")
            .compile();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["aps"]["alert"]["title"], "Hello");
        assert_eq!(value["aps"]["alert"]["body"], "World");
        assert_eq!(value["aps"]["badge"], 1);
        assert_eq!(value["aps"]["sound"], "default");
    }

    #[test]
    fn headers_cover_every_set_field() {
        let headers = Notification::new()
            .id("0309c49e")
            .expiration(0)
            .priority(10)
            .topic("com.example.app")
            .push_type(PushType::LiveActivity)
            .collapse_id("group-1")
            .request_id("req-1")
            .channel_id("chan-1")
            .headers();
        assert_eq!(headers["apns-id"], "0309c49e");
        assert_eq!(headers["apns-expiration"], "0");
        assert_eq!(headers["apns-priority"], "10");
        assert_eq!(headers["apns-topic"], "com.example.app");
        assert_eq!(headers["apns-push-type"], "liveactivity");
        assert_eq!(headers["apns-collapse-id"], "group-1");
        assert_eq!(headers["apns-request-id"], "req-1");
        assert_eq!(headers["apns-channel-id"], "chan-1");
    }

    #[test]
    fn unset_headers_are_omitted() {
        let headers = Notification::new().topic("com.example.app").headers();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn custom_payload_sits_at_top_level() {
        let body = Notification::new()
            .alert("T", "B")
            .custom("session", json!("sess_1"))
            .compile();
        let value: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["session"], "sess_1");
    }

    #[test]
    fn push_type_added_when_missing() {
        let mut notification = Notification::new();
        notification.add_push_type_if_needed();
        let value: Value = serde_json::from_str(&notification.compile()).unwrap();
        assert_eq!(value["push-type"], "alert");

        let mut notification = Notification::new().push_type(PushType::LiveActivity);
        notification.add_push_type_if_needed();
        let value: Value = serde_json::from_str(&notification.compile()).unwrap();
        assert_eq!(value["push-type"], "liveactivity");
    }

    #[test]
    fn push_type_not_overwritten() {
        let mut notification = Notification::new().custom("push-type", json!("voip"));
        notification.add_push_type_if_needed();
        let value: Value = serde_json::from_str(&notification.compile()).unwrap();
        assert_eq!(value["push-type"], "voip");
    }

    #[test]
    fn strip_keeps_only_channel_properties() {
        let mut notification = Notification::new()
            .alert("T", "B")
            .topic("com.example.app")
            .priority(10)
            .request_id("req-1")
            .channel_id("chan-1")
            .message_storage_policy(1)
            .custom("extra", json!(true));
        notification.add_push_type_if_needed();
        notification.strip_channel_unrelated();

        let headers = notification.headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["apns-request-id"], "req-1");
        assert_eq!(headers["apns-channel-id"], "chan-1");

        let value: Value = serde_json::from_str(&notification.compile()).unwrap();
        assert_eq!(value["message-storage-policy"], 1);
        assert_eq!(value["push-type"], "alert");
        assert!(value.get("aps").is_none());
        assert!(value.get("extra").is_none());
    }
}
