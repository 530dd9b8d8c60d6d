//! Notification payload and its JSON form.

use serde_json::{Map, Value};

/// Maximum number of alert characters shown before truncation.
pub const MAX_ALERT_CHARS: usize = 150;

/// Appended to alerts cut at [`MAX_ALERT_CHARS`].
pub const TRUNCATION_MARKER: &str = "...";

/// Sound file played for [`Sound::Default`].
pub const DEFAULT_SOUND: &str = "1.aiff";

/// Notification sound.
///
/// Serialized as the file name, or `true` for the default sound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sound {
    /// A named sound file bundled with the app.
    Named(String),
    /// Play [`DEFAULT_SOUND`].
    Default,
}

impl Sound {
    /// Sound file name as sent to the device.
    pub fn file_name(&self) -> &str {
        match self {
            Sound::Named(name) => name,
            Sound::Default => DEFAULT_SOUND,
        }
    }
}

/// User-visible content of a notification.
///
/// Custom properties keep insertion order and are flattened next to the `aps`
/// dictionary with their values stringified.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Payload {
    pub alert: Option<String>,
    pub badge: Option<u32>,
    pub sound: Option<Sound>,
    #[serde(default)]
    pub custom_properties: Map<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the alert, truncating it to [`MAX_ALERT_CHARS`] plus the marker.
    pub fn set_alert(&mut self, alert: impl Into<String>) {
        self.alert = Some(truncate_alert(alert.into()));
    }

    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.set_alert(alert);
        self
    }

    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    pub fn with_sound(mut self, sound: Sound) -> Self {
        self.sound = Some(sound);
        self
    }

    /// Add a custom top-level property. The `aps` key is reserved and ignored.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "aps" {
            self.custom_properties.insert(key, value.into());
        }
        self
    }

    /// Build the JSON object sent to the gateway.
    pub fn to_json(&self) -> Value {
        let mut aps = Map::new();
        if let Some(alert) = &self.alert {
            aps.insert("alert".into(), Value::String(alert.clone()));
        }
        if let Some(badge) = self.badge {
            aps.insert("badge".into(), Value::from(badge));
        }
        if let Some(sound) = &self.sound {
            aps.insert("sound".into(), Value::String(sound.file_name().to_string()));
        }

        let mut root = Map::new();
        root.insert("aps".into(), Value::Object(aps));
        for (key, value) in &self.custom_properties {
            if key == "aps" {
                continue;
            }
            root.insert(key.clone(), Value::String(stringify(value)));
        }
        Value::Object(root)
    }

    /// Serialized JSON bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a `Value` cannot fail.
        serde_json::to_vec(&self.to_json()).unwrap_or_default()
    }
}

fn truncate_alert(alert: String) -> String {
    if alert.chars().count() <= MAX_ALERT_CHARS {
        return alert;
    }
    let mut cut: String = alert.chars().take(MAX_ALERT_CHARS).collect();
    cut.push_str(TRUNCATION_MARKER);
    cut
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl serde::Serialize for Sound {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Sound::Named(name) => serializer.serialize_str(name),
            Sound::Default => serializer.serialize_bool(true),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Sound {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match <Value as serde::Deserialize>::deserialize(deserializer)? {
            Value::String(name) => Ok(Sound::Named(name)),
            Value::Bool(true) => Ok(Sound::Default),
            other => Err(serde::de::Error::custom(format!(
                "expected a sound file name or `true`, got {other}"
            ))),
        }
    }
}
