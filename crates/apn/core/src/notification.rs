//! Notifications, devices and apps.

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::{CodecError, DeviceToken, NotificationFrame, Payload};

/// Expiry applied when a notification does not set one.
pub fn default_expiry() -> TimeDelta {
    TimeDelta::days(30)
}

/// Backlog-assigned notification identifier, echoed back by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationId(pub u32);

/// Group notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupNotificationId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(pub i32);

macro_rules! display_id {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        })*
    };
}

display_id!(NotificationId, GroupNotificationId, DeviceId, AppId);

/// Gateway environment an app certificate is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => f.write_str("production"),
            Environment::Sandbox => f.write_str("sandbox"),
        }
    }
}

/// Seconds-since-epoch expiry for a notification sent at `now`.
pub fn expiry_timestamp(now: DateTime<Utc>, expiry: TimeDelta) -> u32 {
    let at = now
        .checked_add_signed(expiry)
        .map(|t| t.timestamp())
        .unwrap_or(i64::from(u32::MAX));
    at.clamp(0, i64::from(u32::MAX)) as u32
}

/// A notification addressed to a single device.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub device_id: DeviceId,
    pub token: DeviceToken,
    pub payload: Payload,
    pub expiry: TimeDelta,
    /// `None` while the notification is pending.
    pub sent_at: Option<DateTime<Utc>>,
    /// Status the gateway reported for this notification, if any.
    pub error_status: Option<u8>,
}

impl Notification {
    pub fn new(id: NotificationId, device_id: DeviceId, token: DeviceToken, payload: Payload) -> Self {
        Self {
            id,
            device_id,
            token,
            payload,
            expiry: default_expiry(),
            sent_at: None,
            error_status: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sent_at.is_none()
    }

    /// The frame sent to the gateway at `now`.
    pub fn to_frame(&self, now: DateTime<Utc>) -> NotificationFrame {
        NotificationFrame {
            identifier: self.id.0,
            expiry: expiry_timestamp(now, self.expiry),
            token: self.token,
            payload: self.payload.to_bytes(),
        }
    }

    /// Wire bytes for sending at `now`.
    pub fn encode(&self, now: DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
        self.to_frame(now).encode()
    }
}

/// A notification fanned out to a set of devices.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNotification {
    pub id: GroupNotificationId,
    pub app_id: AppId,
    pub tokens: Vec<DeviceToken>,
    pub payload: Payload,
    pub expiry: TimeDelta,
    pub sent_at: Option<DateTime<Utc>>,
}

impl GroupNotification {
    pub fn new(id: GroupNotificationId, app_id: AppId, tokens: Vec<DeviceToken>, payload: Payload) -> Self {
        Self {
            id,
            app_id,
            tokens,
            payload,
            expiry: default_expiry(),
            sent_at: None,
        }
    }

    /// Wire bytes for one member device.
    pub fn encode_for(&self, token: &DeviceToken, now: DateTime<Utc>) -> Result<Vec<u8>, CodecError> {
        NotificationFrame {
            identifier: self.id.0,
            expiry: expiry_timestamp(now, self.expiry),
            token: *token,
            payload: self.payload.to_bytes(),
        }
        .encode()
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub app_id: AppId,
    pub token: DeviceToken,
    pub last_registered_at: DateTime<Utc>,
    /// Last time the feedback service reported this token.
    pub feedback_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Whether feedback reported at `feedback_at` still applies, i.e. the
    /// device has not registered again since.
    pub fn is_stale(&self, feedback_at: DateTime<Utc>) -> bool {
        self.last_registered_at < feedback_at
    }
}

/// An app owning devices and push certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    pub id: AppId,
    pub name: String,
    /// PEM bundle (certificate chain and private key) for production.
    pub production_cert: Option<String>,
    /// PEM bundle for the sandbox gateway.
    pub sandbox_cert: Option<String>,
}

impl App {
    pub fn certificate(&self, environment: Environment) -> Option<&str> {
        match environment {
            Environment::Production => self.production_cert.as_deref(),
            Environment::Sandbox => self.sandbox_cert.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_PAYLOAD_LEN, NOTIFICATION_HEADER_LEN, Sound, TOKEN_LEN};

    fn notification(payload: Payload) -> Notification {
        Notification::new(
            NotificationId(9),
            DeviceId(1),
            DeviceToken::new([7; TOKEN_LEN]),
            payload,
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000, 0).unwrap()
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let n = notification(
            Payload::new()
                .with_alert("hi")
                .with_badge(2)
                .with_sound(Sound::Default)
                .with_property("k", "v"),
        );
        assert_eq!(n.encode(now()).unwrap(), n.encode(now()).unwrap());
    }

    #[test]
    fn test_frame_carries_id_and_default_expiry() {
        let frame = notification(Payload::new()).to_frame(now());
        assert_eq!(frame.identifier, 9);
        assert_eq!(frame.expiry, 1_600_000_000 + 30 * 24 * 60 * 60);
    }

    #[test]
    fn test_long_raw_alert_is_rejected_at_encode() {
        let mut payload = Payload::new();
        payload.alert = Some("a".repeat(257));
        let err = notification(payload).encode(now()).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge { len } if len > MAX_PAYLOAD_LEN));
    }

    #[test]
    fn test_truncated_alert_fits() {
        let n = notification(Payload::new().with_alert("a".repeat(400)));
        let frame = n.encode(now()).unwrap();
        assert!(frame.len() <= NOTIFICATION_HEADER_LEN + MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_expiry_clamps() {
        let far = TimeDelta::days(365 * 200);
        assert_eq!(expiry_timestamp(now(), far), u32::MAX);
        let before_epoch = TimeDelta::seconds(-2_000_000_000);
        assert_eq!(expiry_timestamp(now(), before_epoch), 0);
    }

    #[test]
    fn test_device_staleness() {
        let device = Device {
            id: DeviceId(1),
            app_id: AppId(1),
            token: DeviceToken::new([0; TOKEN_LEN]),
            last_registered_at: now(),
            feedback_at: None,
        };
        assert!(device.is_stale(now() + TimeDelta::seconds(1)));
        assert!(!device.is_stale(now()));
        assert!(!device.is_stale(now() - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_app_certificate_by_environment() {
        let app = App {
            id: AppId(1),
            name: "demo".into(),
            production_cert: Some("prod".into()),
            sandbox_cert: None,
        };
        assert_eq!(app.certificate(Environment::Production), Some("prod"));
        assert_eq!(app.certificate(Environment::Sandbox), None);
    }
}
