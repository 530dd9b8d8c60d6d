//! Database models.

use apn_core::{
    App, AppId, Device, DeviceId, DeviceToken, GroupNotification, GroupNotificationId,
    Notification, NotificationId, Payload, Sound,
};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use color_eyre::eyre::WrapErr as _;
use diesel::prelude::*;

use crate::schema::{apps, devices, group_members, group_notifications, notifications};

/// App record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = apps)]
pub struct AppRow {
    pub id: i32,
    pub name: String,
    pub production_cert: Option<String>,
    pub sandbox_cert: Option<String>,
    pub created_at: NaiveDateTime,
}

/// New app for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = apps)]
pub struct NewApp<'a> {
    pub name: &'a str,
    pub production_cert: Option<&'a str>,
    pub sandbox_cert: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

/// Device record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = devices)]
pub struct DeviceRow {
    pub id: i32,
    pub app_id: i32,
    pub token: Vec<u8>,
    pub last_registered_at: NaiveDateTime,
    pub feedback_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// New device for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = devices)]
pub struct NewDevice<'a> {
    pub app_id: i32,
    pub token: &'a [u8],
    pub last_registered_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

/// Notification record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct NotificationRow {
    pub id: i32,
    pub device_id: i32,
    pub alert: Option<String>,
    pub badge: Option<i32>,
    pub sound: Option<String>,
    pub custom_properties: Option<String>,
    pub expiry_seconds: i64,
    pub sent_at: Option<NaiveDateTime>,
    pub error_status: Option<i32>,
    pub created_at: NaiveDateTime,
}

/// New notification for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification<'a> {
    pub device_id: i32,
    pub alert: Option<&'a str>,
    pub badge: Option<i32>,
    pub sound: Option<&'a str>,
    pub custom_properties: Option<&'a str>,
    pub expiry_seconds: i64,
    pub created_at: NaiveDateTime,
}

/// Group notification record.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = group_notifications)]
pub struct GroupNotificationRow {
    pub id: i32,
    pub app_id: i32,
    pub alert: Option<String>,
    pub badge: Option<i32>,
    pub sound: Option<String>,
    pub custom_properties: Option<String>,
    pub expiry_seconds: i64,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

/// New group notification for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = group_notifications)]
pub struct NewGroupNotification<'a> {
    pub app_id: i32,
    pub alert: Option<&'a str>,
    pub badge: Option<i32>,
    pub sound: Option<&'a str>,
    pub custom_properties: Option<&'a str>,
    pub expiry_seconds: i64,
    pub created_at: NaiveDateTime,
}

/// Group membership for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = group_members)]
pub struct NewGroupMember {
    pub group_notification_id: i32,
    pub device_id: i32,
    pub position: i32,
}

/// Payload flattened into its columns.
pub struct PayloadColumns {
    pub alert: Option<String>,
    pub badge: Option<i32>,
    pub sound: Option<String>,
    pub custom_properties: Option<String>,
}

impl PayloadColumns {
    pub fn from_payload(payload: &Payload) -> color_eyre::eyre::Result<Self> {
        let badge = payload
            .badge
            .map(i32::try_from)
            .transpose()
            .wrap_err("badge does not fit the badge column")?;
        let custom_properties = if payload.custom_properties.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&payload.custom_properties)
                    .wrap_err("failed to serialize custom properties")?,
            )
        };

        Ok(Self {
            alert: payload.alert.clone(),
            badge,
            sound: payload.sound.as_ref().map(|s| s.file_name().to_string()),
            custom_properties,
        })
    }

    fn into_payload(self) -> color_eyre::eyre::Result<Payload> {
        let badge = self
            .badge
            .map(u32::try_from)
            .transpose()
            .wrap_err("stored badge is negative")?;
        let custom_properties = match self.custom_properties {
            Some(json) => serde_json::from_str(&json).wrap_err("failed to parse custom properties")?,
            None => serde_json::Map::new(),
        };

        Ok(Payload {
            alert: self.alert,
            badge,
            sound: self.sound.map(Sound::Named),
            custom_properties,
        })
    }
}

pub(crate) fn to_utc(at: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(at, Utc)
}

fn token_from_row(token: &[u8]) -> color_eyre::eyre::Result<DeviceToken> {
    DeviceToken::from_slice(token).wrap_err("stored device token is malformed")
}

pub(crate) fn notification_id(id: i32) -> color_eyre::eyre::Result<NotificationId> {
    Ok(NotificationId(
        u32::try_from(id).wrap_err("notification id out of range")?,
    ))
}

pub(crate) fn group_notification_id(id: i32) -> color_eyre::eyre::Result<GroupNotificationId> {
    Ok(GroupNotificationId(
        u32::try_from(id).wrap_err("group notification id out of range")?,
    ))
}

impl AppRow {
    pub fn into_app(self) -> App {
        App {
            id: AppId(self.id),
            name: self.name,
            production_cert: self.production_cert,
            sandbox_cert: self.sandbox_cert,
        }
    }
}

impl DeviceRow {
    pub fn into_device(self) -> color_eyre::eyre::Result<Device> {
        Ok(Device {
            id: DeviceId(self.id),
            app_id: AppId(self.app_id),
            token: token_from_row(&self.token)?,
            last_registered_at: to_utc(self.last_registered_at),
            feedback_at: self.feedback_at.map(to_utc),
        })
    }
}

impl NotificationRow {
    /// Combine with the owning device's token.
    pub fn into_notification(self, token: &[u8]) -> color_eyre::eyre::Result<Notification> {
        let payload = PayloadColumns {
            alert: self.alert,
            badge: self.badge,
            sound: self.sound,
            custom_properties: self.custom_properties,
        }
        .into_payload()?;
        let error_status = self
            .error_status
            .map(u8::try_from)
            .transpose()
            .wrap_err("stored error status out of range")?;

        Ok(Notification {
            id: notification_id(self.id)?,
            device_id: DeviceId(self.device_id),
            token: token_from_row(token)?,
            payload,
            expiry: TimeDelta::seconds(self.expiry_seconds),
            sent_at: self.sent_at.map(to_utc),
            error_status,
        })
    }
}

impl GroupNotificationRow {
    /// Combine with the member tokens, in membership order.
    pub fn into_group_notification(
        self,
        tokens: Vec<Vec<u8>>,
    ) -> color_eyre::eyre::Result<GroupNotification> {
        let payload = PayloadColumns {
            alert: self.alert,
            badge: self.badge,
            sound: self.sound,
            custom_properties: self.custom_properties,
        }
        .into_payload()?;
        let tokens = tokens
            .iter()
            .map(|t| token_from_row(t))
            .collect::<color_eyre::eyre::Result<Vec<_>>>()?;

        Ok(GroupNotification {
            id: group_notification_id(self.id)?,
            app_id: AppId(self.app_id),
            tokens,
            payload,
            expiry: TimeDelta::seconds(self.expiry_seconds),
            sent_at: self.sent_at.map(to_utc),
        })
    }
}
