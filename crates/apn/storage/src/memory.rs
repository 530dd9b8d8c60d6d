//! In-memory storage implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use apn_core::{
    App, AppId, Device, DeviceId, DeviceToken, GroupNotification, GroupNotificationId,
    Notification, NotificationId, Payload,
};
use chrono::{DateTime, TimeDelta, Utc};

use crate::traits::*;

/// Process-local storage.
///
/// Cloning shares the underlying state, so a caller can hand one clone to the
/// delivery engine and inspect the backlog through another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    apps: BTreeMap<AppId, App>,
    devices: BTreeMap<DeviceId, Device>,
    notifications: BTreeMap<NotificationId, Notification>,
    groups: BTreeMap<GroupNotificationId, GroupRecord>,
    next_app: i32,
    next_device: i32,
    next_notification: u32,
    next_group: u32,
}

struct GroupRecord {
    notification: GroupNotification,
    members: Vec<DeviceId>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> color_eyre::eyre::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| color_eyre::eyre::eyre!("memory storage lock poisoned"))
    }

    /// Create an app with optional PEM certificates.
    pub fn create_app(
        &self,
        name: &str,
        production_cert: Option<&str>,
        sandbox_cert: Option<&str>,
    ) -> color_eyre::eyre::Result<App> {
        let mut inner = self.lock()?;
        inner.next_app += 1;
        let app = App {
            id: AppId(inner.next_app),
            name: name.to_string(),
            production_cert: production_cert.map(str::to_string),
            sandbox_cert: sandbox_cert.map(str::to_string),
        };
        inner.apps.insert(app.id, app.clone());
        Ok(app)
    }

    /// Register a device, or refresh the registration time of a known token.
    pub fn register_device(
        &self,
        app: AppId,
        token: DeviceToken,
        at: DateTime<Utc>,
    ) -> color_eyre::eyre::Result<Device> {
        let mut inner = self.lock()?;
        if !inner.apps.contains_key(&app) {
            color_eyre::eyre::bail!("unknown app {}", app);
        }

        if let Some(existing) = inner
            .devices
            .values_mut()
            .find(|d| d.app_id == app && d.token == token)
        {
            existing.last_registered_at = at;
            return Ok(existing.clone());
        }

        inner.next_device += 1;
        let device = Device {
            id: DeviceId(inner.next_device),
            app_id: app,
            token,
            last_registered_at: at,
            feedback_at: None,
        };
        inner.devices.insert(device.id, device.clone());
        Ok(device)
    }

    /// Queue a notification for a device.
    pub fn enqueue_notification(
        &self,
        device: DeviceId,
        payload: Payload,
        expiry: TimeDelta,
    ) -> color_eyre::eyre::Result<Notification> {
        let mut inner = self.lock()?;
        let token = inner
            .devices
            .get(&device)
            .map(|d| d.token)
            .ok_or_else(|| color_eyre::eyre::eyre!("unknown device {}", device))?;

        inner.next_notification += 1;
        let mut notification =
            Notification::new(NotificationId(inner.next_notification), device, token, payload);
        notification.expiry = expiry;
        inner
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    /// Queue a group notification for a set of an app's devices.
    pub fn enqueue_group_notification(
        &self,
        app: AppId,
        members: &[DeviceId],
        payload: Payload,
        expiry: TimeDelta,
    ) -> color_eyre::eyre::Result<GroupNotification> {
        let mut inner = self.lock()?;
        let tokens = members
            .iter()
            .map(|id| match inner.devices.get(id) {
                Some(device) if device.app_id == app => Ok(device.token),
                _ => Err(color_eyre::eyre::eyre!("device {} is not registered to app {}", id, app)),
            })
            .collect::<color_eyre::eyre::Result<Vec<_>>>()?;

        inner.next_group += 1;
        let mut notification =
            GroupNotification::new(GroupNotificationId(inner.next_group), app, tokens, payload);
        notification.expiry = expiry;
        inner.groups.insert(
            notification.id,
            GroupRecord {
                notification: notification.clone(),
                members: members.to_vec(),
            },
        );
        Ok(notification)
    }

    /// Look up a notification by id.
    pub fn notification(&self, id: NotificationId) -> color_eyre::eyre::Result<Option<Notification>> {
        Ok(self.lock()?.notifications.get(&id).cloned())
    }

    /// Look up a group notification by id.
    pub fn group_notification(
        &self,
        id: GroupNotificationId,
    ) -> color_eyre::eyre::Result<Option<GroupNotification>> {
        Ok(self.lock()?.groups.get(&id).map(|g| g.notification.clone()))
    }
}

impl NotificationStore for MemoryStorage {
    fn pending_notifications(&self, app: AppId) -> color_eyre::eyre::Result<Vec<Notification>> {
        let inner = self.lock()?;
        let mut pending: Vec<Notification> = inner
            .notifications
            .values()
            .filter(|n| n.is_pending())
            .filter(|n| {
                inner
                    .devices
                    .get(&n.device_id)
                    .is_some_and(|d| d.app_id == app)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|n| (n.device_id, n.id));
        Ok(pending)
    }

    fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        let notification = inner
            .notifications
            .get_mut(&id)
            .ok_or_else(|| color_eyre::eyre::eyre!("unknown notification {}", id))?;
        notification.sent_at = Some(at);
        Ok(())
    }

    fn unmark_sent(&self, ids: &[NotificationId]) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        for id in ids {
            if let Some(notification) = inner.notifications.get_mut(id) {
                notification.sent_at = None;
            }
        }
        Ok(())
    }

    fn set_error_status(&self, id: NotificationId, status: u8) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        if let Some(notification) = inner.notifications.get_mut(&id) {
            notification.error_status = Some(status);
        }
        Ok(())
    }
}

impl GroupNotificationStore for MemoryStorage {
    fn pending_group_notifications(
        &self,
        app: AppId,
    ) -> color_eyre::eyre::Result<Vec<GroupNotification>> {
        let inner = self.lock()?;
        Ok(inner
            .groups
            .values()
            .filter(|g| g.notification.app_id == app && g.notification.sent_at.is_none())
            .map(|g| g.notification.clone())
            .collect())
    }

    fn mark_group_sent(
        &self,
        id: GroupNotificationId,
        at: DateTime<Utc>,
    ) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        let group = inner
            .groups
            .get_mut(&id)
            .ok_or_else(|| color_eyre::eyre::eyre!("unknown group notification {}", id))?;
        group.notification.sent_at = Some(at);
        Ok(())
    }
}

impl DeviceStore for MemoryStorage {
    fn find_by_token(&self, token: &DeviceToken) -> color_eyre::eyre::Result<Option<Device>> {
        let inner = self.lock()?;
        Ok(inner.devices.values().find(|d| d.token == *token).cloned())
    }

    fn destroy(&self, device: &Device) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        inner.devices.remove(&device.id);
        inner.notifications.retain(|_, n| n.device_id != device.id);
        for group in inner.groups.values_mut() {
            if let Some(pos) = group.members.iter().position(|id| *id == device.id) {
                group.members.remove(pos);
                group.notification.tokens.remove(pos);
            }
        }
        Ok(())
    }

    fn record_feedback(&self, device: &Device, at: DateTime<Utc>) -> color_eyre::eyre::Result<()> {
        let mut inner = self.lock()?;
        if let Some(stored) = inner.devices.get_mut(&device.id) {
            stored.feedback_at = Some(at);
        }
        Ok(())
    }
}

impl AppStore for MemoryStorage {
    fn apps(&self) -> color_eyre::eyre::Result<Vec<App>> {
        Ok(self.lock()?.apps.values().cloned().collect())
    }
}
