//! Storage traits.

use apn_core::{
    App, AppId, Device, DeviceToken, GroupNotification, GroupNotificationId, Notification,
    NotificationId,
};
use chrono::{DateTime, Utc};

/// Backlog of single-device notifications.
pub trait NotificationStore: Send + Sync {
    /// Unsent notifications for an app's devices, grouped by device in send order.
    fn pending_notifications(&self, app: AppId) -> color_eyre::eyre::Result<Vec<Notification>>;

    /// Record a notification as sent.
    fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> color_eyre::eyre::Result<()>;

    /// Return notifications to pending.
    fn unmark_sent(&self, ids: &[NotificationId]) -> color_eyre::eyre::Result<()>;

    /// Record the status the gateway reported for a notification.
    fn set_error_status(&self, id: NotificationId, status: u8) -> color_eyre::eyre::Result<()>;
}

/// Backlog of group notifications.
pub trait GroupNotificationStore: Send + Sync {
    /// Unsent group notifications for an app, with member tokens resolved.
    fn pending_group_notifications(
        &self,
        app: AppId,
    ) -> color_eyre::eyre::Result<Vec<GroupNotification>>;

    /// Record a group notification as sent to every member.
    fn mark_group_sent(
        &self,
        id: GroupNotificationId,
        at: DateTime<Utc>,
    ) -> color_eyre::eyre::Result<()>;
}

/// Device lookups for feedback processing.
pub trait DeviceStore: Send + Sync {
    /// Find a device by token.
    fn find_by_token(&self, token: &DeviceToken) -> color_eyre::eyre::Result<Option<Device>>;

    /// Delete a device and its notifications.
    fn destroy(&self, device: &Device) -> color_eyre::eyre::Result<()>;

    /// Remember the latest feedback time for a device that was kept.
    fn record_feedback(&self, device: &Device, at: DateTime<Utc>) -> color_eyre::eyre::Result<()>;
}

/// App listing.
pub trait AppStore: Send + Sync {
    /// All apps, in id order.
    fn apps(&self) -> color_eyre::eyre::Result<Vec<App>>;
}

/// Combined storage trait.
pub trait AllStorage: NotificationStore + GroupNotificationStore + DeviceStore + AppStore {}

impl<T> AllStorage for T where T: NotificationStore + GroupNotificationStore + DeviceStore + AppStore {}
