//! SQLite storage implementation.

use apn_core::{
    App, AppId, Device, DeviceId, DeviceToken, GroupNotification, GroupNotificationId,
    Notification, NotificationId, Payload,
};
use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::eyre::WrapErr as _;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;

use crate::models::*;
use crate::schema::*;
use crate::traits::*;

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage from a database URL.
    pub fn new(database_url: &str) -> color_eyre::eyre::Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .wrap_err("failed to create connection pool")?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub fn run_migrations(&self) -> color_eyre::eyre::Result<()> {
        use diesel_migrations::MigrationHarness as _;

        let mut conn = self
            .pool
            .get()
            .wrap_err("failed to get connection for migrations")?;

        conn.run_pending_migrations(crate::MIGRATIONS)
            .map_err(|e| color_eyre::eyre::eyre!("migration failed: {}", e))?;

        Ok(())
    }

    fn conn(
        &self,
    ) -> color_eyre::eyre::Result<diesel::r2d2::PooledConnection<ConnectionManager<SqliteConnection>>>
    {
        self.pool
            .get()
            .wrap_err("failed to get database connection")
    }

    /// Create an app with optional PEM certificates.
    pub fn create_app(
        &self,
        name: &str,
        production_cert: Option<&str>,
        sandbox_cert: Option<&str>,
    ) -> color_eyre::eyre::Result<App> {
        let mut conn = self.conn()?;
        let new_app = NewApp {
            name,
            production_cert,
            sandbox_cert,
            created_at: Utc::now().naive_utc(),
        };

        let row = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(apps::table)
                    .values(&new_app)
                    .execute(conn)?;
                apps::table
                    .order(apps::id.desc())
                    .select(AppRow::as_select())
                    .first::<AppRow>(conn)
            })
            .wrap_err("failed to create app")?;

        Ok(row.into_app())
    }

    /// Register a device, or refresh the registration time of a known token.
    pub fn register_device(
        &self,
        app: AppId,
        token: DeviceToken,
        at: DateTime<Utc>,
    ) -> color_eyre::eyre::Result<Device> {
        let mut conn = self.conn()?;
        let token_bytes = token.as_bytes().as_slice();
        let at = at.naive_utc();

        let row = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let updated = diesel::update(
                    devices::table
                        .filter(devices::app_id.eq(app.0))
                        .filter(devices::token.eq(token_bytes)),
                )
                .set(devices::last_registered_at.eq(at))
                .execute(conn)?;

                if updated == 0 {
                    diesel::insert_into(devices::table)
                        .values(&NewDevice {
                            app_id: app.0,
                            token: token_bytes,
                            last_registered_at: at,
                            created_at: Utc::now().naive_utc(),
                        })
                        .execute(conn)?;
                }

                devices::table
                    .filter(devices::app_id.eq(app.0))
                    .filter(devices::token.eq(token_bytes))
                    .select(DeviceRow::as_select())
                    .first::<DeviceRow>(conn)
            })
            .wrap_err("failed to register device")?;

        row.into_device()
    }

    /// Queue a notification for a device.
    pub fn enqueue_notification(
        &self,
        device: DeviceId,
        payload: Payload,
        expiry: TimeDelta,
    ) -> color_eyre::eyre::Result<Notification> {
        let mut conn = self.conn()?;
        let columns = PayloadColumns::from_payload(&payload)?;

        let (row, token) = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(notifications::table)
                    .values(&NewNotification {
                        device_id: device.0,
                        alert: columns.alert.as_deref(),
                        badge: columns.badge,
                        sound: columns.sound.as_deref(),
                        custom_properties: columns.custom_properties.as_deref(),
                        expiry_seconds: expiry.num_seconds(),
                        created_at: Utc::now().naive_utc(),
                    })
                    .execute(conn)?;

                notifications::table
                    .inner_join(devices::table)
                    .filter(notifications::device_id.eq(device.0))
                    .order(notifications::id.desc())
                    .select((NotificationRow::as_select(), devices::token))
                    .first::<(NotificationRow, Vec<u8>)>(conn)
            })
            .wrap_err("failed to enqueue notification")?;

        row.into_notification(&token)
    }

    /// Queue a group notification for a set of an app's devices.
    pub fn enqueue_group_notification(
        &self,
        app: AppId,
        members: &[DeviceId],
        payload: Payload,
        expiry: TimeDelta,
    ) -> color_eyre::eyre::Result<GroupNotification> {
        let mut conn = self.conn()?;
        let columns = PayloadColumns::from_payload(&payload)?;
        let member_ids: Vec<i32> = members.iter().map(|d| d.0).collect();

        let known: i64 = devices::table
            .filter(devices::app_id.eq(app.0))
            .filter(devices::id.eq_any(&member_ids))
            .count()
            .get_result(&mut conn)
            .wrap_err("failed to check group members")?;
        if known as usize != member_ids.len() {
            color_eyre::eyre::bail!("group members must be distinct devices registered to app {}", app);
        }

        let row = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::insert_into(group_notifications::table)
                    .values(&NewGroupNotification {
                        app_id: app.0,
                        alert: columns.alert.as_deref(),
                        badge: columns.badge,
                        sound: columns.sound.as_deref(),
                        custom_properties: columns.custom_properties.as_deref(),
                        expiry_seconds: expiry.num_seconds(),
                        created_at: Utc::now().naive_utc(),
                    })
                    .execute(conn)?;

                let row: GroupNotificationRow = group_notifications::table
                    .order(group_notifications::id.desc())
                    .select(GroupNotificationRow::as_select())
                    .first(conn)?;

                for (device_id, position) in member_ids.iter().zip(0..) {
                    diesel::insert_into(group_members::table)
                        .values(&NewGroupMember {
                            group_notification_id: row.id,
                            device_id: *device_id,
                            position,
                        })
                        .execute(conn)?;
                }

                Ok(row)
            })
            .wrap_err("failed to enqueue group notification")?;

        let tokens = self.member_tokens(&mut conn, row.id)?;
        row.into_group_notification(tokens)
    }

    /// Look up a notification by id.
    pub fn notification(&self, id: NotificationId) -> color_eyre::eyre::Result<Option<Notification>> {
        let mut conn = self.conn()?;
        let id = id_column(id)?;

        let result: Option<(NotificationRow, Vec<u8>)> = notifications::table
            .inner_join(devices::table)
            .filter(notifications::id.eq(id))
            .select((NotificationRow::as_select(), devices::token))
            .first(&mut conn)
            .optional()
            .wrap_err("failed to get notification")?;

        result
            .map(|(row, token)| row.into_notification(&token))
            .transpose()
    }

    /// Look up a group notification by id.
    pub fn group_notification(
        &self,
        id: GroupNotificationId,
    ) -> color_eyre::eyre::Result<Option<GroupNotification>> {
        let mut conn = self.conn()?;
        let id = i32::try_from(id.0).wrap_err("group notification id out of range")?;

        let row: Option<GroupNotificationRow> = group_notifications::table
            .filter(group_notifications::id.eq(id))
            .select(GroupNotificationRow::as_select())
            .first(&mut conn)
            .optional()
            .wrap_err("failed to get group notification")?;

        match row {
            Some(row) => {
                let tokens = self.member_tokens(&mut conn, row.id)?;
                Ok(Some(row.into_group_notification(tokens)?))
            }
            None => Ok(None),
        }
    }

    fn member_tokens(
        &self,
        conn: &mut SqliteConnection,
        group_id: i32,
    ) -> color_eyre::eyre::Result<Vec<Vec<u8>>> {
        group_members::table
            .inner_join(devices::table)
            .filter(group_members::group_notification_id.eq(group_id))
            .order(group_members::position.asc())
            .select(devices::token)
            .load(conn)
            .wrap_err("failed to load group members")
    }
}

fn id_column(id: NotificationId) -> color_eyre::eyre::Result<i32> {
    i32::try_from(id.0).wrap_err("notification id out of range")
}

impl NotificationStore for SqliteStorage {
    fn pending_notifications(&self, app: AppId) -> color_eyre::eyre::Result<Vec<Notification>> {
        let mut conn = self.conn()?;

        let rows: Vec<(NotificationRow, Vec<u8>)> = notifications::table
            .inner_join(devices::table)
            .filter(devices::app_id.eq(app.0))
            .filter(notifications::sent_at.is_null())
            .order((devices::id.asc(), notifications::id.asc()))
            .select((NotificationRow::as_select(), devices::token))
            .load(&mut conn)
            .wrap_err("failed to get pending notifications")?;

        rows.into_iter()
            .map(|(row, token)| row.into_notification(&token))
            .collect()
    }

    fn mark_sent(&self, id: NotificationId, at: DateTime<Utc>) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let id = id_column(id)?;

        diesel::update(notifications::table.filter(notifications::id.eq(id)))
            .set(notifications::sent_at.eq(Some(at.naive_utc())))
            .execute(&mut conn)
            .wrap_err("failed to mark notification sent")?;

        Ok(())
    }

    fn unmark_sent(&self, ids: &[NotificationId]) -> color_eyre::eyre::Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let ids = ids
            .iter()
            .map(|id| id_column(*id))
            .collect::<color_eyre::eyre::Result<Vec<_>>>()?;

        diesel::update(notifications::table.filter(notifications::id.eq_any(&ids)))
            .set(notifications::sent_at.eq(None::<chrono::NaiveDateTime>))
            .execute(&mut conn)
            .wrap_err("failed to return notifications to pending")?;

        Ok(())
    }

    fn set_error_status(&self, id: NotificationId, status: u8) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let id = id_column(id)?;

        diesel::update(notifications::table.filter(notifications::id.eq(id)))
            .set(notifications::error_status.eq(Some(i32::from(status))))
            .execute(&mut conn)
            .wrap_err("failed to store error status")?;

        Ok(())
    }
}

impl GroupNotificationStore for SqliteStorage {
    fn pending_group_notifications(
        &self,
        app: AppId,
    ) -> color_eyre::eyre::Result<Vec<GroupNotification>> {
        let mut conn = self.conn()?;

        let rows: Vec<GroupNotificationRow> = group_notifications::table
            .filter(group_notifications::app_id.eq(app.0))
            .filter(group_notifications::sent_at.is_null())
            .order(group_notifications::id.asc())
            .select(GroupNotificationRow::as_select())
            .load(&mut conn)
            .wrap_err("failed to get pending group notifications")?;

        rows.into_iter()
            .map(|row| {
                let tokens = self.member_tokens(&mut conn, row.id)?;
                row.into_group_notification(tokens)
            })
            .collect()
    }

    fn mark_group_sent(
        &self,
        id: GroupNotificationId,
        at: DateTime<Utc>,
    ) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let id = i32::try_from(id.0).wrap_err("group notification id out of range")?;

        diesel::update(group_notifications::table.filter(group_notifications::id.eq(id)))
            .set(group_notifications::sent_at.eq(Some(at.naive_utc())))
            .execute(&mut conn)
            .wrap_err("failed to mark group notification sent")?;

        Ok(())
    }
}

impl DeviceStore for SqliteStorage {
    fn find_by_token(&self, token: &DeviceToken) -> color_eyre::eyre::Result<Option<Device>> {
        let mut conn = self.conn()?;

        let row: Option<DeviceRow> = devices::table
            .filter(devices::token.eq(token.as_bytes().as_slice()))
            .order(devices::id.asc())
            .select(DeviceRow::as_select())
            .first(&mut conn)
            .optional()
            .wrap_err("failed to find device")?;

        row.map(DeviceRow::into_device).transpose()
    }

    fn destroy(&self, device: &Device) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;
        let id = device.id.0;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::delete(notifications::table.filter(notifications::device_id.eq(id)))
                .execute(conn)?;
            diesel::delete(group_members::table.filter(group_members::device_id.eq(id)))
                .execute(conn)?;
            diesel::delete(devices::table.filter(devices::id.eq(id))).execute(conn)?;
            Ok(())
        })
        .wrap_err("failed to destroy device")?;

        Ok(())
    }

    fn record_feedback(&self, device: &Device, at: DateTime<Utc>) -> color_eyre::eyre::Result<()> {
        let mut conn = self.conn()?;

        diesel::update(devices::table.filter(devices::id.eq(device.id.0)))
            .set(devices::feedback_at.eq(Some(at.naive_utc())))
            .execute(&mut conn)
            .wrap_err("failed to record feedback")?;

        Ok(())
    }
}

impl AppStore for SqliteStorage {
    fn apps(&self) -> color_eyre::eyre::Result<Vec<App>> {
        let mut conn = self.conn()?;

        let rows: Vec<AppRow> = apps::table
            .order(apps::id.asc())
            .select(AppRow::as_select())
            .load(&mut conn)
            .wrap_err("failed to list apps")?;

        Ok(rows.into_iter().map(AppRow::into_app).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apn_core::{Sound, TOKEN_LEN, default_expiry};

    fn storage() -> (tempfile::TempDir, SqliteStorage) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apn.db");
        let storage = SqliteStorage::new(path.to_str().unwrap()).unwrap();
        storage.run_migrations().unwrap();
        (dir, storage)
    }

    fn token(b: u8) -> DeviceToken {
        DeviceToken::new([b; TOKEN_LEN])
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_notification_round_trips_through_rows() {
        let (_dir, store) = storage();
        let app = store.create_app("demo", Some("PEM"), None).unwrap();
        let device = store.register_device(app.id, token(3), at(100)).unwrap();

        let payload = Payload::new()
            .with_alert("hello")
            .with_badge(0)
            .with_sound(Sound::Default)
            .with_property("typ", 1);
        let queued = store
            .enqueue_notification(device.id, payload.clone(), TimeDelta::hours(1))
            .unwrap();

        let pending = store.pending_notifications(app.id).unwrap();
        assert_eq!(pending.len(), 1);
        let loaded = &pending[0];
        assert_eq!(loaded.id, queued.id);
        assert_eq!(loaded.token, token(3));
        assert_eq!(loaded.expiry, TimeDelta::hours(1));
        assert_eq!(loaded.payload.to_bytes(), payload.to_bytes());
        assert!(loaded.is_pending());
    }

    #[test]
    fn test_mark_unmark_and_error_status() {
        let (_dir, store) = storage();
        let app = store.create_app("demo", None, None).unwrap();
        let device = store.register_device(app.id, token(1), at(0)).unwrap();
        let ids: Vec<NotificationId> = (0..3)
            .map(|_| {
                store
                    .enqueue_notification(device.id, Payload::new(), default_expiry())
                    .unwrap()
                    .id
            })
            .collect();

        for id in &ids {
            store.mark_sent(*id, at(10)).unwrap();
        }
        assert!(store.pending_notifications(app.id).unwrap().is_empty());

        store.unmark_sent(&ids[1..]).unwrap();
        store.set_error_status(ids[0], 8).unwrap();

        let pending: Vec<_> = store
            .pending_notifications(app.id)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(pending, ids[1..].to_vec());

        let first = store.notification(ids[0]).unwrap().unwrap();
        assert_eq!(first.sent_at, Some(at(10)));
        assert_eq!(first.error_status, Some(8));
    }

    #[test]
    fn test_register_device_upserts() {
        let (_dir, store) = storage();
        let app = store.create_app("demo", None, None).unwrap();
        let first = store.register_device(app.id, token(1), at(5)).unwrap();
        let again = store.register_device(app.id, token(1), at(50)).unwrap();

        assert_eq!(first.id, again.id);
        let found = store.find_by_token(&token(1)).unwrap().unwrap();
        assert_eq!(found.last_registered_at, at(50));
        assert!(store.find_by_token(&token(2)).unwrap().is_none());
    }

    #[test]
    fn test_groups_and_destroy() {
        let (_dir, store) = storage();
        let app = store.create_app("demo", None, Some("SANDBOX")).unwrap();
        let a = store.register_device(app.id, token(1), at(0)).unwrap();
        let b = store.register_device(app.id, token(2), at(0)).unwrap();
        store
            .enqueue_notification(b.id, Payload::new(), default_expiry())
            .unwrap();
        let group = store
            .enqueue_group_notification(app.id, &[b.id, a.id], Payload::new(), default_expiry())
            .unwrap();
        assert_eq!(group.tokens, vec![token(2), token(1)]);

        store.destroy(&b).unwrap();
        assert!(store.pending_notifications(app.id).unwrap().is_empty());
        let pending = store.pending_group_notifications(app.id).unwrap();
        assert_eq!(pending[0].tokens, vec![token(1)]);

        store.mark_group_sent(group.id, at(7)).unwrap();
        assert!(store.pending_group_notifications(app.id).unwrap().is_empty());
        assert_eq!(
            store.group_notification(group.id).unwrap().unwrap().sent_at,
            Some(at(7))
        );
    }

    #[test]
    fn test_apps_and_feedback() {
        let (_dir, store) = storage();
        let app = store.create_app("demo", Some("PROD"), None).unwrap();
        let device = store.register_device(app.id, token(1), at(0)).unwrap();
        store.record_feedback(&device, at(9)).unwrap();

        let apps = store.apps().unwrap();
        assert_eq!(apps, vec![app]);
        assert_eq!(
            store.find_by_token(&token(1)).unwrap().unwrap().feedback_at,
            Some(at(9))
        );
    }
}
