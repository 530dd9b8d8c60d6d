//! Diesel schema definitions.

diesel::table! {
    apps (id) {
        id -> Integer,
        name -> Text,
        production_cert -> Nullable<Text>,
        sandbox_cert -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    devices (id) {
        id -> Integer,
        app_id -> Integer,
        token -> Binary,
        last_registered_at -> Timestamp,
        feedback_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    notifications (id) {
        id -> Integer,
        device_id -> Integer,
        alert -> Nullable<Text>,
        badge -> Nullable<Integer>,
        sound -> Nullable<Text>,
        custom_properties -> Nullable<Text>,
        expiry_seconds -> BigInt,
        sent_at -> Nullable<Timestamp>,
        error_status -> Nullable<Integer>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    group_notifications (id) {
        id -> Integer,
        app_id -> Integer,
        alert -> Nullable<Text>,
        badge -> Nullable<Integer>,
        sound -> Nullable<Text>,
        custom_properties -> Nullable<Text>,
        expiry_seconds -> BigInt,
        sent_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    group_members (group_notification_id, device_id) {
        group_notification_id -> Integer,
        device_id -> Integer,
        position -> Integer,
    }
}

diesel::joinable!(devices -> apps (app_id));
diesel::joinable!(notifications -> devices (device_id));
diesel::joinable!(group_notifications -> apps (app_id));
diesel::joinable!(group_members -> devices (device_id));
diesel::joinable!(group_members -> group_notifications (group_notification_id));

diesel::allow_tables_to_appear_in_same_query!(
    apps,
    devices,
    notifications,
    group_notifications,
    group_members,
);
