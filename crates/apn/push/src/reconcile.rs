//! Feedback reconciliation.

use apn_core::Device;
use apn_storage::DeviceStore;

use crate::{Connector, FeedbackConnection, PushError};

/// Removes devices the feedback service reports as gone.
pub struct FeedbackReconciler<S> {
    store: S,
}

impl<S> FeedbackReconciler<S>
where
    S: DeviceStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Drain the feedback service and destroy every device that has not
    /// registered again since it was reported.
    ///
    /// Returns the destroyed devices. Devices that re-registered keep their
    /// registration and get the feedback time recorded.
    pub async fn reconcile<C>(&self, connector: &C) -> Result<Vec<Device>, PushError>
    where
        C: Connector,
    {
        let mut feedback = FeedbackConnection::open(connector).await?;
        let mut destroyed = Vec::new();
        let mut seen = 0usize;

        while let Some(record) = feedback.next_record().await? {
            seen += 1;
            let feedback_at = record.feedback_at();

            let Some(device) = self.store.find_by_token(&record.token)? else {
                tracing::debug!(token = %record.token, "feedback for unknown device");
                continue;
            };

            if device.is_stale(feedback_at) {
                self.store.destroy(&device)?;
                tracing::info!(
                    device_id = %device.id,
                    token = %device.token,
                    %feedback_at,
                    "destroyed unreachable device"
                );
                destroyed.push(device);
            } else {
                self.store.record_feedback(&device, feedback_at)?;
                tracing::debug!(
                    device_id = %device.id,
                    last_registered_at = %device.last_registered_at,
                    %feedback_at,
                    "device re-registered after feedback"
                );
            }
        }

        tracing::info!(records = seen, destroyed = destroyed.len(), "feedback processed");
        Ok(destroyed)
    }
}
