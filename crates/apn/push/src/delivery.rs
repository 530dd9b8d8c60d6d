//! Delivery engine.
//!
//! The gateway never acknowledges a frame. When it rejects one it writes a
//! single error response naming the first bad identifier and closes the
//! connection, by which point later frames may already be on the wire. Each
//! notification is therefore marked sent before it is written, and every
//! notification written after a reported failure is returned to pending and
//! retried on a fresh connection.

use std::time::Duration;

use apn_core::{AppId, ErrorResponse, GroupNotificationId, Notification, NotificationId};
use apn_storage::{GroupNotificationStore, NotificationStore};
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{ApnConfig, Connector, GatewayConnection, OversizedPolicy, PushError};

/// Tuning for [`DeliveryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// How long to wait for an error response after each device's frames.
    pub poll_timeout: Duration,
    /// Attempt cap; `None` allows one attempt per pending notification.
    pub max_attempts: Option<u32>,
    pub oversized: OversizedPolicy,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_attempts: None,
            oversized: OversizedPolicy::Abort,
        }
    }
}

impl DeliveryOptions {
    pub fn from_config(config: &ApnConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout(),
            max_attempts: config.max_attempts,
            oversized: config.oversized,
        }
    }
}

/// Notifications written during one attempt, in send order.
#[derive(Debug, Default, Clone)]
pub struct SendLedger {
    ids: Vec<NotificationId>,
}

impl SendLedger {
    pub fn record(&mut self, id: NotificationId) {
        self.ids.push(id);
    }

    /// Entries recorded strictly after `id`, or `None` if `id` was never
    /// recorded.
    pub fn after(&self, id: NotificationId) -> Option<&[NotificationId]> {
        self.ids
            .iter()
            .position(|recorded| *recorded == id)
            .map(|at| &self.ids[at + 1..])
    }

    pub fn ids(&self) -> &[NotificationId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Outcome of [`DeliveryEngine::deliver`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections opened.
    pub attempts: u32,
    pub frames_written: usize,
    /// Error responses received and recorded.
    pub failed: usize,
    pub rolled_back: usize,
    /// Error responses naming a notification this batch had not written.
    pub unmatched_errors: usize,
    /// Notifications left pending because their payload was too large.
    pub skipped: Vec<NotificationId>,
}

/// Why an attempt stopped early.
struct FailureSignal {
    response: Option<ErrorResponse>,
    write_failed: Option<NotificationId>,
    ledger: SendLedger,
}

/// Sends an app's backlog through the gateway.
pub struct DeliveryEngine<S> {
    store: S,
    options: DeliveryOptions,
}

impl<S> DeliveryEngine<S> {
    pub fn new(store: S, options: DeliveryOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &DeliveryOptions {
        &self.options
    }
}

impl<S> DeliveryEngine<S>
where
    S: NotificationStore,
{
    /// Deliver every pending notification of `app`.
    ///
    /// Each attempt opens one connection. An attempt that ends with a
    /// reported error or a failed write rolls back what the gateway did not
    /// take and starts over with the fresh backlog.
    pub async fn deliver<C>(&self, app: AppId, connector: &C) -> Result<DeliveryReport, PushError>
    where
        C: Connector,
    {
        let mut report = DeliveryReport::default();
        let mut pending = self.store.pending_notifications(app)?;
        let max_attempts = self
            .options
            .max_attempts
            .unwrap_or_else(|| u32::try_from(pending.len()).unwrap_or(u32::MAX))
            .max(1);
        let mut attempt = 1;

        loop {
            if pending.is_empty() {
                break;
            }
            if attempt > max_attempts {
                tracing::error!(
                    app = %app,
                    attempts = max_attempts,
                    pending = pending.len(),
                    "retry budget exhausted"
                );
                return Err(PushError::RetryBudgetExceeded {
                    attempts: max_attempts,
                    pending: pending.len(),
                });
            }

            tracing::info!(app = %app, attempt, pending = pending.len(), "delivering notifications");
            report.attempts = attempt;

            let mut connection =
                GatewayConnection::open(connector, self.options.poll_timeout).await?;
            let signal = self.attempt(&mut connection, &pending, &mut report).await?;
            connection.close().await;

            match signal {
                None => break,
                Some(signal) => self.recover(app, signal, &mut report)?,
            }

            attempt += 1;
            pending = self.store.pending_notifications(app)?;
        }

        tracing::info!(
            app = %app,
            attempts = report.attempts,
            frames = report.frames_written,
            failed = report.failed,
            rolled_back = report.rolled_back,
            "delivery finished"
        );
        Ok(report)
    }

    /// Write the backlog once, stopping at the first failure signal.
    async fn attempt<T>(
        &self,
        connection: &mut GatewayConnection<T>,
        pending: &[Notification],
        report: &mut DeliveryReport,
    ) -> Result<Option<FailureSignal>, PushError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut ledger = SendLedger::default();
        let now = Utc::now();

        for device_batch in pending.chunk_by(|a, b| a.device_id == b.device_id) {
            let mut write_failed = None;

            for notification in device_batch {
                let frame = match notification.encode(now) {
                    Ok(frame) => frame,
                    Err(e) => match self.options.oversized {
                        OversizedPolicy::Abort => {
                            return Err(PushError::from_codec(notification.id, e));
                        }
                        OversizedPolicy::Skip => {
                            tracing::warn!(
                                notification_id = %notification.id,
                                error = %e,
                                "skipping notification"
                            );
                            if !report.skipped.contains(&notification.id) {
                                report.skipped.push(notification.id);
                            }
                            continue;
                        }
                    },
                };

                self.store.mark_sent(notification.id, Utc::now())?;
                ledger.record(notification.id);

                if let Err(e) = connection.write(&frame).await {
                    tracing::warn!(
                        notification_id = %notification.id,
                        device_id = %notification.device_id,
                        error = %e,
                        "gateway write failed"
                    );
                    write_failed = Some(notification.id);
                    break;
                }
                report.frames_written += 1;
                tracing::debug!(notification_id = %notification.id, "frame written");
            }

            let response = connection.poll_error().await?;
            if response.is_some() || write_failed.is_some() {
                return Ok(Some(FailureSignal {
                    response,
                    write_failed,
                    ledger,
                }));
            }
        }

        Ok(None)
    }

    /// Record the reported status and return untaken notifications to
    /// pending.
    fn recover(
        &self,
        app: AppId,
        signal: FailureSignal,
        report: &mut DeliveryReport,
    ) -> Result<(), PushError> {
        let mut rollback = Vec::new();
        let mut reported = None;

        if let Some(response) = signal.response {
            let id = NotificationId(response.identifier);
            reported = Some(id);
            self.store.set_error_status(id, response.status.code())?;
            report.failed += 1;

            match signal.ledger.after(id) {
                Some(after) => {
                    tracing::warn!(
                        app = %app,
                        notification_id = %id,
                        status = %response.status,
                        "gateway rejected notification"
                    );
                    rollback.extend_from_slice(after);
                }
                None => {
                    tracing::warn!(
                        app = %app,
                        notification_id = %id,
                        status = %response.status,
                        attempted = signal.ledger.len(),
                        unmatched_error = true,
                        "gateway reported a notification this attempt did not send"
                    );
                    report.unmatched_errors += 1;
                }
            }
        }

        // A frame whose write failed never reached the gateway.
        if let Some(id) = signal.write_failed {
            if reported != Some(id) && !rollback.contains(&id) {
                rollback.push(id);
            }
        }

        if !rollback.is_empty() {
            self.store.unmark_sent(&rollback)?;
            report.rolled_back += rollback.len();
            tracing::info!(app = %app, count = rollback.len(), "rolled back notifications");
        }
        Ok(())
    }
}

impl<S> DeliveryEngine<S>
where
    S: GroupNotificationStore,
{
    /// Fan out every pending group notification of `app`.
    ///
    /// Groups are marked sent once all members were written. There is no
    /// error polling for groups; a failed write leaves the group pending.
    pub async fn deliver_groups<C>(
        &self,
        app: AppId,
        connector: &C,
    ) -> Result<Vec<GroupNotificationId>, PushError>
    where
        C: Connector,
    {
        let groups = self.store.pending_group_notifications(app)?;
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let mut connection = GatewayConnection::open(connector, self.options.poll_timeout).await?;
        let now = Utc::now();
        let mut sent = Vec::with_capacity(groups.len());

        for group in &groups {
            let frames = group
                .tokens
                .iter()
                .map(|token| group.encode_for(token, now))
                .collect::<Result<Vec<_>, _>>();
            let frames = match frames {
                Ok(frames) => frames,
                Err(e) => match self.options.oversized {
                    OversizedPolicy::Abort => {
                        return Err(PushError::from_codec(NotificationId(group.id.0), e));
                    }
                    OversizedPolicy::Skip => {
                        tracing::warn!(group_id = %group.id, error = %e, "skipping group notification");
                        continue;
                    }
                },
            };

            for frame in &frames {
                connection.write(frame).await?;
            }
            self.store.mark_group_sent(group.id, Utc::now())?;
            tracing::debug!(group_id = %group.id, devices = frames.len(), "group notification sent");
            sent.push(group.id);
        }

        connection.close().await;
        tracing::info!(app = %app, groups = sent.len(), "group delivery finished");
        Ok(sent)
    }
}
