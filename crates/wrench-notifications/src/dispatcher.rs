//! Observer turning work-order events into notifications.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wrench_core::{Event, EventType, Observer, ObserverError};
use wrench_storage::{Priority, Role, User, UserDirectory, UserId};

use crate::log::NotificationLog;
use crate::registry::{ChannelRegistry, ChannelSet};
use crate::selector::{ChannelSelector, PreferenceSelector};
use crate::templates::TemplateRenderer;
use crate::types::{NotificationRecord, Recipient, RenderedContent, SendResult};

/// Counter of delivery attempts, labelled by `channel` and `outcome`.
pub const NOTIFICATIONS_TOTAL: &str = "wrench_notifications_total";

/// Who hears about an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Admins,
    Technician,
    Submitter,
    SubmitterAndAdmins,
}

impl Audience {
    fn for_event(event_type: &EventType) -> Option<Self> {
        if *event_type == EventType::WORK_ORDER_CREATED {
            Some(Self::Admins)
        } else if *event_type == EventType::WORK_ORDER_ASSIGNED {
            Some(Self::Technician)
        } else if *event_type == EventType::WORK_ORDER_STARTED {
            Some(Self::Submitter)
        } else if *event_type == EventType::WORK_ORDER_COMPLETED {
            Some(Self::SubmitterAndAdmins)
        } else {
            None
        }
    }
}

/// Notifies stakeholders of work-order transitions.
///
/// Every attempt, successful or not, lands in the [`NotificationLog`].
/// Delivery failures are never returned to the broker.
pub struct NotificationDispatcher {
    directory: Arc<dyn UserDirectory>,
    channels: Arc<ChannelRegistry>,
    selector: Arc<dyn ChannelSelector>,
    templates: TemplateRenderer,
    log: Arc<NotificationLog>,
}

impl NotificationDispatcher {
    pub const NAME: &'static str = "notification_dispatcher";

    /// Event types the dispatcher should be subscribed to.
    pub const EVENT_TYPES: [EventType; 4] = [
        EventType::WORK_ORDER_CREATED,
        EventType::WORK_ORDER_ASSIGNED,
        EventType::WORK_ORDER_STARTED,
        EventType::WORK_ORDER_COMPLETED,
    ];

    pub fn new(
        directory: Arc<dyn UserDirectory>,
        channels: Arc<ChannelRegistry>,
        log: Arc<NotificationLog>,
    ) -> Self {
        Self {
            directory,
            channels,
            selector: Arc::new(PreferenceSelector::new()),
            templates: TemplateRenderer::with_defaults(),
            log,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn ChannelSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_templates(mut self, templates: TemplateRenderer) -> Self {
        self.templates = templates;
        self
    }

    pub fn log(&self) -> &Arc<NotificationLog> {
        &self.log
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    /// Resolve recipients for an event, de-duplicated, in resolution order.
    async fn recipients(&self, event: &Event, audience: Audience) -> Result<Vec<User>, ObserverError> {
        let mut users = Vec::new();

        match audience {
            Audience::Technician => {
                let id = required_id(event, "technicianId")?;
                users.extend(self.lookup(event, id).await?);
            }
            Audience::Submitter => {
                let id = required_id(event, "submitterId")?;
                users.extend(self.lookup(event, id).await?);
            }
            Audience::SubmitterAndAdmins => {
                let id = required_id(event, "submitterId")?;
                users.extend(self.lookup(event, id).await?);
                users.extend(self.admins().await?);
            }
            Audience::Admins => users.extend(self.admins().await?),
        }

        let mut seen: HashSet<UserId> = HashSet::new();
        users.retain(|user| seen.insert(user.id));
        Ok(users)
    }

    async fn admins(&self) -> Result<Vec<User>, ObserverError> {
        self.directory
            .users_with_role(Role::Admin)
            .await
            .map_err(|e| ObserverError::storage(e.to_string()))
    }

    async fn lookup(&self, event: &Event, id: UserId) -> Result<Option<User>, ObserverError> {
        let user = self
            .directory
            .get_user(id)
            .await
            .map_err(|e| ObserverError::storage(e.to_string()))?;
        if user.is_none() {
            warn!(event_id = %event.id, user_id = id, "Notification recipient not found, skipping");
        }
        Ok(user)
    }

    async fn notify(
        &self,
        event: &Event,
        user: &User,
        channels: &ChannelSet,
        priority: Option<Priority>,
        content: &RenderedContent,
    ) -> NotificationRecord {
        let recipient = Recipient::from(user);
        let selected = self.selector.select(&recipient, priority, channels);

        let (channel, result) = match selected {
            Some(channel) => {
                let result = channel.send(&recipient, content).await;
                (Some(channel.kind()), result)
            }
            None => (None, SendResult::failure("no reachable channel")),
        };

        let record = NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id: user.id,
            channel,
            event_id: event.id,
            event_type: event.event_type.to_string(),
            subject: content.subject.clone(),
            body: content.body.clone(),
            sent_at: OffsetDateTime::now_utc(),
            success: result.success,
            error_detail: result.error,
            external_id: result.external_id,
        };

        let outcome = if record.success { "sent" } else { "failed" };
        metrics::counter!(
            NOTIFICATIONS_TOTAL,
            "channel" => record.channel_label(),
            "outcome" => outcome
        )
        .increment(1);

        if record.success {
            info!(
                event_id = %event.id,
                user_id = user.id,
                channel = record.channel_label(),
                "Notification sent"
            );
        } else {
            warn!(
                event_id = %event.id,
                user_id = user.id,
                channel = record.channel_label(),
                error = record.error_detail.as_deref().unwrap_or_default(),
                "Notification failed"
            );
        }
        record
    }
}

fn required_id(event: &Event, field: &str) -> Result<UserId, ObserverError> {
    event
        .payload
        .get_id(field)
        .ok_or_else(|| ObserverError::invalid_payload(field, "missing or not an id"))
}

#[async_trait]
impl Observer for NotificationDispatcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn react(&self, event: &Event) -> Result<(), ObserverError> {
        let Some(audience) = Audience::for_event(&event.event_type) else {
            debug!(event_type = %event.event_type, "No audience for event, ignoring");
            return Ok(());
        };

        let users = self.recipients(event, audience).await?;
        if users.is_empty() {
            debug!(event_id = %event.id, "No recipients for event");
            return Ok(());
        }

        let content = match self.templates.render_event(&event.event_type, &event.payload) {
            Ok(content) => content,
            Err(e) => return Err(ObserverError::execution(e.to_string())),
        };
        let priority = event
            .payload
            .get_str("priority")
            .and_then(|p| p.parse::<Priority>().ok());
        let channels = self.channels.snapshot().await;

        for user in &users {
            let record = self
                .notify(event, user, &channels, priority, &content)
                .await;
            self.log.record(record).await;
        }
        Ok(())
    }
}
