//! Audit trail, notifications and part subscriptions.

use serde_json::Value;
use uuid::Uuid;

use super::types::{AuditEvent, Notification, NotificationKind, now_timestamp};
use super::{Accessor, Audit, DocError, Notifications, Subscriptions};
use crate::identity::Actor;

impl Accessor<'_, Audit> {
    /// Append one event attributed to `actor`.
    pub fn append(&self, event: &str, changes: Value, actor: &Actor) -> Result<AuditEvent, DocError> {
        let record = AuditEvent {
            event: event.to_string(),
            changes,
            by: actor.username().to_string(),
            role: actor.role.clone(),
            timestamp: now_timestamp(),
        };
        self.update(actor, |events| {
            events.push(record.clone());
            Ok(())
        })?;
        Ok(record)
    }
}

impl Accessor<'_, Notifications> {
    pub fn notify(
        &self,
        user: &str,
        kind: NotificationKind,
        message: &str,
        actor: &Actor,
    ) -> Result<Notification, DocError> {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            message: message.to_string(),
            timestamp: now_timestamp(),
            is_read: false,
            kind,
        };
        self.update(actor, |all| {
            all.entry(user.to_string())
                .or_default()
                .push(notification.clone());
            Ok(())
        })?;
        Ok(notification)
    }

    pub fn unread(&self, user: &str) -> Result<Vec<Notification>, DocError> {
        let mut all = self.load()?;
        Ok(all
            .remove(user)
            .unwrap_or_default()
            .into_iter()
            .filter(|n| !n.is_read)
            .collect())
    }

    /// Returns `false` if it was already read; nothing is committed then.
    pub fn mark_read(&self, user: &str, id: &str, actor: &Actor) -> Result<bool, DocError> {
        let mut all = self.load_for_update()?;
        let item = all
            .get_mut(user)
            .and_then(|items| items.iter_mut().find(|n| n.id == id))
            .ok_or_else(|| DocError::NotificationNotFound {
                user: user.to_string(),
                id: id.to_string(),
            })?;
        if item.is_read {
            return Ok(false);
        }
        item.is_read = true;
        self.save(&all, actor)?;
        Ok(true)
    }
}

impl Accessor<'_, Subscriptions> {
    /// Returns `false` if `user` was already subscribed.
    pub fn subscribe(&self, part: &str, user: &str, actor: &Actor) -> Result<bool, DocError> {
        let mut all = self.load_for_update()?;
        let users = all.entry(part.to_string()).or_default();
        if users.iter().any(|u| u == user) {
            return Ok(false);
        }
        users.push(user.to_string());
        self.save(&all, actor)?;
        Ok(true)
    }

    /// Returns `false` if `user` was not subscribed.
    pub fn unsubscribe(&self, part: &str, user: &str, actor: &Actor) -> Result<bool, DocError> {
        let mut all = self.load_for_update()?;
        let Some(users) = all.get_mut(part) else {
            return Ok(false);
        };
        let before = users.len();
        users.retain(|u| u != user);
        if users.len() == before {
            return Ok(false);
        }
        if users.is_empty() {
            all.remove(part);
        }
        self.save(&all, actor)?;
        Ok(true)
    }

    pub fn subscribers(&self, part: &str) -> Result<Vec<String>, DocError> {
        Ok(self.load()?.remove(part).unwrap_or_default())
    }
}
