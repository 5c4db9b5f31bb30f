//! File lock operations over `locks.json`.

use super::types::{LockEntry, now_timestamp};
use super::{Accessor, DocError, Locks};
use crate::identity::Actor;

impl Accessor<'_, Locks> {
    pub fn is_locked(&self, file: &str) -> Result<bool, DocError> {
        Ok(self.load()?.contains_key(file))
    }

    pub fn lock_info(&self, file: &str) -> Result<Option<LockEntry>, DocError> {
        Ok(self.load()?.remove(file))
    }

    /// Lock `file` for `actor`. Refuses if anyone, including `actor`, already
    /// holds it.
    pub fn acquire(&self, file: &str, actor: &Actor, message: &str) -> Result<LockEntry, DocError> {
        if file.trim().is_empty() {
            return Err(DocError::Invalid {
                document: "Locks",
                reason: "locked file name must not be empty".into(),
            });
        }
        let entry = self.update(actor, |locks| {
            if let Some(existing) = locks.get(file) {
                return Err(DocError::AlreadyLocked {
                    file: file.to_string(),
                    holder: existing.user.clone(),
                });
            }
            let entry = LockEntry {
                user: actor.username().to_string(),
                message: message.to_string(),
                timestamp: now_timestamp(),
            };
            locks.insert(file.to_string(), entry.clone());
            Ok(entry)
        })?;
        tracing::info!(file, user = %actor, "lock acquired");
        Ok(entry)
    }

    /// Release `actor`'s lock on `file`.
    pub fn release(&self, file: &str, actor: &Actor) -> Result<LockEntry, DocError> {
        let released = self.update(actor, |locks| {
            let Some(existing) = locks.get(file) else {
                return Err(DocError::NotLocked {
                    file: file.to_string(),
                });
            };
            if existing.user != actor.username() {
                return Err(DocError::NotLockOwner {
                    file: file.to_string(),
                    holder: existing.user.clone(),
                    actor: actor.username().to_string(),
                });
            }
            Ok(locks.remove(file))
        })?;
        tracing::info!(file, user = %actor, "lock released");
        released.ok_or_else(|| DocError::NotLocked {
            file: file.to_string(),
        })
    }
}
