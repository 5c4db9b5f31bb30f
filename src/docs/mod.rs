//! Named document accessors.
//!
//! Each document kind fixes its path, its commit-message name, its record type
//! and its validation, so callers never build a path or commit message.

mod activity;
mod locks;
pub mod types;

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::identity::Actor;
use crate::store::{DocumentStore, Mapping, StoreError, WriteOutcome};
pub use types::{
    AuditEvent, FileMetadata, LockEntry, Notification, NotificationKind, Part, RevisionRecord,
    RoleAssignment, Settings, SubscriptionMap,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DocError {
    #[error("invalid {document}: {reason}")]
    Invalid {
        document: &'static str,
        reason: String,
    },

    #[error("{file}: file already locked by {holder}")]
    AlreadyLocked { file: String, holder: String },

    #[error("{file}: file is not locked")]
    NotLocked { file: String },

    #[error("{file}: lock owned by {holder}, not {actor}")]
    NotLockOwner {
        file: String,
        holder: String,
        actor: String,
    },

    #[error("notification {id} not found for {user}")]
    NotificationNotFound { user: String, id: String },

    /// The stored document could not be read back, so rewriting it would
    /// drop entries. Fix the file on the remote, then retry.
    #[error("{document} cannot be updated: stored content is unreadable: {reason}")]
    Unreadable {
        document: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DocError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocError::Invalid { .. } | DocError::NotLocked { .. } => ErrorKind::InvalidInput,
            DocError::AlreadyLocked { .. } => ErrorKind::Conflict,
            DocError::NotLockOwner { .. } => ErrorKind::Forbidden,
            DocError::NotificationNotFound { .. } => ErrorKind::NotFound,
            DocError::Unreadable { .. } => ErrorKind::WriteFailed,
            DocError::Store(e) => e.kind(),
        }
    }

    fn invalid(document: &'static str, reason: impl Into<String>) -> Self {
        DocError::Invalid {
            document,
            reason: reason.into(),
        }
    }
}

/// One shared JSON document.
pub trait DocumentKind {
    /// Repository-relative path.
    const PATH: &'static str;
    /// Name used in commit messages.
    const NAME: &'static str;
    type Content: Serialize + DeserializeOwned + Default;

    /// Runs before any git operation on save.
    fn validate(content: &Self::Content) -> Result<(), DocError>;
}

pub struct Locks;
pub struct Metadata;
pub struct Roles;
pub struct SettingsDoc;
pub struct Subscriptions;
pub struct Notifications;
pub struct Parts;
pub struct Audit;

fn require_non_empty(document: &'static str, what: &str, value: &str) -> Result<(), DocError> {
    if value.trim().is_empty() {
        return Err(DocError::invalid(document, format!("{what} must not be empty")));
    }
    Ok(())
}

impl DocumentKind for Locks {
    const PATH: &'static str = "locks.json";
    const NAME: &'static str = "Locks";
    type Content = BTreeMap<String, LockEntry>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        for (file, lock) in content {
            require_non_empty(Self::NAME, "locked file name", file)?;
            require_non_empty(Self::NAME, "lock user", &lock.user)?;
        }
        Ok(())
    }
}

impl DocumentKind for Metadata {
    const PATH: &'static str = "metadata.json";
    const NAME: &'static str = "Metadata";
    type Content = BTreeMap<String, FileMetadata>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        content
            .keys()
            .try_for_each(|file| require_non_empty(Self::NAME, "file name", file))
    }
}

impl DocumentKind for Roles {
    const PATH: &'static str = "roles.json";
    const NAME: &'static str = "Roles";
    type Content = BTreeMap<String, RoleAssignment>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        for (user, assignment) in content {
            require_non_empty(Self::NAME, "username", user)?;
            require_non_empty(Self::NAME, "role", assignment.role())?;
        }
        Ok(())
    }
}

impl DocumentKind for SettingsDoc {
    const PATH: &'static str = "settings.json";
    const NAME: &'static str = "Settings";
    type Content = Settings;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        require_non_empty(Self::NAME, "revision_separator", &content.revision_separator)
    }
}

impl DocumentKind for Subscriptions {
    const PATH: &'static str = "subscriptions.json";
    const NAME: &'static str = "Subscriptions";
    type Content = SubscriptionMap;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        for (part, users) in content {
            require_non_empty(Self::NAME, "part number", part)?;
            for user in users {
                require_non_empty(Self::NAME, "subscriber username", user)?;
            }
        }
        Ok(())
    }
}

impl DocumentKind for Notifications {
    const PATH: &'static str = "notifications.json";
    const NAME: &'static str = "Notifications";
    type Content = BTreeMap<String, Vec<Notification>>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        for (user, items) in content {
            require_non_empty(Self::NAME, "username", user)?;
            for item in items {
                require_non_empty(Self::NAME, "notification message", &item.message)?;
            }
        }
        Ok(())
    }
}

impl DocumentKind for Parts {
    const PATH: &'static str = "parts.json";
    const NAME: &'static str = "Parts";
    type Content = BTreeMap<String, Part>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        content
            .keys()
            .try_for_each(|part| require_non_empty(Self::NAME, "part number", part))
    }
}

impl DocumentKind for Audit {
    const PATH: &'static str = "audit.json";
    const NAME: &'static str = "Audit";
    type Content = Vec<AuditEvent>;

    fn validate(content: &Self::Content) -> Result<(), DocError> {
        for event in content {
            require_non_empty(Self::NAME, "event", &event.event)?;
            require_non_empty(Self::NAME, "actor", &event.by)?;
        }
        Ok(())
    }
}

/// Typed load/save of one document kind through a [`DocumentStore`].
pub struct Accessor<'a, K> {
    store: &'a DocumentStore,
    _kind: PhantomData<K>,
}

impl<'a, K: DocumentKind> Accessor<'a, K> {
    pub fn new(store: &'a DocumentStore) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub fn commit_message(actor: &Actor) -> String {
        format!("App: {} updated by {}", K::NAME, actor)
    }

    pub fn load(&self) -> Result<K::Content, DocError> {
        Ok(self.store.read_as(K::PATH)?)
    }

    /// The document as an untyped mapping.
    pub fn load_raw(&self) -> Result<Mapping, DocError> {
        Ok(self.store.read(K::PATH)?)
    }

    pub fn save(&self, content: &K::Content, actor: &Actor) -> Result<WriteOutcome, DocError> {
        K::validate(content)?;
        Ok(self
            .store
            .write_as(K::PATH, content, &Self::commit_message(actor), actor)?)
    }

    /// Load for a later [`Accessor::save`]. Corrupt or mis-shaped content is
    /// an error here instead of an empty document.
    pub(crate) fn load_for_update(&self) -> Result<K::Content, DocError> {
        let snapshot = self.store.read_snapshot(K::PATH)?;
        snapshot.decode_strict().map_err(|reason| {
            tracing::warn!(path = K::PATH, %reason, "refusing to rewrite unreadable document");
            DocError::Unreadable {
                document: K::NAME,
                reason,
            }
        })
    }

    /// One read-modify-write cycle. Nothing is saved when `f` fails.
    pub(crate) fn update<R>(
        &self,
        actor: &Actor,
        f: impl FnOnce(&mut K::Content) -> Result<R, DocError>,
    ) -> Result<R, DocError> {
        let mut content = self.load_for_update()?;
        let result = f(&mut content)?;
        self.save(&content, actor)?;
        Ok(result)
    }
}

impl DocumentStore {
    /// Accessor for document kind `K`.
    pub fn doc<K: DocumentKind>(&self) -> Accessor<'_, K> {
        Accessor::new(self)
    }

    pub fn locks(&self) -> Accessor<'_, Locks> {
        self.doc()
    }

    pub fn metadata(&self) -> Accessor<'_, Metadata> {
        self.doc()
    }

    pub fn roles(&self) -> Accessor<'_, Roles> {
        self.doc()
    }

    pub fn settings(&self) -> Accessor<'_, SettingsDoc> {
        self.doc()
    }

    pub fn subscriptions(&self) -> Accessor<'_, Subscriptions> {
        self.doc()
    }

    pub fn notifications(&self) -> Accessor<'_, Notifications> {
        self.doc()
    }

    pub fn parts(&self) -> Accessor<'_, Parts> {
        self.doc()
    }

    pub fn audit(&self) -> Accessor<'_, Audit> {
        self.doc()
    }
}
