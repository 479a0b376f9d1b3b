//! Subscriptions and change notifications
//!
//! A [`SubscriptionEvent`] is a plain value handed to the registry by value;
//! it has no lifetime of its own beyond the registration call. Delivery is
//! in-process over a `tokio::sync::broadcast` channel.

use crate::{Result, StorageError};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default capacity of the notification channel
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// What a subscription covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SubscriptionType {
    /// Every key of a bucket
    Bucket = 1,
    /// Exactly one key
    Object = 2,
    /// Every key starting with the given key
    Prefix = 3,
}

impl TryFrom<i32> for SubscriptionType {
    type Error = StorageError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Self::Bucket),
            2 => Ok(Self::Object),
            3 => Ok(Self::Prefix),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown subscription type: {other}"
            ))),
        }
    }
}

impl From<SubscriptionType> for i32 {
    fn from(value: SubscriptionType) -> Self {
        value as i32
    }
}

/// One registration request
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionEvent {
    pub bucket: String,
    pub key: String,
    pub subscription_type: SubscriptionType,
}

impl SubscriptionEvent {
    /// Build an event; the key of a bucket subscription is ignored
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        subscription_type: SubscriptionType,
    ) -> Self {
        let key = match subscription_type {
            SubscriptionType::Bucket => String::new(),
            _ => key.into(),
        };
        Self {
            bucket: bucket.into(),
            key,
            subscription_type,
        }
    }

    /// Reject events that cannot match anything
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(StorageError::InvalidArgument(
                "subscription bucket must not be empty".to_string(),
            ));
        }
        if self.subscription_type == SubscriptionType::Object && self.key.is_empty() {
            return Err(StorageError::InvalidArgument(
                "object subscription requires a key".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a change to `bucket`/`key` falls under this subscription
    pub fn matches(&self, bucket: &str, key: &str) -> bool {
        if self.bucket != bucket {
            return false;
        }
        match self.subscription_type {
            SubscriptionType::Bucket => true,
            SubscriptionType::Object => self.key == key,
            SubscriptionType::Prefix => key.starts_with(&self.key),
        }
    }
}

/// Kind of change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Object created, sealed, or written by rename/copy
    CreateOrUpdate,
    /// Object removed, or renamed away
    Delete,
}

/// A change delivered to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub bucket: String,
    pub key: String,
    pub kind: ChangeKind,
}

/// Registered subscriptions and the channel changes are published on
pub(crate) struct SubscriptionRegistry {
    subscriptions: DashSet<SubscriptionEvent>,
    sender: broadcast::Sender<ChangeNotification>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            subscriptions: DashSet::new(),
            sender,
        }
    }

    /// Returns false if the same subscription was already registered
    pub(crate) fn register(&self, event: SubscriptionEvent) -> bool {
        self.subscriptions.insert(event)
    }

    /// Returns false if no such subscription was registered
    pub(crate) fn unregister(&self, event: &SubscriptionEvent) -> bool {
        self.subscriptions.remove(event).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn receiver(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    /// Publish a change if any subscription covers it
    pub(crate) fn publish(&self, bucket: &str, key: &str, kind: ChangeKind) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        if !self.subscriptions.iter().any(|s| s.matches(bucket, key)) {
            return;
        }
        trace!(bucket, key, ?kind, "publishing change");
        // No receivers left is not an error for the publisher
        let _ = self.sender.send(ChangeNotification {
            bucket: bucket.to_string(),
            key: key.to_string(),
            kind,
        });
    }
}
