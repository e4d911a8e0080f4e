use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HubError, HubResult};

/// Topic identifier. Compared by exact string equality, never canonicalized.
pub type Topic = String;

/// Longest subscriber secret accepted, in bytes, before encryption.
pub const MAX_SECRET_LEN: usize = 200;

/// A callback registered against a topic.
///
/// Once stored, `secret` holds the encrypted form (passphrase: the callback URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: Topic,
    pub callback: Url,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Subscription {
    /// Create a subscription, rejecting an empty topic or an oversized secret.
    ///
    /// An empty secret is treated as no secret.
    pub fn new(
        topic: impl Into<Topic>,
        callback: Url,
        secret: Option<String>,
    ) -> HubResult<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(HubError::validation("topic is required"));
        }

        let secret = secret.filter(|s| !s.is_empty());
        if let Some(ref s) = secret
            && s.len() > MAX_SECRET_LEN
        {
            return Err(HubError::validation(format!(
                "secret must be at most {MAX_SECRET_LEN} bytes, got {}",
                s.len()
            )));
        }

        Ok(Self {
            topic,
            callback,
            secret,
        })
    }

    /// Whether `other` targets the same (topic, callback) pair.
    pub fn same_target(&self, other: &Subscription) -> bool {
        self.topic == other.topic && self.callback == other.callback
    }
}

/// One unit of content to fan out to a topic's subscribers.
///
/// The payload is reference counted, so every subscriber delivery sends the
/// same bytes without re-reading a consumed body.
#[derive(Debug, Clone)]
pub struct Publication {
    pub topic: Topic,
    pub payload: Bytes,
    pub hub_location: Option<Url>,
}

impl Publication {
    pub fn new(topic: impl Into<Topic>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            hub_location: None,
        }
    }

    pub fn with_hub_location(mut self, location: Url) -> Self {
        self.hub_location = Some(location);
        self
    }
}

/// Outcome of a verification handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResult {
    pub succeeded: bool,
    pub reason: String,
}

impl SubscriptionResult {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            reason: String::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason: reason.into(),
        }
    }
}

/// Raised once for every subscriber delivery that did not succeed.
#[derive(Debug, Clone)]
pub struct PublishNotificationFailure {
    pub subscription: Subscription,
    pub message: String,
}

/// Domain event recorded against a topic by event-sourced stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberEvent {
    pub topic: Topic,
    pub description: String,
}

impl SubscriberEvent {
    pub fn new(topic: impl Into<Topic>, description: impl Into<String>) -> HubResult<Self> {
        let topic = topic.into();
        let description = description.into();
        if topic.is_empty() {
            return Err(HubError::validation("topic is required"));
        }
        if description.is_empty() {
            return Err(HubError::validation(
                "event description cannot be empty",
            ));
        }
        Ok(Self { topic, description })
    }
}
