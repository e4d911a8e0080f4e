//! Server side of a WebSub (PubSubHubbub) style hub.
//!
//! - Subscribers register a callback against a topic; the hub confirms the
//!   request with a challenge/response handshake before storing it.
//! - Publishers hand the hub new content; it is queued and fanned out to every
//!   subscriber of the topic by a background [`NotificationService`], which
//!   bounds how many publications are delivered concurrently.
//! - Deliveries to subscribers that registered a secret carry an HMAC-SHA1
//!   `X-Hub-Signature`; failed deliveries are reported on [`Hub::failures`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubbub_core::{DefaultCryptoFunctions, Hub, HubOptions, InMemorySubscriptionStore};
//!
//! let hub = Hub::new(
//!     HubOptions::default().with_location("https://hub.example/".parse()?),
//!     Arc::new(InMemorySubscriptionStore::new()),
//!     Arc::new(DefaultCryptoFunctions::new()),
//! )?;
//!
//! let result = hub.subscribe(subscription, "verify-token").await?;
//! hub.publish("topic", Some(payload), None)?;
//! ```

pub mod crypto;
pub mod error;
pub mod hub;
pub mod link;
pub mod queue;
pub mod service;
pub mod store;
pub mod types;

pub use crypto::{CryptoFunctions, DefaultCryptoFunctions};
pub use error::{HubError, HubResult};
pub use hub::{Hub, HubOptions, SIGNATURE_HEADER};
pub use link::{LinkHeader, hub_location};
pub use queue::{InMemoryPublishQueue, PublishQueue};
pub use service::{NotificationService, NotificationSettings, PublicationDispatcher};
pub use store::{InMemorySubscriptionStore, SubscriptionStore};
pub use types::*;
