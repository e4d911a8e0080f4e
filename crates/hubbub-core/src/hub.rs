//! The hub: verifies subscriber intent, accepts publications and fans them out.
//!
//! ```text
//! subscribe ──► verify intent (GET callback) ──► encrypt secret ──► store
//!
//! publish ──► queue ──► NotificationService ──► publish_direct
//!                                                   │
//!                                   POST payload to every subscriber
//!                                                   │
//!                                    failures ──► broadcast stream
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use parking_lot::RwLock;
use reqwest::{Client, header};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::crypto::CryptoFunctions;
use crate::error::{HubError, HubResult};
use crate::queue::{InMemoryPublishQueue, PublishQueue};
use crate::service::{
    DEFAULT_IDLE_DELAY, DEFAULT_NOTIFICATION_THRESHOLD, NotificationService,
    NotificationSettings, PublicationDispatcher,
};
use crate::store::SubscriptionStore;
use crate::types::{Publication, PublishNotificationFailure, Subscription, SubscriptionResult};

pub const TOPIC_PARAM: &str = "hub.topic";
pub const VERIFY_TOKEN_PARAM: &str = "hub.verify_token";
pub const MODE_PARAM: &str = "hub.mode";
pub const CHALLENGE_PARAM: &str = "hub.challenge";

/// Header carrying the HMAC-SHA1 payload signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

const MISSING_CHALLENGE: &str = "Could not find challenge in subscriber response.";
const CHALLENGE_FAILED: &str = "Challenge failed";

#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Public location of this hub, advertised in `Link: rel="hub"`
    pub location: Option<Url>,
    /// Maximum number of publications fanned out concurrently
    pub notification_threshold: usize,
    /// Poll delay of the notification service when the queue is empty
    pub idle_delay: Duration,
    /// Total timeout of any outbound request
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the failure broadcast channel
    pub failure_buffer: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            location: None,
            notification_threshold: DEFAULT_NOTIFICATION_THRESHOLD,
            idle_delay: DEFAULT_IDLE_DELAY,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            failure_buffer: 256,
        }
    }
}

impl HubOptions {
    pub fn with_location(mut self, location: Url) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_notification_threshold(mut self, threshold: usize) -> Self {
        self.notification_threshold = threshold;
        self
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn notification_settings(&self) -> NotificationSettings {
        NotificationSettings {
            threshold: self.notification_threshold,
            idle_delay: self.idle_delay,
        }
    }
}

pub struct Hub {
    options: HubOptions,
    store: Arc<dyn SubscriptionStore>,
    crypto: Arc<dyn CryptoFunctions>,
    notifications: NotificationService,
    /// Taken on shutdown
    client: RwLock<Option<Client>>,
    failures: broadcast::Sender<PublishNotificationFailure>,
    disposed: AtomicBool,
}

impl Hub {
    /// Create a hub backed by an in-memory publish queue.
    ///
    /// Starts the notification service, so it must be called from within a
    /// Tokio runtime.
    pub fn new(
        options: HubOptions,
        store: Arc<dyn SubscriptionStore>,
        crypto: Arc<dyn CryptoFunctions>,
    ) -> HubResult<Arc<Self>> {
        Self::with_queue(options, store, crypto, Arc::new(InMemoryPublishQueue::new()))
    }

    /// Create a hub draining the given queue.
    pub fn with_queue(
        options: HubOptions,
        store: Arc<dyn SubscriptionStore>,
        crypto: Arc<dyn CryptoFunctions>,
        queue: Arc<dyn PublishQueue>,
    ) -> HubResult<Arc<Self>> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| HubError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(options, store, crypto, queue, client))
    }

    /// Create a hub using a preconfigured HTTP client.
    pub fn with_client(
        options: HubOptions,
        store: Arc<dyn SubscriptionStore>,
        crypto: Arc<dyn CryptoFunctions>,
        queue: Arc<dyn PublishQueue>,
        client: Client,
    ) -> Arc<Self> {
        let (failures, _) = broadcast::channel(options.failure_buffer.max(1));
        let settings = options.notification_settings();

        let hub = Arc::new_cyclic(|hub: &Weak<Hub>| {
            let dispatcher: Weak<dyn PublicationDispatcher> = hub.clone();
            Self {
                options,
                store,
                crypto,
                notifications: NotificationService::new(dispatcher, queue, settings),
                client: RwLock::new(Some(client)),
                failures,
                disposed: AtomicBool::new(false),
            }
        });

        hub.notifications.start();
        info!(
            location = ?hub.options.location.as_ref().map(Url::as_str),
            threshold = hub.options.notification_threshold,
            "Hub started"
        );
        hub
    }

    pub fn location(&self) -> Option<&Url> {
        self.options.location.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Observe per-subscriber delivery failures.
    ///
    /// Each receiver sees one record for every failure raised after it
    /// subscribed.
    pub fn failures(&self) -> broadcast::Receiver<PublishNotificationFailure> {
        self.failures.subscribe()
    }

    /// Verify the subscriber's intent and, if confirmed, store the subscription.
    ///
    /// A failed handshake is reported in the returned [`SubscriptionResult`]
    /// and never touches the store.
    pub async fn subscribe(
        &self,
        mut subscription: Subscription,
        verify_token: &str,
    ) -> HubResult<SubscriptionResult> {
        self.check_disposed()?;

        let result = self.verify_intent(&subscription, verify_token).await?;
        if !result.succeeded {
            warn!(
                topic = %subscription.topic,
                callback = %subscription.callback,
                reason = %result.reason,
                "Subscription verification failed"
            );
            return Ok(result);
        }

        if let Some(secret) = subscription.secret.take() {
            subscription.secret =
                Some(self.crypto.encrypt(&secret, subscription.callback.as_str())?);
        }

        self.store.subscribe(&subscription).await?;

        info!(
            topic = %subscription.topic,
            callback = %subscription.callback,
            signed = subscription.secret.is_some(),
            "Subscription verified"
        );
        Ok(result)
    }

    /// Accept a publication for asynchronous delivery.
    ///
    /// Only validates and enqueues; no network I/O happens on this path.
    pub fn publish(
        &self,
        topic: &str,
        payload: Option<Bytes>,
        hub_location: Option<Url>,
    ) -> HubResult<()> {
        self.check_disposed()?;

        if topic.is_empty() {
            return Err(HubError::validation("topic is required"));
        }
        let Some(payload) = payload else {
            return Err(HubError::validation("payload is required"));
        };

        let mut publication = Publication::new(topic, payload);
        if let Some(requested) = hub_location {
            self.ensure_location(&requested)?;
            publication.hub_location = Some(requested);
        }

        debug!(topic, bytes = publication.payload.len(), "Publication queued");
        self.notifications.enqueue(publication);
        Ok(())
    }

    /// Deliver a publication to every current subscriber of its topic.
    ///
    /// Completes once every delivery has finished. Individual delivery
    /// failures are broadcast on [`Hub::failures`] and do not fail the call.
    pub async fn publish_direct(&self, publication: Publication) -> HubResult<()> {
        self.check_disposed()?;

        if let Some(ref requested) = publication.hub_location {
            self.ensure_location(requested)?;
        }

        let subscriptions = self.store.get_subscriptions(&publication.topic).await?;
        if subscriptions.is_empty() {
            debug!(topic = %publication.topic, "No subscribers for topic");
            return Ok(());
        }

        let client = self.client()?;
        let outcomes = join_all(
            subscriptions
                .iter()
                .map(|subscription| self.notify(&client, &publication, subscription)),
        )
        .await;

        let failed = outcomes.iter().filter(|delivered| !**delivered).count();
        info!(
            topic = %publication.topic,
            subscribers = subscriptions.len(),
            failed,
            "Publication fanned out"
        );
        Ok(())
    }

    /// Stop the notification service and release the HTTP client.
    ///
    /// Every later operation fails with [`HubError::Disposed`].
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notifications.stop();
        self.client.write().take();
        info!("Hub shut down");
    }

    fn check_disposed(&self) -> HubResult<()> {
        if self.is_disposed() {
            Err(HubError::Disposed)
        } else {
            Ok(())
        }
    }

    fn client(&self) -> HubResult<Client> {
        self.client.read().clone().ok_or(HubError::Disposed)
    }

    fn ensure_location(&self, requested: &Url) -> HubResult<()> {
        match self.options.location {
            Some(ref expected) if same_location(expected, requested) => Ok(()),
            ref expected => Err(HubError::HubMismatch {
                expected: expected
                    .as_ref()
                    .map(Url::to_string)
                    .unwrap_or_else(|| "<unset>".to_string()),
                requested: requested.clone(),
            }),
        }
    }

    fn generate_challenge(&self, callback: &Url) -> HubResult<String> {
        let unique = format!(
            "{callback}|{}|{}",
            Uuid::new_v4(),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        self.crypto.hmac_sha1_hex(unique.as_bytes(), &unique)
    }

    async fn verify_intent(
        &self,
        subscription: &Subscription,
        verify_token: &str,
    ) -> HubResult<SubscriptionResult> {
        let challenge = self.generate_challenge(&subscription.callback)?;
        let url = verification_url(subscription, verify_token, &challenge);
        let client = self.client()?;

        let response = match client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(SubscriptionResult::failure(format!(
                    "Could not reach callback: {e}"
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(SubscriptionResult::failure(format!(
                "Invalid response code ({})",
                status.as_u16()
            )));
        }

        let body = response.text().await.unwrap_or_default();
        if body.is_empty() {
            return Ok(SubscriptionResult::failure(MISSING_CHALLENGE));
        }

        if body.trim_matches('"') == challenge {
            Ok(SubscriptionResult::success())
        } else {
            Ok(SubscriptionResult::failure(CHALLENGE_FAILED))
        }
    }

    /// Deliver to one subscriber, raising a failure record if it does not succeed.
    async fn notify(
        &self,
        client: &Client,
        publication: &Publication,
        subscription: &Subscription,
    ) -> bool {
        match self.deliver(client, publication, subscription).await {
            Ok(()) => true,
            Err(message) => {
                self.raise_failure(subscription, message);
                false
            }
        }
    }

    async fn deliver(
        &self,
        client: &Client,
        publication: &Publication,
        subscription: &Subscription,
    ) -> Result<(), String> {
        let mut request = client
            .post(subscription.callback.clone())
            .body(publication.payload.clone());

        let hub = publication
            .hub_location
            .as_ref()
            .or(self.options.location.as_ref());
        if let Some(hub) = hub {
            request = request.header(
                header::LINK,
                format!(
                    "<{hub}>; rel=\"hub\", <{}>; rel=\"self\"",
                    publication.topic
                ),
            );
        }

        if let Some(ref sealed) = subscription.secret {
            let signature = self
                .crypto
                .decrypt(sealed, subscription.callback.as_str())
                .and_then(|secret| self.crypto.hmac_sha1_hex(&publication.payload, &secret))
                .map_err(|e| format!("Could not sign payload: {e}"))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| e.to_string())?;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let status = response.status();
        if status.is_success() {
            debug!(
                topic = %publication.topic,
                callback = %subscription.callback,
                status = status.as_u16(),
                elapsed_ms,
                "Notification delivered"
            );
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            if body.is_empty() {
                Err(status.as_u16().to_string())
            } else {
                Err(format!("{}:{}", status.as_u16(), body))
            }
        }
    }

    fn raise_failure(&self, subscription: &Subscription, message: String) {
        warn!(
            topic = %subscription.topic,
            callback = %subscription.callback,
            error = %message,
            "Notification delivery failed"
        );
        // No receivers means nobody is observing failures.
        let _ = self.failures.send(PublishNotificationFailure {
            subscription: subscription.clone(),
            message,
        });
    }
}

#[async_trait]
impl PublicationDispatcher for Hub {
    async fn publish_direct(&self, publication: Publication) -> HubResult<()> {
        Hub::publish_direct(self, publication).await
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("options", &self.options)
            .field("running", &self.notifications.is_running())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Whether two hub locations name the same endpoint.
///
/// A trailing `/` on the path is not significant, so `http://h/websub/` and
/// `http://h/websub` are the same hub.
pub fn same_location(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host() == b.host()
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        && a.query() == b.query()
}

/// Callback URL with the verification parameters appended to any existing query.
pub fn verification_url(subscription: &Subscription, verify_token: &str, challenge: &str) -> Url {
    let mut url = subscription.callback.clone();
    url.query_pairs_mut()
        .append_pair(TOPIC_PARAM, &subscription.topic)
        .append_pair(VERIFY_TOKEN_PARAM, verify_token)
        .append_pair(MODE_PARAM, "subscribe")
        .append_pair(CHALLENGE_PARAM, challenge);
    url
}
