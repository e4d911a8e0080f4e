//! Background notification service.
//!
//! Drains the publish queue and hands every publication to a
//! [`PublicationDispatcher`] on its own task. A counting semaphore caps the
//! number of publications being fanned out at once across the whole service;
//! a slot is only returned when the dispatch it guards has finished.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use crate::error::HubResult;
use crate::queue::PublishQueue;
use crate::types::Publication;

/// Default cap on concurrently dispatched publications.
pub const DEFAULT_NOTIFICATION_THRESHOLD: usize = 10;

/// Default wait before polling an empty queue again.
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(3000);

/// Performs the actual fan-out of a dequeued publication.
#[async_trait]
pub trait PublicationDispatcher: Send + Sync {
    async fn publish_direct(&self, publication: Publication) -> HubResult<()>;
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    /// Maximum number of publications in flight at once
    pub threshold: usize,
    /// Delay before polling again when the queue is empty
    pub idle_delay: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_NOTIFICATION_THRESHOLD,
            idle_delay: DEFAULT_IDLE_DELAY,
        }
    }
}

/// Queue-draining worker with a `Stopped -> Running -> Stopped` lifecycle.
///
/// The service also implements [`PublishQueue`] by delegating to the queue it
/// wraps, so producers can enqueue through it directly.
pub struct NotificationService {
    dispatcher: Weak<dyn PublicationDispatcher>,
    queue: Arc<dyn PublishQueue>,
    limiter: Arc<Semaphore>,
    idle_delay: Duration,
    /// Present while running; dropping or signalling it stops the loop
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl NotificationService {
    /// Create a stopped service. The dispatcher is held weakly so that the
    /// service can be owned by the dispatcher itself.
    pub fn new(
        dispatcher: Weak<dyn PublicationDispatcher>,
        queue: Arc<dyn PublishQueue>,
        settings: NotificationSettings,
    ) -> Self {
        let threshold = settings.threshold.max(1);
        Self {
            dispatcher,
            queue,
            limiter: Arc::new(Semaphore::new(threshold)),
            idle_delay: settings.idle_delay,
            shutdown: Mutex::new(None),
        }
    }

    /// Start draining the queue on a background task.
    ///
    /// Must be called from within a Tokio runtime. Starting a running service
    /// does nothing.
    pub fn start(&self) {
        let mut shutdown = self.shutdown.lock();
        if shutdown.is_some() {
            return;
        }

        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);

        let worker = DispatchLoop {
            dispatcher: self.dispatcher.clone(),
            queue: self.queue.clone(),
            limiter: self.limiter.clone(),
            idle_delay: self.idle_delay,
        };
        tokio::spawn(worker.run(rx));
    }

    /// Ask the loop to exit at its next iteration boundary.
    ///
    /// In-flight dispatches are not interrupted.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().is_some()
    }

    /// Free dispatch slots right now.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }
}

impl PublishQueue for NotificationService {
    fn enqueue(&self, publication: Publication) {
        self.queue.enqueue(publication);
    }

    fn dequeue(&self) -> Option<Publication> {
        self.queue.dequeue()
    }
}

impl Drop for NotificationService {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DispatchLoop {
    dispatcher: Weak<dyn PublicationDispatcher>,
    queue: Arc<dyn PublishQueue>,
    limiter: Arc<Semaphore>,
    idle_delay: Duration,
}

impl DispatchLoop {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Notification service started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let Some(publication) = self.queue.dequeue() else {
                // Nothing pending: give publishers a chance to fill the queue.
                tokio::select! {
                    biased;

                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.idle_delay) => {}
                }
                continue;
            };

            let permit = match self.limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    error!(topic = %publication.topic, "Dispatch limiter closed, dropping publication");
                    break;
                }
            };

            let Some(dispatcher) = self.dispatcher.upgrade() else {
                warn!(topic = %publication.topic, "Dispatcher is gone, dropping publication");
                break;
            };

            debug!(topic = %publication.topic, "Dispatching publication");
            tokio::spawn(async move {
                // Released when the task ends, including on error or panic.
                let _permit = permit;
                let topic = publication.topic.clone();
                if let Err(e) = dispatcher.publish_direct(publication).await {
                    error!(topic = %topic, error = %e, "Publication dispatch failed");
                }
            });
        }

        info!("Notification service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryPublishQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dispatcher whose deliveries block until the test releases them.
    struct GatedDispatcher {
        started: AtomicUsize,
        finished: AtomicUsize,
        gate: Semaphore,
    }

    impl GatedDispatcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                gate: Semaphore::new(0),
            })
        }

        fn open() -> Arc<Self> {
            let dispatcher = Self::new();
            dispatcher.gate.add_permits(Semaphore::MAX_PERMITS / 2);
            dispatcher
        }
    }

    #[async_trait]
    impl PublicationDispatcher for GatedDispatcher {
        async fn publish_direct(&self, _publication: Publication) -> HubResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn settings(threshold: usize) -> NotificationSettings {
        NotificationSettings {
            threshold,
            idle_delay: Duration::from_millis(5),
        }
    }

    fn service(
        dispatcher: &Arc<GatedDispatcher>,
        queue: Arc<InMemoryPublishQueue>,
        threshold: usize,
    ) -> NotificationService {
        let dispatcher: Arc<dyn PublicationDispatcher> = dispatcher.clone();
        NotificationService::new(Arc::downgrade(&dispatcher), queue, settings(threshold))
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_start_drains_queue() {
        let dispatcher = GatedDispatcher::open();
        let queue = Arc::new(InMemoryPublishQueue::new());
        let service = service(&dispatcher, queue.clone(), 10);

        service.enqueue(Publication::new("foo", "test payload"));
        service.start();

        wait_until(|| dispatcher.finished.load(Ordering::SeqCst) == 1).await;
        assert!(queue.is_empty());
        assert!(service.is_running());
    }

    #[tokio::test]
    async fn test_threshold_one_serializes_dispatch() {
        let dispatcher = GatedDispatcher::new();
        let queue = Arc::new(InMemoryPublishQueue::new());
        let service = service(&dispatcher, queue.clone(), 1);

        service.enqueue(Publication::new("first", "1"));
        service.enqueue(Publication::new("second", "2"));
        service.start();

        wait_until(|| dispatcher.started.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // second publication is dequeued but waits for the only slot
        assert_eq!(dispatcher.started.load(Ordering::SeqCst), 1);
        assert_eq!(service.available_slots(), 0);

        dispatcher.gate.add_permits(1);
        wait_until(|| dispatcher.started.load(Ordering::SeqCst) == 2).await;
        assert_eq!(dispatcher.finished.load(Ordering::SeqCst), 1);

        dispatcher.gate.add_permits(1);
        wait_until(|| dispatcher.finished.load(Ordering::SeqCst) == 2).await;
        wait_until(|| service.available_slots() == 1).await;
    }

    #[tokio::test]
    async fn test_stop_halts_dequeues_until_restart() {
        let dispatcher = GatedDispatcher::open();
        let queue = Arc::new(InMemoryPublishQueue::new());
        let service = service(&dispatcher, queue.clone(), 10);

        service.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.stop();
        assert!(!service.is_running());

        service.enqueue(Publication::new("foo", "test payload"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.len(), 1);
        assert_eq!(dispatcher.started.load(Ordering::SeqCst), 0);

        service.start();
        wait_until(|| dispatcher.finished.load(Ordering::SeqCst) == 1).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_delegate_to_queue() {
        let dispatcher = GatedDispatcher::open();
        let queue = Arc::new(InMemoryPublishQueue::new());
        let service = service(&dispatcher, queue.clone(), 10);

        service.enqueue(Publication::new("foo", "test payload"));
        assert_eq!(queue.len(), 1);

        let publication = service.dequeue().unwrap();
        assert_eq!(publication.topic, "foo");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_zero_threshold_still_dispatches() {
        let dispatcher = GatedDispatcher::open();
        let queue = Arc::new(InMemoryPublishQueue::new());
        let service = service(&dispatcher, queue, 0);

        service.enqueue(Publication::new("foo", "x"));
        service.start();
        wait_until(|| dispatcher.finished.load(Ordering::SeqCst) == 1).await;
    }
}
