use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::types::Publication;

/// FIFO of publications waiting to be fanned out.
///
/// `enqueue` never blocks on I/O and `dequeue` returns `None` instead of
/// waiting when nothing is pending.
pub trait PublishQueue: Send + Sync {
    fn enqueue(&self, publication: Publication);

    fn dequeue(&self) -> Option<Publication>;
}

#[derive(Debug, Default)]
pub struct InMemoryPublishQueue {
    pending: Mutex<VecDeque<Publication>>,
}

impl InMemoryPublishQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl PublishQueue for InMemoryPublishQueue {
    fn enqueue(&self, publication: Publication) {
        self.pending.lock().push_back(publication);
    }

    fn dequeue(&self) -> Option<Publication> {
        self.pending.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let queue = InMemoryPublishQueue::new();
        queue.enqueue(Publication::new("a", "1"));
        queue.enqueue(Publication::new("b", "2"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().topic, "a");
        assert_eq!(queue.dequeue().unwrap().topic, "b");
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_no_duplicates() {
        let queue = Arc::new(InMemoryPublishQueue::new());

        let producers: Vec<_> = (0..8)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(Publication::new(format!("{p}-{i}"), "x"));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen = HashSet::new();
        while let Some(publication) = queue.dequeue() {
            assert!(seen.insert(publication.topic));
        }
        assert_eq!(seen.len(), 800);
    }
}
