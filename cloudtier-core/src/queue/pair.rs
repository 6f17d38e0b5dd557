use std::sync::Arc;

use super::{Doorbell, Queue};

/// Primary/secondary queues feeding one consumer. Either side may be absent.
///
/// Both queues ring the same doorbell, so a consumer that found them empty
/// sleeps until either receives a push.
#[derive(Debug, Clone)]
pub struct QueuePair {
    primary: Option<Arc<Queue>>,
    secondary: Option<Arc<Queue>>,
    doorbell: Arc<Doorbell>,
}

impl QueuePair {
    pub fn new(
        primary: Option<Arc<Queue>>,
        secondary: Option<Arc<Queue>>,
    ) -> Self {
        let doorbell = Arc::new(Doorbell::new());
        for queue in primary.iter().chain(secondary.iter()) {
            queue.subscribe(Arc::clone(&doorbell));
        }
        Self {
            primary,
            secondary,
            doorbell,
        }
    }

    pub fn primary(&self) -> Option<&Arc<Queue>> {
        self.primary.as_ref()
    }

    pub fn secondary(&self) -> Option<&Arc<Queue>> {
        self.secondary.as_ref()
    }

    pub fn doorbell(&self) -> &Arc<Doorbell> {
        &self.doorbell
    }

    /// Wakes both the idle consumer and any producer stuck on backpressure.
    pub fn wake(&self) {
        self.doorbell.ring();
        for queue in self.primary.iter().chain(self.secondary.iter()) {
            queue.wake_all();
        }
    }
}
