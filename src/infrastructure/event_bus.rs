//! Generic pub/sub fan-out, grounded on the teacher's
//! `infrastructure::event_bus::EventBus` (`Arc<RwLock<Vec<Arc<dyn EventListener>>>>>`).
//! Used to fan audit-worthy domain events out to whatever observers the
//! deployment wires up (metrics, external notification) without coupling
//! producers to a concrete sink.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, category: &str, payload_json: &str);
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub async fn publish(&self, category: &str, payload_json: &str) {
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener.on_event(category, payload_json).await;
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener(Arc<AtomicUsize>);
    #[async_trait]
    impl EventListener for CountingListener {
        async fn on_event(&self, _category: &str, _payload_json: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(CountingListener(counter.clone()))).await;
        bus.subscribe(Arc::new(CountingListener(counter.clone()))).await;
        bus.publish("test", "{}").await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(bus.subscriber_count().await, 2);
    }
}
