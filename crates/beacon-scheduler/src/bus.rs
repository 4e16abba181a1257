//! In-process event bus.

use async_trait::async_trait;
use beacon_core::Result;
use beacon_core::events::Event;
use beacon_core::ports::{EventBus, EventStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 1024;

/// Event bus over a tokio broadcast channel. Subjects are dotted; patterns
/// use `*` for one token and a trailing `>` for any remainder.
#[derive(Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<Event>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let subject = event.subject();
        match self.sender.send(event) {
            Ok(receivers) => debug!(%subject, receivers, "Published event"),
            Err(_) => debug!(%subject, "Published event with no subscribers"),
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<EventStream> {
        debug!(pattern, "Subscribing to events");
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let stream = futures::stream::unfold((receiver, pattern), |(mut rx, pattern)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if subject_matches(&pattern, &event.subject()) => {
                        return Some((event, (rx, pattern)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%pattern, skipped, "Event subscriber lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Match a dotted subject against a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
