//! Live progress fan-out for fetch and test lifecycles
//!
//! Observers subscribe to a shared bus and receive every event as a
//! serialized JSON envelope. Delivery is best effort: a broadcast never
//! blocks and never fails, and an observer whose channel has gone away
//! is dropped while the rest keep receiving.

use crate::scout::models::{CheckResult, ConfigStats, ConfigStatus};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// One progress event. The serialized envelope carries a `type` tag and
/// a `timestamp` injected at broadcast time.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Connected { message: String },
    FetchStarted { source: String },
    FetchCompleted { configs_count: usize },
    FetchError { error: String },
    TestStarted { configs_count: usize },
    TestProgress { config_id: usize, message: String },
    TestCompleted { stats: ConfigStats },
    TestError { error: String },
    SingleTestProgress { config_id: usize, message: String },
    SingleTestCompleted { config_id: usize, result: ResultSummary },
}

/// The slice of a check result exposed on single-test completion
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub status: ConfigStatus,
    pub ping: Option<f64>,
    pub response_time: Option<f64>,
    pub error_message: Option<String>,
}

impl From<&CheckResult> for ResultSummary {
    fn from(result: &CheckResult) -> Self {
        Self {
            status: result.status,
            ping: result.ping,
            response_time: result.response_time,
            error_message: result.error_message.clone(),
        }
    }
}

type ObserverMap = HashMap<u64, UnboundedSender<String>>;

/// Fan-out bus for progress events
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    observers: Mutex<ObserverMap>,
}

/// A live observer registration. Dropping the subscription detaches the
/// observer; the bus also prunes it on the next broadcast after the
/// receiving side goes away.
pub struct Subscription {
    id: u64,
    events: UnboundedReceiver<String>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next envelope. Returns None once detached.
    pub async fn recv(&mut self) -> Option<String> {
        self.events.recv().await
    }

    /// Non-blocking poll for the next envelope
    pub fn try_recv(&mut self) -> Option<String> {
        self.events.try_recv().ok()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer. The greeting event goes to this observer
    /// only, not to the rest of the bus.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let greeting = envelope(&ProgressEvent::Connected {
            message: "connection established".to_string(),
        });
        let _ = tx.send(greeting);
        self.observers().insert(id, tx);
        debug!(observer = id, "observer subscribed");
        Subscription { id, events: rx }
    }

    /// Detach an observer eagerly instead of waiting for pruning
    pub fn unsubscribe(&self, id: u64) {
        self.observers().remove(&id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Serialize once and deliver to every observer still listening
    pub fn broadcast(&self, event: &ProgressEvent) {
        let mut observers = self.observers();
        if observers.is_empty() {
            return;
        }
        let message = envelope(event);
        let mut gone = Vec::new();
        for (id, tx) in observers.iter() {
            if tx.send(message.clone()).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            debug!(observer = id, "dropping disconnected observer");
            observers.remove(&id);
        }
    }

    fn observers(&self) -> MutexGuard<'_, ObserverMap> {
        // held only for bookkeeping, nothing inside can panic
        self.inner
            .observers
            .lock()
            .expect("observer set lock poisoned")
    }
}

/// Serialize an event and stamp it with the broadcast time
fn envelope(event: &ProgressEvent) -> String {
    let mut value =
        serde_json::to_value(event).unwrap_or_else(|_| serde_json::json!({ "type": "unknown" }));
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(Utc::now().to_rfc3339()),
        );
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(envelope: &str) -> Value {
        serde_json::from_str(envelope).unwrap()
    }

    #[test]
    fn test_broadcast_without_observers_is_noop() {
        let bus = EventBus::new();
        bus.broadcast(&ProgressEvent::FetchStarted {
            source: "all".to_string(),
        });
        assert_eq!(bus.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_gets_greeting_first() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        let first = parse(&sub.recv().await.unwrap());
        assert_eq!(first["type"], "connected");
        assert!(first["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_greeting_goes_only_to_new_observer() {
        let bus = EventBus::new();
        let mut early = bus.subscribe();
        let _ = early.recv().await.unwrap();

        let mut late = bus.subscribe();
        let _ = late.recv().await.unwrap();
        bus.broadcast(&ProgressEvent::TestStarted { configs_count: 1 });

        // the early observer sees the broadcast, not the late greeting
        let next = parse(&early.recv().await.unwrap());
        assert_eq!(next["type"], "test_started");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_observer() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let _ = a.recv().await.unwrap();
        let _ = b.recv().await.unwrap();

        bus.broadcast(&ProgressEvent::TestProgress {
            config_id: 3,
            message: "testing ping...".to_string(),
        });

        for sub in [&mut a, &mut b] {
            let event = parse(&sub.recv().await.unwrap());
            assert_eq!(event["type"], "test_progress");
            assert_eq!(event["config_id"], 3);
            assert_eq!(event["message"], "testing ping...");
        }
    }

    #[tokio::test]
    async fn test_dead_observer_is_pruned_and_rest_survive() {
        let bus = EventBus::new();
        let dead = bus.subscribe();
        let mut alive = bus.subscribe();
        let _ = alive.recv().await.unwrap();
        assert_eq!(bus.observer_count(), 2);

        drop(dead);
        bus.broadcast(&ProgressEvent::FetchCompleted { configs_count: 9 });

        assert_eq!(bus.observer_count(), 1);
        let event = parse(&alive.recv().await.unwrap());
        assert_eq!(event["type"], "fetch_completed");
        assert_eq!(event["configs_count"], 9);
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches_observer() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        assert_eq!(bus.observer_count(), 1);
        bus.unsubscribe(sub.id());
        assert_eq!(bus.observer_count(), 0);
    }

    #[test]
    fn test_completed_envelope_carries_stats() {
        let stats = ConfigStats {
            total: 5,
            active: 2,
            slow: 1,
            dead: 2,
            untested: 0,
        };
        let event = parse(&envelope(&ProgressEvent::TestCompleted { stats }));
        assert_eq!(event["type"], "test_completed");
        assert_eq!(event["stats"]["active"], 2);
        assert_eq!(event["stats"]["total"], 5);
    }

    #[test]
    fn test_single_test_envelope_shape() {
        let result = CheckResult::dead(7, "no response to reachability probe");
        let event = parse(&envelope(&ProgressEvent::SingleTestCompleted {
            config_id: 7,
            result: ResultSummary::from(&result),
        }));
        assert_eq!(event["type"], "single_test_completed");
        assert_eq!(event["config_id"], 7);
        assert_eq!(event["result"]["status"], "dead");
        assert!(event["result"]["ping"].is_null());
        assert_eq!(
            event["result"]["error_message"],
            "no response to reachability probe"
        );
    }
}
