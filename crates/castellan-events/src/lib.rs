//! Core event bus for the Castellan console.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers reconnect (e.g. SSE clients that
//! supply `Last-Event-ID`). Internally it uses `tokio::broadcast` with a bounded
//! buffer; when the channel overflows, the oldest events are dropped.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};

/// Identifier assigned to each event emitted by the console.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Lifecycle state of the managed media service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Not running.
    Stopped,
    /// Starting from a stopped state.
    Starting,
    /// Healthy.
    Running,
    /// A stop/start cycle is in flight.
    Restarting,
    /// The last cycle did not come back healthy.
    Failed,
}

impl ServiceState {
    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed domain events surfaced across the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A new configuration document was committed to the live path.
    ConfigCommitted {
        /// Store revision after the commit.
        revision: u64,
        /// Backup taken immediately before the commit.
        backup: String,
        /// Mutation flavour (`structured`, `raw`, `restore`).
        kind: String,
    },
    /// The managed service moved to a new state.
    ServiceStateChanged {
        /// New state.
        state: ServiceState,
    },
    /// The live document was reverted to a backup after a failed restart.
    RollbackPerformed {
        /// Backup that was restored.
        backup: String,
    },
    /// A restart cycle ended without a healthy service.
    ServiceFailed {
        /// Operator-facing failure description.
        message: String,
        /// Whether a configuration rollback was attempted before giving up.
        rollback_attempted: bool,
    },
    /// Firewall reconciliation changed port rules.
    FirewallReconciled {
        /// Ports opened.
        added: Vec<u16>,
        /// Ports closed.
        removed: Vec<u16>,
    },
    /// A firewall command failed after the configuration was already committed.
    FirewallWarning {
        /// Port the command targeted, when one applies.
        port: Option<u16>,
        /// Operator-facing detail.
        message: String,
    },
    /// A newer console release was published.
    UpdateAvailable {
        /// Release tag.
        version: String,
    },
    /// A console release was swapped into place and came back healthy.
    UpdateApplied {
        /// Release tag now installed.
        version: String,
    },
    /// The console binary was reverted to the retained previous artifact.
    UpdateRolledBack {
        /// Release tag that was abandoned.
        version: String,
        /// Why the rollback happened.
        reason: String,
    },
    /// A self-registered console account awaits approval.
    RegistrationPending {
        /// Requested username.
        username: String,
    },
}

impl Event {
    /// Machine-friendly discriminator for SSE consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigCommitted { .. } => "config_committed",
            Self::ServiceStateChanged { .. } => "service_state_changed",
            Self::RollbackPerformed { .. } => "rollback_performed",
            Self::ServiceFailed { .. } => "service_failed",
            Self::FirewallReconciled { .. } => "firewall_reconciled",
            Self::FirewallWarning { .. } => "firewall_warning",
            Self::UpdateAvailable { .. } => "update_available",
            Self::UpdateApplied { .. } => "update_applied",
            Self::UpdateRolledBack { .. } => "update_rolled_back",
            Self::RegistrationPending { .. } => "registration_pending",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.buffer_guard();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.buffer_guard();
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.buffer_guard().back().map(|event| event.id)
    }

    fn buffer_guard(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_commit(revision: u64) -> Event {
        Event::ConfigCommitted {
            revision,
            backup: format!("mediamtx.yml.20260101_000000_{revision:03}"),
            kind: "structured".to_string(),
        }
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_commit(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event);
            }
        }

        assert_eq!(received.len(), 3);
        assert_eq!(received.first().map(|e| e.id), Some(3));
        assert_eq!(received.last().map(|e| e.id), Some(5));
    }

    #[tokio::test]
    async fn replay_buffer_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            bus.publish(sample_commit(i));
        }
        let mut stream = bus.subscribe(Some(0));
        assert_eq!(stream.next().await.map(|e| e.id), Some(3));
        assert_eq!(stream.next().await.map(|e| e.id), Some(4));
    }

    #[test]
    fn events_serialize_with_type_tag() -> Result<(), serde_json::Error> {
        let event = Event::ServiceStateChanged {
            state: ServiceState::Restarting,
        };
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["type"], "service_state_changed");
        assert_eq!(value["state"], "restarting");
        assert_eq!(event.kind(), "service_state_changed");
        Ok(())
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        publish_bus.publish(sample_commit(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
