//! Durable wait/signal runtime.
//!
//! An execution that reaches a pause point registers a [`WaitRequest`] and
//! suspends; exactly one matching [`SignalEnvelope`] (or expiry) resumes it.
//! The per-request state machine is `Pending → Resumed` via a signal, or
//! `Pending → Expired` via the [`WaitLedger::tick`] sweep. Timers are
//! implemented as synthetic signals of the reserved [`TIMEOUT_SIGNAL`] type,
//! not as a separate mechanism.
//!
//! Guarantees:
//! - registration is idempotent per `wait_id` (a re-registration is a no-op);
//! - one `signal` call resumes at most one request, chosen FIFO among
//!   eligible matches;
//! - once a request leaves `Pending` it can never match again, even if
//!   `signal` or `tick` is invoked again with overlapping criteria.
//!
//! The ledger emits lifecycle events only when a bus is attached; it is
//! fully functional with none.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::event_bus::{EventBus, EventType, RuntimeEvent};

/// Reserved signal type synthesized for expired waits.
pub const TIMEOUT_SIGNAL: &str = "__skeinrun_timeout__";

/// Signal type used by the stream manager to resume paused executions.
pub const RESUME_SIGNAL: &str = "execution.resume";

/// Lifecycle state of one wait request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Pending,
    Resumed,
    Expired,
}

/// A registered suspension awaiting an external signal or timer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitRequest {
    pub wait_id: String,
    pub run_id: String,
    pub signal_type: String,
    /// Payload filter: every entry must be present (equal) in the matching
    /// envelope's payload.
    #[serde(default)]
    pub filter: FxHashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub state: WaitState,
}

impl WaitRequest {
    pub fn new(
        wait_id: impl Into<String>,
        run_id: impl Into<String>,
        signal_type: impl Into<String>,
    ) -> Self {
        Self {
            wait_id: wait_id.into(),
            run_id: run_id.into(),
            signal_type: signal_type.into(),
            filter: FxHashMap::default(),
            expires_at: None,
            registered_at: Utc::now(),
            state: WaitState::Pending,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filter.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    fn matches(&self, envelope: &SignalEnvelope) -> bool {
        if self.state != WaitState::Pending
            || self.run_id != envelope.run_id
            || self.signal_type != envelope.signal_type
        {
            return false;
        }
        self.filter.iter().all(|(key, expected)| {
            envelope
                .payload
                .get(key)
                .is_some_and(|actual| actual == expected)
        })
    }
}

/// An immutable signal delivered to a run's pending waits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub run_id: String,
    pub signal_type: String,
    #[serde(default)]
    pub payload: FxHashMap<String, Value>,
}

impl SignalEnvelope {
    pub fn new(run_id: impl Into<String>, signal_type: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            signal_type: signal_type.into(),
            payload: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

/// Pause marker returned from registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPaused {
    pub wait_id: String,
    pub run_id: String,
}

/// Resumption record for a wait that left `Pending`.
#[derive(Clone, Debug)]
pub struct WaitResumed {
    pub wait_id: String,
    pub run_id: String,
    pub envelope: SignalEnvelope,
    pub resumed_at: DateTime<Utc>,
    /// True when the resumption came from the expiry sweep rather than an
    /// external signal.
    pub timed_out: bool,
}

/// Serde-friendly persisted form of the ledger: pending requests only.
///
/// Flushed through the storage layer on shutdown and reloaded on start so a
/// paused run survives process restarts and still resumes exactly once.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedWaitLedger {
    #[serde(default)]
    pub requests: Vec<WaitRequest>,
}

#[derive(Default)]
struct LedgerInner {
    /// Registration order; FIFO matching walks this front to back.
    requests: Vec<WaitRequest>,
    by_id: FxHashMap<String, usize>,
}

/// The durable wait/signal runtime.
pub struct WaitLedger {
    inner: Mutex<LedgerInner>,
    bus: Option<Arc<EventBus>>,
}

impl Default for WaitLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitLedger {
    /// A ledger with no event bus attached.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            bus: None,
        }
    }

    /// A ledger that emits lifecycle events to the given bus.
    #[must_use]
    pub fn with_bus(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            bus: Some(bus),
        }
    }

    /// Register a wait request and return the pause marker.
    ///
    /// Re-registering an existing `wait_id` is a no-op, not an error: the
    /// marker for the original registration is returned unchanged.
    pub async fn wait(&self, request: WaitRequest) -> ExecutionPaused {
        let (marker, created) = {
            let mut inner = self.inner.lock();
            if let Some(&ix) = inner.by_id.get(&request.wait_id) {
                let existing = &inner.requests[ix];
                (
                    ExecutionPaused {
                        wait_id: existing.wait_id.clone(),
                        run_id: existing.run_id.clone(),
                    },
                    false,
                )
            } else {
                let marker = ExecutionPaused {
                    wait_id: request.wait_id.clone(),
                    run_id: request.run_id.clone(),
                };
                let ix = inner.requests.len();
                inner.by_id.insert(request.wait_id.clone(), ix);
                inner.requests.push(request);
                (marker, true)
            }
        };

        if created {
            self.emit(
                EventType::WaitCreated,
                &marker.run_id,
                &marker.wait_id,
                None,
            )
            .await;
        }
        marker
    }

    /// Deliver a signal, resuming at most one matching pending wait.
    ///
    /// The earliest-registered eligible request wins. Returns `None` when
    /// nothing matches (including replays against already-resumed waits),
    /// which is not an error.
    pub async fn signal(&self, envelope: SignalEnvelope) -> Option<WaitResumed> {
        let resumed = {
            let mut inner = self.inner.lock();
            let hit = inner
                .requests
                .iter_mut()
                .find(|request| request.matches(&envelope))?;
            hit.state = WaitState::Resumed;
            WaitResumed {
                wait_id: hit.wait_id.clone(),
                run_id: hit.run_id.clone(),
                envelope,
                resumed_at: Utc::now(),
                timed_out: false,
            }
        };

        self.emit(
            EventType::WaitMatched,
            &resumed.run_id,
            &resumed.wait_id,
            None,
        )
        .await;
        self.emit(
            EventType::WaitResumed,
            &resumed.run_id,
            &resumed.wait_id,
            None,
        )
        .await;
        Some(resumed)
    }

    /// Sweep expired waits, resuming each with a synthetic timeout signal.
    ///
    /// Resumes exactly the pending requests whose `expires_at <= now`; all
    /// others stay pending.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<WaitResumed> {
        let expired: Vec<WaitResumed> = {
            let mut inner = self.inner.lock();
            inner
                .requests
                .iter_mut()
                .filter(|request| {
                    request.state == WaitState::Pending
                        && request.expires_at.is_some_and(|at| at <= now)
                })
                .map(|request| {
                    request.state = WaitState::Expired;
                    let envelope = SignalEnvelope::new(&request.run_id, TIMEOUT_SIGNAL)
                        .with_payload("wait_id", Value::String(request.wait_id.clone()));
                    WaitResumed {
                        wait_id: request.wait_id.clone(),
                        run_id: request.run_id.clone(),
                        envelope,
                        resumed_at: now,
                        timed_out: true,
                    }
                })
                .collect()
        };

        for resumed in &expired {
            self.emit(
                EventType::WaitTimedOut,
                &resumed.run_id,
                &resumed.wait_id,
                None,
            )
            .await;
            self.emit(
                EventType::WaitResumed,
                &resumed.run_id,
                &resumed.wait_id,
                None,
            )
            .await;
        }
        expired
    }

    /// Number of requests still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .requests
            .iter()
            .filter(|r| r.state == WaitState::Pending)
            .count()
    }

    /// State of a registered wait, if known.
    #[must_use]
    pub fn state_of(&self, wait_id: &str) -> Option<WaitState> {
        let inner = self.inner.lock();
        inner.by_id.get(wait_id).map(|&ix| inner.requests[ix].state)
    }

    /// Persisted form carrying the pending requests.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedWaitLedger {
        let inner = self.inner.lock();
        PersistedWaitLedger {
            requests: inner
                .requests
                .iter()
                .filter(|r| r.state == WaitState::Pending)
                .cloned()
                .collect(),
        }
    }

    /// Restore pending requests from a persisted ledger, preserving their
    /// original registration order (and therefore FIFO matching).
    pub fn restore(&self, persisted: PersistedWaitLedger) {
        let mut inner = self.inner.lock();
        for request in persisted.requests {
            if inner.by_id.contains_key(&request.wait_id) {
                continue;
            }
            let ix = inner.requests.len();
            inner.by_id.insert(request.wait_id.clone(), ix);
            inner.requests.push(request);
        }
    }

    async fn emit(&self, event_type: EventType, run_id: &str, wait_id: &str, stream: Option<&str>) {
        let Some(bus) = &self.bus else { return };
        let mut event = RuntimeEvent::new(event_type)
            .with_data("run_id", Value::String(run_id.to_string()))
            .with_data("wait_id", Value::String(wait_id.to_string()));
        if let Some(stream) = stream {
            event = event.with_stream(stream);
        }
        bus.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn signal_resumes_fifo_among_eligible() {
        let ledger = WaitLedger::new();
        ledger
            .wait(WaitRequest::new("w1", "run-1", "approval"))
            .await;
        ledger
            .wait(WaitRequest::new("w2", "run-1", "approval"))
            .await;

        let first = ledger
            .signal(SignalEnvelope::new("run-1", "approval"))
            .await
            .expect("first signal matches");
        assert_eq!(first.wait_id, "w1");

        let second = ledger
            .signal(SignalEnvelope::new("run-1", "approval"))
            .await
            .expect("second signal matches the remaining wait");
        assert_eq!(second.wait_id, "w2");

        assert!(
            ledger
                .signal(SignalEnvelope::new("run-1", "approval"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn resumed_wait_never_matches_again() {
        let ledger = WaitLedger::new();
        ledger
            .wait(WaitRequest::new("w1", "run-1", "approval"))
            .await;
        assert!(
            ledger
                .signal(SignalEnvelope::new("run-1", "approval"))
                .await
                .is_some()
        );
        assert_eq!(ledger.state_of("w1"), Some(WaitState::Resumed));
        assert!(
            ledger
                .signal(SignalEnvelope::new("run-1", "approval"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let ledger = WaitLedger::new();
        let first = ledger
            .wait(WaitRequest::new("w1", "run-1", "approval"))
            .await;
        let second = ledger
            .wait(WaitRequest::new("w1", "run-1", "approval"))
            .await;
        assert_eq!(first, second);
        assert_eq!(ledger.pending_count(), 1);
    }

    #[tokio::test]
    async fn filter_must_be_subset_of_payload() {
        let ledger = WaitLedger::new();
        ledger
            .wait(
                WaitRequest::new("w1", "run-1", "approval")
                    .with_filter("reviewer", json!("alice")),
            )
            .await;

        let miss = ledger
            .signal(SignalEnvelope::new("run-1", "approval").with_payload("reviewer", json!("bob")))
            .await;
        assert!(miss.is_none());

        let hit = ledger
            .signal(
                SignalEnvelope::new("run-1", "approval").with_payload("reviewer", json!("alice")),
            )
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn tick_resumes_exactly_the_expired() {
        let ledger = WaitLedger::new();
        let now = Utc::now();
        ledger
            .wait(
                WaitRequest::new("old", "run-1", "timer")
                    .with_expiry(now - chrono::Duration::seconds(5)),
            )
            .await;
        ledger
            .wait(
                WaitRequest::new("fresh", "run-1", "timer")
                    .with_expiry(now + chrono::Duration::seconds(60)),
            )
            .await;
        ledger.wait(WaitRequest::new("eternal", "run-1", "timer")).await;

        let resumed = ledger.tick(now).await;
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].wait_id, "old");
        assert!(resumed[0].timed_out);
        assert_eq!(resumed[0].envelope.signal_type, TIMEOUT_SIGNAL);
        assert_eq!(ledger.pending_count(), 2);

        // A second sweep at the same instant must not resume anything new.
        assert!(ledger.tick(now).await.is_empty());
    }

    #[tokio::test]
    async fn restart_preserves_pending_waits_and_fifo_order() {
        let ledger = WaitLedger::new();
        ledger.wait(WaitRequest::new("w1", "run-1", "s")).await;
        ledger.wait(WaitRequest::new("w2", "run-1", "s")).await;
        ledger
            .signal(SignalEnvelope::new("run-1", "s"))
            .await
            .expect("w1 resumes before the restart");

        let reloaded = WaitLedger::new();
        reloaded.restore(ledger.to_persisted());
        assert_eq!(reloaded.pending_count(), 1);

        let resumed = reloaded
            .signal(SignalEnvelope::new("run-1", "s"))
            .await
            .expect("w2 survives the restart");
        assert_eq!(resumed.wait_id, "w2");
        assert!(
            reloaded
                .signal(SignalEnvelope::new("run-1", "s"))
                .await
                .is_none()
        );
    }
}
