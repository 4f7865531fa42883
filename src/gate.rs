//! Admission control for outbound translation requests.
//!
//! At most `ceiling` distinct identities are serviced at once, and an identity
//! is never serviced twice concurrently. Slots are held by a [`GatePermit`]
//! and returned when it drops, so early returns, errors and cancelled tasks
//! all release.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::identity::ContentIdentity;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 3;

#[derive(Debug)]
pub enum Admission {
    Granted(GatePermit),
    AlreadyInFlight,
    QueueFull,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted(_))
    }
}

#[derive(Clone)]
pub struct RequestGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    ceiling: usize,
    in_flight: Mutex<HashSet<ContentIdentity>>,
}

impl GateInner {
    fn release(&self, identity: &ContentIdentity) -> bool {
        let released = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
        if released {
            debug!("gate released {}", identity);
        }
        released
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl RequestGate {
    pub fn new(ceiling: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                ceiling: ceiling.max(1),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn acquire(&self, identity: &ContentIdentity) -> Admission {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if in_flight.contains(identity) {
            return Admission::AlreadyInFlight;
        }
        if in_flight.len() >= self.inner.ceiling {
            return Admission::QueueFull;
        }
        in_flight.insert(identity.clone());
        debug!("gate admitted {} ({} in flight)", identity, in_flight.len());
        Admission::Granted(GatePermit {
            gate: Arc::clone(&self.inner),
            identity: Some(identity.clone()),
        })
    }

    /// Releases `identity` if held. Safe to call any number of times.
    pub fn release(&self, identity: &ContentIdentity) -> bool {
        self.inner.release(identity)
    }

    pub fn in_flight(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn ceiling(&self) -> usize {
        self.inner.ceiling
    }
}

/// A held gate slot. Dropping it releases the identity.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct GatePermit {
    gate: Arc<GateInner>,
    identity: Option<ContentIdentity>,
}

impl GatePermit {
    pub fn identity(&self) -> Option<&ContentIdentity> {
        self.identity.as_ref()
    }

    pub fn release(mut self) {
        if let Some(identity) = self.identity.take() {
            self.gate.release(&identity);
        }
    }
}

impl std::fmt::Debug for GatePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatePermit")
            .field("identity", &self.identity)
            .finish()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some(identity) = self.identity.take() {
            self.gate.release(&identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageCode;

    fn id(content: &str) -> ContentIdentity {
        ContentIdentity::from_content(LanguageCode::En, None, content)
    }

    #[test]
    fn fourth_distinct_identity_waits_for_a_slot() {
        let gate = RequestGate::default();
        let first = gate.acquire(&id("a"));
        let _second = gate.acquire(&id("b"));
        let _third = gate.acquire(&id("c"));
        assert!(matches!(gate.acquire(&id("d")), Admission::QueueFull));

        drop(first);
        assert!(gate.acquire(&id("d")).is_granted());
    }

    #[test]
    fn duplicate_identity_is_rejected_before_capacity() {
        let gate = RequestGate::new(1);
        let _held = gate.acquire(&id("a"));
        assert!(matches!(gate.acquire(&id("a")), Admission::AlreadyInFlight));
        assert!(matches!(gate.acquire(&id("b")), Admission::QueueFull));
    }

    #[test]
    fn release_is_idempotent() {
        let gate = RequestGate::default();
        let Admission::Granted(permit) = gate.acquire(&id("a")) else {
            panic!("expected a permit");
        };
        assert!(gate.release(&id("a")));
        assert!(!gate.release(&id("a")));
        permit.release();
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn permit_releases_when_the_holder_panics() {
        let gate = RequestGate::default();
        let cloned = gate.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _permit = cloned.acquire(&id("a"));
            panic!("boom");
        }));
        assert!(outcome.is_err());
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_task_releases_its_slot() {
        let gate = RequestGate::new(1);
        let task_gate = gate.clone();
        let task = tokio::spawn(async move {
            let _permit = task_gate.acquire(&id("slow"));
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        tokio::task::yield_now().await;
        while gate.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert!(gate.acquire(&id("next")).is_granted());
    }
}
