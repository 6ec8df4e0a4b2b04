//! Per-fingerprint in-flight tracking for recomputations.
//!
//! At most one computation runs for a fingerprint at a time. The caller that
//! claims the slot becomes the leader and holds a [`FlightGuard`]; everyone
//! else gets a [`Waiter`] on the leader's outcome. Dropping the guard without
//! completing it (error path, panic, cancelled task) still frees the slot and
//! wakes the waiters with [`CacheError::Abandoned`].
//!
//! Superseding a computation detaches it: callers already waiting still get
//! its outcome, but the next claim for the fingerprint starts a new one.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::watch;

use super::error::CacheError;
use super::keys::{Fingerprint, Tag};

type Outcome<P> = Result<P, CacheError>;

struct Flight<P> {
    tags: BTreeSet<Tag>,
    superseded: AtomicBool,
    outcome: watch::Receiver<Option<Outcome<P>>>,
}

/// Tracks fingerprints that currently have a computation running.
pub struct Coordinator<P> {
    flights: Arc<DashMap<Fingerprint, Arc<Flight<P>>>>,
}

impl<P> Clone for Coordinator<P> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<P> Default for Coordinator<P> {
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }
}

/// Result of trying to start a computation.
pub enum Claim<P> {
    Leader(FlightGuard<P>),
    Follower(Waiter<P>),
}

impl<P> Coordinator<P>
where
    P: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the in-flight slot for `fingerprint`, or attach to the
    /// computation already holding it.
    pub fn claim(&self, fingerprint: &Fingerprint, tags: &BTreeSet<Tag>) -> Claim<P> {
        use dashmap::mapref::entry::Entry;

        match self.flights.entry(fingerprint.clone()) {
            Entry::Vacant(vacant) => {
                let (sender, receiver) = watch::channel(None);
                let flight = Arc::new(Flight {
                    tags: tags.clone(),
                    superseded: AtomicBool::new(false),
                    outcome: receiver,
                });
                vacant.insert(Arc::clone(&flight));
                Claim::Leader(FlightGuard {
                    fingerprint: fingerprint.clone(),
                    flights: Arc::clone(&self.flights),
                    flight,
                    sender: Some(sender),
                })
            }
            Entry::Occupied(occupied) => Claim::Follower(Waiter {
                fingerprint: fingerprint.clone(),
                outcome: occupied.get().outcome.clone(),
            }),
        }
    }

    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.flights.contains_key(fingerprint)
    }

    /// Number of computations new claims can still attach to.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Mark the computation for `fingerprint` as superseded by a purge and
    /// detach it from the slot.
    pub fn supersede_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        match self.flights.remove(fingerprint) {
            Some((_, flight)) => {
                flight.superseded.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Supersede and detach every computation registered with `tag`.
    pub fn supersede_tag(&self, tag: &Tag) -> usize {
        let mut marked = 0;
        self.flights.retain(|_, flight| {
            if !flight.tags.contains(tag) {
                return true;
            }
            flight.superseded.store(true, Ordering::SeqCst);
            marked += 1;
            false
        });
        marked
    }
}

/// Exclusive right to compute a fingerprint. Releases the slot on drop.
pub struct FlightGuard<P> {
    fingerprint: Fingerprint,
    flights: Arc<DashMap<Fingerprint, Arc<Flight<P>>>>,
    flight: Arc<Flight<P>>,
    sender: Option<watch::Sender<Option<Outcome<P>>>>,
}

impl<P> FlightGuard<P> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Whether a purge targeted this fingerprint after the slot was claimed.
    pub fn is_superseded(&self) -> bool {
        self.flight.superseded.load(Ordering::SeqCst)
    }

    /// Attach a waiter to this guard's own outcome.
    pub fn waiter(&self) -> Waiter<P> {
        Waiter {
            fingerprint: self.fingerprint.clone(),
            outcome: self.flight.outcome.clone(),
        }
    }

    /// Free the slot and release every waiter with `outcome`.
    pub fn complete(mut self, outcome: Outcome<P>) {
        self.release();
        if let Some(sender) = self.sender.take() {
            // No receivers left is fine: every caller may have timed out.
            let _ = sender.send(Some(outcome));
        }
    }

    /// Only removes this guard's own flight; a purge may already have
    /// detached it and a newer claim taken the slot.
    fn release(&self) {
        self.flights
            .remove_if(&self.fingerprint, |_, flight| Arc::ptr_eq(flight, &self.flight));
    }
}

impl<P> Drop for FlightGuard<P> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            self.release();
        }
    }
}

/// Handle on another caller's computation.
pub struct Waiter<P> {
    fingerprint: Fingerprint,
    outcome: watch::Receiver<Option<Outcome<P>>>,
}

impl<P> Waiter<P>
where
    P: Clone,
{
    /// Suspend until the leader completes or abandons the computation.
    pub async fn wait(mut self) -> Outcome<P> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or_else(|| {
                Err(CacheError::Abandoned {
                    fingerprint: self.fingerprint.clone(),
                })
            }),
            Err(_) => Err(CacheError::Abandoned {
                fingerprint: self.fingerprint,
            }),
        }
    }
}
