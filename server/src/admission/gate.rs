//! Resizable admission gate.
//!
//! Permits live in a Tokio [`Semaphore`]. Growing the gate adds permits at
//! once. Shrinking forgets whatever permits are idle and records the rest as
//! debt; leases released while debt is outstanding are forgotten instead of
//! returned, so the live permit count converges on the new capacity without
//! revoking any held lease.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AdmissionError;

pub const DEFAULT_ADMISSION_CAPACITY: usize = 100;

#[derive(Debug)]
struct GateShared {
    semaphore: Arc<Semaphore>,
    /// Permits still to be withdrawn after a shrink.
    debt: AtomicUsize,
    in_use: AtomicUsize,
}

impl GateShared {
    /// Claim one unit of debt, if any is outstanding.
    fn take_debt(&self) -> bool {
        self.debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok()
    }
}

/// Process-wide concurrency limiter for handler dispatch.
#[derive(Debug)]
pub struct AdmissionGate {
    shared: Arc<GateShared>,
    capacity: AtomicUsize,
    resize: Mutex<()>,
}

impl AdmissionGate {
    /// Create a gate with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(GateShared {
                semaphore: Arc::new(Semaphore::new(capacity)),
                debt: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
            capacity: AtomicUsize::new(capacity),
            resize: Mutex::new(()),
        }
    }

    /// Wait for a permit until one frees up or `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionLease, AdmissionError> {
        let semaphore = Arc::clone(&self.shared.semaphore);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AdmissionError::Cancelled),
            permit = semaphore.acquire_owned() => {
                permit.map(|p| self.lease(p)).map_err(|_| AdmissionError::Closed)
            }
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub async fn acquire_within(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AdmissionLease, AdmissionError> {
        tokio::select! {
            biased;
            result = self.acquire(cancel) => result,
            () = tokio::time::sleep(timeout) => Err(AdmissionError::TimedOut(timeout)),
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<AdmissionLease> {
        match Arc::clone(&self.shared.semaphore).try_acquire_owned() {
            Ok(permit) => Some(self.lease(permit)),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => None,
        }
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> AdmissionLease {
        self.shared.in_use.fetch_add(1, Ordering::AcqRel);
        AdmissionLease {
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Resize the live gate.
    ///
    /// Growth takes effect immediately. Shrinking never revokes held leases:
    /// the gate stops handing out permits until enough leases are released.
    pub fn set_capacity(&self, new_capacity: usize) {
        let new_capacity = new_capacity.max(1);
        let _guard = self.resize.lock().unwrap_or_else(PoisonError::into_inner);
        let old_capacity = self.capacity.swap(new_capacity, Ordering::AcqRel);

        if new_capacity > old_capacity {
            let delta = new_capacity - old_capacity;
            let previous_debt = self
                .shared
                .debt
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                    Some(d.saturating_sub(delta))
                })
                .unwrap_or(0);
            let repaid = previous_debt.min(delta);
            self.shared.semaphore.add_permits(delta - repaid);
        } else if new_capacity < old_capacity {
            let delta = old_capacity - new_capacity;
            // Debt first: a lease released from here on is already counted
            // against the shrink.
            self.shared.debt.fetch_add(delta, Ordering::AcqRel);
            let withdrawn = self.shared.semaphore.forget_permits(delta);
            let previous_debt = self
                .shared
                .debt
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                    Some(d.saturating_sub(withdrawn))
                })
                .unwrap_or(0);
            let settled = previous_debt.min(withdrawn);
            // Releases settled part of the debt while idle permits were
            // being withdrawn; hand back what was taken twice.
            if withdrawn > settled {
                self.shared.semaphore.add_permits(withdrawn - settled);
            }
            let pending = previous_debt - settled;
            if pending > 0 {
                debug!(pending, "Capacity shrink waiting on held leases");
            }
        } else {
            return;
        }

        info!(old_capacity, new_capacity, "Admission gate resized");
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Permits that could be handed out right now.
    pub fn available(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    /// Leases currently held.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    /// Stop handing out permits. Pending and future acquires fail with
    /// [`AdmissionError::Closed`]; held leases are unaffected.
    pub fn close(&self) {
        warn!("Admission gate closed");
        self.shared.semaphore.close();
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_ADMISSION_CAPACITY)
    }
}

/// One held admission permit.
///
/// Released exactly once: by [`release`](Self::release) or by drop,
/// whichever comes first.
#[must_use = "dropping a lease releases its permit immediately"]
#[derive(Debug)]
pub struct AdmissionLease {
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<GateShared>,
}

impl AdmissionLease {
    pub fn release(mut self) {
        self.return_permit();
    }

    fn return_permit(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        self.shared.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.shared.take_debt() {
            permit.forget();
        }
    }
}

impl Drop for AdmissionLease {
    fn drop(&mut self) {
        self.return_permit();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[tokio::test]
    async fn test_two_proceed_third_waits_for_release() {
        let gate = Arc::new(AdmissionGate::new(2));
        let cancel = CancellationToken::new();

        let first = gate.acquire(&cancel).await.unwrap();
        let _second = gate.acquire(&cancel).await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.acquire(&cancel).await.map(|_| ()) })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(gate.in_use(), 2);

        first.release();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let capacity = 3;
        let gate = Arc::new(AdmissionGate::new(capacity));
        let held = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let held = Arc::clone(&held);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let lease = gate.acquire(&CancellationToken::new()).await.unwrap();
                    let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    held.fetch_sub(1, Ordering::SeqCst);
                    lease.release();
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= capacity);
        assert_eq!(gate.available(), capacity);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_acquires_nothing() {
        let gate = AdmissionGate::new(1);
        let _held = gate.try_acquire().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), AdmissionError::Cancelled);
        assert_eq!(gate.in_use(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_wins_even_with_free_permit() {
        let gate = AdmissionGate::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), AdmissionError::Cancelled);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_times_out() {
        let gate = AdmissionGate::new(1);
        let _held = gate.try_acquire().unwrap();

        let err = gate
            .acquire_within(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::TimedOut(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_drop_releases_permit() {
        let gate = AdmissionGate::new(1);
        {
            let _lease = gate.try_acquire().unwrap();
            assert_eq!(gate.available(), 0);
        }
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.in_use(), 0);
    }

    #[tokio::test]
    async fn test_grow_admits_waiters() {
        let gate = AdmissionGate::new(1);
        let _a = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());

        gate.set_capacity(3);
        assert_eq!(gate.capacity(), 3);
        let _b = gate.try_acquire().unwrap();
        let _c = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_shrink_with_held_leases_converges() {
        let gate = AdmissionGate::new(3);
        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();

        // One idle permit is withdrawn now, one more once a lease comes back.
        gate.set_capacity(1);
        assert_eq!(gate.available(), 0);

        a.release();
        assert_eq!(gate.available(), 0);
        assert!(gate.try_acquire().is_none());

        b.release();
        assert_eq!(gate.available(), 1);
        let _only = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_grow_repays_pending_shrink() {
        let gate = AdmissionGate::new(2);
        let a = gate.try_acquire().unwrap();
        let b = gate.try_acquire().unwrap();

        gate.set_capacity(1); // one unit of debt
        gate.set_capacity(2); // repays it without adding permits
        assert_eq!(gate.available(), 0);

        a.release();
        b.release();
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shrink_racing_releases_lands_on_new_capacity() {
        for _ in 0..50 {
            let gate = Arc::new(AdmissionGate::new(8));
            let leases: Vec<_> = (0..8).map(|_| gate.try_acquire().unwrap()).collect();

            let releases: Vec<_> = leases
                .into_iter()
                .map(|lease| tokio::spawn(async move { lease.release() }))
                .collect();
            let resize = {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.set_capacity(3) })
            };
            for release in releases {
                release.await.unwrap();
            }
            resize.await.unwrap();

            assert_eq!(gate.in_use(), 0);
            assert_eq!(gate.available(), 3);
        }
    }

    #[tokio::test]
    async fn test_closed_gate_rejects() {
        let gate = AdmissionGate::new(1);
        gate.close();
        assert_eq!(
            gate.acquire(&CancellationToken::new()).await.unwrap_err(),
            AdmissionError::Closed
        );
    }
}
