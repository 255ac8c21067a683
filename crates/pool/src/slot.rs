//! Lazy, single-construction resource slot.
//!
//! A slot holds at most one constructed resource. The first caller that
//! finds the slot empty spawns the construction as its own task; every
//! concurrent caller waits on that same construction and receives the same
//! `Arc`. Failures are delivered to every waiter but are not cached: the next
//! call starts a fresh construction. A panicking construction counts as a
//! failure.
//!
//! # State machine
//!
//! ```text
//! Unconstructed ──get──► Constructing ──ok──► Ready
//!       ▲                     │  └──err──► Failed ──get──► Constructing
//!       └──last waiter left───┘
//! any ──invalidate──► Unconstructed      any ──close──► Closed
//! ```
//!
//! Each construction carries a generation number. A construction that
//! finishes after the slot moved on (invalidated, closed or abandoned) is
//! discarded instead of installed.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::SlotError;

type SharedConstruction<R> = Shared<BoxFuture<'static, Result<Arc<R>, SlotError>>>;

/// Observable slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Unconstructed,
    Constructing,
    Ready,
    Failed,
    Closed,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotStatus::Unconstructed => "unconstructed",
            SlotStatus::Constructing => "constructing",
            SlotStatus::Ready => "ready",
            SlotStatus::Failed => "failed",
            SlotStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A construction in progress.
struct InFlight<R> {
    generation: u64,
    result: SharedConstruction<R>,
    /// Construction-scoped token, independent of any waiter's token
    cancel: CancellationToken,
    waiters: usize,
}

impl<R> InFlight<R> {
    fn join(&mut self) -> (SharedConstruction<R>, u64) {
        self.waiters += 1;
        (self.result.clone(), self.generation)
    }
}

enum SlotState<R> {
    Unconstructed,
    Constructing(InFlight<R>),
    Ready(Arc<R>),
    Failed(String),
    Closed,
}

struct SlotInner<R> {
    state: SlotState<R>,
    /// Last generation handed to a construction
    generation: u64,
}

impl<R> SlotInner<R> {
    fn is_current(&self, generation: u64) -> bool {
        matches!(&self.state, SlotState::Constructing(f) if f.generation == generation)
    }
}

/// Lazy holder for one expensive resource.
///
/// Must be used from within a Tokio runtime: constructions run on spawned
/// tasks so that they outlive any single waiter.
pub struct CachedResourceSlot<R> {
    name: String,
    inner: Arc<Mutex<SlotInner<R>>>,
    constructions: AtomicU64,
}

impl<R> CachedResourceSlot<R>
where
    R: Send + Sync + 'static,
{
    /// Create an empty slot. The name is only used for logging.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(SlotInner {
                state: SlotState::Unconstructed,
                generation: 0,
            })),
            constructions: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the cached resource, constructing it if necessary.
    ///
    /// `construct` is only invoked when this call starts a new construction;
    /// it receives a construction-scoped cancellation token that fires when
    /// every waiter has left or the slot is evicted.
    ///
    /// Cancelling `cancel` detaches this caller only. If it was the last
    /// waiter of an in-flight construction, that construction is cancelled
    /// and the slot returns to unconstructed.
    pub async fn get_or_create<F, Fut>(
        &self,
        construct: F,
        cancel: &CancellationToken,
    ) -> Result<Arc<R>, SlotError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(SlotError::Cancelled);
        }

        let (result, generation) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            match &mut inner.state {
                SlotState::Ready(resource) => return Ok(Arc::clone(resource)),
                SlotState::Closed => return Err(SlotError::Closed),
                SlotState::Constructing(in_flight) => {
                    trace!(
                        slot = %self.name,
                        generation = in_flight.generation,
                        waiters = in_flight.waiters + 1,
                        "Joining in-flight construction"
                    );
                    in_flight.join()
                }
                SlotState::Unconstructed | SlotState::Failed(_) => {
                    inner.generation += 1;
                    let mut in_flight = self.spawn_construction(inner.generation, construct);
                    let joined = in_flight.join();
                    inner.state = SlotState::Constructing(in_flight);
                    joined
                }
            }
        };

        let mut waiter = Waiter {
            inner: Arc::clone(&self.inner),
            name: &self.name,
            generation,
            finished: false,
        };

        tokio::select! {
            biased;
            outcome = result => {
                waiter.finished = true;
                outcome
            }
            _ = cancel.cancelled() => {
                trace!(slot = %self.name, generation, "Waiter cancelled");
                Err(SlotError::Cancelled)
            }
        }
    }

    fn spawn_construction<F, Fut>(&self, generation: u64, construct: F) -> InFlight<R>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let construction = construct(token.clone());
        let task_token = token.clone();
        let inner = Arc::clone(&self.inner);
        let name = self.name.clone();

        self.constructions.fetch_add(1, Ordering::Relaxed);
        debug!(slot = %self.name, generation, "Starting construction");

        let handle = tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = task_token.cancelled() => Err(SlotError::Evicted),
                result = AssertUnwindSafe(construction).catch_unwind() => match result {
                    Ok(Ok(resource)) => Ok(Arc::new(resource)),
                    Ok(Err(e)) => Err(SlotError::ConstructionFailed(format!("{:#}", e))),
                    Err(payload) => Err(SlotError::ConstructionFailed(format!(
                        "construction panicked: {}",
                        panic_message(&*payload)
                    ))),
                },
            };
            complete(&inner, &name, generation, outcome)
        });

        // Weak so an unfinished construction does not keep the slot alive
        let weak = Arc::downgrade(&self.inner);
        let name = self.name.clone();
        let result = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(SlotError::ConstructionFailed(format!(
                        "construction task failed: {}",
                        e
                    )));
                    match weak.upgrade() {
                        Some(inner) => complete(&inner, &name, generation, outcome),
                        None => outcome,
                    }
                }
            }
        }
        .boxed()
        .shared();

        InFlight {
            generation,
            result,
            cancel: token,
            waiters: 0,
        }
    }

    /// Drop the cached resource so the next call reconstructs it.
    ///
    /// Returns the evicted resource so the owner can release it. An
    /// in-flight construction is cancelled and its waiters receive
    /// [`SlotError::Evicted`]. No-op on a closed slot.
    pub fn invalidate(&self) -> Option<Arc<R>> {
        self.evict(false)
    }

    /// Evict and permanently close the slot.
    pub fn close(&self) -> Option<Arc<R>> {
        self.evict(true)
    }

    fn evict(&self, close: bool) -> Option<Arc<R>> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, SlotState::Closed) {
            return None;
        }

        let next = if close {
            SlotState::Closed
        } else {
            SlotState::Unconstructed
        };

        match std::mem::replace(&mut inner.state, next) {
            SlotState::Ready(resource) => {
                debug!(slot = %self.name, close, "Evicted cached resource");
                Some(resource)
            }
            SlotState::Constructing(in_flight) => {
                debug!(
                    slot = %self.name,
                    generation = in_flight.generation,
                    waiters = in_flight.waiters,
                    close,
                    "Cancelling in-flight construction"
                );
                in_flight.cancel.cancel();
                None
            }
            _ => None,
        }
    }

    /// Current state
    pub fn status(&self) -> SlotStatus {
        match &self.inner.lock().state {
            SlotState::Unconstructed => SlotStatus::Unconstructed,
            SlotState::Constructing(_) => SlotStatus::Constructing,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed(_) => SlotStatus::Failed,
            SlotState::Closed => SlotStatus::Closed,
        }
    }

    /// The cached resource, without constructing.
    pub fn peek(&self) -> Option<Arc<R>> {
        match &self.inner.lock().state {
            SlotState::Ready(resource) => Some(Arc::clone(resource)),
            _ => None,
        }
    }

    /// Message of the last failed construction, while the slot is failed.
    pub fn last_error(&self) -> Option<String> {
        match &self.inner.lock().state {
            SlotState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Number of constructions started over the slot's lifetime
    pub fn constructions(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }
}

impl<R> fmt::Debug for CachedResourceSlot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResourceSlot")
            .field("name", &self.name)
            .field("constructions", &self.constructions.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Install a finished construction if it is still the current one.
fn complete<R>(
    inner: &Mutex<SlotInner<R>>,
    name: &str,
    generation: u64,
    outcome: Result<Arc<R>, SlotError>,
) -> Result<Arc<R>, SlotError> {
    let mut inner = inner.lock();

    if !inner.is_current(generation) {
        if outcome.is_ok() {
            warn!(slot = %name, generation, "Discarding resource from superseded construction");
        }
        return Err(match inner.state {
            SlotState::Closed => SlotError::Closed,
            _ => SlotError::Evicted,
        });
    }

    match outcome {
        Ok(resource) => {
            debug!(slot = %name, generation, "Construction complete");
            inner.state = SlotState::Ready(Arc::clone(&resource));
            Ok(resource)
        }
        Err(SlotError::ConstructionFailed(reason)) => {
            debug!(slot = %name, generation, reason = %reason, "Construction failed");
            inner.state = SlotState::Failed(reason.clone());
            Err(SlotError::ConstructionFailed(reason))
        }
        Err(other) => {
            inner.state = SlotState::Unconstructed;
            Err(other)
        }
    }
}

/// Registration of one caller waiting on an in-flight construction.
///
/// Dropping an unfinished waiter (cancelled token or dropped future)
/// detaches it; the last waiter to detach cancels the construction.
struct Waiter<'a, R> {
    inner: Arc<Mutex<SlotInner<R>>>,
    name: &'a str,
    generation: u64,
    finished: bool,
}

impl<R> Drop for Waiter<'_, R> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let SlotState::Constructing(in_flight) = &mut inner.state else {
            return;
        };
        if in_flight.generation != self.generation {
            return;
        }

        in_flight.waiters = in_flight.waiters.saturating_sub(1);
        if !self.finished && in_flight.waiters == 0 {
            debug!(
                slot = %self.name,
                generation = self.generation,
                "Last waiter left, abandoning construction"
            );
            in_flight.cancel.cancel();
            inner.state = SlotState::Unconstructed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn counting_factory(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<u32>> {
        let calls = Arc::clone(calls);
        move |_token| {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_constructs_once_and_caches() {
        let slot = CachedResourceSlot::new("test");
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        assert_eq!(slot.status(), SlotStatus::Unconstructed);
        let first = slot
            .get_or_create(counting_factory(&calls, 7), &cancel)
            .await
            .unwrap();
        let second = slot
            .get_or_create(counting_factory(&calls, 8), &cancel)
            .await
            .unwrap();

        assert_eq!(*first, 7);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.status(), SlotStatus::Ready);
        assert_eq!(slot.constructions(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_construction() {
        let slot = Arc::new(CachedResourceSlot::new("shared"));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let slot = Arc::clone(&slot);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                slot.get_or_create(counting_factory(&calls, 1), &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }

        let mut resources = Vec::new();
        for handle in handles {
            resources.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(resources.iter().all(|r| Arc::ptr_eq(r, &resources[0])));
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let slot: CachedResourceSlot<u32> = CachedResourceSlot::new("flaky");
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let failing = {
            let calls = Arc::clone(&calls);
            move |_token: CancellationToken| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(anyhow::anyhow!("endpoint unreachable"))
            }
        };
        let err = slot.get_or_create(failing, &cancel).await.unwrap_err();
        assert_eq!(err, SlotError::ConstructionFailed("endpoint unreachable".to_string()));
        assert_eq!(slot.status(), SlotStatus::Failed);
        assert_eq!(slot.last_error().as_deref(), Some("endpoint unreachable"));

        let value = slot
            .get_or_create(counting_factory(&calls, 3), &cancel)
            .await
            .unwrap();
        assert_eq!(*value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn exploding_factory() -> anyhow::Result<u32> {
        panic!("factory bug")
    }

    #[tokio::test]
    async fn test_panicking_construction_is_not_cached() {
        let slot: CachedResourceSlot<u32> = CachedResourceSlot::new("panicky");
        let cancel = CancellationToken::new();

        let err = slot
            .get_or_create(|_| exploding_factory(), &cancel)
            .await
            .unwrap_err();
        match &err {
            SlotError::ConstructionFailed(reason) => assert!(reason.contains("factory bug")),
            other => panic!("expected ConstructionFailed, got {:?}", other),
        }
        assert_eq!(slot.status(), SlotStatus::Failed);

        let value = slot
            .get_or_create(|_| async { Ok(9u32) }, &cancel)
            .await
            .unwrap();
        assert_eq!(*value, 9);
        assert_eq!(slot.status(), SlotStatus::Ready);
        assert_eq!(slot.constructions(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_reaches_every_waiter() {
        let slot: Arc<CachedResourceSlot<u32>> = Arc::new(CachedResourceSlot::new("failing"));
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let slot = Arc::clone(&slot);
            let gate = Arc::clone(&gate);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let construct = move |_token: CancellationToken| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Err::<u32, _>(anyhow::anyhow!("quota exceeded"))
                };
                slot.get_or_create(construct, &CancellationToken::new()).await
            }));
        }
        // Let every caller join the in-flight construction
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(slot.status(), SlotStatus::Constructing);
        gate.notify_one();

        for handle in handles {
            assert_eq!(
                handle.await.unwrap().unwrap_err(),
                SlotError::ConstructionFailed("quota exceeded".to_string())
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.constructions(), 1);
        assert_eq!(slot.status(), SlotStatus::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_waiter_does_not_cancel_shared_construction() {
        let slot = Arc::new(CachedResourceSlot::new("gated"));
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());

        let construct = {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            move |_token: CancellationToken| async move {
                started.notify_one();
                gate.notified().await;
                Ok::<_, anyhow::Error>(42u32)
            }
        };

        let first_cancel = CancellationToken::new();
        let first = {
            let slot = Arc::clone(&slot);
            let cancel = first_cancel.clone();
            tokio::spawn(async move { slot.get_or_create(construct, &cancel).await })
        };
        started.notified().await;

        let second = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                slot.get_or_create(
                    |_token| async { Ok::<_, anyhow::Error>(0u32) },
                    &CancellationToken::new(),
                )
                .await
            })
        };
        // Let the second caller join the in-flight construction
        tokio::time::sleep(Duration::from_millis(50)).await;

        first_cancel.cancel();
        assert_eq!(first.await.unwrap().unwrap_err(), SlotError::Cancelled);
        assert_eq!(slot.status(), SlotStatus::Constructing);

        gate.notify_one();
        let value = second.await.unwrap().unwrap();
        assert_eq!(*value, 42);
        assert_eq!(slot.constructions(), 1);
    }

    #[tokio::test]
    async fn test_last_waiter_cancellation_abandons_construction() {
        let slot: Arc<CachedResourceSlot<u32>> = Arc::new(CachedResourceSlot::new("abandoned"));

        let construct = |token: CancellationToken| async move {
            token.cancelled().await;
            Err(anyhow::anyhow!("cancelled"))
        };

        let cancel = CancellationToken::new();
        let waiter = {
            let slot = Arc::clone(&slot);
            let cancel = cancel.clone();
            tokio::spawn(async move { slot.get_or_create(construct, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        cancel.cancel();
        assert_eq!(waiter.await.unwrap().unwrap_err(), SlotError::Cancelled);
        assert_eq!(slot.status(), SlotStatus::Unconstructed);

        // Next caller starts a fresh construction
        let value = slot
            .get_or_create(|_| async { Ok(5u32) }, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*value, 5);
        assert_eq!(slot.constructions(), 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_returns_immediately() {
        let slot: CachedResourceSlot<u32> = CachedResourceSlot::new("idle");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = slot
            .get_or_create(|_| async { Ok(1u32) }, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SlotError::Cancelled);
        assert_eq!(slot.constructions(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_returns_resource_and_reconstructs() {
        let slot = CachedResourceSlot::new("rotating");
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let first = slot
            .get_or_create(counting_factory(&calls, 1), &cancel)
            .await
            .unwrap();
        let evicted = slot.invalidate().expect("ready resource evicted");
        assert!(Arc::ptr_eq(&first, &evicted));
        assert_eq!(slot.status(), SlotStatus::Unconstructed);

        let second = slot
            .get_or_create(counting_factory(&calls, 2), &cancel)
            .await
            .unwrap();
        assert_eq!(*second, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_construction_evicts_waiters() {
        let slot: Arc<CachedResourceSlot<u32>> = Arc::new(CachedResourceSlot::new("racing"));
        let gate = Arc::new(Notify::new());

        let construct = {
            let gate = Arc::clone(&gate);
            move |_token: CancellationToken| async move {
                gate.notified().await;
                Ok(1u32)
            }
        };
        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.get_or_create(construct, &CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(slot.invalidate().is_none());
        assert_eq!(waiter.await.unwrap().unwrap_err(), SlotError::Evicted);
        assert_eq!(slot.status(), SlotStatus::Unconstructed);
    }

    #[tokio::test]
    async fn test_close_is_permanent() {
        let slot = CachedResourceSlot::new("closing");
        let cancel = CancellationToken::new();

        slot.get_or_create(|_| async { Ok(1u32) }, &cancel)
            .await
            .unwrap();
        assert!(slot.close().is_some());
        assert_eq!(slot.status(), SlotStatus::Closed);
        assert!(slot.invalidate().is_none());

        let err = slot
            .get_or_create(|_| async { Ok(2u32) }, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, SlotError::Closed);
        assert!(slot.peek().is_none());
    }
}
