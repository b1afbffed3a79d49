use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

/// Source of time for polling and backoff, so waits can be faked in tests.
#[async_trait]
pub trait Clock: Send + Sync
{
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock
{
    fn now(&self) -> Instant
    {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration)
    {
        tokio::time::sleep(duration).await;
    }
}

/// Sender half of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle
{
    pub fn cancel(&self)
    {
        let _ = self.0.send(true);
    }
}

/// Cooperative cancellation signal observed by long-running waits.
#[derive(Debug, Clone)]
pub struct Cancellation
{
    rx: watch::Receiver<bool>,
}

impl Cancellation
{
    pub fn new() -> (CancelHandle, Cancellation)
    {
        let (tx, rx) = watch::channel(false);
        (CancelHandle(tx), Cancellation { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Cancellation
    {
        Cancellation::new().1
    }

    pub fn is_cancelled(&self) -> bool
    {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is dropped without cancelling.
    pub async fn cancelled(&self)
    {
        let mut rx = self.rx.clone();
        loop
        {
            if *rx.borrow_and_update()
            {
                return;
            }
            if rx.changed().await.is_err()
            {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep on `clock`, returning `false` if cancelled first.
    pub async fn sleep(&self, clock: &dyn Clock, duration: Duration) -> bool
    {
        tokio::select! {
            _ = clock.sleep(duration) => true,
            _ = self.cancelled() => false,
        }
    }
}

#[tokio::test]
async fn test_cancellation()
{
    let (handle, cancel) = Cancellation::new();
    assert!(!cancel.is_cancelled());

    handle.cancel();
    assert!(cancel.is_cancelled());
    assert!(!cancel.sleep(&TokioClock, Duration::from_secs(3600)).await);
}

#[tokio::test]
async fn test_never_cancelled()
{
    let cancel = Cancellation::never();
    assert!(cancel.sleep(&TokioClock, Duration::from_millis(1)).await);
}
