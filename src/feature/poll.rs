//! Bookkeeping shared by the polling gates.
//!
//! Each polled target walks `Pending -> Polling -> {Succeeded, Failed, TimedOut, Cancelled}`.
//! Rounds are driven by a [`Clock`] so tests never wait on real time.

use std::time::{Duration, Instant};

use crate::libs::clock::{Cancellation, Clock};
use crate::libs::error::ReleaseError;

/// Stand-in deadline for timeouts too large to add to an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase
{
    Pending,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl Phase
{
    pub fn is_terminal(self) -> bool
    {
        !matches!(self, Phase::Pending | Phase::Polling)
    }
}

/// Progress of one polled target. Lives for a single polling operation.
#[derive(Debug, Clone)]
pub struct PollState<T, S>
{
    pub target:        T,
    pub attempts:      u32,
    pub last_observed: Option<S>,
    pub deadline:      Instant,
    pub phase:         Phase,
    /// Why a `Failed` target failed, when the client said so.
    pub error:         Option<ReleaseError>,
}

impl<T, S> PollState<T, S>
{
    pub fn new(target: T, deadline: Instant) -> PollState<T, S>
    {
        PollState { target, attempts: 0, last_observed: None, deadline, phase: Phase::Pending, error: None }
    }

    pub fn is_active(&self) -> bool
    {
        !self.phase.is_terminal()
    }

    /// Give up on this target for good.
    pub fn fail(&mut self, error: ReleaseError)
    {
        self.phase = Phase::Failed;
        self.error = Some(error);
    }
}

/// `timeout` from now, saturating instead of overflowing.
pub fn deadline(clock: &dyn Clock, timeout: Duration) -> Instant
{
    let now = clock.now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// How the wait between two rounds ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait
{
    Continue,
    TimedOut,
    Cancelled,
}

/// Sleep until the next round, never past `deadline`.
pub async fn next_round(clock: &dyn Clock, cancel: &Cancellation, interval: Duration, deadline: Instant) -> Wait
{
    if cancel.is_cancelled()
    {
        return Wait::Cancelled;
    }

    let now = clock.now();
    if now >= deadline
    {
        return Wait::TimedOut;
    }

    if cancel.sleep(clock, interval.min(deadline - now)).await
    {
        Wait::Continue
    }
    else
    {
        Wait::Cancelled
    }
}

/// Move every still-active target into `phase`.
pub fn finish<T, S>(states: &mut [PollState<T, S>], phase: Phase)
{
    for state in states.iter_mut().filter(|state| state.is_active())
    {
        state.phase = phase;
    }
}

#[tokio::test]
async fn test_next_round()
{
    use crate::libs::fakes::ManualClock;

    let clock = ManualClock::new();
    let cancel = Cancellation::never();
    let deadline = clock.now() + Duration::from_secs(25);

    assert_eq!(next_round(&clock, &cancel, Duration::from_secs(10), deadline).await, Wait::Continue);
    assert_eq!(next_round(&clock, &cancel, Duration::from_secs(10), deadline).await, Wait::Continue);
    assert_eq!(next_round(&clock, &cancel, Duration::from_secs(10), deadline).await, Wait::Continue);
    assert_eq!(next_round(&clock, &cancel, Duration::from_secs(10), deadline).await, Wait::TimedOut);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(10), Duration::from_secs(10), Duration::from_secs(5)]);

    let (handle, cancel) = Cancellation::new();
    handle.cancel();
    assert_eq!(next_round(&clock, &cancel, Duration::from_secs(10), clock.now() + Duration::from_secs(60)).await, Wait::Cancelled);
}

#[test]
fn test_deadline_saturates()
{
    use crate::libs::fakes::ManualClock;

    let clock = ManualClock::new();
    assert_eq!(deadline(&clock, Duration::from_secs(60)), clock.now() + Duration::from_secs(60));
    assert!(deadline(&clock, Duration::from_secs(u64::MAX)) > clock.now() + Duration::from_secs(3600));
}
