use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use super::poll::{self, Phase, PollState, Wait};
use crate::libs::clock::{Cancellation, Clock};
use crate::libs::error::{ApiError, ReleaseError};

pub mod github;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus
{
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// CI runs for `reference` in `repo`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowTarget
{
    pub repo:      String,
    pub reference: String,
}

impl WorkflowTarget
{
    pub fn new(repo: &str, reference: &str) -> WorkflowTarget
    {
        WorkflowTarget { repo: repo.to_string(), reference: reference.to_string() }
    }
}

impl Display for WorkflowTarget
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repo, self.reference)
    }
}

#[async_trait]
pub trait WorkflowStatusClient: Send + Sync
{
    async fn status(&self, repo: &str, reference: &str) -> Result<WorkflowStatus, ApiError>;
}

/// Per-target result of one monitoring run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport
{
    pub succeeded: Vec<WorkflowTarget>,
    pub failed:    Vec<(WorkflowTarget, ReleaseError)>,
    pub rounds:    u32,
}

impl MonitorReport
{
    pub fn is_success(&self) -> bool
    {
        self.failed.is_empty()
    }
}

/// Waits until CI for every target has finished.
pub struct WorkflowMonitor<'a>
{
    client: &'a dyn WorkflowStatusClient,
    clock:  &'a dyn Clock,
}

impl<'a> WorkflowMonitor<'a>
{
    pub fn new(client: &'a dyn WorkflowStatusClient, clock: &'a dyn Clock) -> WorkflowMonitor<'a>
    {
        WorkflowMonitor { client, clock }
    }

    pub async fn monitor(&self, targets: &[WorkflowTarget], poll_interval: Duration, timeout: Duration, cancel: &Cancellation) -> MonitorReport
    {
        let deadline = poll::deadline(self.clock, timeout);
        let mut states: Vec<PollState<WorkflowTarget, WorkflowStatus>> = Vec::new();
        for target in targets
        {
            if !states.iter().any(|state| &state.target == target)
            {
                states.push(PollState::new(target.clone(), deadline));
            }
        }

        let mut rounds = 0;
        while states.iter().any(PollState::is_active)
        {
            rounds += 1;
            for state in states.iter_mut().filter(|state| state.is_active())
            {
                state.attempts += 1;
                state.phase = Phase::Polling;
                match self.client.status(&state.target.repo, &state.target.reference).await
                {
                    Ok(status) =>
                    {
                        debug!("Workflows for {}: {:?}", state.target, status);
                        state.last_observed = Some(status);
                        match status
                        {
                            WorkflowStatus::Succeeded =>
                            {
                                info!("Workflows for {} succeeded", state.target);
                                state.phase = Phase::Succeeded;
                            }
                            WorkflowStatus::Failed =>
                            {
                                error!("Workflows for {} failed", state.target);
                                state.phase = Phase::Failed;
                            }
                            WorkflowStatus::Pending | WorkflowStatus::Running => {}
                        }
                    }
                    Err(error) if error.is_transient() => warn!("Can't get workflow status for {}: {}", state.target, error),
                    Err(error) =>
                    {
                        error!("Can't get workflow status for {}: {}", state.target, error);
                        state.fail(ReleaseError::PermanentApi(error.to_string()));
                    }
                }
            }

            if !states.iter().any(PollState::is_active)
            {
                break;
            }

            match poll::next_round(self.clock, cancel, poll_interval, deadline).await
            {
                Wait::Continue => {}
                Wait::TimedOut => poll::finish(&mut states, Phase::TimedOut),
                Wait::Cancelled => poll::finish(&mut states, Phase::Cancelled),
            }
        }

        let mut report = MonitorReport { succeeded: Vec::new(), failed: Vec::new(), rounds };
        for state in states
        {
            let error = match state.phase
            {
                Phase::Succeeded =>
                {
                    report.succeeded.push(state.target);
                    continue;
                }
                Phase::Failed => state.error.unwrap_or_else(|| ReleaseError::WorkflowFailed { target: state.target.to_string() }),
                Phase::Cancelled => ReleaseError::Cancelled,
                _ =>
                {
                    warn!("Workflows for {} still {:?} after {} polls", state.target, state.last_observed, state.attempts);
                    ReleaseError::Timeout { pending: vec![state.target.to_string()] }
                }
            };
            report.failed.push((state.target, error));
        }
        report
    }
}

#[tokio::test]
async fn test_monitor_mixed_results()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeWorkflows, ManualClock};

    let a = WorkflowTarget::new("ServiceX", "1.0.0-release1");
    let b = WorkflowTarget::new("ServiceX_DID", "1.0.0-release1");
    let c = WorkflowTarget::new("ServiceX_Transformer", "1.0.0-release1");
    let workflows = FakeWorkflows::new(hashmap! {
        a.clone() => vec![WorkflowStatus::Succeeded],
        b.clone() => vec![WorkflowStatus::Succeeded],
        c.clone() => vec![WorkflowStatus::Failed],
    });
    let clock = ManualClock::new();
    let monitor = WorkflowMonitor::new(&workflows, &clock);

    let report = monitor
        .monitor(&[a.clone(), b.clone(), c.clone()], Duration::from_secs(30), Duration::from_secs(600), &Cancellation::never())
        .await;

    assert!(!report.is_success());
    assert_eq!(report.succeeded, vec![a, b]);
    assert_eq!(report.failed, vec![(c.clone(), ReleaseError::WorkflowFailed { target: c.to_string() })]);
    assert_eq!(workflows.calls(&c), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_monitor_stops_polling_finished_targets()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeWorkflows, ManualClock};

    let fast = WorkflowTarget::new("fast", "t");
    let slow = WorkflowTarget::new("slow", "t");
    let workflows = FakeWorkflows::new(hashmap! {
        fast.clone() => vec![WorkflowStatus::Succeeded],
        slow.clone() => vec![WorkflowStatus::Pending, WorkflowStatus::Running, WorkflowStatus::Succeeded],
    });
    let clock = ManualClock::new();
    let monitor = WorkflowMonitor::new(&workflows, &clock);

    let report = monitor
        .monitor(&[fast.clone(), slow.clone()], Duration::from_secs(30), Duration::from_secs(600), &Cancellation::never())
        .await;

    assert!(report.is_success());
    assert_eq!(report.rounds, 3);
    assert_eq!(workflows.calls(&fast), 1);
    assert_eq!(workflows.calls(&slow), 3);
}

#[tokio::test]
async fn test_monitor_times_out()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeWorkflows, ManualClock};

    let stuck = WorkflowTarget::new("stuck", "t");
    let workflows = FakeWorkflows::new(hashmap! { stuck.clone() => vec![WorkflowStatus::Running] });
    let clock = ManualClock::new();
    let monitor = WorkflowMonitor::new(&workflows, &clock);

    let report = monitor.monitor(&[stuck.clone()], Duration::from_secs(30), Duration::from_secs(90), &Cancellation::never()).await;

    assert_eq!(report.failed, vec![(stuck.clone(), ReleaseError::Timeout { pending: vec!["stuck@t".to_string()] })]);
    assert_eq!(clock.elapsed(), Duration::from_secs(90));
}

#[tokio::test]
async fn test_monitor_rejected_status_is_not_repolled()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeWorkflows, ManualClock};

    let denied = WorkflowTarget::new("denied", "t");
    let flaky = WorkflowTarget::new("flaky", "t");
    let workflows = FakeWorkflows::new(hashmap! {})
        .failing(&denied, ApiError::Permanent { status: 401, message: "Bad credentials".to_string() })
        .failing(&flaky, ApiError::Transient("502".to_string()));
    let clock = ManualClock::new();
    let monitor = WorkflowMonitor::new(&workflows, &clock);

    let report = monitor.monitor(&[denied.clone()], Duration::from_secs(30), Duration::from_secs(3600), &Cancellation::never()).await;
    assert_eq!(
        report.failed,
        vec![(denied.clone(), ReleaseError::PermanentApi("API rejected the request (401): Bad credentials".to_string()))]
    );
    assert_eq!(workflows.calls(&denied), 1);
    assert!(clock.sleeps().is_empty());

    // Transient errors only mean "no answer this round".
    let report = monitor.monitor(&[flaky.clone()], Duration::from_secs(30), Duration::from_secs(60), &Cancellation::never()).await;
    assert_eq!(report.failed, vec![(flaky.clone(), ReleaseError::Timeout { pending: vec!["flaky@t".to_string()] })]);
    assert_eq!(workflows.calls(&flaky), 3);
}

#[tokio::test]
async fn test_monitor_accepts_huge_timeout()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeWorkflows, ManualClock};

    let target = WorkflowTarget::new("ServiceX", "t");
    let workflows = FakeWorkflows::new(hashmap! { target.clone() => vec![WorkflowStatus::Running, WorkflowStatus::Succeeded] });
    let clock = ManualClock::new();
    let monitor = WorkflowMonitor::new(&workflows, &clock);

    let report = monitor
        .monitor(&[target.clone()], Duration::from_secs(30), Duration::from_secs(u64::MAX), &Cancellation::never())
        .await;
    assert_eq!(report.succeeded, vec![target]);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
}
