use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};

use super::containers::{ContainerRegistryClient, ContainerVerifier, ImageRef};
use super::orchestrator::ReleaseOrchestrator;
use super::release::ReleaseClient;
use super::workflows::{WorkflowMonitor, WorkflowStatusClient, WorkflowTarget};
use crate::libs::clock::{Cancellation, Clock};
use crate::libs::outcome::{Outcome, Status};
use crate::libs::release::{RetagSpec, TagSpec};
use crate::libs::retry::RetryPolicy;

/// Everything a command may do, resolved from the CLI.
#[derive(Debug, Clone)]
pub enum Command
{
    Tag { specs: Vec<TagSpec> },
    Retag { specs: Vec<RetagSpec> },
    VerifyContainers { specs: Vec<TagSpec>, tag: String },
    MonitorWorkflows { specs: Vec<TagSpec>, reference: String },
    /// Tag, then wait on workflows and containers for the new tags.
    Release { specs: Vec<TagSpec> },
}

/// Clients and knobs shared by every command.
pub struct Context<'a>
{
    pub release:       &'a dyn ReleaseClient,
    pub registry:      &'a dyn ContainerRegistryClient,
    pub workflows:     &'a dyn WorkflowStatusClient,
    pub clock:         &'a dyn Clock,
    pub cancel:        Cancellation,
    pub retry:         RetryPolicy,
    pub jobs:          usize,
    pub dry_run:       bool,
    pub poll_interval: Duration,
    pub timeout:       Duration,
}

/// What a command did: tag outcomes plus anything a gate reported as blocking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report
{
    pub outcomes: Vec<Outcome>,
    pub blocked:  Vec<String>,
}

impl Report
{
    pub fn is_success(&self) -> bool
    {
        self.blocked.is_empty() && !self.outcomes.iter().any(Outcome::is_failed)
    }
}

pub async fn execute(command: Command, context: &Context<'_>) -> Report
{
    let orchestrator = ReleaseOrchestrator::new(context.release, context.clock)
        .with_retry(context.retry.clone())
        .with_jobs(context.jobs)
        .with_dry_run(context.dry_run);

    match command
    {
        Command::Tag { specs } =>
        {
            let outcomes = orchestrator.run_tag(&specs, Utc::now()).await;
            Report { outcomes, blocked: Vec::new() }
        }
        Command::Retag { specs } =>
        {
            let outcomes = orchestrator.run_retag(&specs, Utc::now()).await;
            Report { outcomes, blocked: Vec::new() }
        }
        Command::VerifyContainers { specs, tag } =>
        {
            let images: Vec<ImageRef> = specs.iter().filter_map(|spec| image(spec, &tag)).collect();
            if images.is_empty()
            {
                warn!("No container images configured, nothing to verify");
            }
            Report { outcomes: Vec::new(), blocked: verify_containers(context, &images).await }
        }
        Command::MonitorWorkflows { specs, reference } =>
        {
            let targets: Vec<WorkflowTarget> = specs.iter().map(|spec| WorkflowTarget::new(&spec.name, &reference)).collect();
            Report { outcomes: Vec::new(), blocked: monitor_workflows(context, &targets).await }
        }
        Command::Release { specs } =>
        {
            let outcomes = orchestrator.run_tag(&specs, Utc::now()).await;

            // Only targets that were actually tagged have anything to wait on.
            let tagged: Vec<(&TagSpec, &str)> = specs
                .iter()
                .zip(&outcomes)
                .filter(|(_, outcome)| outcome.status == Status::Tagged)
                .filter_map(|(spec, outcome)| outcome.tag_string.as_deref().map(|tag| (spec, tag)))
                .collect();

            let targets: Vec<WorkflowTarget> = tagged.iter().map(|(spec, tag)| WorkflowTarget::new(&spec.name, tag)).collect();
            let mut blocked = monitor_workflows(context, &targets).await;

            let images: Vec<ImageRef> = tagged.iter().filter_map(|(spec, tag)| image(spec, tag)).collect();
            blocked.extend(verify_containers(context, &images).await);

            Report { outcomes, blocked }
        }
    }
}

fn image(spec: &TagSpec, tag: &str) -> Option<ImageRef>
{
    spec.image.as_ref().map(|source| ImageRef { registry: source.registry, repository: source.repository.clone(), tag: tag.to_string() })
}

async fn verify_containers(context: &Context<'_>, images: &[ImageRef]) -> Vec<String>
{
    if images.is_empty()
    {
        return Vec::new();
    }

    info!("Checking for {} container images", images.len());
    let verifier = ContainerVerifier::new(context.registry, context.clock);
    let report = verifier.verify(images, context.poll_interval, context.timeout, &context.cancel).await;
    if report.is_success()
    {
        info!("All {} images have been published", report.confirmed.len());
        return Vec::new();
    }

    let mut blocked: Vec<String> = report
        .failed
        .into_iter()
        .map(|(image, error)| format!("container {}: {}", image, error))
        .collect();
    if report.cancelled
    {
        blocked.push("containers: cancelled".to_string());
    }
    else
    {
        for image in report.missing
        {
            error!("Can't find container {}", image);
            blocked.push(format!("container {}: not published before timeout", image));
        }
    }
    blocked
}

async fn monitor_workflows(context: &Context<'_>, targets: &[WorkflowTarget]) -> Vec<String>
{
    if targets.is_empty()
    {
        return Vec::new();
    }

    info!("Monitoring workflows for {} repositories", targets.len());
    let monitor = WorkflowMonitor::new(context.workflows, context.clock);
    let report = monitor.monitor(targets, context.poll_interval, context.timeout, &context.cancel).await;
    if report.is_success()
    {
        info!("All workflows succeeded");
    }
    report
        .failed
        .into_iter()
        .map(|(target, error)| format!("workflows {}: {}", target, error))
        .collect()
}

#[cfg(test)]
fn context<'a>(
    release: &'a dyn ReleaseClient,
    registry: &'a dyn ContainerRegistryClient,
    workflows: &'a dyn WorkflowStatusClient,
    clock: &'a dyn Clock,
) -> Context<'a>
{
    Context {
        release,
        registry,
        workflows,
        clock,
        cancel: Cancellation::never(),
        retry: RetryPolicy::new(3, Duration::from_millis(10), 2.0),
        jobs: 1,
        dry_run: false,
        poll_interval: Duration::from_secs(30),
        timeout: Duration::from_secs(300),
    }
}

#[tokio::test]
async fn test_release_gates_only_tagged_targets()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, FakeReleaseClient, FakeWorkflows, ManualClock};
    use crate::libs::release::{ImageSource, Registry};
    use crate::libs::version::TagType;
    use crate::feature::workflows::WorkflowStatus;

    let release = FakeReleaseClient::new().with_branch("ServiceX", "develop", "aaaaaaa");
    let published = ImageRef { registry: Registry::DockerHub, repository: "sslhep/servicex_app".to_string(), tag: "1.0.0-release1".to_string() };
    let registry = FakeRegistry::new(hashmap! { published.clone() => 1 });
    let workflows = FakeWorkflows::new(hashmap! {
        WorkflowTarget::new("ServiceX", "1.0.0-release1") => vec![WorkflowStatus::Running, WorkflowStatus::Succeeded],
    });
    let clock = ManualClock::new();
    let context = context(&release, &registry, &workflows, &clock);

    let specs = vec![
        TagSpec {
            image: Some(ImageSource { registry: Registry::DockerHub, repository: "sslhep/servicex_app".to_string() }),
            ..TagSpec::new("ServiceX", "release1", TagType::Semver).with_branch("develop").with_semver("1.0.0")
        },
        TagSpec::new("Missing", "release1", TagType::Semver).with_branch("develop").with_semver("1.0.0"),
    ];
    let report = execute(Command::Release { specs }, &context).await;

    assert_eq!(report.outcomes[0], Outcome::tagged("ServiceX", "1.0.0-release1"));
    assert!(report.outcomes[1].is_failed());
    assert!(report.blocked.is_empty(), "{:?}", report.blocked);
    assert!(!report.is_success());
    assert_eq!(workflows.calls(&WorkflowTarget::new("Missing", "1.0.0-release1")), 0);
    assert_eq!(registry.calls(&published), 2);
}

#[tokio::test]
async fn test_verify_containers_reports_missing()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, FakeReleaseClient, FakeWorkflows, ManualClock};
    use crate::libs::release::{ImageSource, Registry};
    use crate::libs::version::TagType;

    let release = FakeReleaseClient::new();
    let registry = FakeRegistry::new(hashmap! {});
    let workflows = FakeWorkflows::new(hashmap! {});
    let clock = ManualClock::new();
    let context = context(&release, &registry, &workflows, &clock);

    let specs = vec![
        TagSpec {
            image: Some(ImageSource { registry: Registry::Harbor, repository: "sslhep/did".to_string() }),
            ..TagSpec::new("DID", "develop1", TagType::Calver).with_branch("develop")
        },
        TagSpec::new("NoImage", "develop1", TagType::Calver).with_branch("develop"),
    ];
    let report = execute(Command::VerifyContainers { specs, tag: "v1".to_string() }, &context).await;

    assert_eq!(report.blocked, vec!["container harbor:sslhep/did:v1: not published before timeout".to_string()]);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_monitor_workflows_command()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, FakeReleaseClient, FakeWorkflows, ManualClock};
    use crate::libs::version::TagType;
    use crate::feature::workflows::WorkflowStatus;

    let release = FakeReleaseClient::new();
    let registry = FakeRegistry::new(hashmap! {});
    let workflows = FakeWorkflows::new(hashmap! {
        WorkflowTarget::new("A", "v1") => vec![WorkflowStatus::Succeeded],
        WorkflowTarget::new("B", "v1") => vec![WorkflowStatus::Failed],
    });
    let clock = ManualClock::new();
    let context = context(&release, &registry, &workflows, &clock);

    let specs = vec![
        TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop"),
        TagSpec::new("B", "develop1", TagType::Calver).with_branch("develop"),
    ];
    let report = execute(Command::MonitorWorkflows { specs, reference: "v1".to_string() }, &context).await;

    assert_eq!(report.blocked, vec!["workflows B@v1: workflows for `B@v1` failed".to_string()]);
}

#[tokio::test]
async fn test_verify_containers_without_images()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, FakeReleaseClient, FakeWorkflows, ManualClock};
    use crate::libs::version::TagType;

    let release = FakeReleaseClient::new();
    let registry = FakeRegistry::new(hashmap! {});
    let workflows = FakeWorkflows::new(hashmap! {});
    let clock = ManualClock::new();
    let context = context(&release, &registry, &workflows, &clock);

    let specs = vec![TagSpec::new("NoImage", "develop1", TagType::Calver).with_branch("develop")];
    let report = execute(Command::VerifyContainers { specs, tag: "v1".to_string() }, &context).await;

    assert!(report.is_success());
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_verify_containers_reports_rejected_lookup()
{
    use maplit::hashmap;
    use crate::libs::error::ApiError;
    use crate::libs::fakes::{FakeRegistry, FakeReleaseClient, FakeWorkflows, ManualClock};
    use crate::libs::release::{ImageSource, Registry};
    use crate::libs::version::TagType;

    let denied = ImageRef { registry: Registry::DockerHub, repository: "sslhep/a".to_string(), tag: "v1".to_string() };
    let release = FakeReleaseClient::new();
    let registry = FakeRegistry::new(hashmap! {})
        .failing(&denied, ApiError::Permanent { status: 403, message: "forbidden".to_string() });
    let workflows = FakeWorkflows::new(hashmap! {});
    let clock = ManualClock::new();
    let context = context(&release, &registry, &workflows, &clock);

    let specs = vec![TagSpec {
        image: Some(ImageSource { registry: Registry::DockerHub, repository: "sslhep/a".to_string() }),
        ..TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop")
    }];
    let report = execute(Command::VerifyContainers { specs, tag: "v1".to_string() }, &context).await;

    assert_eq!(report.blocked, vec!["container dockerhub:sslhep/a:v1: API rejected the request (403): forbidden".to_string()]);
    assert_eq!(registry.calls(&denied), 1);
}
