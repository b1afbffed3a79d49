use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};

use super::poll::{self, Phase, PollState, Wait};
use crate::libs::clock::{Cancellation, Clock};
use crate::libs::error::{ApiError, ReleaseError};
use crate::libs::release::Registry;

pub mod registry;

/// A container image that is expected to be published.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef
{
    pub registry:   Registry,
    pub repository: String,
    pub tag:        String,
}

impl Display for ImageRef
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = match self.registry
        {
            Registry::DockerHub => "dockerhub",
            Registry::Harbor => "harbor",
        };
        write!(f, "{}:{}:{}", registry, self.repository, self.tag)
    }
}

#[async_trait]
pub trait ContainerRegistryClient: Send + Sync
{
    async fn exists(&self, image: &ImageRef) -> Result<bool, ApiError>;
}

/// Result of one verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport
{
    pub confirmed: Vec<ImageRef>,
    /// Not seen before the deadline or cancellation.
    pub missing:   Vec<ImageRef>,
    /// Lookups the registry refused outright.
    pub failed:    Vec<(ImageRef, ReleaseError)>,
    pub rounds:    u32,
    pub cancelled: bool,
}

impl VerifyReport
{
    pub fn is_success(&self) -> bool
    {
        self.missing.is_empty() && self.failed.is_empty() && !self.cancelled
    }
}

/// Waits until every expected image is present in its registry.
pub struct ContainerVerifier<'a>
{
    registry: &'a dyn ContainerRegistryClient,
    clock:    &'a dyn Clock,
}

impl<'a> ContainerVerifier<'a>
{
    pub fn new(registry: &'a dyn ContainerRegistryClient, clock: &'a dyn Clock) -> ContainerVerifier<'a>
    {
        ContainerVerifier { registry, clock }
    }

    pub async fn verify(&self, images: &[ImageRef], poll_interval: Duration, timeout: Duration, cancel: &Cancellation) -> VerifyReport
    {
        let deadline = poll::deadline(self.clock, timeout);
        let mut states: Vec<PollState<ImageRef, bool>> = Vec::new();
        for image in images
        {
            if !states.iter().any(|state| &state.target == image)
            {
                states.push(PollState::new(image.clone(), deadline));
            }
        }

        let mut rounds = 0;
        while states.iter().any(PollState::is_active)
        {
            rounds += 1;
            // Confirmed images are never checked again.
            for state in states.iter_mut().filter(|state| state.is_active())
            {
                state.attempts += 1;
                state.phase = Phase::Polling;
                match self.registry.exists(&state.target).await
                {
                    Ok(present) =>
                    {
                        state.last_observed = Some(present);
                        if present
                        {
                            info!("Found container {}", state.target);
                            state.phase = Phase::Succeeded;
                        }
                        else
                        {
                            debug!("Container {} not published yet (attempt {})", state.target, state.attempts);
                        }
                    }
                    Err(error) if error.is_transient() => warn!("Can't check container {}: {}", state.target, error),
                    Err(error) =>
                    {
                        error!("Can't check container {}: {}", state.target, error);
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

        let cancelled = states.iter().any(|state| state.phase == Phase::Cancelled);
        let mut report = VerifyReport { confirmed: Vec::new(), missing: Vec::new(), failed: Vec::new(), rounds, cancelled };
        for state in states
        {
            match (state.phase, state.error)
            {
                (Phase::Succeeded, _) => report.confirmed.push(state.target),
                (Phase::Failed, Some(error)) => report.failed.push((state.target, error)),
                _ => report.missing.push(state.target),
            }
        }
        report
    }
}

#[cfg(test)]
fn image(repository: &str) -> ImageRef
{
    ImageRef { registry: Registry::DockerHub, repository: repository.to_string(), tag: "1.0.0-release1".to_string() }
}

#[tokio::test]
async fn test_verify_all_present()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    let registry = FakeRegistry::new(hashmap! { image("sslhep/a") => 0, image("sslhep/b") => 0 });
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);

    let report = verifier
        .verify(&[image("sslhep/a"), image("sslhep/b")], Duration::from_secs(10), Duration::from_secs(60), &Cancellation::never())
        .await;

    assert!(report.is_success());
    assert_eq!(report.rounds, 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_verify_waits_for_late_image()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    // `b` is missing on the first round and present on the second.
    let registry = FakeRegistry::new(hashmap! { image("sslhep/a") => 0, image("sslhep/b") => 1 });
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);

    let report = verifier
        .verify(&[image("sslhep/a"), image("sslhep/b")], Duration::from_secs(10), Duration::from_secs(60), &Cancellation::never())
        .await;

    assert!(report.is_success());
    assert_eq!(report.rounds, 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(10)]);
    assert_eq!(registry.calls(&image("sslhep/a")), 1);
    assert_eq!(registry.calls(&image("sslhep/b")), 2);
}

#[tokio::test]
async fn test_verify_times_out()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    let registry = FakeRegistry::new(hashmap! { image("sslhep/a") => 0, image("sslhep/never") => u32::MAX });
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);

    let report = verifier
        .verify(&[image("sslhep/a"), image("sslhep/never")], Duration::from_secs(10), Duration::from_secs(30), &Cancellation::never())
        .await;

    assert!(!report.is_success());
    assert_eq!(report.missing, vec![image("sslhep/never")]);
    assert_eq!(report.confirmed, vec![image("sslhep/a")]);
    assert!(report.failed.is_empty());
    assert_eq!(clock.elapsed(), Duration::from_secs(30));
}

#[tokio::test]
async fn test_verify_cancelled()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    let registry = FakeRegistry::new(hashmap! { image("sslhep/never") => u32::MAX });
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);
    let (handle, cancel) = Cancellation::new();
    handle.cancel();

    let report = verifier.verify(&[image("sslhep/never")], Duration::from_secs(10), Duration::from_secs(3600), &cancel).await;
    assert!(report.cancelled);
    assert_eq!(report.rounds, 1);
    assert_eq!(report.missing, vec![image("sslhep/never")]);
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_verify_rejected_lookup_is_not_repolled()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    let registry = FakeRegistry::new(hashmap! { image("sslhep/a") => 0 })
        .failing(&image("sslhep/private"), ApiError::Permanent { status: 401, message: "unauthorized".to_string() });
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);

    let report = verifier
        .verify(&[image("sslhep/a"), image("sslhep/private")], Duration::from_secs(30), Duration::from_secs(3600), &Cancellation::never())
        .await;

    assert_eq!(report.confirmed, vec![image("sslhep/a")]);
    assert_eq!(
        report.failed,
        vec![(image("sslhep/private"), ReleaseError::PermanentApi("API rejected the request (401): unauthorized".to_string()))]
    );
    assert!(report.missing.is_empty());
    assert_eq!(registry.calls(&image("sslhep/private")), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_verify_transient_lookup_keeps_polling()
{
    use maplit::hashmap;
    use crate::libs::fakes::{FakeRegistry, ManualClock};

    let registry = FakeRegistry::new(hashmap! {}).failing(&image("sslhep/a"), ApiError::Transient("503".to_string()));
    let clock = ManualClock::new();
    let verifier = ContainerVerifier::new(&registry, &clock);

    let report = verifier.verify(&[image("sslhep/a")], Duration::from_secs(10), Duration::from_secs(20), &Cancellation::never()).await;

    assert_eq!(report.missing, vec![image("sslhep/a")]);
    assert!(report.failed.is_empty());
    assert_eq!(registry.calls(&image("sslhep/a")), 3);
}
