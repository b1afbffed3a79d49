use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};

use super::release::ReleaseClient;
use super::retrieval;
use crate::libs::clock::Clock;
use crate::libs::error::{ApiError, ConfigError, ReleaseError};
use crate::libs::outcome::Outcome;
use crate::libs::release::{ResolvedTarget, RetagSpec, TagSpec};
use crate::libs::retry::RetryPolicy;
use crate::libs::version;

pub const TAG_MESSAGE: &str = "Tagged using release-tool";

/// Drives resolve -> generate -> create for every target of a batch.
///
/// One target's failure never stops the batch, and outcomes always come back
/// in input order, even with `jobs > 1`.
pub struct ReleaseOrchestrator<'a>
{
    client:  &'a dyn ReleaseClient,
    clock:   &'a dyn Clock,
    retry:   RetryPolicy,
    jobs:    usize,
    dry_run: bool,
}

impl<'a> ReleaseOrchestrator<'a>
{
    pub fn new(client: &'a dyn ReleaseClient, clock: &'a dyn Clock) -> ReleaseOrchestrator<'a>
    {
        ReleaseOrchestrator { client, clock, retry: RetryPolicy::default(), jobs: 1, dry_run: false }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> ReleaseOrchestrator<'a>
    {
        self.retry = retry;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> ReleaseOrchestrator<'a>
    {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> ReleaseOrchestrator<'a>
    {
        self.dry_run = dry_run;
        self
    }

    pub async fn run_tag(&self, specs: &[TagSpec], now: DateTime<Utc>) -> Vec<Outcome>
    {
        let duplicates = duplicates(specs.iter().map(|spec| spec.name.as_str()));
        stream::iter(specs)
            .map(|spec| self.tag_one(spec, duplicates.contains(spec.name.as_str()), now))
            .buffered(self.jobs)
            .collect()
            .await
    }

    pub async fn run_retag(&self, specs: &[RetagSpec], now: DateTime<Utc>) -> Vec<Outcome>
    {
        // Only a repo that would receive the same new tag twice is a conflict.
        let targets: Vec<(&RetagSpec, &str, Option<String>)> = specs
            .iter()
            .flat_map(|spec| {
                let tag = spec.validate().ok().map(|scheme| version::generate(scheme, &spec.label, now));
                spec.target_repos.iter().map(move |repo| (spec, repo.as_str(), tag.clone()))
            })
            .collect();
        let duplicates = duplicates(targets.iter().filter_map(|(_, repo, tag)| tag.as_deref().map(|tag| (*repo, tag))));
        stream::iter(&targets)
            .map(|(spec, repo, tag)| {
                let duplicate = tag.as_deref().filter(|tag| duplicates.contains(&(*repo, *tag)));
                self.retag_one(spec, repo, duplicate, now)
            })
            .buffered(self.jobs)
            .collect()
            .await
    }

    async fn tag_one(&self, spec: &TagSpec, duplicate: bool, now: DateTime<Utc>) -> Outcome
    {
        if duplicate
        {
            return fail(&spec.name, None, ConfigError::Duplicate(spec.name.clone()).into());
        }

        let scheme = match spec.validate()
        {
            Ok(scheme) => scheme,
            Err(error) => return fail(&spec.name, None, error.into()),
        };

        let commit_sha = match retrieval::resolve(spec, self.client).await
        {
            Ok(commit) => commit,
            Err(error) => return fail(&spec.name, None, error),
        };

        let target = ResolvedTarget {
            repo_name: spec.name.clone(),
            commit_sha,
            tag_string: version::generate(scheme, &spec.label, now),
        };
        self.apply(target, TAG_MESSAGE).await
    }

    async fn retag_one(&self, spec: &RetagSpec, repo: &str, duplicate: Option<&str>, now: DateTime<Utc>) -> Outcome
    {
        if let Some(tag) = duplicate
        {
            return fail(repo, Some(tag), ConfigError::DuplicateTag { repo: repo.to_string(), tag: tag.to_string() }.into());
        }

        let scheme = match spec.validate()
        {
            Ok(scheme) => scheme,
            Err(error) => return fail(repo, None, error.into()),
        };

        let commit_sha = match retrieval::resolve_from_existing_tag(repo, &spec.source_tag, self.client).await
        {
            Ok(commit) => commit,
            Err(error) => return fail(repo, None, error),
        };

        let target = ResolvedTarget { repo_name: repo.to_string(), commit_sha, tag_string: version::generate(scheme, &spec.label, now) };
        let message = format!("Retagging from {} to {}", spec.source_tag, target.tag_string);
        self.apply(target, &message).await
    }

    async fn apply(&self, target: ResolvedTarget, message: &str) -> Outcome
    {
        if self.dry_run
        {
            info!("Would tag {} at {} as {}", target.repo_name, target.commit_sha, target.tag_string);
            return Outcome::skipped(&target.repo_name, &target.tag_string);
        }

        match self.create_with_retry(&target, message).await
        {
            Ok(()) =>
            {
                info!("Tagged {} at {} as {}", target.repo_name, target.commit_sha, target.tag_string);
                Outcome::tagged(&target.repo_name, &target.tag_string)
            }
            Err(error) => fail(&target.repo_name, Some(&target.tag_string), error),
        }
    }

    async fn create_with_retry(&self, target: &ResolvedTarget, message: &str) -> Result<(), ReleaseError>
    {
        let mut attempt = 0;
        loop
        {
            attempt += 1;
            let result = self
                .client
                .create_tag(&target.repo_name, &target.commit_sha, &target.tag_string, message)
                .await;

            match result
            {
                Ok(()) => return Ok(()),
                Err(ApiError::Transient(reason)) if self.retry.should_retry(attempt) =>
                {
                    let delay = self.retry.delay(attempt);
                    warn!("Tagging {} failed ({}), retrying in {:?}", target.repo_name, reason, delay);
                    self.clock.sleep(delay).await;
                }
                Err(ApiError::Transient(reason)) => return Err(ReleaseError::TransientApi { attempts: attempt, message: reason }),
                Err(error @ ApiError::Permanent { .. }) if attempt > 1 =>
                {
                    // An earlier attempt may have landed before its response was lost.
                    if self.already_tagged(target).await
                    {
                        warn!("{} already points {} at {}, keeping it", target.repo_name, target.tag_string, target.commit_sha);
                        return Ok(());
                    }
                    return Err(ReleaseError::PermanentApi(error.to_string()));
                }
                Err(error) => return Err(ReleaseError::PermanentApi(error.to_string())),
            }
        }
    }

    async fn already_tagged(&self, target: &ResolvedTarget) -> bool
    {
        match self.client.tag_target(&target.repo_name, &target.tag_string).await
        {
            Ok(commit) => commit.starts_with(&target.commit_sha),
            Err(_) => false,
        }
    }
}

fn fail(repo: &str, tag: Option<&str>, error: ReleaseError) -> Outcome
{
    error!("Can't tag {}: {}", repo, error);
    Outcome::failed(repo, tag, error)
}

/// Keys that occur more than once.
fn duplicates<K: Eq + Hash>(keys: impl Iterator<Item = K>) -> HashSet<K>
{
    let mut counts = HashMap::<K, u32>::new();
    for key in keys
    {
        *counts.entry(key).or_insert(0) += 1;
    }
    counts.into_iter().filter(|(_, count)| *count > 1).map(|(key, _)| key).collect()
}

#[cfg(test)]
fn test_now() -> DateTime<Utc>
{
    use chrono::TimeZone;

    Utc.with_ymd_and_hms(2022, 2, 16, 9, 18, 42).unwrap()
}

#[cfg(test)]
fn fast_retry() -> RetryPolicy
{
    RetryPolicy::new(3, std::time::Duration::from_millis(100), 2.0)
}

#[tokio::test]
async fn test_run_tag_isolates_failures()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::outcome::Status;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new()
        .with_branch("A", "develop", "aaaaaaa")
        .with_branch("C", "develop", "ccccccc");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_retry(fast_retry());

    let specs = vec![
        TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop"),
        TagSpec::new("B", "develop1", TagType::Calver).with_branch("develop"),
        TagSpec::new("C", "release1", TagType::Semver).with_branch("develop").with_semver("1.2.4rc2"),
    ];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    let names: Vec<&str> = outcomes.iter().map(|outcome| outcome.repo_name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
    assert_eq!(outcomes[0], Outcome::tagged("A", "20220216-0918-develop1"));
    assert_eq!(outcomes[1].status, Status::Failed);
    assert!(matches!(outcomes[1].error, Some(ReleaseError::Resolution { .. })));
    assert_eq!(outcomes[2], Outcome::tagged("C", "1.2.4rc2-release1"));

    let created = client.created();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].commit, "aaaaaaa");
    assert_eq!(created[0].message, TAG_MESSAGE);
}

#[tokio::test]
async fn test_run_tag_parallel_keeps_order()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    let mut client = FakeReleaseClient::new();
    let mut specs = Vec::new();
    for index in 0..8
    {
        let name = format!("repo{}", index);
        client = client.with_branch(&name, "develop", &format!("{:07}", index));
        specs.push(TagSpec::new(&name, "develop1", TagType::Calver).with_branch("develop"));
    }
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_jobs(4);

    let outcomes = orchestrator.run_tag(&specs, test_now()).await;
    let names: Vec<String> = outcomes.into_iter().map(|outcome| outcome.repo_name).collect();
    let expected: Vec<String> = specs.into_iter().map(|spec| spec.name).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_transient_failures_are_retried()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;
    use std::time::Duration;

    let client = FakeReleaseClient::new()
        .with_branch("A", "develop", "aaaaaaa")
        .failing_create("A", vec![ApiError::Transient("502".to_string()), ApiError::Transient("timeout".to_string())]);
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_retry(fast_retry());

    let specs = vec![TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop")];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(outcomes, vec![Outcome::tagged("A", "20220216-0918-develop1")]);
    assert_eq!(client.create_calls(), 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
}

#[tokio::test]
async fn test_retry_budget_is_bounded()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new()
        .with_branch("A", "develop", "aaaaaaa")
        .failing_create("A", vec![ApiError::Transient("503".to_string()); 5]);
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_retry(fast_retry());

    let specs = vec![TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop")];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(client.create_calls(), 3);
    assert_eq!(outcomes[0].tag_string.as_deref(), Some("20220216-0918-develop1"));
    assert_eq!(outcomes[0].error, Some(ReleaseError::TransientApi { attempts: 3, message: "503".to_string() }));
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::outcome::Status;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new()
        .with_branch("A", "develop", "aaaaaaa")
        .with_tag("A", "1.0.0-release1", "0000000");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_retry(fast_retry());

    let specs = vec![TagSpec::new("A", "release1", TagType::Semver).with_branch("develop").with_semver("1.0.0")];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(outcomes[0].status, Status::Failed);
    assert!(matches!(outcomes[0].error, Some(ReleaseError::PermanentApi(_))));
    assert_eq!(client.create_calls(), 1);
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_duplicate_and_invalid_specs()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new().with_branch("A", "develop", "aaaaaaa").with_branch("B", "develop", "bbbbbbb");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock);

    let specs = vec![
        TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop"),
        TagSpec::new("B", "release1", TagType::Semver).with_branch("develop"),
        TagSpec::new("A", "develop2", TagType::Calver).with_branch("develop"),
    ];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(outcomes[0].error, Some(ReleaseError::Config(ConfigError::Duplicate("A".to_string()))));
    assert!(matches!(outcomes[1].error, Some(ReleaseError::Config(ConfigError::Section { .. }))));
    assert_eq!(outcomes[2].error, Some(ReleaseError::Config(ConfigError::Duplicate("A".to_string()))));
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_dry_run_skips_creation()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new().with_branch("A", "develop", "aaaaaaa");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_dry_run(true);

    let specs = vec![TagSpec::new("A", "develop1", TagType::Calver).with_branch("develop")];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(outcomes, vec![Outcome::skipped("A", "20220216-0918-develop1")]);
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_run_retag()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::outcome::Status;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new()
        .with_tag("A", "20220216-0918-develop1", "aaaaaaa")
        .with_tag("C", "20220216-0918-develop1", "ccccccc");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock);

    let specs = vec![RetagSpec {
        source_tag: "20220216-0918-develop1".to_string(),
        target_repos: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        label: "release1".to_string(),
        tag_type: TagType::Semver,
        semver: Some("1.0.0".to_string()),
    }];
    let outcomes = orchestrator.run_retag(&specs, test_now()).await;

    assert_eq!(outcomes[0], Outcome::tagged("A", "1.0.0-release1"));
    assert_eq!(outcomes[1].status, Status::Failed);
    assert_eq!(outcomes[2], Outcome::tagged("C", "1.0.0-release1"));

    let created = client.created();
    assert_eq!(created[1].commit, "ccccccc");
    assert_eq!(created[1].message, "Retagging from 20220216-0918-develop1 to 1.0.0-release1");
}

#[tokio::test]
async fn test_retag_missing_source_tag()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new();
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock);

    let specs = vec![RetagSpec {
        source_tag: "missing".to_string(),
        target_repos: vec!["A".to_string(), "B".to_string()],
        label: "release1".to_string(),
        tag_type: TagType::Calver,
        semver: None,
    }];
    let outcomes = orchestrator.run_retag(&specs, test_now()).await;

    assert_eq!(outcomes.len(), 2);
    for (outcome, repo) in outcomes.iter().zip(["A", "B"])
    {
        assert_eq!(outcome.error, Some(ReleaseError::TagNotFound { repo: repo.to_string(), tag: "missing".to_string() }));
    }
    assert_eq!(client.create_calls(), 0);
}

#[tokio::test]
async fn test_retried_create_that_landed_counts_as_tagged()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::version::TagType;

    // The first attempt timed out after the host had already written the tag.
    let client = FakeReleaseClient::new()
        .with_branch("A", "develop", "aaaaaaa")
        .with_tag("A", "1.0.0-release1", "aaaaaaa")
        .failing_create("A", vec![ApiError::Transient("timeout".to_string())]);
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock).with_retry(fast_retry());

    let specs = vec![TagSpec::new("A", "release1", TagType::Semver).with_branch("develop").with_semver("1.0.0")];
    let outcomes = orchestrator.run_tag(&specs, test_now()).await;

    assert_eq!(outcomes, vec![Outcome::tagged("A", "1.0.0-release1")]);
    assert_eq!(client.create_calls(), 2);
}

#[tokio::test]
async fn test_retag_duplicates_are_per_generated_tag()
{
    use crate::libs::fakes::{FakeReleaseClient, ManualClock};
    use crate::libs::outcome::Status;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new()
        .with_tag("A", "old1", "aaaaaaa")
        .with_tag("A", "old2", "bbbbbbb")
        .with_tag("B", "old3", "ccccccc")
        .with_tag("B", "old4", "ddddddd");
    let clock = ManualClock::new();
    let orchestrator = ReleaseOrchestrator::new(&client, &clock);

    let group = |source: &str, repo: &str, label: &str| RetagSpec {
        source_tag: source.to_string(),
        target_repos: vec![repo.to_string()],
        label: label.to_string(),
        tag_type: TagType::Semver,
        semver: Some("1.0.0".to_string()),
    };
    let specs = vec![
        group("old1", "A", "release1"),
        group("old2", "A", "release2"),
        group("old3", "B", "release1"),
        group("old4", "B", "release1"),
    ];
    let outcomes = orchestrator.run_retag(&specs, test_now()).await;

    assert_eq!(outcomes[0], Outcome::tagged("A", "1.0.0-release1"));
    assert_eq!(outcomes[1], Outcome::tagged("A", "1.0.0-release2"));
    let conflict = ReleaseError::Config(ConfigError::DuplicateTag { repo: "B".to_string(), tag: "1.0.0-release1".to_string() });
    for outcome in &outcomes[2..]
    {
        assert_eq!(outcome.status, Status::Failed);
        assert_eq!(outcome.error.as_ref(), Some(&conflict));
    }
    assert_eq!(conflict.to_string(), "repo `B` would get tag `1.0.0-release1` more than once in this batch");
    assert_eq!(client.create_calls(), 2);
}
