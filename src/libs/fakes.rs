//! In-memory stand-ins for the external clients and the clock (testing only).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::clock::Clock;
use super::error::ApiError;
use crate::feature::containers::{ContainerRegistryClient, ImageRef};
use crate::feature::release::ReleaseClient;
use crate::feature::workflows::{WorkflowStatus, WorkflowStatusClient, WorkflowTarget};

/// Clock whose `sleep` returns immediately after advancing time.
pub struct ManualClock
{
    start:  Instant,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock
{
    pub fn new() -> ManualClock
    {
        ManualClock { start: Instant::now(), sleeps: Mutex::new(Vec::new()) }
    }

    pub fn sleeps(&self) -> Vec<Duration>
    {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration
    {
        self.sleeps.lock().unwrap().iter().sum()
    }
}

#[async_trait]
impl Clock for ManualClock
{
    fn now(&self) -> Instant
    {
        self.start + self.elapsed()
    }

    async fn sleep(&self, duration: Duration)
    {
        self.sleeps.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTag
{
    pub repo:    String,
    pub commit:  String,
    pub tag:     String,
    pub message: String,
}

/// Release host backed by maps of branches and tags.
#[derive(Default)]
pub struct FakeReleaseClient
{
    branches:        HashMap<(String, String), String>,
    tags:            Mutex<HashMap<(String, String), String>>,
    create_failures: Mutex<HashMap<String, VecDeque<ApiError>>>,
    created:         Mutex<Vec<CreatedTag>>,
    head_calls:      Mutex<u32>,
    create_calls:    Mutex<u32>,
}

impl FakeReleaseClient
{
    pub fn new() -> FakeReleaseClient
    {
        FakeReleaseClient::default()
    }

    pub fn with_branch(mut self, repo: &str, branch: &str, commit: &str) -> FakeReleaseClient
    {
        self.branches.insert((repo.to_string(), branch.to_string()), commit.to_string());
        self
    }

    pub fn with_tag(self, repo: &str, tag: &str, commit: &str) -> FakeReleaseClient
    {
        self.tags.lock().unwrap().insert((repo.to_string(), tag.to_string()), commit.to_string());
        self
    }

    /// Fail the next `create_tag` calls for `repo` with `errors`, in order.
    pub fn failing_create(self, repo: &str, errors: Vec<ApiError>) -> FakeReleaseClient
    {
        self.create_failures.lock().unwrap().insert(repo.to_string(), errors.into());
        self
    }

    pub fn created(&self) -> Vec<CreatedTag>
    {
        self.created.lock().unwrap().clone()
    }

    pub fn head_calls(&self) -> u32
    {
        *self.head_calls.lock().unwrap()
    }

    pub fn create_calls(&self) -> u32
    {
        *self.create_calls.lock().unwrap()
    }
}

#[async_trait]
impl ReleaseClient for FakeReleaseClient
{
    async fn head_of(&self, repo: &str, branch: &str) -> Result<String, ApiError>
    {
        *self.head_calls.lock().unwrap() += 1;
        self.branches
            .get(&(repo.to_string(), branch.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{}/branches/{}", repo, branch)))
    }

    async fn tag_target(&self, repo: &str, tag: &str) -> Result<String, ApiError>
    {
        self.tags
            .lock()
            .unwrap()
            .get(&(repo.to_string(), tag.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("{}/git/ref/tags/{}", repo, tag)))
    }

    async fn create_tag(&self, repo: &str, commit: &str, tag: &str, message: &str) -> Result<(), ApiError>
    {
        *self.create_calls.lock().unwrap() += 1;
        if let Some(error) = self.create_failures.lock().unwrap().get_mut(repo).and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let mut tags = self.tags.lock().unwrap();
        let key = (repo.to_string(), tag.to_string());
        if tags.contains_key(&key)
        {
            return Err(ApiError::Permanent { status: 422, message: "Reference already exists".to_string() });
        }
        tags.insert(key, commit.to_string());
        self.created.lock().unwrap().push(CreatedTag {
            repo: repo.to_string(),
            commit: commit.to_string(),
            tag: tag.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Registry where each image shows up after a number of failed lookups (`u32::MAX` = never).
pub struct FakeRegistry
{
    appears_after: HashMap<ImageRef, u32>,
    errors:        HashMap<ImageRef, ApiError>,
    calls:         Mutex<HashMap<ImageRef, u32>>,
}

impl FakeRegistry
{
    pub fn new(appears_after: HashMap<ImageRef, u32>) -> FakeRegistry
    {
        FakeRegistry { appears_after, errors: HashMap::new(), calls: Mutex::new(HashMap::new()) }
    }

    /// Answer every lookup of `image` with `error`.
    pub fn failing(mut self, image: &ImageRef, error: ApiError) -> FakeRegistry
    {
        self.errors.insert(image.clone(), error);
        self
    }

    pub fn calls(&self, image: &ImageRef) -> u32
    {
        self.calls.lock().unwrap().get(image).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContainerRegistryClient for FakeRegistry
{
    async fn exists(&self, image: &ImageRef) -> Result<bool, ApiError>
    {
        let mut calls = self.calls.lock().unwrap();
        let seen = calls.entry(image.clone()).or_insert(0);
        *seen += 1;
        if let Some(error) = self.errors.get(image)
        {
            return Err(error.clone());
        }
        match self.appears_after.get(image)
        {
            Some(after) => Ok(*seen > *after),
            None => Ok(false),
        }
    }
}

/// CI that replays a script of statuses per target; the last status repeats.
pub struct FakeWorkflows
{
    scripts: Mutex<HashMap<WorkflowTarget, VecDeque<WorkflowStatus>>>,
    errors:  HashMap<WorkflowTarget, ApiError>,
    calls:   Mutex<HashMap<WorkflowTarget, u32>>,
}

impl FakeWorkflows
{
    pub fn new(scripts: HashMap<WorkflowTarget, Vec<WorkflowStatus>>) -> FakeWorkflows
    {
        let scripts = scripts.into_iter().map(|(target, script)| (target, script.into())).collect();
        FakeWorkflows { scripts: Mutex::new(scripts), errors: HashMap::new(), calls: Mutex::new(HashMap::new()) }
    }

    /// Answer every status query for `target` with `error`.
    pub fn failing(mut self, target: &WorkflowTarget, error: ApiError) -> FakeWorkflows
    {
        self.errors.insert(target.clone(), error);
        self
    }

    pub fn calls(&self, target: &WorkflowTarget) -> u32
    {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }
}

#[async_trait]
impl WorkflowStatusClient for FakeWorkflows
{
    async fn status(&self, repo: &str, reference: &str) -> Result<WorkflowStatus, ApiError>
    {
        let target = WorkflowTarget::new(repo, reference);
        *self.calls.lock().unwrap().entry(target.clone()).or_insert(0) += 1;
        if let Some(error) = self.errors.get(&target)
        {
            return Err(error.clone());
        }

        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(&target).ok_or_else(|| ApiError::NotFound(target.to_string()))?;
        if script.len() > 1
        {
            Ok(script.pop_front().unwrap_or(WorkflowStatus::Pending))
        }
        else
        {
            Ok(script.front().copied().unwrap_or(WorkflowStatus::Pending))
        }
    }
}
