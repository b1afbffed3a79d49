use async_trait::async_trait;
use log::debug;

use super::{WorkflowStatus, WorkflowStatusClient};
use crate::feature::release::github::{build_octocrab, classify};
use crate::libs::error::ApiError;

const PASSING: [&str; 3] = ["success", "skipped", "neutral"];

#[derive(Debug, serde::Serialize)]
struct RunsQuery<'a>
{
    event:  &'a str,
    branch: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct Runs
{
    workflow_runs: Vec<Run>,
}

#[derive(Debug, serde::Deserialize)]
struct Run
{
    status:     Option<String>,
    conclusion: Option<String>,
}

/// Fold the push-triggered runs for one ref into a single status.
fn summarize(runs: &[Run]) -> WorkflowStatus
{
    if runs.is_empty()
    {
        return WorkflowStatus::Pending;
    }
    if runs.iter().any(|run| run.status.as_deref() != Some("completed"))
    {
        return WorkflowStatus::Running;
    }
    if runs.iter().all(|run| run.conclusion.as_deref().is_some_and(|conclusion| PASSING.contains(&conclusion)))
    {
        WorkflowStatus::Succeeded
    }
    else
    {
        WorkflowStatus::Failed
    }
}

/// GitHub Actions status for repositories of one organization.
pub struct GitHubWorkflowClient
{
    octocrab: octocrab::Octocrab,
    owner:    String,
}

impl GitHubWorkflowClient
{
    pub fn new(owner: &str, token: Option<&str>) -> Result<GitHubWorkflowClient, ApiError>
    {
        Ok(GitHubWorkflowClient { octocrab: build_octocrab(token)?, owner: owner.to_string() })
    }
}

#[async_trait]
impl WorkflowStatusClient for GitHubWorkflowClient
{
    async fn status(&self, repo: &str, reference: &str) -> Result<WorkflowStatus, ApiError>
    {
        let route = format!("/repos/{}/{}/actions/runs", self.owner, repo);
        debug!("GET {} for {}", route, reference);
        let runs: Runs = self
            .octocrab
            .get(route, Some(&RunsQuery { event: "push", branch: reference }))
            .await
            .map_err(classify)?;
        Ok(summarize(&runs.workflow_runs))
    }
}

#[test]
fn test_summarize()
{
    let run = |status: &str, conclusion: Option<&str>| Run { status: Some(status.to_string()), conclusion: conclusion.map(str::to_string) };

    assert_eq!(summarize(&[]), WorkflowStatus::Pending);
    assert_eq!(summarize(&[run("completed", Some("success")), run("in_progress", None)]), WorkflowStatus::Running);
    assert_eq!(summarize(&[run("queued", None)]), WorkflowStatus::Running);
    assert_eq!(summarize(&[run("completed", Some("success")), run("completed", Some("skipped"))]), WorkflowStatus::Succeeded);
    assert_eq!(summarize(&[run("completed", Some("success")), run("completed", Some("failure"))]), WorkflowStatus::Failed);
    assert_eq!(summarize(&[run("completed", Some("cancelled"))]), WorkflowStatus::Failed);
}
