use std::path::PathBuf;

use async_trait::async_trait;

use crate::libs::error::ApiError;

pub mod git;
pub mod github;

/// Tag operations against the host that owns the repositories.
#[async_trait]
pub trait ReleaseClient: Send + Sync
{
    /// SHA of the tip of `branch`.
    async fn head_of(&self, repo: &str, branch: &str) -> Result<String, ApiError>;

    /// SHA of the commit `tag` currently points to.
    async fn tag_target(&self, repo: &str, tag: &str) -> Result<String, ApiError>;

    async fn create_tag(&self, repo: &str, commit: &str, tag: &str, message: &str) -> Result<(), ApiError>;
}

/// Which host the release client talks to.
#[derive(Debug, Clone)]
pub enum Host
{
    GitHub { owner: String, token: Option<String> },
    Local { root: PathBuf },
}

pub fn connect(host: &Host) -> Result<Box<dyn ReleaseClient>, ApiError>
{
    match host
    {
        Host::GitHub { owner, token } => Ok(Box::new(github::GitHubReleaseClient::new(owner, token.as_deref())?)),
        Host::Local { root } => Ok(Box::new(git::LocalReleaseClient::new(root))),
    }
}
