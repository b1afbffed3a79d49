use async_trait::async_trait;
use log::debug;
use serde_json::json;

use super::ReleaseClient;
use crate::libs::error::ApiError;

#[derive(Debug, serde::Deserialize)]
struct GitObject
{
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, serde::Deserialize)]
struct Branch
{
    commit: BranchCommit,
}

#[derive(Debug, serde::Deserialize)]
struct BranchCommit
{
    sha: String,
}

#[derive(Debug, serde::Deserialize)]
struct GitRef
{
    object: GitObject,
}

#[derive(Debug, serde::Deserialize)]
struct TagObject
{
    sha: String,
    object: GitObject,
}

/// Build an Octocrab instance, authenticated when a token is given.
pub fn build_octocrab(token: Option<&str>) -> Result<octocrab::Octocrab, ApiError>
{
    let builder = octocrab::Octocrab::builder();
    let builder = match token
    {
        Some(token) => builder.personal_token(token.to_string()),
        None => builder,
    };
    builder.build().map_err(|error| ApiError::Permanent { status: 0, message: format!("failed to create Octocrab instance: {}", error) })
}

/// Map an Octocrab failure onto the transient/permanent split.
pub fn classify(error: octocrab::Error) -> ApiError
{
    match error
    {
        octocrab::Error::GitHub { source, .. } => ApiError::from_status(source.status_code.as_u16(), source.message),
        error @ (octocrab::Error::Serde { .. } | octocrab::Error::Json { .. }) => ApiError::Permanent { status: 0, message: error.to_string() },
        other => ApiError::Transient(other.to_string()),
    }
}

/// Release client for repositories owned by one GitHub organization.
pub struct GitHubReleaseClient
{
    octocrab: octocrab::Octocrab,
    owner:    String,
}

impl GitHubReleaseClient
{
    pub fn new(owner: &str, token: Option<&str>) -> Result<GitHubReleaseClient, ApiError>
    {
        Ok(GitHubReleaseClient { octocrab: build_octocrab(token)?, owner: owner.to_string() })
    }

    fn route(&self, repo: &str, path: &str) -> String
    {
        format!("/repos/{}/{}/{}", self.owner, repo, path)
    }

    async fn get<R: serde::de::DeserializeOwned>(&self, route: String) -> Result<R, ApiError>
    {
        debug!("GET {}", route);
        self.octocrab.get(route, None::<&()>).await.map_err(classify)
    }

    async fn post<R: serde::de::DeserializeOwned>(&self, route: String, body: &serde_json::Value) -> Result<R, ApiError>
    {
        debug!("POST {}", route);
        self.octocrab.post(route, Some(body)).await.map_err(classify)
    }
}

#[async_trait]
impl ReleaseClient for GitHubReleaseClient
{
    async fn head_of(&self, repo: &str, branch: &str) -> Result<String, ApiError>
    {
        let branch: Branch = self.get(self.route(repo, &format!("branches/{}", branch))).await?;
        Ok(branch.commit.sha)
    }

    async fn tag_target(&self, repo: &str, tag: &str) -> Result<String, ApiError>
    {
        let reference: GitRef = self.get(self.route(repo, &format!("git/ref/tags/{}", tag))).await?;
        if reference.object.kind != "tag"
        {
            return Ok(reference.object.sha);
        }

        // Annotated tag, peel to the commit.
        let tag_object: TagObject = self.get(self.route(repo, &format!("git/tags/{}", reference.object.sha))).await?;
        Ok(tag_object.object.sha)
    }

    async fn create_tag(&self, repo: &str, commit: &str, tag: &str, message: &str) -> Result<(), ApiError>
    {
        let tag_object: TagObject = self
            .post(
                self.route(repo, "git/tags"),
                &json!({
                    "tag": tag,
                    "message": message,
                    "object": commit,
                    "type": "commit",
                }),
            )
            .await?;

        let _: GitRef = self
            .post(
                self.route(repo, "git/refs"),
                &json!({
                    "ref": format!("refs/tags/{}", tag),
                    "sha": tag_object.sha,
                }),
            )
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_route()
{
    let client = GitHubReleaseClient { octocrab: octocrab::Octocrab::default(), owner: "ssl-hep".to_string() };
    assert_eq!(client.route("ServiceX", "git/refs"), "/repos/ssl-hep/ServiceX/git/refs");
}
