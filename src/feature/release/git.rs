use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{BranchType, ErrorCode, Repository, Signature};
use log::debug;

use super::ReleaseClient;
use crate::libs::error::ApiError;

/// Release client for local clones laid out as `<root>/<repo>`.
pub struct LocalReleaseClient
{
    root: PathBuf,
}

impl LocalReleaseClient
{
    pub fn new(root: &Path) -> LocalReleaseClient
    {
        LocalReleaseClient { root: root.to_path_buf() }
    }

    fn open(&self, repo: &str) -> Result<Repository, ApiError>
    {
        let path = self.root.join(repo);
        debug!("Opening Repository: {}", path.display());
        Repository::open(&path).map_err(local)
    }
}

fn local(error: git2::Error) -> ApiError
{
    match error.code()
    {
        ErrorCode::NotFound => ApiError::NotFound(error.message().to_string()),
        ErrorCode::Exists => ApiError::Permanent { status: 409, message: error.message().to_string() },
        _ => ApiError::Permanent { status: 0, message: error.message().to_string() },
    }
}

#[async_trait]
impl ReleaseClient for LocalReleaseClient
{
    async fn head_of(&self, repo: &str, branch: &str) -> Result<String, ApiError>
    {
        let repository = self.open(repo)?;
        let branch = repository
            .find_branch(branch, BranchType::Local)
            .or_else(|_| repository.find_branch(&format!("origin/{}", branch), BranchType::Remote))
            .map_err(local)?;
        let commit = branch.get().peel_to_commit().map_err(local)?;
        Ok(commit.id().to_string())
    }

    async fn tag_target(&self, repo: &str, tag: &str) -> Result<String, ApiError>
    {
        let repository = self.open(repo)?;
        let object = repository.revparse_single(&format!("refs/tags/{}", tag)).map_err(local)?;
        let commit = object.peel_to_commit().map_err(local)?;
        Ok(commit.id().to_string())
    }

    async fn create_tag(&self, repo: &str, commit: &str, tag: &str, message: &str) -> Result<(), ApiError>
    {
        let repository = self.open(repo)?;
        let commit = repository.revparse_single(commit).and_then(|object| object.peel_to_commit()).map_err(local)?;
        let signature = match repository.signature()
        {
            Ok(signature) => signature,
            Err(_) => Signature::now("release-tool", "release-tool@localhost").map_err(local)?,
        };

        repository.tag(tag, commit.as_object(), &signature, message, false).map_err(local)?;
        Ok(())
    }
}

#[cfg(test)]
fn scratch_repository(root: &Path, name: &str) -> String
{
    let repository = Repository::init(root.join(name)).unwrap();
    let signature = Signature::now("Test", "test@example.com").unwrap();
    let tree_id = repository.index().unwrap().write_tree().unwrap();
    let tree = repository.find_tree(tree_id).unwrap();
    let oid = repository.commit(None, &signature, &signature, "initial", &tree, &[]).unwrap();
    repository.branch("develop", &repository.find_commit(oid).unwrap(), false).unwrap();
    oid.to_string()
}

#[tokio::test]
async fn test_local_tagging()
{
    let dir = tempfile::tempdir().unwrap();
    let oid = scratch_repository(dir.path(), "ServiceX");
    let client = LocalReleaseClient::new(dir.path());

    assert_eq!(client.head_of("ServiceX", "develop").await.unwrap(), oid);
    assert!(matches!(client.head_of("ServiceX", "missing").await, Err(ApiError::NotFound(_))));

    client.create_tag("ServiceX", &oid[..10], "1.0.0-release1", "Tagged using release-tool").await.unwrap();
    assert_eq!(client.tag_target("ServiceX", "1.0.0-release1").await.unwrap(), oid);

    let again = client.create_tag("ServiceX", &oid, "1.0.0-release1", "again").await;
    assert!(matches!(again, Err(ApiError::Permanent { status: 409, .. })));
}

#[tokio::test]
async fn test_local_missing()
{
    let dir = tempfile::tempdir().unwrap();
    scratch_repository(dir.path(), "ServiceX");
    let client = LocalReleaseClient::new(dir.path());

    assert!(matches!(client.tag_target("ServiceX", "nope").await, Err(ApiError::NotFound(_))));
    assert!(client.head_of("Unknown", "develop").await.is_err());
}
