use log::debug;

use super::release::ReleaseClient;
use crate::libs::error::{ApiError, ReleaseError};
use crate::libs::release::{CommitSource, TagSpec};

/// Commit a [`TagSpec`] should be tagged at.
///
/// An explicit commit is returned verbatim without asking the host whether it exists;
/// otherwise the branch tip is looked up.
pub async fn resolve(spec: &TagSpec, client: &dyn ReleaseClient) -> Result<String, ReleaseError>
{
    match spec.source()
    {
        Some(CommitSource::Commit(commit)) =>
        {
            debug!("Using commit {} for {}", commit, spec.name);
            Ok(commit.to_string())
        }
        Some(CommitSource::Branch(branch)) =>
        {
            let commit = client.head_of(&spec.name, branch).await.map_err(|error| {
                let reason = match error
                {
                    ApiError::NotFound(_) => format!("can't find branch {}", branch),
                    other => other.to_string(),
                };
                ReleaseError::Resolution { repo: spec.name.clone(), reason }
            })?;
            debug!("Branch {} of {} is at {}", branch, spec.name, commit);
            Ok(commit)
        }
        None => Err(ReleaseError::Resolution { repo: spec.name.clone(), reason: "neither branch nor commit is set".to_string() }),
    }
}

/// Commit the existing `tag` points to in `repo`.
pub async fn resolve_from_existing_tag(repo: &str, tag: &str, client: &dyn ReleaseClient) -> Result<String, ReleaseError>
{
    match client.tag_target(repo, tag).await
    {
        Ok(commit) =>
        {
            debug!("Tag {} of {} is at {}", tag, repo, commit);
            Ok(commit)
        }
        Err(ApiError::NotFound(_)) => Err(ReleaseError::TagNotFound { repo: repo.to_string(), tag: tag.to_string() }),
        Err(error) => Err(ReleaseError::Resolution { repo: repo.to_string(), reason: error.to_string() }),
    }
}

#[tokio::test]
async fn test_commit_wins_over_branch()
{
    use crate::libs::fakes::FakeReleaseClient;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new().with_branch("ServiceX", "develop", "1111111111");
    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver).with_branch("develop").with_commit("2222222");

    assert_eq!(resolve(&spec, &client).await.unwrap(), "2222222");
    assert_eq!(client.head_calls(), 0);
}

#[tokio::test]
async fn test_branch_lookup()
{
    use crate::libs::fakes::FakeReleaseClient;
    use crate::libs::version::TagType;

    let client = FakeReleaseClient::new().with_branch("ServiceX", "develop", "1111111111");

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver).with_branch("develop");
    assert_eq!(resolve(&spec, &client).await.unwrap(), "1111111111");

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver).with_branch("missing");
    assert!(matches!(resolve(&spec, &client).await, Err(ReleaseError::Resolution { .. })));

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver);
    assert!(matches!(resolve(&spec, &client).await, Err(ReleaseError::Resolution { .. })));
}

#[tokio::test]
async fn test_resolve_from_existing_tag()
{
    use crate::libs::fakes::FakeReleaseClient;

    let client = FakeReleaseClient::new().with_tag("ServiceX", "20220216-0918-develop1", "3333333");

    assert_eq!(resolve_from_existing_tag("ServiceX", "20220216-0918-develop1", &client).await.unwrap(), "3333333");
    assert_eq!(
        resolve_from_existing_tag("ServiceX", "nope", &client).await,
        Err(ReleaseError::TagNotFound { repo: "ServiceX".to_string(), tag: "nope".to_string() })
    );
}
