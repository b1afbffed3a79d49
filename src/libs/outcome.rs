use std::fmt::Display;

use super::error::ReleaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status
{
    Tagged,
    Skipped,
    Failed,
}

/// Terminal result for one target after one orchestration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome
{
    pub repo_name:  String,
    pub status:     Status,
    pub tag_string: Option<String>,
    pub error:      Option<ReleaseError>,
}

impl Outcome
{
    pub fn tagged(repo_name: &str, tag_string: &str) -> Outcome
    {
        Outcome { repo_name: repo_name.to_string(), status: Status::Tagged, tag_string: Some(tag_string.to_string()), error: None }
    }

    // Dry runs stop short of creating the tag.
    pub fn skipped(repo_name: &str, tag_string: &str) -> Outcome
    {
        Outcome { repo_name: repo_name.to_string(), status: Status::Skipped, tag_string: Some(tag_string.to_string()), error: None }
    }

    pub fn failed(repo_name: &str, tag_string: Option<&str>, error: ReleaseError) -> Outcome
    {
        Outcome { repo_name: repo_name.to_string(), status: Status::Failed, tag_string: tag_string.map(str::to_string), error: Some(error) }
    }

    pub fn is_failed(&self) -> bool
    {
        self.status == Status::Failed
    }
}

impl Display for Outcome
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.status, self.repo_name)?;
        if let Some(tag) = &self.tag_string
        {
            write!(f, " {}", tag)?;
        }
        if let Some(error) = &self.error
        {
            write!(f, " - {}", error)?;
        }
        Ok(())
    }
}

/// Failed outcomes, in input order.
pub fn failures(outcomes: &[Outcome]) -> Vec<&Outcome>
{
    outcomes.iter().filter(|outcome| outcome.is_failed()).collect()
}

#[test]
fn test_display()
{
    let outcome = Outcome::tagged("ServiceX", "1.0.0-release1");
    assert_eq!(outcome.to_string(), "[Tagged] ServiceX 1.0.0-release1");

    let outcome = Outcome::failed("DID", None, ReleaseError::TagNotFound { repo: "DID".to_string(), tag: "v1".to_string() });
    assert_eq!(outcome.to_string(), "[Failed] DID - tag `v1` not found in `DID`");
    assert_eq!(failures(&[outcome.clone(), Outcome::skipped("X", "t")]), vec![&outcome]);
}
