use std::sync::LazyLock;

use regex::Regex;

use super::error::ConfigError;
use super::version::{TagType, VersionScheme};

static LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").unwrap());
static COMMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{7,40}$").unwrap());

/// Container registries the tool knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Registry
{
    DockerHub,
    Harbor,
}

impl Registry
{
    pub fn parse(value: &str) -> Option<Registry>
    {
        match value.trim().to_lowercase().as_str()
        {
            "dockerhub" => Some(Registry::DockerHub),
            "harbor" => Some(Registry::Harbor),
            _ => None,
        }
    }
}

/// Where a repository publishes its container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource
{
    pub registry:   Registry,
    pub repository: String,
}

/// One release directive: tag repository `name` at a branch tip or an explicit commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpec
{
    pub name:     String,
    pub branch:   Option<String>,
    pub commit:   Option<String>,
    pub label:    String,
    pub tag_type: TagType,
    pub semver:   Option<String>,
    pub image:    Option<ImageSource>,
}

/// Where the commit for a [`TagSpec`] comes from. An explicit commit always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitSource<'a>
{
    Commit(&'a str),
    Branch(&'a str),
}

impl TagSpec
{
    pub fn new(name: &str, label: &str, tag_type: TagType) -> TagSpec
    {
        TagSpec {
            name: name.to_string(),
            branch: None,
            commit: None,
            label: label.to_string(),
            tag_type,
            semver: None,
            image: None,
        }
    }

    pub fn with_branch(mut self, branch: &str) -> TagSpec
    {
        self.branch = Some(branch.to_string());
        self
    }

    pub fn with_commit(mut self, commit: &str) -> TagSpec
    {
        self.commit = Some(commit.to_string());
        self
    }

    pub fn with_semver(mut self, semver: &str) -> TagSpec
    {
        self.semver = Some(semver.to_string());
        self
    }

    pub fn source(&self) -> Option<CommitSource<'_>>
    {
        match (&self.commit, &self.branch)
        {
            (Some(commit), _) => Some(CommitSource::Commit(commit)),
            (None, Some(branch)) => Some(CommitSource::Branch(branch)),
            (None, None) => None,
        }
    }

    /// Check the directive is internally consistent and return its versioning scheme.
    pub fn validate(&self) -> Result<VersionScheme<'_>, ConfigError>
    {
        let scheme = validate_scheme(&self.name, &self.label, self.tag_type, self.semver.as_deref())?;
        match self.source()
        {
            None => return Err(ConfigError::section(&self.name, "either `branch` or `commit` must be set")),
            Some(CommitSource::Commit(commit)) if !COMMIT.is_match(commit) =>
            {
                return Err(ConfigError::section(&self.name, format!("`{}` is not a commit hash", commit)));
            }
            Some(_) => {}
        }
        Ok(scheme)
    }
}

/// Re-tag directive: point a new tag at whatever `source_tag` points to, in every listed repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetagSpec
{
    pub source_tag:   String,
    pub target_repos: Vec<String>,
    pub label:        String,
    pub tag_type:     TagType,
    pub semver:       Option<String>,
}

impl RetagSpec
{
    pub fn validate(&self) -> Result<VersionScheme<'_>, ConfigError>
    {
        validate_scheme(&self.source_tag, &self.label, self.tag_type, self.semver.as_deref())
    }
}

/// Output of commit resolution for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget
{
    pub repo_name:  String,
    pub commit_sha: String,
    pub tag_string: String,
}

fn validate_scheme<'a>(section: &str, label: &str, tag_type: TagType, semver: Option<&'a str>) -> Result<VersionScheme<'a>, ConfigError>
{
    if !LABEL.is_match(label)
    {
        return Err(ConfigError::section(section, format!("label `{}` cannot be used in a tag name", label)));
    }

    match (tag_type, semver)
    {
        (TagType::Calver, None) => Ok(VersionScheme::Calver),
        (TagType::Semver, Some(version)) if !version.trim().is_empty() => Ok(VersionScheme::Semver(version)),
        (TagType::Semver, _) => Err(ConfigError::section(section, "tagtype is semver but no `semver` value is given")),
        (TagType::Calver, Some(_)) => Err(ConfigError::section(section, "`semver` is only allowed with tagtype semver")),
    }
}

#[test]
fn test_commit_overrides_branch()
{
    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver)
        .with_branch("develop")
        .with_commit("0a1b2c3d");
    assert_eq!(spec.source(), Some(CommitSource::Commit("0a1b2c3d")));
    assert_eq!(spec.validate(), Ok(VersionScheme::Calver));
}

#[test]
fn test_validate()
{
    let spec = TagSpec::new("ServiceX", "develop1", TagType::Semver).with_branch("develop");
    assert!(matches!(spec.validate(), Err(ConfigError::Section { .. })));

    let spec = spec.with_semver("1.2.4rc2");
    assert_eq!(spec.validate(), Ok(VersionScheme::Semver("1.2.4rc2")));

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver);
    assert!(spec.validate().is_err(), "no branch and no commit");

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver).with_commit("not-a-sha");
    assert!(spec.validate().is_err());

    let spec = TagSpec::new("ServiceX", "bad label", TagType::Calver).with_branch("develop");
    assert!(spec.validate().is_err());

    let spec = TagSpec::new("ServiceX", "develop1", TagType::Calver).with_branch("develop").with_semver("1.0.0");
    assert!(spec.validate().is_err());
}

#[test]
fn test_retag_validate()
{
    let spec = RetagSpec {
        source_tag: "20220216-0918-develop1".to_string(),
        target_repos: vec!["ServiceX".to_string()],
        label: "release1".to_string(),
        tag_type: TagType::Semver,
        semver: None,
    };
    assert!(spec.validate().is_err());
}
