use std::fmt::Display;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType
{
    Calver,
    Semver,
}

impl TagType
{
    // Parse, case-insensitive.
    pub fn parse(value: &str) -> Option<TagType>
    {
        match value.trim().to_lowercase().as_str()
        {
            "calver" => Some(TagType::Calver),
            "semver" => Some(TagType::Semver),
            _ => None,
        }
    }
}

impl Display for TagType
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self
        {
            TagType::Calver => write!(f, "calver"),
            TagType::Semver => write!(f, "semver"),
        }
    }
}

/// A validated versioning scheme. Semver carries the caller's version string verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionScheme<'a>
{
    Calver,
    Semver(&'a str),
}

/// `YYYYMMDD-HHMM` in UTC. Seconds and below are discarded.
pub fn calver(now: DateTime<Utc>) -> String
{
    now.format("%Y%m%d-%H%M").to_string()
}

/// Compute the tag name for a release.
///
/// Calendar tags only have minute resolution, so two releases of the same
/// label within one minute produce the same tag and the second `create` is
/// rejected by the host.
pub fn generate(scheme: VersionScheme<'_>, label: &str, now: DateTime<Utc>) -> String
{
    match scheme
    {
        VersionScheme::Calver => format!("{}-{}", calver(now), label),
        VersionScheme::Semver(version) => format!("{}-{}", version, label),
    }
}

#[test]
fn test_calver()
{
    use chrono::TimeZone;

    let now = Utc.with_ymd_and_hms(2022, 2, 16, 9, 18, 0).unwrap();
    assert_eq!(calver(now), "20220216-0918");
    assert_eq!(generate(VersionScheme::Calver, "develop1", now), "20220216-0918-develop1");
}

#[test]
fn test_calver_ignores_seconds()
{
    use chrono::{Duration, TimeZone};

    let start = Utc.with_ymd_and_hms(2023, 11, 5, 23, 7, 0).unwrap();
    let late = start + Duration::seconds(59) + Duration::microseconds(999_999);
    assert_eq!(
        generate(VersionScheme::Calver, "rc", start),
        generate(VersionScheme::Calver, "rc", late)
    );
    assert_eq!(generate(VersionScheme::Calver, "rc", late), "20231105-2307-rc");
}

#[test]
fn test_semver_is_verbatim()
{
    let now = Utc::now();
    assert_eq!(generate(VersionScheme::Semver("1.2.4rc2"), "release1", now), "1.2.4rc2-release1");
    assert_eq!(generate(VersionScheme::Semver("not.a-version"), "x", now), "not.a-version-x");
}

#[test]
fn test_tag_type_parse()
{
    assert_eq!(TagType::parse("CalVer"), Some(TagType::Calver));
    assert_eq!(TagType::parse(" semver "), Some(TagType::Semver));
    assert_eq!(TagType::parse("semvar"), None);
}
