use std::path::Path;

use log::{debug, warn};

use super::error::ConfigError;
use super::release::{ImageSource, Registry, RetagSpec, TagSpec};
use super::version::TagType;

const REPO_KEYS: [&str; 7] = ["branch", "commit", "label", "tagtype", "semver", "container_repo", "container_registry"];
const RETAG_KEYS: [&str; 4] = ["repos", "label", "tagtype", "semver"];

#[derive(serde::Deserialize, Debug)]
struct RepoSection
{
    branch: Option<String>,
    commit: Option<String>,
    label: String,
    tagtype: String,
    semver: Option<String>,
    container_repo: Option<String>,
    container_registry: Option<String>,
}

#[derive(serde::Deserialize, Debug)]
struct RetagSection
{
    repos: String,
    label: String,
    tagtype: String,
    semver: Option<String>,
}

/// Read the `[repo-name]` sections of a tag config, in file order.
pub fn load_tag_config(path: &Path) -> Result<Vec<TagSpec>, ConfigError>
{
    parse_tag_config(&read(path)?)
}

/// Read the `[tag-name]` sections of a retag config, in file order.
pub fn load_retag_config(path: &Path) -> Result<Vec<RetagSpec>, ConfigError>
{
    parse_retag_config(&read(path)?)
}

pub fn parse_tag_config(text: &str) -> Result<Vec<TagSpec>, ConfigError>
{
    let mut specs = Vec::new();
    for (name, value) in sections(text)?
    {
        let section: RepoSection = section(&name, value, &REPO_KEYS)?;
        let tag_type = tag_type(&name, &section.tagtype)?;

        if section.branch.is_some() && section.commit.is_some()
        {
            warn!("In section {}, branch and commit both set, using commit", name);
        }

        let image = match (section.container_repo, section.container_registry)
        {
            (None, None) => None,
            (Some(repository), Some(registry)) =>
            {
                let registry = Registry::parse(&registry)
                    .ok_or_else(|| ConfigError::section(&name, format!("unknown container_registry `{}`", registry)))?;
                Some(ImageSource { registry, repository: repository.to_lowercase() })
            }
            _ => return Err(ConfigError::section(&name, "container_repo and container_registry must be set together")),
        };

        debug!("Loaded tag section: {} ({})", name, tag_type);
        specs.push(TagSpec {
            name,
            branch: section.branch,
            commit: section.commit.map(|commit| commit.trim().to_lowercase()),
            label: section.label,
            tag_type,
            semver: section.semver,
            image,
        });
    }
    Ok(specs)
}

pub fn parse_retag_config(text: &str) -> Result<Vec<RetagSpec>, ConfigError>
{
    let mut specs = Vec::new();
    for (name, value) in sections(text)?
    {
        let section: RetagSection = section(&name, value, &RETAG_KEYS)?;
        let tag_type = tag_type(&name, &section.tagtype)?;

        let mut target_repos = Vec::<String>::new();
        for repo in section.repos.split(',').map(str::trim).filter(|repo| !repo.is_empty())
        {
            if target_repos.iter().any(|existing| existing == repo)
            {
                return Err(ConfigError::section(&name, format!("repo `{}` is listed twice", repo)));
            }
            target_repos.push(repo.to_string());
        }
        if target_repos.is_empty()
        {
            return Err(ConfigError::section(&name, "`repos` must name at least one repository"));
        }

        debug!("Loaded retag section: {} -> {:?}", name, target_repos);
        specs.push(RetagSpec { source_tag: name, target_repos, label: section.label, tag_type, semver: section.semver });
    }
    Ok(specs)
}

fn read(path: &Path) -> Result<String, ConfigError>
{
    if !path.is_file()
    {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    std::fs::read_to_string(path)
        .map_err(|error| ConfigError::Unreadable { path: path.to_path_buf(), message: error.to_string() })
}

fn sections(text: &str) -> Result<Vec<(String, toml::Value)>, ConfigError>
{
    let table: toml::Table = toml::from_str(text).map_err(|error| ConfigError::Syntax(error.to_string()))?;
    Ok(table.into_iter().collect())
}

fn section<T: serde::de::DeserializeOwned>(name: &str, value: toml::Value, known: &[&str]) -> Result<T, ConfigError>
{
    let toml::Value::Table(table) = value
    else
    {
        return Err(ConfigError::section(name, "expected a table"));
    };

    for key in table.keys().filter(|key| !known.contains(&key.as_str()))
    {
        warn!("Unknown setting {} in section {}", key, name);
    }

    toml::Value::Table(table).try_into().map_err(|error: toml::de::Error| ConfigError::section(name, error.message()))
}

fn tag_type(name: &str, value: &str) -> Result<TagType, ConfigError>
{
    TagType::parse(value)
        .ok_or_else(|| ConfigError::section(name, format!("tagtype must be 'semver' or 'calver', got {}", value)))
}

#[test]
fn test_parse_tag_config()
{
    let specs = parse_tag_config(
        r#"
        [test1]
        branch = "develop"
        label = "develop1"
        tagtype = "calver"

        [test2]
        branch = "release"
        commit = "ABCDEF1234"
        label = "release1"
        tagtype = "SemVer"
        semver = "1.2.4rc2"
        container_repo = "sslhep/servicex_app"
        container_registry = "dockerhub"
        "#,
    )
    .unwrap();

    let expected = vec![
        TagSpec::new("test1", "develop1", TagType::Calver).with_branch("develop"),
        TagSpec {
            image: Some(ImageSource { registry: Registry::DockerHub, repository: "sslhep/servicex_app".to_string() }),
            ..TagSpec::new("test2", "release1", TagType::Semver)
                .with_branch("release")
                .with_commit("abcdef1234")
                .with_semver("1.2.4rc2")
        },
    ];
    assert_eq!(specs, expected);
}

#[test]
fn test_parse_preserves_order()
{
    let specs = parse_tag_config(
        r#"
        [zeta]
        branch = "develop"
        label = "a"
        tagtype = "calver"
        [alpha]
        branch = "develop"
        label = "a"
        tagtype = "calver"
        "#,
    )
    .unwrap();
    let names: Vec<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "alpha"]);
}

#[test]
fn test_parse_tag_config_errors()
{
    let missing_label = "[a]\nbranch = \"develop\"\ntagtype = \"calver\"\n";
    assert!(matches!(parse_tag_config(missing_label), Err(ConfigError::Section { .. })));

    let bad_type = "[a]\nbranch = \"develop\"\nlabel = \"x\"\ntagtype = \"semvar\"\n";
    assert!(matches!(parse_tag_config(bad_type), Err(ConfigError::Section { .. })));

    let half_image = "[a]\nbranch = \"develop\"\nlabel = \"x\"\ntagtype = \"calver\"\ncontainer_repo = \"sslhep/a\"\n";
    assert!(parse_tag_config(half_image).is_err());

    assert!(matches!(parse_tag_config("[a"), Err(ConfigError::Syntax(_))));
    assert!(matches!(parse_tag_config("a = 1"), Err(ConfigError::Section { .. })));
}

#[test]
fn test_parse_retag_config()
{
    let specs = parse_retag_config(
        r#"
        ["20220216-0918-develop1"]
        repos = "ServiceX, ServiceX_DID ,"
        label = "release1"
        tagtype = "semver"
        semver = "1.0.0"
        "#,
    )
    .unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].source_tag, "20220216-0918-develop1");
    assert_eq!(specs[0].target_repos, vec!["ServiceX".to_string(), "ServiceX_DID".to_string()]);
    assert_eq!(specs[0].semver.as_deref(), Some("1.0.0"));

    let twice = "[t]\nrepos = \"a,b,a\"\nlabel = \"x\"\ntagtype = \"calver\"\n";
    assert!(parse_retag_config(twice).is_err());
}

#[test]
fn test_load_missing_file()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repos.toml");
    assert_eq!(load_tag_config(&path), Err(ConfigError::Missing(path.clone())));

    std::fs::write(&path, "[a]\nbranch = \"develop\"\nlabel = \"x\"\ntagtype = \"calver\"\n").unwrap();
    assert_eq!(load_tag_config(&path).unwrap().len(), 1);
}
