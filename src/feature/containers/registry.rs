use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{ContainerRegistryClient, ImageRef};
use crate::libs::error::ApiError;
use crate::libs::release::Registry;

const DOCKER_HUB_URL: &str = "https://hub.docker.com";
const HARBOR_URL: &str = "https://hub.opensciencegrid.org";
const HARBOR_PROJECT: &str = "sslhep";

/// Where to look up a tag for `image`.
pub fn tag_url(image: &ImageRef) -> String
{
    match image.registry
    {
        Registry::DockerHub => format!("{}/v2/repositories/{}/tags/{}", DOCKER_HUB_URL, image.repository, image.tag),
        Registry::Harbor =>
        {
            // Harbor nests repositories under a project and wants the slash escaped.
            let repository = image.repository.strip_prefix(&format!("{}/", HARBOR_PROJECT)).unwrap_or(&image.repository);
            format!(
                "{}/api/v2.0/projects/{}/repositories/{}/artifacts/{}",
                HARBOR_URL,
                HARBOR_PROJECT,
                repository.replace('/', "%252F"),
                image.tag
            )
        }
    }
}

/// Anonymous registry lookups over HTTPS.
pub struct HttpRegistryClient
{
    http: reqwest::Client,
}

impl HttpRegistryClient
{
    pub fn new() -> Result<HttpRegistryClient, ApiError>
    {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|error| ApiError::Permanent { status: 0, message: error.to_string() })?;
        Ok(HttpRegistryClient { http })
    }
}

#[async_trait]
impl ContainerRegistryClient for HttpRegistryClient
{
    async fn exists(&self, image: &ImageRef) -> Result<bool, ApiError>
    {
        let url = tag_url(image);
        debug!("GET {}", url);
        let response = self.http.get(&url).send().await.map_err(|error| ApiError::Transient(error.to_string()))?;
        let status = response.status();
        if status.is_success()
        {
            return Ok(true);
        }

        match ApiError::from_status(status.as_u16(), url)
        {
            ApiError::NotFound(_) => Ok(false),
            error => Err(error),
        }
    }
}

#[test]
fn test_tag_url()
{
    let image = ImageRef { registry: Registry::DockerHub, repository: "sslhep/servicex_app".to_string(), tag: "1.0.0-release1".to_string() };
    assert_eq!(tag_url(&image), "https://hub.docker.com/v2/repositories/sslhep/servicex_app/tags/1.0.0-release1");

    let image = ImageRef { registry: Registry::Harbor, ..image };
    assert_eq!(
        tag_url(&image),
        "https://hub.opensciencegrid.org/api/v2.0/projects/sslhep/repositories/servicex_app/artifacts/1.0.0-release1"
    );
}
