use super::{Release, ReleaseError, ReleaseSource};
use bytes::Bytes;
use std::time::Duration;

const API_BASE: &str = "https://api.github.com";

/// Reads release metadata and assets from the GitHub REST API.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(user_agent: &str) -> Result<Self, ReleaseError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http,
            api_base: API_BASE.to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ReleaseError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ReleaseError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

impl ReleaseSource for GithubClient {
    async fn latest(&self, repo: &str) -> Result<Release, ReleaseError> {
        let url = format!("{}/repos/{repo}/releases/latest", self.api_base);
        tracing::debug!(%url, "fetching latest release");
        let release = self.get(&url).await?.json::<Release>().await?;
        Ok(release)
    }

    async fn download(&self, url: &str) -> Result<Bytes, ReleaseError> {
        tracing::info!(%url, "downloading");
        Ok(self.get(url).await?.bytes().await?)
    }
}
