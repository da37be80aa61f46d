//! Helper tool downloads from GitHub releases.
//!
//! Both tools publish a zip named `<prefix>-<tag>.zip` on their latest release.
//! Archives are cached under `cache/` and unpacked into `tools/`.

mod archive;
mod github;

pub use archive::extract_zip;
pub use github::GithubClient;

use crate::config::{Config, ConfigError};
use crate::context::AppContext;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("http request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("release {tag} of {repo} has no asset named {asset}")]
    AssetMissing {
        repo: String,
        tag: String,
        asset: String,
    },

    #[error("open zip: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("zip entry {0} points outside the destination")]
    UnsafeEntry(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("extract task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ReleaseError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> ReleaseError + '_ {
        move |source| ReleaseError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    pub fn asset_url(&self, name: &str) -> Option<&str> {
        self.assets
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.browser_download_url.as_str())
    }
}

/// Where release metadata and archives come from.
pub trait ReleaseSource {
    fn latest(&self, repo: &str) -> impl Future<Output = Result<Release, ReleaseError>> + Send;
    fn download(&self, url: &str) -> impl Future<Output = Result<Bytes, ReleaseError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    Eqgzi,
    Lantern,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Eqgzi, Tool::Lantern];

    pub fn repo(self) -> &'static str {
        match self {
            Tool::Eqgzi => "xackery/eqgzi",
            Tool::Lantern => "LanternEQ/LanternExtractor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tool::Eqgzi => "eqgzi",
            Tool::Lantern => "LanternExtractor",
        }
    }

    /// Executable the archive installs into `tools/`.
    pub fn executable(self) -> &'static str {
        match self {
            Tool::Eqgzi => "eqgzi.exe",
            Tool::Lantern => "LanternExtractor.exe",
        }
    }

    pub fn asset_name(self, tag: &str) -> String {
        format!("{}-{tag}.zip", self.label())
    }

    pub fn installed_version(self, cfg: &Config) -> &str {
        match self {
            Tool::Eqgzi => &cfg.eqgzi_version,
            Tool::Lantern => &cfg.lantern_version,
        }
    }

    fn record_version(self, cfg: &mut Config, tag: &str) {
        match self {
            Tool::Eqgzi => cfg.eqgzi_version = tag.to_string(),
            Tool::Lantern => cfg.lantern_version = tag.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReport {
    pub tool: Tool,
    pub tag: String,
    pub archive: PathBuf,
    pub cached: bool,
    pub files: usize,
}

/// Download (unless cached) and unpack the latest release of `tool`, then record its tag.
pub async fn install_latest<S: ReleaseSource>(
    ctx: &mut AppContext,
    source: &S,
    tool: Tool,
) -> Result<InstallReport, ReleaseError> {
    let release = source.latest(tool.repo()).await?;
    let asset = tool.asset_name(&release.tag_name);
    let url = release
        .asset_url(&asset)
        .ok_or_else(|| ReleaseError::AssetMissing {
            repo: tool.repo().to_string(),
            tag: release.tag_name.clone(),
            asset: asset.clone(),
        })?
        .to_string();

    let cache_dir = ctx.cache_dir();
    tokio::fs::create_dir_all(&cache_dir)
        .await
        .map_err(ReleaseError::io(&cache_dir))?;
    let archive_path = cache_dir.join(&asset);

    let cached = tokio::fs::try_exists(&archive_path)
        .await
        .map_err(ReleaseError::io(&archive_path))?;
    let archive: Bytes = if cached {
        tracing::info!(path = %archive_path.display(), "using cached archive");
        tokio::fs::read(&archive_path)
            .await
            .map_err(ReleaseError::io(&archive_path))?
            .into()
    } else {
        let body = source.download(&url).await?;
        tokio::fs::write(&archive_path, &body)
            .await
            .map_err(ReleaseError::io(&archive_path))?;
        body
    };

    let tools_dir = ctx.tools_dir();
    if tool == Tool::Eqgzi {
        let client_data = tools_dir.join("ClientData");
        tokio::fs::create_dir_all(&client_data)
            .await
            .map_err(ReleaseError::io(&client_data))?;
    } else {
        tokio::fs::create_dir_all(&tools_dir)
            .await
            .map_err(ReleaseError::io(&tools_dir))?;
    }

    tracing::info!(%asset, dest = %tools_dir.display(), "extracting");
    let dest = tools_dir.clone();
    let files = tokio::task::spawn_blocking(move || extract_zip(&archive, &dest)).await??;

    tool.record_version(&mut ctx.config, &release.tag_name);
    ctx.save()?;

    Ok(InstallReport {
        tool,
        tag: release.tag_name,
        archive: archive_path,
        cached,
        files,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub tool: Tool,
    pub installed: String,
    pub latest: String,
    pub asset_available: bool,
}

impl UpdateStatus {
    pub fn needs_update(&self) -> bool {
        self.asset_available && self.installed != self.latest
    }
}

/// Compare the recorded tool versions with the latest published releases.
pub async fn check_updates<S: ReleaseSource>(
    cfg: &Config,
    source: &S,
) -> Result<Vec<UpdateStatus>, ReleaseError> {
    let mut out = Vec::with_capacity(Tool::ALL.len());
    for tool in Tool::ALL {
        let release = source.latest(tool.repo()).await?;
        let asset_available = release
            .asset_url(&tool.asset_name(&release.tag_name))
            .is_some();
        out.push(UpdateStatus {
            tool,
            installed: tool.installed_version(cfg).to_string(),
            latest: release.tag_name,
            asset_available,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        releases: HashMap<&'static str, Release>,
        archives: HashMap<String, Vec<u8>>,
        downloads: AtomicUsize,
    }

    impl FakeSource {
        fn new() -> Self {
            Self {
                releases: HashMap::new(),
                archives: HashMap::new(),
                downloads: AtomicUsize::new(0),
            }
        }

        fn publish(&mut self, tool: Tool, tag: &str, zip: Vec<u8>) {
            let name = tool.asset_name(tag);
            let url = format!("https://example.invalid/{name}");
            self.releases.insert(
                tool.repo(),
                Release {
                    tag_name: tag.to_string(),
                    assets: vec![Asset {
                        name,
                        size: zip.len() as u64,
                        browser_download_url: url.clone(),
                    }],
                },
            );
            self.archives.insert(url, zip);
        }
    }

    impl ReleaseSource for FakeSource {
        async fn latest(&self, repo: &str) -> Result<Release, ReleaseError> {
            self.releases
                .get(repo)
                .cloned()
                .ok_or_else(|| ReleaseError::Status {
                    url: repo.to_string(),
                    status: 404,
                })
        }

        async fn download(&self, url: &str) -> Result<Bytes, ReleaseError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.archives
                .get(url)
                .map(|b| Bytes::from(b.clone()))
                .ok_or_else(|| ReleaseError::Status {
                    url: url.to_string(),
                    status: 404,
                })
        }
    }

    #[tokio::test]
    async fn installs_and_records_version() {
        let work = tempfile::tempdir().unwrap();
        let mut ctx = AppContext::load(work.path()).unwrap();
        let mut source = FakeSource::new();
        source.publish(
            Tool::Eqgzi,
            "v2.0.1",
            archive::tests::build_zip(&[("eqgzi.exe", b"MZ")]),
        );

        let report = install_latest(&mut ctx, &source, Tool::Eqgzi).await.unwrap();
        assert_eq!(report.tag, "v2.0.1");
        assert!(!report.cached);
        assert_eq!(report.files, 1);
        assert!(work.path().join("tools/eqgzi.exe").is_file());
        assert!(work.path().join("tools/ClientData").is_dir());
        assert!(work.path().join("cache/eqgzi-v2.0.1.zip").is_file());
        assert_eq!(
            AppContext::load(work.path()).unwrap().config.eqgzi_version,
            "v2.0.1"
        );

        let again = install_latest(&mut ctx, &source, Tool::Eqgzi).await.unwrap();
        assert!(again.cached);
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_asset_is_reported() {
        let work = tempfile::tempdir().unwrap();
        let mut ctx = AppContext::load(work.path()).unwrap();
        let mut source = FakeSource::new();
        source.publish(Tool::Lantern, "1.0", Vec::new());
        if let Some(r) = source.releases.get_mut(Tool::Lantern.repo()) {
            r.assets[0].name = "LanternExtractor-linux.zip".into();
        }
        let err = install_latest(&mut ctx, &source, Tool::Lantern)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::AssetMissing { .. }));
        assert!(ctx.config.lantern_version.is_empty());
    }

    #[tokio::test]
    async fn update_check_compares_tags() {
        let cfg = Config {
            eqgzi_version: "v2.0.1".into(),
            lantern_version: "0.9".into(),
            ..Default::default()
        };
        let mut source = FakeSource::new();
        source.publish(Tool::Eqgzi, "v2.0.1", Vec::new());
        source.publish(Tool::Lantern, "1.0", Vec::new());

        let statuses = check_updates(&cfg, &source).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert!(!statuses[0].needs_update());
        assert!(statuses[1].needs_update());
        assert_eq!(statuses[1].latest, "1.0");
    }

    #[test]
    fn asset_names_follow_release_tag() {
        assert_eq!(Tool::Eqgzi.asset_name("v1"), "eqgzi-v1.zip");
        assert_eq!(Tool::Lantern.asset_name("1.2"), "LanternExtractor-1.2.zip");
    }
}
