//! Compiler Installer - prebuilt downloads with a build-from-source fallback
//!
//! Binaries live in the filter's `bin` directory as `dash_compiler-<version>`.
//! Prebuilt binaries exist for macOS and Windows from 0.4.2 on; everything
//! else is compiled from the tagged source with `deno compile`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::DashError;
use crate::version::{VersionPlan, VersionSource};

/// Prefix of installed compiler executables
pub const DASH_BIN_PREFIX: &str = "dash_compiler-";

const FIRST_PREBUILT_VERSION: Version = Version::new(0, 4, 2);

/// File name of an installed compiler
pub fn binary_name(version: &str) -> String {
    format!("{DASH_BIN_PREFIX}{version}")
}

/// Release asset for the given platform, if one is published
pub fn prebuilt_url(repo: &str, version: &Version, os: &str, arch: &str) -> Option<String> {
    if *version < FIRST_PREBUILT_VERSION {
        return None;
    }

    let prefix = format!("https://github.com/{repo}/releases/download/v{version}/dash");
    match (os, arch) {
        ("macos", "x86_64") => Some(format!("{prefix}-apple-x64")),
        ("macos", "aarch64") => Some(format!("{prefix}-apple-aarch64")),
        ("windows", _) => Some(format!("{prefix}.exe")),
        _ => None,
    }
}

/// Entry script of the tagged source tree
pub fn source_script_url(repo: &str, version: &Version) -> String {
    let prefix = format!("https://raw.githubusercontent.com/{repo}/refs/tags/v{version}");
    if *version == Version::new(0, 1, 0) {
        format!("{prefix}/src/main.ts")
    } else {
        format!("{prefix}/mod.ts")
    }
}

#[derive(Debug, Deserialize)]
struct GithubTagInfo {
    name: String,
}

enum Download {
    Installed,
    Missing,
}

/// Manages compiler binaries in one directory
pub struct Installer {
    bin_dir: PathBuf,
    repo: String,
    client: reqwest::Client,
}

impl Installer {
    pub fn new(bin_dir: impl AsRef<Path>, repo: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dashkit/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            bin_dir: bin_dir.as_ref().to_path_buf(),
            repo: repo.into(),
            client,
        })
    }

    pub fn binary_path(&self, version: &Version) -> PathBuf {
        self.bin_dir.join(binary_name(&version.to_string()))
    }

    /// Carry out a resolved plan and return the executable to run
    pub async fn apply(&self, plan: &VersionPlan) -> Result<PathBuf> {
        match plan {
            VersionPlan::UseInstalled(version) => Ok(self.binary_path(version)),
            VersionPlan::Install(version) => self.install(version).await,
            VersionPlan::Upgrade { from, to } => {
                let path = self.install(to).await?;
                self.uninstall(from).await?;
                Ok(path)
            }
        }
    }

    /// Install one version
    pub async fn install(&self, version: &Version) -> Result<PathBuf> {
        info!("Installing dash version {} into {:?}", version, self.bin_dir);
        tokio::fs::create_dir_all(&self.bin_dir).await?;
        let install_path = self.binary_path(version);

        let url = prebuilt_url(
            &self.repo,
            version,
            std::env::consts::OS,
            std::env::consts::ARCH,
        );

        let installed = match url {
            Some(url) => match self.download(&url, &install_path).await? {
                Download::Installed => true,
                Download::Missing => {
                    error!("Received HTTP 404 status while downloading prebuilt dash binary.");
                    info!("Falling back to compiling from source.");
                    self.compile_from_source(version, &install_path).await?
                }
            },
            None => {
                info!("No prebuilt dash binary found for the current platform. Compiling from source.");
                self.compile_from_source(version, &install_path).await?
            }
        };

        if installed {
            Ok(install_path)
        } else {
            Err(DashError::InstallFailed(version.to_string()).into())
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<Download> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Download::Missing);
        }
        if !status.is_success() {
            return Err(anyhow!("HTTP {} while downloading {}", status, url));
        }

        let bytes = response.bytes().await?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        make_executable(dest).await?;
        Ok(Download::Installed)
    }

    async fn compile_from_source(&self, version: &Version, out_file: &Path) -> Result<bool> {
        let out_file = std::path::absolute(out_file)?;
        let status = Command::new("deno")
            .arg("compile")
            // The lockfile of some tagged releases is inconsistent
            .arg("--no-lock")
            .arg("--output")
            .arg(&out_file)
            .arg("-A")
            .arg(source_script_url(&self.repo, version))
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await;

        match status {
            Ok(status) => Ok(status.success()),
            Err(e) => {
                warn!("Failed to run deno: {}", e);
                Ok(false)
            }
        }
    }

    pub async fn uninstall(&self, version: &Version) -> Result<()> {
        info!("Uninstalling dash version {} from {:?}", version, self.bin_dir);
        tokio::fs::remove_file(self.binary_path(version)).await?;
        Ok(())
    }
}

#[async_trait]
impl VersionSource for Installer {
    async fn installed_versions(&self) -> Result<Vec<String>> {
        tokio::fs::create_dir_all(&self.bin_dir).await?;

        let mut versions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.bin_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(version) = name.strip_prefix(DASH_BIN_PREFIX) {
                versions.push(version.to_string());
            }
        }
        Ok(versions)
    }

    async fn published_versions(&self) -> Result<Vec<String>> {
        let url = format!("https://api.github.com/repos/{}/tags", self.repo);
        let tags: Vec<GithubTagInfo> = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()
            .context("failed to fetch version info for dash from GitHub")?
            .json()
            .await?;

        Ok(tags
            .into_iter()
            .filter_map(|tag| tag.name.strip_prefix('v').map(str::to_owned))
            .collect())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = tokio::fs::metadata(path).await?.permissions();
    permissions.set_mode(0o755);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPO: &str = "bridge-core/deno-dash-compiler";

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_prebuilt_urls() {
        assert_eq!(
            prebuilt_url(REPO, &v("1.0.0"), "macos", "aarch64").as_deref(),
            Some("https://github.com/bridge-core/deno-dash-compiler/releases/download/v1.0.0/dash-apple-aarch64")
        );
        assert_eq!(
            prebuilt_url(REPO, &v("0.4.2"), "macos", "x86_64").as_deref(),
            Some("https://github.com/bridge-core/deno-dash-compiler/releases/download/v0.4.2/dash-apple-x64")
        );
        assert!(prebuilt_url(REPO, &v("1.0.0"), "windows", "x86_64").unwrap().ends_with("/dash.exe"));
        assert!(prebuilt_url(REPO, &v("1.0.0"), "linux", "x86_64").is_none());
        assert!(prebuilt_url(REPO, &v("0.4.1"), "windows", "x86_64").is_none());
    }

    #[test]
    fn test_source_script_urls() {
        assert!(source_script_url(REPO, &v("0.1.0")).ends_with("/refs/tags/v0.1.0/src/main.ts"));
        assert!(source_script_url(REPO, &v("0.3.1")).ends_with("/refs/tags/v0.3.1/mod.ts"));
    }

    #[tokio::test]
    async fn test_installed_versions_filters_prefix() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(bin.join("dash_compiler-9.9.9")).unwrap();
        std::fs::write(bin.join("dash_compiler-1.2.3"), "").unwrap();
        std::fs::write(bin.join("unrelated"), "").unwrap();

        let installer = Installer::new(&bin, REPO).unwrap();
        let versions = installer.installed_versions().await.unwrap();

        assert_eq!(versions, vec!["1.2.3"]);
    }

    #[tokio::test]
    async fn test_apply_use_installed_and_uninstall() {
        let dir = TempDir::new().unwrap();
        let installer = Installer::new(dir.path(), REPO).unwrap();
        std::fs::write(dir.path().join("dash_compiler-1.2.3"), "").unwrap();

        let path = installer
            .apply(&VersionPlan::UseInstalled(v("1.2.3")))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("dash_compiler-1.2.3"));

        installer.uninstall(&v("1.2.3")).await.unwrap();
        assert!(installer.installed_versions().await.unwrap().is_empty());
    }
}
