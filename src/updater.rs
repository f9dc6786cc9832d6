//! Self-update from GitHub releases.
//!
//! The running binary is replaced by an atomic rename and the process
//! then re-executes itself, so `update` continues as the new version
//! under the same PID on Unix.

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::error::{DeployError, DeployResult, ResultExt};
use crate::version::{Arch, compare_versions, extract_version_from_url};

/// Latest release endpoint of the installer repository.
pub const RELEASES_API: &str =
    "https://api.github.com/repos/karloscodes/infinity-metrics-installer/releases/latest";

/// Set in the environment of a re-executed binary so it does not try
/// to update itself again.
pub const REEXEC_GUARD: &str = "INFINITY_METRICS_REEXECUTED";

/// Maximum binary download size.
const MAX_BODY_SIZE: u64 = 200 * 1024 * 1024;

/// A release resolved for one architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestRelease {
    pub version: String,
    pub download_url: String,
}

/// Where releases come from.
pub trait ReleaseSource {
    /// Resolve the newest release asset for `arch`.
    fn fetch_latest(&self, arch: Arch) -> DeployResult<LatestRelease>;

    /// Download a release asset.
    fn download(&self, url: &str) -> DeployResult<Vec<u8>>;
}

/// GitHub Releases API client.
pub struct ReleaseClient {
    agent: ureq::Agent,
    api_url: String,
}

impl ReleaseClient {
    #[must_use]
    pub fn new() -> Self {
        Self::with_api_url(RELEASES_API)
    }

    /// Client against a custom endpoint (mirrors, testing).
    #[must_use]
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            api_url: api_url.into(),
        }
    }

    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

impl Default for ReleaseClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseSource for ReleaseClient {
    fn fetch_latest(&self, arch: Arch) -> DeployResult<LatestRelease> {
        let release: GitHubRelease = self
            .agent
            .get(&self.api_url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "infinity-metrics-installer")
            .call()
            .map_err(|e| DeployError::Release(e.to_string()))?
            .body_mut()
            .read_json()
            .map_err(|e| DeployError::Release(format!("decoding release: {e}")))?;

        release.resolve(arch)
    }

    fn download(&self, url: &str) -> DeployResult<Vec<u8>> {
        let mut response = self
            .agent
            .get(url)
            .header("Accept", "application/octet-stream")
            .header("User-Agent", "infinity-metrics-installer")
            .call()
            .map_err(|e| DeployError::Release(format!("downloading {url}: {e}")))?;

        response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_SIZE)
            .read_to_vec()
            .map_err(|e| DeployError::Release(format!("downloading {url}: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

impl GitHubRelease {
    fn resolve(self, arch: Arch) -> DeployResult<LatestRelease> {
        let version = self.tag_name.trim_start_matches('v').to_string();
        let suffix = format!("-{arch}");

        let asset = self
            .assets
            .into_iter()
            .find(|a| a.name == arch.asset_name(&version) || a.name.ends_with(&suffix))
            .ok_or_else(|| {
                DeployError::Release(format!(
                    "release {} has no {arch} asset",
                    self.tag_name
                ))
            })?;

        Ok(LatestRelease {
            version,
            download_url: asset.browser_download_url,
        })
    }
}

/// Ask `source` for the latest release, falling back to the version
/// in the installer URL saved by a previous run.
pub fn resolve_latest<S: ReleaseSource>(
    source: &S,
    arch: Arch,
    persisted_url: Option<&str>,
) -> DeployResult<LatestRelease> {
    match source.fetch_latest(arch) {
        Ok(release) => Ok(release),
        Err(e) => {
            log::warn!("Could not query latest release: {e}");
            let url = persisted_url.ok_or(e)?;
            let version = extract_version_from_url(url);
            if version.is_empty() {
                return Err(DeployError::Release(format!(
                    "no version in saved installer URL {url}"
                )));
            }
            log::info!("Using version {version} from saved installer URL");
            Ok(LatestRelease {
                version,
                download_url: url.to_string(),
            })
        }
    }
}

/// Outcome of a self-update attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfUpdate {
    UpToDate { version: String },
    Updated { from: String, to: LatestRelease },
}

/// Replaces the installed binary with a newer release.
pub struct Updater<S> {
    source: S,
    arch: Arch,
    current_version: String,
    binary_path: PathBuf,
}

impl<S: ReleaseSource> Updater<S> {
    pub fn new(source: S, arch: Arch, current_version: &str, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            arch,
            current_version: current_version.to_string(),
            binary_path: binary_path.into(),
        }
    }

    #[must_use]
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Binary to re-execute after `outcome`, if it replaced anything.
    ///
    /// Always the path resolved before the swap: once the old file is
    /// renamed over, `current_exe` on Linux names the deleted inode.
    #[must_use]
    pub fn reexec_target(&self, outcome: &SelfUpdate) -> Option<&Path> {
        match outcome {
            SelfUpdate::Updated { .. } => Some(&self.binary_path),
            SelfUpdate::UpToDate { .. } => None,
        }
    }

    /// Download and install the latest release when it is newer than
    /// the running version.
    pub fn self_update(&self, persisted_url: Option<&str>) -> DeployResult<SelfUpdate> {
        let latest = resolve_latest(&self.source, self.arch, persisted_url)?;

        if compare_versions(&self.current_version, &latest.version) != Ordering::Less {
            log::info!("Installer is up to date ({})", self.current_version);
            return Ok(SelfUpdate::UpToDate {
                version: self.current_version.clone(),
            });
        }

        log::info!(
            "Updating installer {} -> {}",
            self.current_version,
            latest.version
        );
        let bytes = self
            .source
            .download(&latest.download_url)
            .context("downloading new installer")?;
        replace_binary(&self.binary_path, &bytes)?;

        Ok(SelfUpdate::Updated {
            from: self.current_version.clone(),
            to: latest,
        })
    }
}

/// Write `bytes` next to `target`, make it executable, and rename it
/// over `target`. The rename is atomic on the same filesystem.
pub fn replace_binary(target: &Path, bytes: &[u8]) -> DeployResult<()> {
    if bytes.is_empty() {
        return Err(DeployError::Release("downloaded binary is empty".into()));
    }

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| DeployError::Other(format!("not a file path: {}", target.display())))?;
    let staged = target.with_file_name(format!(".{file_name}.new"));

    let result = stage(&staged, bytes).and_then(|()| {
        fs::rename(&staged, target)
            .with_context(|| format!("replacing {}", target.display()))
    });
    if result.is_err() && staged.exists() {
        let _ = fs::remove_file(&staged);
    }
    result
}

fn stage(path: &Path, bytes: &[u8]) -> DeployResult<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("marking {} executable", path.display()))?;
    }
    Ok(())
}

/// `binary` with the given argv (argv[0] included) and the re-exec
/// guard set.
fn successor_command(binary: &Path, argv: impl IntoIterator<Item = OsString>) -> Command {
    let mut argv = argv.into_iter();
    let arg0 = argv.next();
    let mut command = Command::new(binary);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if let Some(arg0) = arg0 {
            command.arg0(arg0);
        }
    }
    #[cfg(not(unix))]
    let _ = arg0;

    command.args(argv).env(REEXEC_GUARD, "1");
    command
}

/// Replace the current process with `binary`, keeping argv and the
/// environment. Only returns if the exec itself failed.
#[cfg(unix)]
pub fn reexec(binary: &Path) -> DeployError {
    use std::os::unix::process::CommandExt;

    let err = successor_command(binary, std::env::args_os()).exec();
    DeployError::Io(err).context(format!("re-executing {}", binary.display()))
}

/// Without `exec`, run the successor to completion and exit with its
/// status code.
#[cfg(not(unix))]
pub fn reexec(binary: &Path) -> DeployError {
    match successor_command(binary, std::env::args_os()).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(e) => DeployError::Io(e).context(format!("re-executing {}", binary.display())),
    }
}

/// Whether this process is already the re-executed successor.
#[must_use]
pub fn is_reexecuted() -> bool {
    std::env::var_os(REEXEC_GUARD).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, assets: &[&str]) -> GitHubRelease {
        GitHubRelease {
            tag_name: tag.to_string(),
            assets: assets
                .iter()
                .map(|name| GitHubAsset {
                    name: (*name).to_string(),
                    browser_download_url: format!("https://dl.example.com/{name}"),
                })
                .collect(),
        }
    }

    #[test]
    fn resolve_picks_arch_asset() {
        let r = release(
            "v1.4.0",
            &["infinity-metrics-v1.4.0-amd64", "infinity-metrics-v1.4.0-arm64"],
        );

        let latest = r.resolve(Arch::Arm64).unwrap();
        assert_eq!(latest.version, "1.4.0");
        assert_eq!(
            latest.download_url,
            "https://dl.example.com/infinity-metrics-v1.4.0-arm64"
        );
    }

    #[test]
    fn resolve_without_arch_asset_fails() {
        let r = release("v1.4.0", &["infinity-metrics-v1.4.0-amd64"]);
        assert!(matches!(r.resolve(Arch::Arm64), Err(DeployError::Release(_))));
    }

    #[test]
    fn release_json_shape() {
        let json = r#"{
            "tag_name": "v2.0.1",
            "name": "v2.0.1",
            "assets": [
                {"name": "infinity-metrics-v2.0.1-amd64", "browser_download_url": "https://dl/amd64", "size": 10}
            ]
        }"#;
        let r: GitHubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(r.resolve(Arch::Amd64).unwrap().download_url, "https://dl/amd64");
    }

    #[test]
    fn successor_keeps_arguments_and_sets_guard() {
        let argv = ["infinity-metrics", "update", "-v"].map(OsString::from);
        let command = successor_command(Path::new("/usr/local/bin/infinity-metrics"), argv);

        assert_eq!(command.get_program(), "/usr/local/bin/infinity-metrics");
        assert_eq!(command.get_args().collect::<Vec<_>>(), ["update", "-v"]);
        assert!(
            command
                .get_envs()
                .any(|(key, value)| key == REEXEC_GUARD && value == Some("1".as_ref()))
        );
    }

    #[test]
    fn default_client_targets_github() {
        assert_eq!(ReleaseClient::default().api_url(), RELEASES_API);
    }
}
