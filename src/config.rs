use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::backup::RetentionConfig;
use crate::error::{DeployError, DeployResult, ResultExt};

pub const DEFAULT_INSTALL_DIR: &str = "/opt/infinity-metrics";
pub const DEFAULT_APP_IMAGE: &str = "karloscodes/infinity-metrics-beta:latest";
pub const DEFAULT_PROXY_IMAGE: &str = "caddy:2.8-alpine";
pub const DATABASE_FILE: &str = "infinity-metrics-production.db";

const KEY_DOMAIN: &str = "INFINITY_METRICS_DOMAIN";
const KEY_ADMIN_EMAIL: &str = "INFINITY_METRICS_ADMIN_EMAIL";
const KEY_LICENSE_KEY: &str = "INFINITY_METRICS_LICENSE_KEY";
const KEY_APP_IMAGE: &str = "INFINITY_METRICS_APP_IMAGE";
const KEY_PROXY_IMAGE: &str = "INFINITY_METRICS_CADDY_IMAGE";
const KEY_INSTALL_DIR: &str = "INFINITY_METRICS_INSTALL_DIR";
const KEY_BACKUP_PATH: &str = "INFINITY_METRICS_BACKUP_PATH";
const KEY_INSTALLER_URL: &str = "INFINITY_METRICS_INSTALLER_URL";
const KEY_ENV: &str = "INFINITY_METRICS_ENV";
const KEY_DAILY_DAYS: &str = "INFINITY_METRICS_BACKUP_DAILY_DAYS";
const KEY_WEEKLY_DAYS: &str = "INFINITY_METRICS_BACKUP_WEEKLY_DAYS";
const KEY_MONTHLY_DAYS: &str = "INFINITY_METRICS_BACKUP_MONTHLY_DAYS";

/// Deployment environment. Selects the TLS mode of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Test,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Test => f.write_str("test"),
        }
    }
}

impl FromStr for Environment {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "test" | "development" | "dev" => Ok(Self::Test),
            other => Err(DeployError::InvalidConfig(format!(
                "unknown environment '{other}'"
            ))),
        }
    }
}

/// Read-only snapshot of the values a run deploys with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseConfig {
    pub domain: String,
    pub admin_email: String,
    pub license_key: String,
    pub app_image: String,
    pub proxy_image: String,
    pub install_dir: PathBuf,
    pub backup_path: PathBuf,
    pub environment: Environment,
}

/// Installer configuration, persisted as a flat `KEY=VALUE` file
/// next to the installation.
///
/// # Example
///
/// ```
/// use infinity_metrics_installer::Config;
///
/// let config = Config::new()
///     .domain("analytics.example.com")
///     .admin_email("ops@example.com")
///     .license_key("IM-1234");
///
/// assert!(config.validate().is_ok());
/// assert!(config.database_path().ends_with("storage/infinity-metrics-production.db"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub domain: String,
    pub admin_email: String,
    pub license_key: String,
    pub app_image: String,
    pub proxy_image: String,
    pub install_dir: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub installer_url: Option<String>,
    pub environment: Environment,
    pub retention: RetentionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self {
            domain: String::new(),
            admin_email: String::new(),
            license_key: String::new(),
            app_image: DEFAULT_APP_IMAGE.to_string(),
            proxy_image: DEFAULT_PROXY_IMAGE.to_string(),
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            backup_path: None,
            installer_url: None,
            environment: Environment::Production,
            retention: RetentionConfig::default(),
        }
    }

    #[must_use]
    pub fn domain(mut self, domain: &str) -> Self {
        self.domain = domain.to_string();
        self
    }

    #[must_use]
    pub fn admin_email(mut self, email: &str) -> Self {
        self.admin_email = email.to_string();
        self
    }

    #[must_use]
    pub fn license_key(mut self, key: &str) -> Self {
        self.license_key = key.to_string();
        self
    }

    #[must_use]
    pub fn app_image(mut self, image: &str) -> Self {
        self.app_image = image.to_string();
        self
    }

    #[must_use]
    pub fn proxy_image(mut self, image: &str) -> Self {
        self.proxy_image = image.to_string();
        self
    }

    #[must_use]
    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Load a configuration file, starting from defaults for any
    /// key the file does not set.
    pub fn load_from_file(path: &Path) -> DeployResult<Self> {
        if !path.exists() {
            return Err(DeployError::FileNotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse `KEY=VALUE` content. Unknown keys are ignored.
    pub fn parse(content: &str) -> DeployResult<Self> {
        let mut config = Self::new();

        for (key, value) in parse_env_lines(content) {
            match key.as_str() {
                KEY_DOMAIN => config.domain = value,
                KEY_ADMIN_EMAIL => config.admin_email = value,
                KEY_LICENSE_KEY => config.license_key = value,
                KEY_APP_IMAGE => config.app_image = value,
                KEY_PROXY_IMAGE => config.proxy_image = value,
                KEY_INSTALL_DIR => config.install_dir = PathBuf::from(value),
                KEY_BACKUP_PATH if !value.is_empty() => {
                    config.backup_path = Some(PathBuf::from(value));
                }
                KEY_INSTALLER_URL if !value.is_empty() => config.installer_url = Some(value),
                KEY_ENV => config.environment = value.parse()?,
                KEY_DAILY_DAYS => config.retention.daily_days = parse_days(&key, &value)?,
                KEY_WEEKLY_DAYS => config.retention.weekly_days = parse_days(&key, &value)?,
                KEY_MONTHLY_DAYS => config.retention.monthly_days = parse_days(&key, &value)?,
                _ => log::debug!("ignoring unknown config key {key}"),
            }
        }

        Ok(config)
    }

    /// Render the configuration as `KEY=VALUE` lines.
    #[must_use]
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("{KEY_DOMAIN}={}", self.domain),
            format!("{KEY_ADMIN_EMAIL}={}", self.admin_email),
            format!("{KEY_LICENSE_KEY}={}", self.license_key),
            format!("{KEY_APP_IMAGE}={}", self.app_image),
            format!("{KEY_PROXY_IMAGE}={}", self.proxy_image),
            format!("{KEY_INSTALL_DIR}={}", self.install_dir.display()),
            format!("{KEY_ENV}={}", self.environment),
            format!("{KEY_DAILY_DAYS}={}", self.retention.daily_days),
            format!("{KEY_WEEKLY_DAYS}={}", self.retention.weekly_days),
            format!("{KEY_MONTHLY_DAYS}={}", self.retention.monthly_days),
        ];
        if let Some(path) = &self.backup_path {
            lines.push(format!("{KEY_BACKUP_PATH}={}", path.display()));
        }
        if let Some(url) = &self.installer_url {
            lines.push(format!("{KEY_INSTALLER_URL}={url}"));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Write the configuration file with owner-only permissions,
    /// since it carries the license key.
    pub fn save_to_file(&self, path: &Path) -> DeployResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(path, self.render())
            .with_context(|| format!("writing config {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Check that every field a deployment needs is present.
    pub fn validate(&self) -> DeployResult<()> {
        let required = [
            ("domain", self.domain.as_str()),
            ("admin email", self.admin_email.as_str()),
            ("license key", self.license_key.as_str()),
            ("app image", self.app_image.as_str()),
            ("proxy image", self.proxy_image.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(DeployError::InvalidConfig(format!("{name} is required")));
            }
        }
        if self.install_dir.as_os_str().is_empty() {
            return Err(DeployError::InvalidConfig("install dir is required".into()));
        }
        if !self.admin_email.contains('@') {
            return Err(DeployError::InvalidConfig(format!(
                "admin email '{}' is not an email address",
                self.admin_email
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn get_data(&self) -> ReleaseConfig {
        ReleaseConfig {
            domain: self.domain.clone(),
            admin_email: self.admin_email.clone(),
            license_key: self.license_key.clone(),
            app_image: self.app_image.clone(),
            proxy_image: self.proxy_image.clone(),
            install_dir: self.install_dir.clone(),
            backup_path: self.backups_dir(),
            environment: self.environment,
        }
    }

    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.install_dir.join("storage")
    }

    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.install_dir.join("logs")
    }

    #[must_use]
    pub fn proxy_dir(&self) -> PathBuf {
        self.install_dir.join("proxy")
    }

    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.backup_path
            .clone()
            .unwrap_or_else(|| self.storage_dir().join("backups"))
    }

    #[must_use]
    pub fn caddyfile_path(&self) -> PathBuf {
        self.proxy_dir().join("Caddyfile")
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir().join(DATABASE_FILE)
    }

    #[must_use]
    pub fn env_file_path(&self) -> PathBuf {
        self.install_dir.join(".env")
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.install_dir.join(".installer.lock")
    }
}

/// Split `KEY=VALUE` content into pairs, skipping blank lines and
/// `#` comments and stripping matching quotes around values.
#[must_use]
pub fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            Some((k.trim().to_string(), unquote(v.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_days(key: &str, value: &str) -> DeployResult<u32> {
    value
        .parse()
        .map_err(|_| DeployError::InvalidConfig(format!("{key} must be a number of days, got '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> Config {
        Config::new()
            .domain("metrics.example.com")
            .admin_email("admin@example.com")
            .license_key("IM-ABC")
    }

    #[test]
    fn defaults() {
        let config = Config::new();

        assert_eq!(config.app_image, DEFAULT_APP_IMAGE);
        assert_eq!(config.proxy_image, DEFAULT_PROXY_IMAGE);
        assert_eq!(config.install_dir, PathBuf::from(DEFAULT_INSTALL_DIR));
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.retention, RetentionConfig::default());
    }

    #[test]
    fn default_proxy_supports_status_code_error_handlers() {
        // `handle_errors 5xx` needs Caddy 2.8 or newer.
        let tag = DEFAULT_PROXY_IMAGE.split_once(':').unwrap().1;
        let version = tag.split('-').next().unwrap();
        assert_ne!(
            crate::version::compare_versions(version, "2.8"),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn validate_reports_first_missing_field() {
        let err = Config::new().validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: domain is required");

        let err = Config::new().domain("x.dev").validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid configuration: admin email is required");
    }

    #[test]
    fn validate_rejects_bad_email() {
        let err = complete().admin_email("nobody").validate().unwrap_err();
        assert!(err.to_string().contains("not an email address"));
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(complete().validate().is_ok());
    }

    #[test]
    fn parse_handles_comments_quotes_and_unknown_keys() {
        let content = "\
# generated by the installer
INFINITY_METRICS_DOMAIN=\"metrics.example.com\"
export INFINITY_METRICS_ADMIN_EMAIL='admin@example.com'

INFINITY_METRICS_LICENSE_KEY = IM-ABC
INFINITY_METRICS_ENV=test
INFINITY_METRICS_BACKUP_DAILY_DAYS=3
SOMETHING_ELSE=ignored
";
        let config = Config::parse(content).unwrap();

        assert_eq!(config.domain, "metrics.example.com");
        assert_eq!(config.admin_email, "admin@example.com");
        assert_eq!(config.license_key, "IM-ABC");
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.retention.daily_days, 3);
        assert_eq!(config.retention.weekly_days, 14);
    }

    #[test]
    fn parse_rejects_non_numeric_retention() {
        let err = Config::parse("INFINITY_METRICS_BACKUP_WEEKLY_DAYS=two").unwrap_err();
        assert!(err.to_string().contains("INFINITY_METRICS_BACKUP_WEEKLY_DAYS"));
    }

    #[test]
    fn render_then_parse_preserves_fields() {
        let mut config = complete().install_dir("/srv/im");
        config.installer_url = Some("https://example.com/infinity-metrics-v1.2.3-amd64".into());
        config.backup_path = Some(PathBuf::from("/srv/backups"));

        let parsed = Config::parse(&config.render()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn derived_paths() {
        let config = complete().install_dir("/srv/im");

        assert_eq!(config.storage_dir(), PathBuf::from("/srv/im/storage"));
        assert_eq!(config.logs_dir(), PathBuf::from("/srv/im/logs"));
        assert_eq!(config.caddyfile_path(), PathBuf::from("/srv/im/proxy/Caddyfile"));
        assert_eq!(config.backups_dir(), PathBuf::from("/srv/im/storage/backups"));
        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/im/storage/infinity-metrics-production.db")
        );
    }

    #[test]
    fn get_data_snapshot() {
        let data = complete().install_dir("/srv/im").get_data();

        assert_eq!(data.domain, "metrics.example.com");
        assert_eq!(data.backup_path, PathBuf::from("/srv/im/storage/backups"));
    }
}
