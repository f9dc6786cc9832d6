use crate::app::HEALTH_PATH;
use crate::config::{Config, Environment};
use crate::error::{DeployError, DeployResult};

/// How the proxy obtains certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Caddy's internal CA. Used for test runs without public DNS.
    Internal,
    /// ACME issuance with the given account email.
    Acme { email: String },
}

/// Active health check the proxy runs against every upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub interval: String,
    pub timeout: String,
    pub status: u16,
    pub fails: u32,
    pub fail_duration: String,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: HEALTH_PATH.to_string(),
            interval: "2s".to_string(),
            timeout: "1s".to_string(),
            status: 200,
            fails: 3,
            fail_duration: "30s".to_string(),
        }
    }
}

/// Configuration for one rendering of the Caddy reverse proxy.
///
/// Holds one upstream at rest and two during a traffic shift.
///
/// # Example
///
/// ```
/// use infinity_metrics_installer::caddy::{ProxyConfig, TlsMode};
///
/// let proxy = ProxyConfig::new("metrics.example.com", "ops@example.com")
///     .tls(TlsMode::Internal)
///     .upstreams(&["infinity-app-1:8080", "infinity-app-2:8080"])
///     .unwrap();
///
/// assert_eq!(proxy.upstreams.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub domain: String,
    pub admin_email: String,
    pub tls: TlsMode,
    pub upstreams: Vec<String>,
    pub health_check: HealthCheck,
    pub grace_period: String,
}

impl ProxyConfig {
    #[must_use]
    pub fn new(domain: &str, admin_email: &str) -> Self {
        Self {
            domain: domain.to_string(),
            admin_email: admin_email.to_string(),
            tls: TlsMode::Acme {
                email: admin_email.to_string(),
            },
            upstreams: Vec::new(),
            health_check: HealthCheck::default(),
            grace_period: "10s".to_string(),
        }
    }

    /// Proxy settings derived from the installer configuration:
    /// test environments use the internal CA.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let proxy = Self::new(&config.domain, &config.admin_email);
        match config.environment {
            Environment::Test => proxy.tls(TlsMode::Internal),
            Environment::Production => proxy,
        }
    }

    #[must_use]
    pub fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    #[must_use]
    pub fn health_check(mut self, check: HealthCheck) -> Self {
        self.health_check = check;
        self
    }

    /// Set the ordered upstream list. Exactly one or two targets.
    pub fn upstreams(mut self, targets: &[&str]) -> DeployResult<Self> {
        if targets.is_empty() || targets.len() > 2 {
            return Err(DeployError::Other(format!(
                "proxy needs one or two upstreams, got {}",
                targets.len()
            )));
        }
        self.upstreams = targets.iter().map(|t| (*t).to_string()).collect();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let proxy = ProxyConfig::new("m.dev", "a@m.dev");

        assert_eq!(
            proxy.tls,
            TlsMode::Acme {
                email: "a@m.dev".into()
            }
        );
        assert!(proxy.upstreams.is_empty());
        assert_eq!(proxy.health_check.path, "/_health");
        assert_eq!(proxy.health_check.status, 200);
        assert_eq!(proxy.grace_period, "10s");
    }

    #[test]
    fn upstream_count_is_bounded() {
        let proxy = ProxyConfig::new("m.dev", "a@m.dev");

        assert!(proxy.clone().upstreams(&[]).is_err());
        assert!(proxy.clone().upstreams(&["a:1", "b:1", "c:1"]).is_err());
        assert_eq!(
            proxy.upstreams(&["b:1", "a:1"]).unwrap().upstreams,
            vec!["b:1", "a:1"]
        );
    }

    #[test]
    fn test_environment_uses_internal_ca() {
        let config = Config::new()
            .domain("m.dev")
            .admin_email("a@m.dev")
            .environment(Environment::Test);

        assert_eq!(ProxyConfig::from_config(&config).tls, TlsMode::Internal);
    }

    #[test]
    fn production_uses_acme_with_admin_email() {
        let config = Config::new().domain("m.dev").admin_email("a@m.dev");

        assert_eq!(
            ProxyConfig::from_config(&config).tls,
            TlsMode::Acme {
                email: "a@m.dev".into()
            }
        );
    }
}
