//! Fresh installs and blue-green updates of the app behind Caddy.
//!
//! Two fixed application slots exist. At rest the proxy sends all
//! traffic to one of them; during an update the idle slot is started,
//! health-gated, added to the proxy next to the serving one, and then
//! made the sole upstream. The old slot is only removed after that
//! cutover, so every earlier failure leaves it serving.

pub mod install;
pub mod restore;
pub mod rolling;

use std::fmt;
use std::fs;
use std::time::Duration;

use crate::app::{APP_PORT, ContainerSpec, NETWORK, PROXY_CONTAINER};
use crate::backup::BackupEngine;
use crate::cache::DigestCache;
use crate::caddy::ProxyConfig;
use crate::caddyfile;
use crate::cmd::Executor;
use crate::config::Config;
use crate::docker::Docker;
use crate::error::{DeployResult, ResultExt};
use crate::retry::{RetryPolicy, with_retry};

pub use rolling::{SlotPlan, UpdateOutcome};

/// One of the two application container identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    Secondary,
}

impl Slot {
    pub const ALL: [Self; 2] = [Self::Primary, Self::Secondary];

    #[must_use]
    pub const fn container_name(self) -> &'static str {
        match self {
            Self::Primary => "infinity-app-1",
            Self::Secondary => "infinity-app-2",
        }
    }

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    /// Proxy upstream address for this slot.
    #[must_use]
    pub fn upstream(self) -> String {
        format!("{}:{APP_PORT}", self.container_name())
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
        }
    }
}

/// Retry budgets and waits used by install and update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub pull: RetryPolicy,
    pub deploy: RetryPolicy,
    pub health: RetryPolicy,
    pub stabilization: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            pull: RetryPolicy::linear(3, Duration::from_secs(2)),
            deploy: RetryPolicy::linear(3, Duration::from_secs(1)),
            health: RetryPolicy::fixed(5, Duration::from_secs(1)),
            stabilization: Duration::from_secs(2),
        }
    }
}

impl Timings {
    /// Same attempt counts with every wait set to zero.
    #[must_use]
    pub const fn instant() -> Self {
        Self {
            pull: RetryPolicy::linear(3, Duration::ZERO),
            deploy: RetryPolicy::linear(3, Duration::ZERO),
            health: RetryPolicy::fixed(5, Duration::ZERO),
            stabilization: Duration::ZERO,
        }
    }
}

/// What is running right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStatus {
    pub proxy_running: bool,
    pub primary_running: bool,
    pub secondary_running: bool,
    pub serving: Option<Slot>,
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |running: bool| if running { "running" } else { "stopped" };
        writeln!(f, "proxy     {PROXY_CONTAINER}: {}", state(self.proxy_running))?;
        writeln!(
            f,
            "primary   {}: {}",
            Slot::Primary.container_name(),
            state(self.primary_running)
        )?;
        writeln!(
            f,
            "secondary {}: {}",
            Slot::Secondary.container_name(),
            state(self.secondary_running)
        )?;
        match self.serving {
            Some(slot) => write!(f, "serving   {slot}"),
            None => write!(f, "serving   unknown"),
        }
    }
}

/// Owns the install and update protocols for one installation.
pub struct Orchestrator<E> {
    config: Config,
    docker: Docker<E>,
    cache: DigestCache,
    timings: Timings,
}

impl<E: Executor> Orchestrator<E> {
    pub fn new(config: Config, executor: E) -> Self {
        Self {
            config,
            docker: Docker::new(executor),
            cache: DigestCache::default(),
            timings: Timings::default(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: DigestCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub const fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn cache(&self) -> &DigestCache {
        &self.cache
    }

    #[must_use]
    pub const fn docker(&self) -> &Docker<E> {
        &self.docker
    }

    #[must_use]
    pub fn backup_engine(&self) -> BackupEngine<&E> {
        BackupEngine::new(self.docker.executor(), self.config.retention)
    }

    #[must_use]
    pub fn status(&self) -> StackStatus {
        let primary_running = self.docker.is_running(Slot::Primary.container_name());
        let secondary_running = self.docker.is_running(Slot::Secondary.container_name());
        let serving = match (primary_running, secondary_running) {
            (true, false) => Some(Slot::Primary),
            (false, true) => Some(Slot::Secondary),
            (true, true) => self.serving_slot_from_disk(),
            (false, false) => None,
        };
        StackStatus {
            proxy_running: self.docker.is_running(PROXY_CONTAINER),
            primary_running,
            secondary_running,
            serving,
        }
    }

    /// Slot named as the only upstream in the Caddyfile on disk.
    fn serving_slot_from_disk(&self) -> Option<Slot> {
        let content = fs::read_to_string(self.config.caddyfile_path()).ok()?;
        sole_upstream(&content)
    }

    /// Pull the app and proxy images, skipping references pulled
    /// within the cache TTL.
    fn pull_images(&mut self) -> DeployResult<()> {
        let images = [self.config.app_image.clone(), self.config.proxy_image.clone()];

        for image in &images {
            if let Some(id) = self.cache.get(image) {
                log::debug!("{image} pulled recently ({id}), skipping");
                continue;
            }
            log::info!("Pulling {image}");
            with_retry(&self.timings.pull, &format!("pulling {image}"), |_| {
                self.docker.pull(image)
            })?;
            match self.docker.image_id(image) {
                Ok(id) => self.cache.insert(image, &id),
                Err(e) => log::debug!("not caching {image}: {e}"),
            }
        }
        Ok(())
    }

    /// Render the Caddyfile for `upstreams` and write it to disk.
    fn write_proxy_config(&self, upstreams: &[Slot]) -> DeployResult<String> {
        let targets: Vec<String> = upstreams.iter().map(|s| s.upstream()).collect();
        let refs: Vec<&str> = targets.iter().map(String::as_str).collect();
        let proxy = ProxyConfig::from_config(&self.config).upstreams(&refs)?;
        caddyfile::write(&proxy, &self.config.caddyfile_path())
    }

    /// Write the Caddyfile for `upstreams` and push it to the
    /// running proxy.
    fn switch_upstreams(&self, upstreams: &[Slot]) -> DeployResult<()> {
        let content = self.write_proxy_config(upstreams)?;
        self.docker.reload_proxy(PROXY_CONTAINER, &content)
    }

    /// Replace whatever container holds `slot` with a fresh one.
    fn deploy_slot(&self, slot: Slot) -> DeployResult<()> {
        let name = slot.container_name();
        self.docker.stop_and_remove(name);
        self.docker
            .run_container(&ContainerSpec::app(&self.config, name))
            .with_context(|| format!("deploying {slot} slot"))?;
        Ok(())
    }

    fn create_directories(&self) -> DeployResult<()> {
        let dirs = [
            self.config.storage_dir(),
            self.config.logs_dir(),
            self.config.proxy_dir(),
            self.config.proxy_dir().join("data"),
            self.config.proxy_dir().join("config"),
            self.config.backups_dir(),
        ];
        for dir in &dirs {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    fn ensure_network(&self) -> DeployResult<()> {
        self.docker.ensure_network(NETWORK)
    }
}

/// The slot a Caddyfile routes to when it names exactly one of them.
#[must_use]
pub fn sole_upstream(caddyfile: &str) -> Option<Slot> {
    let line = caddyfile
        .lines()
        .find(|l| l.trim_start().starts_with("reverse_proxy "))?;
    let named: Vec<Slot> = Slot::ALL
        .into_iter()
        .filter(|slot| line.contains(slot.container_name()))
        .collect();
    match named.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
