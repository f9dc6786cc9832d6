//! Installer and zero-downtime updater for a self-hosted Infinity
//! Metrics instance.
//!
//! A host runs three containers on one Docker network: the Caddy
//! proxy (`infinity-caddy`) and two interchangeable application
//! slots (`infinity-app-1`, `infinity-app-2`). At rest exactly one
//! slot serves traffic.
//!
//! # Overview
//!
//! - [`Orchestrator`] performs fresh installs and blue-green updates:
//!   the idle slot is started, health-gated, added to the proxy next
//!   to the serving slot and finally made the sole upstream.
//! - [`BackupEngine`] snapshots the `SQLite` database before every
//!   update, validates each snapshot and keeps an age-bounded set of
//!   daily, weekly and monthly backups.
//! - [`updater`] replaces the installer binary with the latest GitHub
//!   release and re-executes it before an update runs.
//! - [`Pipeline`] maps the `infinity-metrics` CLI onto the above.
//!
//! Every external process (`docker`, `sqlite3`) goes through the
//! [`Executor`] trait, so the whole protocol can be driven by a
//! scripted executor in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use infinity_metrics_installer::{Config, Orchestrator, SystemExecutor};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_from_file(Path::new("/opt/infinity-metrics/.env"))?;
//!     let mut orchestrator = Orchestrator::new(config, SystemExecutor);
//!
//!     let outcome = orchestrator.update()?;
//!     println!("now serving from {}", outcome.to);
//!     Ok(())
//! }
//! ```

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod app;
pub mod backup;
pub mod cache;
pub mod caddy;
pub mod caddyfile;
pub mod cmd;
pub mod config;
pub mod deploy;
pub mod docker;
pub mod error;
pub mod lock;
pub mod pipeline;
pub mod retry;
pub mod updater;
pub mod version;

pub use app::ContainerSpec;
pub use backup::{BackupClass, BackupEngine, BackupFile, RetentionConfig};
pub use cache::DigestCache;
pub use caddy::{HealthCheck, ProxyConfig, TlsMode};
pub use cmd::{Executor, SystemExecutor};
pub use config::{Config, Environment};
pub use deploy::{Orchestrator, Slot, Timings};
pub use docker::Docker;
pub use error::{DeployError, DeployResult};
pub use lock::InstallLock;
pub use pipeline::{Cli, Pipeline};
pub use version::{Arch, compare_versions, extract_version_from_url};
