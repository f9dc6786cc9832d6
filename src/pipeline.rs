use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::backup::{self, list_backups};
use crate::cmd::{Executor, command_exists};
use crate::config::Config;
use crate::deploy::{Orchestrator, Timings};
use crate::error::{DeployError, DeployResult, ResultExt};
use crate::lock::InstallLock;
use crate::updater::{self, ReleaseClient, SelfUpdate, Updater};
use crate::version::{Arch, CURRENT_VERSION};

/// Where `install` writes the configuration and every other command
/// reads it from.
pub const DEFAULT_CONFIG_PATH: &str = "/opt/infinity-metrics/.env";

/// Runs CLI commands against one host.
pub struct Pipeline<E> {
    executor: E,
    timings: Timings,
}

impl<E: Executor> Pipeline<E> {
    #[must_use]
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            timings: Timings::default(),
        }
    }

    #[must_use]
    pub const fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Dispatch a parsed command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn run(&self, cli: &Cli) -> DeployResult<()> {
        match &cli.command {
            Command::Install(args) => self.cmd_install(&cli.config, args),
            Command::Update { skip_self_update } => self.cmd_update(&cli.config, *skip_self_update),
            Command::RestoreDb => self.cmd_restore(&cli.config),
            Command::Backup => self.cmd_backup(&cli.config),
            Command::Status => self.cmd_status(&cli.config),
            Command::Version => {
                println!("infinity-metrics {CURRENT_VERSION}");
                Ok(())
            }
        }
    }

    fn orchestrator(&self, config: Config) -> Orchestrator<&E> {
        Orchestrator::new(config, &self.executor).with_timings(self.timings)
    }

    fn cmd_install(&self, config_path: &Path, args: &InstallArgs) -> DeployResult<()> {
        check_prerequisites()?;

        let mut config = if config_path.exists() {
            Config::load_from_file(config_path)?
        } else {
            Config::new()
        };
        args.apply(&mut config);
        prompt_missing(&mut config)?;
        config.validate()?;

        let _lock = InstallLock::acquire(&config.lock_path())?;

        config
            .save_to_file(config_path)
            .context("saving configuration")?;
        log::info!("Configuration saved to {}", config_path.display());

        self.orchestrator(config).deploy()
    }

    fn cmd_update(&self, config_path: &Path, skip_self_update: bool) -> DeployResult<()> {
        let config = load_config(config_path)?;

        if skip_self_update {
            log::info!("Skipping installer self-update");
        } else if updater::is_reexecuted() {
            log::debug!("Running as the updated installer");
        } else {
            self_update(config_path, &config);
        }

        let _lock = InstallLock::acquire(&config.lock_path())?;

        let outcome = self.orchestrator(config).update()?;
        println!("Updated: {} -> {}", outcome.from, outcome.to);
        if let Some(path) = outcome.backup {
            println!("Pre-update backup: {}", path.display());
        }
        Ok(())
    }

    fn cmd_restore(&self, config_path: &Path) -> DeployResult<()> {
        let config = load_config(config_path)?;
        let _lock = InstallLock::acquire(&config.lock_path())?;

        let backups = list_backups(&config.backups_dir())?;
        if backups.is_empty() {
            return Err(DeployError::Other(format!(
                "no backups found in {}",
                config.backups_dir().display()
            )));
        }

        let Some(selected) = backup::prompt_selection(&backups)? else {
            println!("Restore cancelled.");
            return Ok(());
        };

        let question = format!(
            "Replace {} with {}? The app is stopped during the restore",
            config.database_path().display(),
            selected.name
        );
        if !backup::confirm(&question)? {
            println!("Restore cancelled.");
            return Ok(());
        }

        self.orchestrator(config).restore(&selected.path)?;
        println!("Database restored from {}", selected.name);
        Ok(())
    }

    fn cmd_backup(&self, config_path: &Path) -> DeployResult<()> {
        let config = load_config(config_path)?;
        let _lock = InstallLock::acquire(&config.lock_path())?;

        let path = self.orchestrator(config).backup_now()?;
        println!("{}", path.display());
        Ok(())
    }

    fn cmd_status(&self, config_path: &Path) -> DeployResult<()> {
        let config = load_config(config_path)?;
        let backups = list_backups(&config.backups_dir())?;
        let orchestrator = self.orchestrator(config);

        println!("{}", orchestrator.status());
        match backups.first() {
            Some(latest) => println!("backups   {} (latest {})", backups.len(), latest.name),
            None => println!("backups   none"),
        }
        Ok(())
    }
}

#[derive(Parser)]
#[command(name = "infinity-metrics", version)]
#[command(about = "Install, update and restore Infinity Metrics")]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "INFINITY_METRICS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install the proxy and the application
    Install(InstallArgs),

    /// Roll out the latest images with zero downtime
    Update {
        /// Do not replace the installer binary first
        #[arg(long)]
        skip_self_update: bool,
    },

    /// Restore the database from a backup
    RestoreDb,

    /// Back up the database now
    Backup,

    /// Show container and backup status
    Status,

    /// Print the installer version
    Version,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Domain the application is served on
    #[arg(long, env = "INFINITY_METRICS_DOMAIN")]
    pub domain: Option<String>,

    /// Admin email, also used for ACME registration
    #[arg(long, env = "INFINITY_METRICS_ADMIN_EMAIL")]
    pub email: Option<String>,

    /// License key
    #[arg(long, env = "INFINITY_METRICS_LICENSE_KEY", hide_env_values = true)]
    pub license_key: Option<String>,
}

impl InstallArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(domain) = &self.domain {
            config.domain.clone_from(domain);
        }
        if let Some(email) = &self.email {
            config.admin_email.clone_from(email);
        }
        if let Some(key) = &self.license_key {
            config.license_key.clone_from(key);
        }
    }
}

fn load_config(path: &Path) -> DeployResult<Config> {
    let config = Config::load_from_file(path)
        .with_context(|| format!("loading {} (run `install` first)", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check_prerequisites() -> DeployResult<()> {
    if !command_exists("docker") {
        return Err(DeployError::CommandNotFound("docker".into()));
    }
    if !command_exists("sqlite3") {
        log::warn!("sqlite3 not found, database backups will fail");
    }
    Ok(())
}

/// Ask for required values that neither flags, environment nor an
/// earlier config provided.
fn prompt_missing(config: &mut Config) -> DeployResult<()> {
    let fields: [(&str, &mut String); 3] = [
        ("Domain", &mut config.domain),
        ("Admin email", &mut config.admin_email),
        ("License key", &mut config.license_key),
    ];

    for (label, value) in fields {
        if !value.trim().is_empty() {
            continue;
        }
        *value = dialoguer::Input::<String>::new()
            .with_prompt(label)
            .interact_text()
            .map_err(|e| DeployError::Other(format!("reading {label}: {e}")))?;
    }
    Ok(())
}

/// Replace the installer with the latest release and re-exec it.
/// Every failure is logged and the running version carries on.
fn self_update(config_path: &Path, config: &Config) {
    // Resolved before the swap; see `Updater::reexec_target`.
    let updater = Arch::current().and_then(|arch| {
        let binary = std::env::current_exe().context("locating installer binary")?;
        Ok(Updater::new(ReleaseClient::new(), arch, CURRENT_VERSION, binary))
    });
    let updater = match updater {
        Ok(updater) => updater,
        Err(e) => {
            log::warn!("Self-update skipped: {e}");
            return;
        }
    };

    let outcome = match updater.self_update(config.installer_url.as_deref()) {
        Ok(outcome) => outcome,
        Err(e) => {
            log::warn!("Self-update skipped: {e}");
            return;
        }
    };

    if let SelfUpdate::Updated { from, to } = &outcome {
        log::info!("Installer updated {from} -> {}, restarting", to.version);

        let mut persisted = config.clone();
        persisted.installer_url = Some(to.download_url.clone());
        if let Err(e) = persisted.save_to_file(config_path) {
            log::warn!("Could not record installer URL: {e}");
        }
    }

    if let Some(binary) = updater.reexec_target(&outcome) {
        log::warn!("{}", updater::reexec(binary));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_flags() {
        let cli = Cli::parse_from(["infinity-metrics", "update", "--skip-self-update", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(matches!(
            cli.command,
            Command::Update {
                skip_self_update: true
            }
        ));
    }

    #[test]
    fn install_flags_override_config() {
        let cli = Cli::parse_from([
            "infinity-metrics",
            "--config",
            "/tmp/im.env",
            "install",
            "--domain",
            "stats.example.com",
            "--email",
            "ops@example.com",
            "--license-key",
            "IM-1",
        ]);
        let Command::Install(args) = &cli.command else {
            panic!("expected install");
        };

        let mut config = Config::new().domain("old.example.com");
        args.apply(&mut config);

        assert_eq!(cli.config, PathBuf::from("/tmp/im.env"));
        assert_eq!(config.domain, "stats.example.com");
        assert_eq!(config.admin_email, "ops@example.com");
        assert_eq!(config.license_key, "IM-1");
    }

    #[test]
    fn restore_subcommand_name() {
        let cli = Cli::parse_from(["infinity-metrics", "restore-db", "-q"]);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Command::RestoreDb));
    }
}
