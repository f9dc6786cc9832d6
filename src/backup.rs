//! SQLite snapshot management.
//!
//! Backups are named `backup_<YYYYMMDD>_<HHMMSS>.db`. The embedded
//! timestamp decides the retention class of each file:
//!
//! 1. day of month is 1 -> monthly
//! 2. weekday is Sunday -> weekly
//! 3. otherwise -> daily
//!
//! Each class has its own maximum age, see [`RetentionConfig`].

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Duration, Local, NaiveDateTime, Weekday};

use crate::cmd::Executor;
use crate::error::{DeployError, DeployResult, ResultExt};

pub const BACKUP_PREFIX: &str = "backup_";
pub const BACKUP_EXTENSION: &str = ".db";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// The single line `PRAGMA integrity_check` prints for a healthy
/// database.
const INTEGRITY_OK: &str = "ok";

/// Maximum age per retention class, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    pub daily_days: u32,
    pub weekly_days: u32,
    pub monthly_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_days: 14,
            monthly_days: 90,
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn max_age(&self, class: BackupClass) -> Duration {
        let days = match class {
            BackupClass::Daily => self.daily_days,
            BackupClass::Weekly => self.weekly_days,
            BackupClass::Monthly => self.monthly_days,
        };
        Duration::hours(i64::from(days) * 24)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupClass {
    Daily,
    Weekly,
    Monthly,
}

impl fmt::Display for BackupClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
        }
    }
}

/// Retention class of a backup taken at `created_at`. Monthly wins
/// over weekly when the 1st falls on a Sunday.
#[must_use]
pub fn classify(created_at: NaiveDateTime) -> BackupClass {
    if created_at.day() == 1 {
        BackupClass::Monthly
    } else if created_at.weekday() == Weekday::Sun {
        BackupClass::Weekly
    } else {
        BackupClass::Daily
    }
}

/// A snapshot found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub name: String,
    pub path: PathBuf,
    pub class: BackupClass,
    pub created_at: NaiveDateTime,
}

impl BackupFile {
    #[must_use]
    pub fn age(&self, now: NaiveDateTime) -> Duration {
        now.signed_duration_since(self.created_at)
    }
}

/// File name for a backup taken at `at`.
#[must_use]
pub fn backup_file_name(at: NaiveDateTime) -> String {
    format!("{BACKUP_PREFIX}{}{BACKUP_EXTENSION}", at.format(TIMESTAMP_FORMAT))
}

/// Whether `name` follows the backup naming convention, regardless
/// of whether its timestamp parses.
#[must_use]
pub fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_EXTENSION)
}

/// Timestamp embedded in a backup file name.
#[must_use]
pub fn parse_backup_timestamp(name: &str) -> Option<NaiveDateTime> {
    let stamp = name
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_EXTENSION)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// List backups in `dir`, newest first. Files whose timestamp does
/// not parse are skipped. A missing directory holds no backups.
pub fn list_backups(dir: &Path) -> DeployResult<Vec<BackupFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(dir).with_context(|| format!("reading backup dir {}", dir.display()))?;

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_backup_name(&name) || !entry.path().is_file() {
            continue;
        }
        let Some(created_at) = parse_backup_timestamp(&name) else {
            log::warn!("skipping {name}: cannot parse backup timestamp");
            continue;
        };
        backups.push(BackupFile {
            path: entry.path(),
            class: classify(created_at),
            created_at,
            name,
        });
    }

    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

/// Creates, validates, prunes and restores database snapshots.
///
/// SQLite is driven through the [`Executor`] (`sqlite3` CLI), so the
/// engine never links the database library itself.
pub struct BackupEngine<E> {
    executor: E,
    retention: RetentionConfig,
}

impl<E: Executor> BackupEngine<E> {
    pub const fn new(executor: E, retention: RetentionConfig) -> Self {
        Self {
            executor,
            retention,
        }
    }

    #[must_use]
    pub const fn retention(&self) -> RetentionConfig {
        self.retention
    }

    pub const fn set_retention(&mut self, retention: RetentionConfig) {
        self.retention = retention;
    }

    /// Snapshot `source` into `backup_dir` using SQLite's online
    /// backup, then sweep expired backups.
    pub fn backup_database(&self, source: &Path, backup_dir: &Path) -> DeployResult<PathBuf> {
        self.backup_database_at(source, backup_dir, Local::now().naive_local())
    }

    pub fn backup_database_at(
        &self,
        source: &Path,
        backup_dir: &Path,
        now: NaiveDateTime,
    ) -> DeployResult<PathBuf> {
        if !source.exists() {
            return Err(DeployError::FileNotFound(format!(
                "database {}",
                source.display()
            )));
        }

        fs::create_dir_all(backup_dir)
            .with_context(|| format!("creating backup dir {}", backup_dir.display()))?;

        let path = backup_dir.join(backup_file_name(now));
        if path.exists() {
            return Err(DeployError::Other(format!(
                "backup {} already exists, refusing to overwrite it",
                path.display()
            )));
        }
        log::info!("Backing up {} to {}", source.display(), path.display());

        let result = self.snapshot(source, &path).and_then(|()| self.validate_backup(&path));
        if let Err(e) = result {
            remove_partial(&path);
            return Err(e.context(format!("backing up {}", source.display())));
        }

        match self.cleanup_old_backups_at(backup_dir, now) {
            Ok(0) => {}
            Ok(removed) => log::info!("Retention sweep removed {removed} old backup(s)"),
            Err(e) => log::warn!("Retention sweep failed: {e}"),
        }

        Ok(path)
    }

    /// Check that a backup file is non-empty and passes SQLite's
    /// integrity check.
    pub fn validate_backup(&self, path: &Path) -> DeployResult<()> {
        let invalid = |reason: String| DeployError::InvalidBackup {
            path: path.to_path_buf(),
            reason,
        };

        let meta = fs::metadata(path).map_err(|e| invalid(format!("cannot stat backup: {e}")))?;
        if meta.len() == 0 {
            return Err(invalid("backup file is empty".into()));
        }

        let target = path.to_string_lossy();
        let output = self
            .executor
            .run("sqlite3", &[&target, "PRAGMA integrity_check;"])
            .map_err(|e| invalid(format!("integrity check could not run: {e}")))?;

        if output.trim() != INTEGRITY_OK {
            return Err(invalid(format!(
                "integrity check failed, backup is corrupted: {output}"
            )));
        }
        Ok(())
    }

    /// Delete backups older than their class allows. Returns the
    /// number of files removed; per-file failures are logged.
    pub fn cleanup_old_backups(&self, dir: &Path) -> DeployResult<usize> {
        self.cleanup_old_backups_at(dir, Local::now().naive_local())
    }

    pub fn cleanup_old_backups_at(&self, dir: &Path, now: NaiveDateTime) -> DeployResult<usize> {
        let mut removed = 0;

        for backup in list_backups(dir)? {
            if backup.age(now) <= self.retention.max_age(backup.class) {
                continue;
            }
            match fs::remove_file(&backup.path) {
                Ok(()) => {
                    log::debug!("removed expired {} backup {}", backup.class, backup.name);
                    removed += 1;
                }
                Err(e) => log::warn!("failed to remove {}: {e}", backup.path.display()),
            }
        }

        Ok(removed)
    }

    /// Swap `backup` into `main`. The current database is kept next
    /// to it as `<main>.bak.<timestamp>`.
    pub fn restore_database(&self, main: &Path, backup: &Path) -> DeployResult<()> {
        self.restore_database_with(main, backup, Local::now().naive_local(), |from, to| {
            fs::rename(from, to)
        })
    }

    /// [`Self::restore_database`] with the clock and the rename
    /// primitive supplied by the caller.
    pub fn restore_database_with<F>(
        &self,
        main: &Path,
        backup: &Path,
        now: NaiveDateTime,
        mut rename: F,
    ) -> DeployResult<()>
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        self.validate_backup(backup)
            .context("refusing to restore an invalid backup")?;

        let safety = if main.exists() {
            let aside = safety_copy_path(main, now);
            rename(main, &aside).with_context(|| {
                format!("moving current database aside to {}", aside.display())
            })?;
            log::info!("Current database saved as {}", aside.display());
            Some(aside)
        } else {
            None
        };

        if let Err(e) = rename(backup, main) {
            let err = DeployError::from(e)
                .context(format!("moving {} into {}", backup.display(), main.display()));

            if let Some(aside) = safety {
                if let Err(rollback) = rename(&aside, main) {
                    log::error!(
                        "rollback failed, original database remains at {}: {rollback}",
                        aside.display()
                    );
                    return Err(DeployError::RollbackFailed {
                        rollback: rollback.to_string(),
                        cause: Box::new(err),
                    });
                }
                log::warn!("Restore failed, original database put back in place");
            }
            return Err(err);
        }

        remove_stale_sidecars(main);
        log::info!("Database restored from {}", backup.display());
        Ok(())
    }

    fn snapshot(&self, source: &Path, dest: &Path) -> DeployResult<()> {
        let source = source.to_string_lossy();
        let command = format!(".backup '{}'", dest.to_string_lossy().replace('\'', "''"));
        self.executor
            .run("sqlite3", &[&source, &command])
            .context("sqlite online backup")?;

        if !dest.exists() {
            return Err(DeployError::InvalidBackup {
                path: dest.to_path_buf(),
                reason: "backup file was not created".into(),
            });
        }
        Ok(())
    }
}

/// `<main>.bak.<YYYYMMDD_HHMMSS>`
#[must_use]
pub fn safety_copy_path(main: &Path, now: NaiveDateTime) -> PathBuf {
    let mut name = OsString::from(main.as_os_str());
    name.push(format!(".bak.{}", now.format(TIMESTAMP_FORMAT)));
    PathBuf::from(name)
}

/// Human readable age, e.g. "3 days old".
#[must_use]
pub fn format_age(age: Duration) -> String {
    if age.num_days() > 0 {
        let days = age.num_days();
        if days == 1 {
            "1 day old".to_string()
        } else {
            format!("{days} days old")
        }
    } else if age.num_hours() > 0 {
        let hours = age.num_hours();
        if hours == 1 {
            "1 hour old".to_string()
        } else {
            format!("{hours} hours old")
        }
    } else {
        "just taken".to_string()
    }
}

/// Menu line for a backup: name, class and age.
#[must_use]
pub fn backup_label(backup: &BackupFile, now: NaiveDateTime) -> String {
    format!(
        "{} ({}, {})",
        backup.name,
        backup.class,
        format_age(backup.age(now))
    )
}

/// Let the operator pick one of `backups` (expected newest first).
/// Returns `None` when the list is empty or the prompt was cancelled.
pub fn prompt_selection(backups: &[BackupFile]) -> DeployResult<Option<&BackupFile>> {
    if backups.is_empty() {
        return Ok(None);
    }

    let now = Local::now().naive_local();
    let labels: Vec<String> = backups.iter().map(|b| backup_label(b, now)).collect();

    let picked = dialoguer::Select::new()
        .with_prompt("Select a backup to restore")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(|e| DeployError::Other(format!("reading backup selection: {e}")))?;

    Ok(picked.and_then(|i| backups.get(i)))
}

/// Yes/no question defaulting to no.
pub fn confirm(prompt: &str) -> DeployResult<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| DeployError::Other(format!("reading confirmation: {e}")))
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::warn!("failed to remove partial backup {}: {e}", path.display());
        }
    }
}

// WAL and shared-memory files belong to the database that was
// moved aside; SQLite would replay them into the restored file.
fn remove_stale_sidecars(main: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut name = OsString::from(main.as_os_str());
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        if sidecar.exists() {
            if let Err(e) = fs::remove_file(&sidecar) {
                log::warn!("failed to remove {}: {e}", sidecar.display());
            }
        }
    }
}
