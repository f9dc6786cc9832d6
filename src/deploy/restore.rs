use std::path::{Path, PathBuf};

use crate::cmd::Executor;
use crate::deploy::{Orchestrator, Slot};
use crate::error::{DeployResult, ResultExt};

impl<E: Executor> Orchestrator<E> {
    /// On-demand snapshot of the live database into the backup
    /// directory, followed by the retention sweep.
    pub fn backup_now(&self) -> DeployResult<PathBuf> {
        self.backup_engine()
            .backup_database(&self.config.database_path(), &self.config.backups_dir())
    }

    /// Swap `backup` in as the live database.
    ///
    /// App slots holding the database open are stopped for the swap
    /// and started again afterwards, also when the restore failed.
    pub fn restore(&self, backup: &Path) -> DeployResult<()> {
        let running: Vec<Slot> = Slot::ALL
            .into_iter()
            .filter(|slot| self.docker.is_running(slot.container_name()))
            .collect();

        let mut stopped = Vec::with_capacity(running.len());
        for slot in running {
            log::info!("Stopping {}", slot.container_name());
            if let Err(e) = self.docker.stop(slot.container_name()) {
                self.start_slots(&stopped);
                return Err(e);
            }
            stopped.push(slot);
        }

        let restored = self
            .backup_engine()
            .restore_database(&self.config.database_path(), backup)
            .with_context(|| format!("restoring {}", backup.display()));

        self.start_slots(&stopped);
        restored
    }

    fn start_slots(&self, slots: &[Slot]) {
        for slot in slots {
            log::info!("Starting {}", slot.container_name());
            if let Err(e) = self.docker.start(slot.container_name()) {
                log::error!("{e}");
            }
        }
    }
}
