use std::path::PathBuf;
use std::thread;

use crate::app::NETWORK;
use crate::cmd::Executor;
use crate::deploy::{Orchestrator, Slot};
use crate::error::{DeployError, DeployResult, ResultExt};
use crate::retry::with_retry;

/// Which slot serves now and which one the update deploys into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    pub current: Slot,
    pub candidate: Slot,
    pub current_running: bool,
}

/// Result of a completed rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub from: Slot,
    pub to: Slot,
    pub backup: Option<PathBuf>,
}

impl<E: Executor> Orchestrator<E> {
    /// Pick the candidate: whichever slot is not running.
    ///
    /// With neither running the candidate is secondary. With both
    /// running (a crashed rollout) the sole upstream in the Caddyfile
    /// on disk is treated as current; without one the secondary is
    /// treated as current.
    #[must_use]
    pub fn select_slots(&self) -> SlotPlan {
        let primary = self.docker.is_running(Slot::Primary.container_name());
        let secondary = self.docker.is_running(Slot::Secondary.container_name());

        let current = match (primary, secondary) {
            (true, true) => self
                .serving_slot_from_disk()
                .unwrap_or(Slot::Secondary),
            (_, true) => Slot::Secondary,
            _ => Slot::Primary,
        };

        SlotPlan {
            current,
            candidate: current.other(),
            current_running: primary || secondary,
        }
    }

    /// Blue-green update.
    ///
    /// The current slot keeps serving until the candidate has passed
    /// its health gate and the proxy has been cut over to it. Every
    /// failure before the cutover removes only the candidate.
    pub fn update(&mut self) -> DeployResult<UpdateOutcome> {
        self.pull_images()
            .context("update aborted before changing anything")?;

        let plan = self.select_slots();
        log::info!(
            "Current slot: {} ({}), candidate: {} ({})",
            plan.current,
            plan.current.container_name(),
            plan.candidate,
            plan.candidate.container_name()
        );

        let backup = self.backup_before_update();

        self.deploy_candidate(plan.candidate)?;

        if let Err(e) = self
            .docker
            .ensure_attached(NETWORK, plan.candidate.container_name())
        {
            self.abandon_candidate(&plan, false);
            return Err(e.context("attaching candidate to network"));
        }

        if let Err(e) = self.wait_healthy(plan.candidate) {
            self.abandon_candidate(&plan, false);
            return Err(e.context("candidate failed its health gate"));
        }

        let shifting = if plan.current_running {
            vec![plan.current, plan.candidate]
        } else {
            vec![plan.candidate]
        };
        log::info!("Shifting traffic: {} upstream(s)", shifting.len());
        if let Err(e) = self.switch_upstreams(&shifting) {
            self.abandon_candidate(&plan, true);
            return Err(e.context("adding candidate to the proxy"));
        }

        thread::sleep(self.timings.stabilization);

        log::info!("Cutting over to {}", plan.candidate);
        if let Err(e) = self.switch_upstreams(&[plan.candidate]) {
            self.abandon_candidate(&plan, true);
            return Err(e.context("cutting proxy over to candidate"));
        }

        log::info!("Removing previous {} slot", plan.current);
        self.docker.stop_and_remove(plan.current.container_name());
        if let Err(e) = self.docker.prune_images() {
            log::warn!("{e}");
        }

        log::info!("Update complete, {} slot is serving", plan.candidate);
        Ok(UpdateOutcome {
            from: plan.current,
            to: plan.candidate,
            backup,
        })
    }

    /// Snapshot the database. A failure only costs the rollback
    /// point, so it is logged and the update goes on.
    fn backup_before_update(&self) -> Option<PathBuf> {
        let engine = self.backup_engine();
        match engine.backup_database(&self.config.database_path(), &self.config.backups_dir()) {
            Ok(path) => {
                log::info!("Database backed up to {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("Continuing without a fresh backup: {e}");
                None
            }
        }
    }

    fn deploy_candidate(&self, candidate: Slot) -> DeployResult<()> {
        let label = format!("deploying {candidate} slot");
        with_retry(&self.timings.deploy, &label, |_| self.deploy_slot(candidate)).map_err(|e| {
            self.docker.stop_and_remove(candidate.container_name());
            e
        })
    }

    /// Poll the candidate's health endpoint until it answers.
    fn wait_healthy(&self, slot: Slot) -> DeployResult<()> {
        let name = slot.container_name();
        log::info!("Waiting for {name} to become healthy");

        with_retry(&self.timings.health, &format!("health check {name}"), |_| {
            if self.docker.health_check(name) {
                Ok(())
            } else {
                Err(DeployError::Other(format!("{name} is not healthy yet")))
            }
        })
        .map_err(|_| DeployError::HealthcheckTimeout(name.to_string(), self.timings.health.max_attempts))
    }

    /// Tear down the candidate. When the proxy was already pointed at
    /// it, route everything back to the current slot first.
    fn abandon_candidate(&self, plan: &SlotPlan, proxy_touched: bool) {
        if proxy_touched && plan.current_running {
            if let Err(e) = self.switch_upstreams(&[plan.current]) {
                log::error!("Could not route traffic back to {}: {e}", plan.current);
            }
        }
        log::warn!("Removing failed candidate {}", plan.candidate.container_name());
        self.docker.stop_and_remove(plan.candidate.container_name());
    }
}
