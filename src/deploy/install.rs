use crate::app::{ContainerSpec, NETWORK, PROXY_CONTAINER};
use crate::cmd::Executor;
use crate::deploy::{Orchestrator, Slot};
use crate::error::{DeployResult, ResultExt};

impl<E: Executor> Orchestrator<E> {
    /// Fresh install: proxy plus the primary slot.
    ///
    /// A no-op when the proxy and an app slot are already running.
    /// When only the proxy is down, it is brought back in front of the
    /// slot that is still running instead of redeploying the app.
    /// A running proxy is never restarted, only attached to the
    /// network if needed, so its listening sockets survive re-runs.
    pub fn deploy(&mut self) -> DeployResult<()> {
        let proxy_running = self.docker.is_running(PROXY_CONTAINER);
        let serving = Slot::ALL
            .into_iter()
            .find(|slot| self.docker.is_running(slot.container_name()));

        if proxy_running {
            if let Some(slot) = serving {
                log::info!("Already installed: proxy and {slot} slot are running");
                return Ok(());
            }
        }

        log::info!("Creating directories under {}", self.config.install_dir.display());
        self.create_directories()?;

        self.ensure_network().context("preparing container network")?;

        let target = serving.unwrap_or(Slot::Primary);

        log::info!("Writing proxy configuration");
        self.write_proxy_config(&[target])?;

        self.pull_images().context("pulling images")?;

        if proxy_running {
            log::info!("Proxy already running, keeping it");
            self.docker.ensure_attached(NETWORK, PROXY_CONTAINER)?;
        } else {
            log::info!("Starting proxy");
            self.docker.stop_and_remove(PROXY_CONTAINER);
            self.docker
                .run_container(&ContainerSpec::proxy(&self.config))
                .context("starting proxy")?;
        }

        if serving.is_none() {
            log::info!("Starting application");
            self.deploy_slot(target)?;
        }
        self.docker.ensure_attached(NETWORK, target.container_name())?;

        if proxy_running {
            // The kept proxy still holds its previous upstreams.
            if let Err(e) = self.switch_upstreams(&[target]) {
                log::warn!("Proxy reload failed, it will pick up the config on restart: {e}");
            }
        }

        log::info!("Installation complete: https://{}", self.config.domain);
        Ok(())
    }
}
