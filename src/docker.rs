use crate::app::{ContainerSpec, health_probe};
use crate::cmd::Executor;
use crate::error::{DeployResult, ResultExt};

/// Container runtime operations, expressed as `docker` CLI calls
/// through an [`Executor`].
pub struct Docker<E> {
    executor: E,
}

impl<E: Executor> Docker<E> {
    pub const fn new(executor: E) -> Self {
        Self { executor }
    }

    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    fn docker(&self, args: &[&str]) -> DeployResult<String> {
        self.executor.run("docker", args)
    }

    /// Whether a container with this name exists and is running.
    pub fn is_running(&self, name: &str) -> bool {
        self.docker(&["container", "inspect", "--format", "{{.State.Running}}", name])
            .is_ok_and(|out| out.trim() == "true")
    }

    pub fn network_exists(&self, network: &str) -> bool {
        self.docker(&["network", "inspect", network]).is_ok()
    }

    /// Create the network unless it already exists.
    pub fn ensure_network(&self, network: &str) -> DeployResult<()> {
        if self.network_exists(network) {
            log::debug!("network {network} already exists");
            return Ok(());
        }
        log::info!("Creating network {network}");
        self.docker(&["network", "create", network])
            .with_context(|| format!("creating network {network}"))?;
        Ok(())
    }

    /// Names of the containers attached to `network`.
    pub fn network_members(&self, network: &str) -> DeployResult<Vec<String>> {
        let out = self
            .docker(&[
                "network",
                "inspect",
                "--format",
                "{{range .Containers}}{{.Name}} {{end}}",
                network,
            ])
            .with_context(|| format!("inspecting network {network}"))?;
        Ok(out.split_whitespace().map(ToString::to_string).collect())
    }

    /// Connect `container` to `network` only if it is not a member
    /// yet, so repeated runs do not fail on "already exists".
    pub fn ensure_attached(&self, network: &str, container: &str) -> DeployResult<()> {
        if self
            .network_members(network)?
            .iter()
            .any(|member| member == container)
        {
            log::debug!("{container} already attached to {network}");
            return Ok(());
        }
        log::info!("Attaching {container} to {network}");
        self.docker(&["network", "connect", network, container])
            .with_context(|| format!("connecting {container} to {network}"))?;
        Ok(())
    }

    pub fn pull(&self, image: &str) -> DeployResult<()> {
        self.docker(&["pull", image])
            .with_context(|| format!("pulling {image}"))?;
        Ok(())
    }

    /// Local image ID of a pulled reference.
    pub fn image_id(&self, image: &str) -> DeployResult<String> {
        self.docker(&["image", "inspect", "--format", "{{.Id}}", image])
            .with_context(|| format!("inspecting image {image}"))
    }

    /// Start a detached container. Returns the container ID.
    pub fn run_container(&self, spec: &ContainerSpec) -> DeployResult<String> {
        let args = spec.run_args();
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(&refs)
            .with_context(|| format!("starting container {}", spec.name))
    }

    /// Stop and remove a container. Missing containers are fine.
    pub fn stop_and_remove(&self, name: &str) {
        if let Err(e) = self.docker(&["stop", name]) {
            log::debug!("stop {name}: {e}");
        }
        if let Err(e) = self.docker(&["rm", "-f", name]) {
            log::debug!("rm {name}: {e}");
        }
    }

    pub fn start(&self, name: &str) -> DeployResult<()> {
        self.docker(&["start", name])
            .with_context(|| format!("starting {name}"))?;
        Ok(())
    }

    pub fn stop(&self, name: &str) -> DeployResult<()> {
        self.docker(&["stop", name])
            .with_context(|| format!("stopping {name}"))?;
        Ok(())
    }

    /// Probe the app's health endpoint from inside its container.
    pub fn health_check(&self, name: &str) -> bool {
        let probe = health_probe();
        self.docker(&["exec", name, "sh", "-c", &probe]).is_ok()
    }

    /// Push a new configuration into the running proxy. Caddy swaps
    /// it in place, keeping its listening sockets.
    pub fn reload_proxy(&self, container: &str, caddyfile: &str) -> DeployResult<()> {
        self.executor
            .run_with_stdin(
                "docker",
                &[
                    "exec",
                    "-i",
                    container,
                    "caddy",
                    "reload",
                    "--config",
                    "-",
                    "--adapter",
                    "caddyfile",
                ],
                caddyfile.as_bytes(),
            )
            .with_context(|| format!("reloading proxy in {container}"))?;
        Ok(())
    }

    pub fn prune_images(&self) -> DeployResult<()> {
        self.docker(&["image", "prune", "-f"])
            .context("pruning dangling images")?;
        Ok(())
    }
}
