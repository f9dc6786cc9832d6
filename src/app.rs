use crate::config::Config;

/// Port the application listens on inside its container.
pub const APP_PORT: u16 = 8080;
/// Shared bridge network joining the proxy and the app slots.
pub const NETWORK: &str = "infinity-network";
/// Container name of the reverse proxy.
pub const PROXY_CONTAINER: &str = "infinity-caddy";
/// Health endpoint served by the application.
pub const HEALTH_PATH: &str = "/_health";

/// Defines a container: image, environment, volumes, ports and
/// health check, rendered into a `docker run` argv.
///
/// # Example
///
/// ```
/// use infinity_metrics_installer::ContainerSpec;
///
/// let spec = ContainerSpec::new("my-service", "my-service:latest")
///     .network("my-network")
///     .env("PORT", "3000")
///     .volume("/srv/data", "/app/data")
///     .expose(3000);
///
/// assert_eq!(spec.upstream().as_deref(), Some("my-service:3000"));
/// assert!(spec.run_args().contains(&"--network".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    pub restart: String,
    pub env: Vec<(String, String)>,
    pub volumes: Vec<(String, String)>,
    pub ports: Vec<String>,
    pub expose: Vec<u16>,
    pub healthcheck: Option<String>,
}

impl ContainerSpec {
    #[must_use]
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            network: None,
            restart: "unless-stopped".to_string(),
            env: Vec::new(),
            volumes: Vec::new(),
            ports: Vec::new(),
            expose: Vec::new(),
            healthcheck: None,
        }
    }

    /// Application container for one slot.
    #[must_use]
    pub fn app(config: &Config, container_name: &str) -> Self {
        let storage = config.storage_dir();
        let logs = config.logs_dir();

        Self::new(container_name, &config.app_image)
            .network(NETWORK)
            .env("INFINITY_METRICS_DOMAIN", &config.domain)
            .env("INFINITY_METRICS_LICENSE_KEY", &config.license_key)
            .env("INFINITY_METRICS_ENV", &config.environment.to_string())
            .env("INFINITY_METRICS_APP_PORT", &APP_PORT.to_string())
            .env("INFINITY_METRICS_LOG_LEVEL", "info")
            .volume(&storage.to_string_lossy(), "/app/storage")
            .volume(&logs.to_string_lossy(), "/app/logs")
            .healthcheck(&health_probe())
            .expose(APP_PORT)
    }

    /// Reverse proxy container. The Caddyfile is mounted read-only;
    /// certificates live under `proxy/data` so they survive restarts.
    #[must_use]
    pub fn proxy(config: &Config) -> Self {
        let proxy_dir = config.proxy_dir();

        Self::new(PROXY_CONTAINER, &config.proxy_image)
            .network(NETWORK)
            .port("80:80")
            .port("443:443")
            .port("443:443/udp")
            .volume(
                &config.caddyfile_path().to_string_lossy(),
                "/etc/caddy/Caddyfile:ro",
            )
            .volume(&proxy_dir.join("data").to_string_lossy(), "/data")
            .volume(&proxy_dir.join("config").to_string_lossy(), "/config")
            .volume(&config.logs_dir().to_string_lossy(), "/var/log/caddy")
    }

    #[must_use]
    pub fn network(mut self, network: &str) -> Self {
        self.network = Some(network.to_string());
        self
    }

    #[must_use]
    pub fn restart(mut self, policy: &str) -> Self {
        self.restart = policy.to_string();
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn volume(mut self, host: &str, mount: &str) -> Self {
        self.volumes.push((host.to_string(), mount.to_string()));
        self
    }

    #[must_use]
    pub fn port(mut self, mapping: &str) -> Self {
        self.ports.push(mapping.to_string());
        self
    }

    #[must_use]
    pub fn expose(mut self, port: u16) -> Self {
        self.expose.push(port);
        self
    }

    #[must_use]
    pub fn healthcheck(mut self, cmd: &str) -> Self {
        self.healthcheck = Some(cmd.to_string());
        self
    }

    /// `name:port` for the first exposed port.
    #[must_use]
    pub fn upstream(&self) -> Option<String> {
        self.expose.first().map(|port| format!("{}:{port}", self.name))
    }

    /// Arguments for `docker run`, detached.
    #[must_use]
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            self.name.clone(),
            "--restart".to_string(),
            self.restart.clone(),
        ];

        if let Some(network) = &self.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for mapping in &self.ports {
            args.push("-p".to_string());
            args.push(mapping.clone());
        }
        for port in &self.expose {
            args.push("--expose".to_string());
            args.push(port.to_string());
        }
        for (k, v) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{k}={v}"));
        }
        for (host, mount) in &self.volumes {
            args.push("-v".to_string());
            args.push(format!("{host}:{mount}"));
        }
        if let Some(cmd) = &self.healthcheck {
            args.push("--health-cmd".to_string());
            args.push(cmd.clone());
            args.push("--health-interval".to_string());
            args.push("10s".to_string());
        }

        args.push(self.image.clone());
        args
    }
}

/// Command run inside an app container to probe readiness.
#[must_use]
pub fn health_probe() -> String {
    format!("wget -q --spider http://localhost:{APP_PORT}{HEALTH_PATH}")
}
