use infinity_metrics_installer::ContainerSpec;
use infinity_metrics_installer::app::{NETWORK, health_probe};
use infinity_metrics_installer::{Config, Slot};

fn config() -> Config {
    Config::new()
        .domain("stats.example.com")
        .admin_email("ops@example.com")
        .license_key("IM-1")
        .app_image("karloscodes/infinity-metrics-beta:1.2.0")
        .install_dir("/opt/infinity-metrics")
}

#[test]
fn builder_chain() {
    let spec = ContainerSpec::new("svc", "svc:latest")
        .network("net")
        .restart("always")
        .env("HOST", "0.0.0.0")
        .env("PORT", "3000")
        .volume("/srv/data", "/app/data")
        .port("8443:443")
        .expose(3000)
        .healthcheck("curl -f http://localhost:3000/");

    assert_eq!(spec.network.as_deref(), Some("net"));
    assert_eq!(spec.restart, "always");
    assert_eq!(
        spec.env,
        vec![
            ("HOST".into(), "0.0.0.0".into()),
            ("PORT".into(), "3000".into()),
        ]
    );
    assert_eq!(spec.volumes, vec![("/srv/data".into(), "/app/data".into())]);
    assert_eq!(spec.ports, vec!["8443:443"]);
    assert_eq!(spec.expose, vec![3000]);
    assert_eq!(
        spec.healthcheck.as_deref(),
        Some("curl -f http://localhost:3000/")
    );
}

#[test]
fn both_slots_share_everything_but_the_name() {
    let config = config();
    let one = ContainerSpec::app(&config, Slot::Primary.container_name());
    let two = ContainerSpec::app(&config, Slot::Secondary.container_name());

    assert_eq!(one.image, "karloscodes/infinity-metrics-beta:1.2.0");
    assert_eq!(one.image, two.image);
    assert_eq!(one.env, two.env);
    assert_eq!(one.volumes, two.volumes);
    assert_eq!(one.network.as_deref(), Some(NETWORK));
    assert_ne!(one.name, two.name);
}

#[test]
fn app_healthcheck_probes_health_endpoint() {
    let spec = ContainerSpec::app(&config(), "infinity-app-1");
    let args = spec.run_args();

    assert_eq!(spec.healthcheck, Some(health_probe()));
    assert!(health_probe().contains("http://localhost:8080/_health"));
    assert!(args.windows(2).any(|w| w == ["--expose", "8080"]));
}

#[test]
fn proxy_uses_configured_image() {
    let config = config().proxy_image("caddy:2.8-alpine");
    let spec = ContainerSpec::proxy(&config);

    assert_eq!(spec.image, "caddy:2.8-alpine");
    assert_eq!(spec.network.as_deref(), Some(NETWORK));
    assert!(spec.upstream().is_none());
}
