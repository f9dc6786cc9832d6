use std::fs;

use caddyfile_rs::{format, parse, tokenize};
use infinity_metrics_installer::caddy::{HealthCheck, ProxyConfig, TlsMode};
use infinity_metrics_installer::caddyfile;
use infinity_metrics_installer::deploy::sole_upstream;
use infinity_metrics_installer::{Config, Environment, Slot};
use tempfile::TempDir;

fn proxy(upstreams: &[&str]) -> ProxyConfig {
    ProxyConfig::new("stats.example.com", "ops@example.com")
        .upstreams(upstreams)
        .unwrap()
}

#[test]
fn at_rest_config_names_one_slot() {
    let result = caddyfile::render(&proxy(&[&Slot::Primary.upstream()]));

    assert!(result.contains("stats.example.com {"));
    assert!(result.contains("reverse_proxy infinity-app-1:8080 {"));
    assert_eq!(sole_upstream(&result), Some(Slot::Primary));
}

#[test]
fn shifting_config_names_both_slots() {
    let result = caddyfile::render(&proxy(&[
        &Slot::Secondary.upstream(),
        &Slot::Primary.upstream(),
    ]));

    assert!(result.contains("reverse_proxy infinity-app-2:8080 infinity-app-1:8080 {"));
    assert!(result.contains("lb_policy round_robin"));
    assert_eq!(sole_upstream(&result), None);
}

#[test]
fn compression_and_security_headers() {
    let result = caddyfile::render(&proxy(&["a:1"]));

    assert!(result.contains("encode zstd gzip"));
    assert!(result.contains("X-Content-Type-Options \"nosniff\""));
    assert!(result.contains("X-Frame-Options \"DENY\""));
    assert!(result.contains("Referrer-Policy"));
    assert!(result.contains("-Server"));
}

#[test]
fn custom_health_check() {
    let check = HealthCheck {
        interval: "5s".into(),
        fails: 2,
        ..HealthCheck::default()
    };
    let result = caddyfile::render(&proxy(&["a:1"]).health_check(check));

    assert!(result.contains("health_interval 5s"));
    assert!(result.contains("health_fails 2"));
    assert!(result.contains("max_fails 2"));
    assert!(result.contains("health_uri /_health"));
}

#[test]
fn test_environment_renders_internal_tls() {
    let config = Config::new()
        .domain("stats.test")
        .admin_email("ops@example.com")
        .environment(Environment::Test);
    let p = ProxyConfig::from_config(&config).upstreams(&["a:1"]).unwrap();

    assert_eq!(p.tls, TlsMode::Internal);
    assert!(caddyfile::render(&p).contains("\ttls internal\n"));
}

#[test]
fn write_persists_rendered_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("proxy").join("Caddyfile");
    let p = proxy(&["infinity-app-2:8080"]);

    let content = caddyfile::write(&p, &path).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), content);
    assert_eq!(content, caddyfile::render(&p));
}

#[test]
fn parse_roundtrip() {
    let input = "\
stats.example.com {
\treverse_proxy infinity-app-1:8080
\tencode zstd gzip
\tlog
}
";
    let tokens = tokenize(input).expect("tokenize failed");
    let cf = parse(&tokens).expect("parse failed");
    let output = format(&cf);
    assert_eq!(output, input);
}
