use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use caddyfile_rs::{Caddyfile, Directive, SiteBlock, format};

use crate::caddy::{ProxyConfig, TlsMode};
use crate::error::{DeployResult, ResultExt};

const LOG_DIR: &str = "/var/log/caddy";

/// Render a complete Caddyfile: global options, the HTTP to HTTPS
/// redirect, and the HTTPS site proxying to the configured
/// upstreams.
#[must_use]
pub fn render(proxy: &ProxyConfig) -> String {
    let mut out = String::new();
    out.push_str(&global_block(proxy));
    out.push('\n');
    out.push_str(&redirect_block(&proxy.domain));
    out.push('\n');
    out.push_str(&site_block(proxy));
    out
}

/// Render and persist the Caddyfile mounted into the proxy.
pub fn write(proxy: &ProxyConfig, path: &Path) -> DeployResult<String> {
    let content = render(proxy);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, &content).with_context(|| format!("writing {}", path.display()))?;
    Ok(content)
}

fn global_block(proxy: &ProxyConfig) -> String {
    let mut out = String::from("{\n");
    out.push_str("\tadmin localhost:2019\n");
    let _ = writeln!(out, "\temail {}", proxy.admin_email);
    let _ = writeln!(out, "\tgrace_period {}", proxy.grace_period);
    out.push_str("\tlog {\n");
    out.push_str(&rolled_output("caddy.log", "\t\t"));
    out.push_str("\t\tformat json\n");
    out.push_str("\t\tlevel INFO\n");
    out.push_str("\t}\n");
    out.push_str("}\n");
    out
}

fn redirect_block(domain: &str) -> String {
    let site = SiteBlock::new(&format!("http://{domain}")).directive(Directive::new(&format!(
        "redir https://{domain}{{uri}} permanent"
    )));
    format(&Caddyfile::new().site(site))
}

fn site_block(proxy: &ProxyConfig) -> String {
    let hc = &proxy.health_check;
    let mut out = String::new();

    let _ = writeln!(out, "{} {{", proxy.domain);

    match &proxy.tls {
        TlsMode::Internal => out.push_str("\ttls internal\n"),
        TlsMode::Acme { email } => {
            let _ = writeln!(out, "\ttls {email}");
        }
    }

    out.push_str("\tencode zstd gzip\n");

    out.push_str("\tlog {\n");
    out.push_str(&rolled_output("access.log", "\t\t"));
    out.push_str("\t\tformat json\n");
    out.push_str("\t}\n");

    out.push_str("\t@static path /static/* /assets/* /favicon.ico /robots.txt\n");
    out.push_str("\theader @static Cache-Control \"public, max-age=31536000, immutable\"\n");

    let _ = writeln!(out, "\treverse_proxy {} {{", proxy.upstreams.join(" "));
    out.push_str("\t\tlb_policy round_robin\n");
    out.push_str("\t\tlb_try_duration 5s\n");
    out.push_str("\t\tlb_try_interval 250ms\n");
    let _ = writeln!(out, "\t\thealth_uri {}", hc.path);
    let _ = writeln!(out, "\t\thealth_interval {}", hc.interval);
    let _ = writeln!(out, "\t\thealth_timeout {}", hc.timeout);
    let _ = writeln!(out, "\t\thealth_status {}", hc.status);
    let _ = writeln!(out, "\t\thealth_fails {}", hc.fails);
    let _ = writeln!(out, "\t\tfail_duration {}", hc.fail_duration);
    let _ = writeln!(out, "\t\tmax_fails {}", hc.fails);
    out.push_str("\t}\n");

    out.push_str("\theader {\n");
    out.push_str("\t\tStrict-Transport-Security \"max-age=31536000; includeSubDomains\"\n");
    out.push_str("\t\tX-Content-Type-Options \"nosniff\"\n");
    out.push_str("\t\tX-Frame-Options \"DENY\"\n");
    out.push_str("\t\tX-XSS-Protection \"1; mode=block\"\n");
    out.push_str("\t\tReferrer-Policy \"strict-origin-when-cross-origin\"\n");
    out.push_str("\t\t-Server\n");
    out.push_str("\t}\n");

    out.push_str("\thandle_errors 5xx {\n");
    out.push_str("\t\trespond \"Service temporarily unavailable\" 503\n");
    out.push_str("\t}\n");

    out.push_str("}\n");
    out
}

fn rolled_output(file: &str, indent: &str) -> String {
    format!(
        "{indent}output file {LOG_DIR}/{file} {{\n\
         {indent}\troll_size 10MiB\n\
         {indent}\troll_keep 5\n\
         {indent}\troll_keep_for 720h\n\
         {indent}}}\n"
    )
}
