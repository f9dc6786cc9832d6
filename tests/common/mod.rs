#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use infinity_metrics_installer::cmd::format_command;
use infinity_metrics_installer::{Config, DeployError, DeployResult, Executor};
use tempfile::TempDir;

/// Marker that makes the fake `sqlite3` report a corrupted file.
pub const CORRUPT_MARKER: &str = "CORRUPT";

/// Simulated host: containers, one network, and the proxy's live
/// configuration.
#[derive(Debug, Default)]
pub struct HostState {
    pub existing: BTreeSet<String>,
    pub running: BTreeSet<String>,
    pub networks: BTreeSet<String>,
    pub members: BTreeSet<String>,
    pub unhealthy: HashSet<String>,
    pub failing_runs: HashSet<String>,
    pub failing_stops: HashSet<String>,
    pub pull_failures: u32,
    pub reload_failures: u32,
    /// Fail the one reload attempted after this many have succeeded.
    pub reload_failure_after: Option<usize>,
    pub calls: Vec<String>,
    pub reloads: Vec<String>,
}

/// [`Executor`] answering `docker` and `sqlite3` calls from
/// [`HostState`]. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    pub state: Rc<RefCell<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Container that exists and is running, attached to `network`.
    pub fn with_running(self, name: &str, network: &str) -> Self {
        {
            let mut s = self.state.borrow_mut();
            s.existing.insert(name.to_string());
            s.running.insert(name.to_string());
            s.networks.insert(network.to_string());
            s.members.insert(name.to_string());
        }
        self
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state.borrow().running.contains(name)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn reloads(&self) -> Vec<String> {
        self.state.borrow().reloads.clone()
    }

    pub fn clear_calls(&self) {
        let mut s = self.state.borrow_mut();
        s.calls.clear();
        s.reloads.clear();
    }

    fn docker(&self, args: &[&str]) -> DeployResult<String> {
        let mut s = self.state.borrow_mut();
        let fail = |msg: &str| {
            Err(DeployError::CommandFailed {
                command: format_command("docker", args),
                stderr: msg.to_string(),
            })
        };

        match args {
            ["container", "inspect", "--format", _, name] => {
                if s.running.contains(*name) {
                    Ok("true".into())
                } else if s.existing.contains(*name) {
                    Ok("false".into())
                } else {
                    fail("No such object")
                }
            }
            ["network", "inspect", "--format", _, net] => {
                if s.networks.contains(*net) {
                    Ok(s.members.iter().cloned().collect::<Vec<_>>().join(" "))
                } else {
                    fail("network not found")
                }
            }
            ["network", "inspect", net] => {
                if s.networks.contains(*net) {
                    Ok("[]".into())
                } else {
                    fail("network not found")
                }
            }
            ["network", "create", net] => {
                s.networks.insert((*net).to_string());
                Ok("netid".into())
            }
            ["network", "connect", _, container] => {
                if s.members.contains(*container) {
                    return fail("endpoint already exists");
                }
                s.members.insert((*container).to_string());
                Ok(String::new())
            }
            ["pull", _] => {
                if s.pull_failures > 0 {
                    s.pull_failures -= 1;
                    return fail("registry unreachable");
                }
                Ok(String::new())
            }
            ["image", "inspect", "--format", _, image] => Ok(format!("sha256:{image}")),
            ["image", "prune", "-f"] => Ok(String::new()),
            ["run", "-d", "--name", name, rest @ ..] => {
                if s.failing_runs.contains(*name) {
                    return fail("container exited immediately");
                }
                if s.existing.contains(*name) {
                    return fail("name already in use");
                }
                s.existing.insert((*name).to_string());
                s.running.insert((*name).to_string());
                if rest.contains(&"--network") {
                    s.members.insert((*name).to_string());
                }
                Ok(format!("cid-{name}"))
            }
            ["stop", name] => {
                if s.failing_stops.contains(*name) {
                    return fail("tried to kill container, but did not receive an exit event");
                }
                if s.existing.contains(*name) {
                    s.running.remove(*name);
                    Ok((*name).to_string())
                } else {
                    fail("No such container")
                }
            }
            ["start", name] => {
                if s.existing.contains(*name) {
                    s.running.insert((*name).to_string());
                    Ok((*name).to_string())
                } else {
                    fail("No such container")
                }
            }
            ["rm", "-f", name] => {
                s.existing.remove(*name);
                s.running.remove(*name);
                s.members.remove(*name);
                Ok(String::new())
            }
            ["exec", name, "sh", "-c", _] => {
                if s.running.contains(*name) && !s.unhealthy.contains(*name) {
                    Ok(String::new())
                } else {
                    fail("connection refused")
                }
            }
            _ => fail("unexpected docker call"),
        }
    }

    fn sqlite(args: &[&str]) -> DeployResult<String> {
        let failed = |msg: String| DeployError::CommandFailed {
            command: format_command("sqlite3", args),
            stderr: msg,
        };

        match args {
            [db, command] if command.starts_with(".backup ") => {
                let dest = command
                    .trim_start_matches(".backup ")
                    .trim_matches('\'');
                fs::copy(db, dest).map_err(|e| failed(e.to_string()))?;
                Ok(String::new())
            }
            [file, "PRAGMA integrity_check;"] => {
                let content = fs::read_to_string(file).map_err(|e| failed(e.to_string()))?;
                if content.contains(CORRUPT_MARKER) {
                    Ok("*** in database main ***\nPage 3: btreeInitPage() returns error code 11"
                        .into())
                } else {
                    Ok("ok".into())
                }
            }
            _ => Err(failed("unexpected sqlite3 call".into())),
        }
    }
}

impl Executor for FakeHost {
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String> {
        self.state
            .borrow_mut()
            .calls
            .push(format_command(program, args));

        match program {
            "docker" => self.docker(args),
            "sqlite3" => Self::sqlite(args),
            other => Err(DeployError::CommandNotFound(other.to_string())),
        }
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> DeployResult<String> {
        let mut s = self.state.borrow_mut();
        s.calls.push(format_command(program, args));

        let container = match args {
            ["exec", "-i", container, "caddy", "reload", ..] => *container,
            _ => {
                return Err(DeployError::Other(format!(
                    "unexpected stdin call: {}",
                    format_command(program, args)
                )));
            }
        };

        let scripted = s.reload_failure_after == Some(s.reloads.len());
        if scripted {
            s.reload_failure_after = None;
        }
        if !s.running.contains(container) || s.reload_failures > 0 || scripted {
            s.reload_failures = s.reload_failures.saturating_sub(1);
            return Err(DeployError::CommandFailed {
                command: format_command(program, args),
                stderr: "Error: sending configuration to instance: connection refused".into(),
            });
        }

        s.reloads.push(String::from_utf8_lossy(stdin).to_string());
        Ok(String::new())
    }
}

/// Config rooted in a scratch directory.
pub fn config_in(dir: &TempDir) -> Config {
    Config::new()
        .domain("stats.example.com")
        .admin_email("ops@example.com")
        .license_key("IM-TEST-1")
        .install_dir(dir.path())
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
