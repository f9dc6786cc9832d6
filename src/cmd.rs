use std::io::Write;
use std::process::{Command, Output, Stdio};

use crate::error::{DeployError, DeployResult};

/// Runs external programs (container runtime, database CLI) and
/// returns their trimmed stdout.
pub trait Executor {
    /// Run a command and capture its output. Fails if the command
    /// returns a non-zero exit code.
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String>;

    /// Run a command that reads its stdin from a byte slice.
    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> DeployResult<String>;
}

impl<T: Executor + ?Sized> Executor for &T {
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String> {
        (**self).run(program, args)
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> DeployResult<String> {
        (**self).run_with_stdin(program, args, stdin)
    }
}

/// [`Executor`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> DeployResult<String> {
        log::debug!("exec: {}", format_command(program, args));
        let output = spawn(program, args)?;
        collect(program, args, &output)
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> DeployResult<String> {
        log::debug!("exec (stdin): {}", format_command(program, args));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| not_found_or_io(program, e))?;

        if let Some(pipe) = &mut child.stdin {
            pipe.write_all(stdin)?;
        }
        drop(child.stdin.take());

        let output = child.wait_with_output()?;
        collect(program, args, &output)
    }
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Render an argv as a single display string.
#[must_use]
pub fn format_command(program: &str, args: &[&str]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| (*a).to_string()));
    parts.join(" ")
}

fn collect(program: &str, args: &[&str], output: &Output) -> DeployResult<String> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(DeployError::CommandFailed {
            command: format_command(program, args),
            stderr,
        })
    }
}

fn spawn(program: &str, args: &[&str]) -> DeployResult<Output> {
    Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| not_found_or_io(program, e))
}

fn not_found_or_io(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_joins_argv() {
        assert_eq!(
            format_command("docker", &["network", "inspect", "net"]),
            "docker network inspect net"
        );
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemExecutor
            .run("definitely-not-a-real-binary-xyz", &[])
            .unwrap_err();
        assert!(matches!(err, DeployError::CommandNotFound(_)));
    }

    #[test]
    fn non_zero_exit_captures_stderr() {
        let err = SystemExecutor
            .run("sh", &["-c", "echo boom >&2; exit 3"])
            .unwrap_err();
        match err {
            DeployError::CommandFailed { command, stderr } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn stdin_is_streamed() {
        let out = SystemExecutor
            .run_with_stdin("cat", &[], b"hello proxy\n")
            .unwrap();
        assert_eq!(out, "hello proxy");
    }
}
