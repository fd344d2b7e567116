use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error};

/// Outcome of one external command. Command failure is data, not an error:
/// only the caller decides whether a non-zero exit is fatal, tolerated or
/// retryable.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    fn infra_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
        }
    }

    /// Success, or a non-zero exit declared acceptable for this stage.
    pub fn tolerated(&self, codes: &[i32]) -> bool {
        self.success || codes.contains(&self.exit_code)
    }
}

async fn finish(command_line: &str, command: &mut Command, timeout_secs: u64) -> ExecResult {
    let result = match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        command.stdout(Stdio::piped()).stderr(Stdio::piped()).output(),
    )
    .await
    {
        Ok(Ok(output)) => ExecResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        },
        Ok(Err(e)) => {
            error!("Failed to spawn command '{command_line}': {e}");
            ExecResult::infra_failure(e.to_string())
        }
        Err(_) => {
            error!("Timeout expired for command: {command_line}");
            ExecResult::infra_failure("timeout expired")
        }
    };

    debug!(
        "cmd: {command_line}, exit code: {}, success: {}",
        result.exit_code, result.success
    );
    if !result.success {
        debug!("stdout: {}", result.stdout);
        debug!("stderr: {}", result.stderr);
    }
    result
}

/// Run a local shell command under a deadline. A timeout kills the child and
/// yields a failed result; spawn errors are folded into a failed result too.
pub async fn run_local(command_line: &str, timeout_secs: u64) -> ExecResult {
    let mut command = Command::new("/bin/sh");
    command.arg("-c").arg(command_line).kill_on_drop(true);
    finish(command_line, &mut command, timeout_secs).await
}

/// Launch a shell script detached from this run, its output captured to
/// `log_path`. Returns once the script is in the background.
pub async fn spawn_detached(script: &str, log_path: &Path) -> bool {
    let wrapped = format!("nohup bash -c '{script}' > {} 2>&1 &", log_path.display());
    run_local(&wrapped, 30).await.success
}

/// The production host, addressed over SSH with the same run contract as
/// local commands.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteHost {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

impl RemoteHost {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Run `command_line` on the remote host.
    pub async fn run(&self, command_line: &str, timeout_secs: u64) -> ExecResult {
        let mut command = Command::new("ssh");
        command
            .arg("-p")
            .arg(self.port.to_string())
            .arg(&self.host)
            .arg(command_line)
            .kill_on_drop(true);
        finish(command_line, &mut command, timeout_secs).await
    }

    pub async fn dir_exists(&self, path: &str) -> bool {
        self.run(&format!("test -d \"{path}\""), 60).await.success
    }

    /// Transport argument for rsync's `-e` when pulling from this host.
    pub fn rsync_transport(&self) -> String {
        format!("ssh -p {}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[tokio::test]
    #[serial]
    async fn test_run_local_success() {
        let result = run_local("echo hello", 10).await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    #[serial]
    async fn test_run_local_failure_captures_output() {
        let result = run_local("echo oops >&2; exit 3", 10).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    #[serial]
    async fn test_run_local_timeout() {
        let result = run_local("sleep 5", 1).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stderr, "timeout expired");
    }

    #[test]
    fn test_tolerated_exit_codes() {
        let result = ExecResult {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 24,
        };
        assert!(result.tolerated(&[23, 24]));
        assert!(!result.tolerated(&[23]));

        let ok = ExecResult {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(ok.tolerated(&[]));
    }

    #[test]
    fn test_rsync_transport() {
        let host = RemoteHost::new("backup@prod.example.net", 2222);
        assert_eq!(host.rsync_transport(), "ssh -p 2222");
    }
}
