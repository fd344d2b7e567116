use tracing::debug;

use crate::config::NotifyConfig;
use crate::exec::run_local;

const NOTIFY_TIMEOUT_SECS: u64 = 10;

/// Best-effort notification sender.
///
/// Delivery is an external collaborator: the quoted, host-tagged message is
/// appended to a configured command line. Failures are swallowed, a stuck
/// transport is cut off by a short deadline, and nothing here ever
/// escalates.
#[derive(Debug, Clone)]
pub struct Notifier {
    command: Option<String>,
    tag: String,
}

impl Notifier {
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        let command = if cfg.enabled { cfg.command.clone() } else { None };
        Self {
            command,
            tag: gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            command: None,
            tag: String::new(),
        }
    }

    pub async fn notify(&self, message: &str) -> bool {
        let Some(command) = &self.command else {
            debug!("Notifications disabled, dropping: {message}");
            return false;
        };

        let payload = shell_quote(&format!("[{}] {}", self.tag, message));
        let result = run_local(&format!("{command} {payload}"), NOTIFY_TIMEOUT_SECS).await;
        if !result.success {
            debug!("Notification delivery failed: {}", result.stderr);
        }
        result.success
    }
}

/// Single-quote `value` for safe interpolation into a shell command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(
            shell_quote("rm -rf $HOME; `reboot`"),
            "'rm -rf $HOME; `reboot`'"
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[tokio::test]
    async fn test_disabled_notifier_swallows() {
        assert!(!Notifier::disabled().notify("anything").await);

        let cfg = NotifyConfig {
            enabled: false,
            command: Some("/bin/true".into()),
        };
        assert!(!Notifier::from_config(&cfg).notify("anything").await);
    }

    #[tokio::test]
    async fn test_enabled_notifier_runs_command() {
        let cfg = NotifyConfig {
            enabled: true,
            command: Some("/bin/echo".into()),
        };
        assert!(Notifier::from_config(&cfg).notify("backup finished").await);

        let failing = NotifyConfig {
            enabled: true,
            command: Some("/bin/false".into()),
        };
        assert!(!Notifier::from_config(&failing).notify("backup finished").await);
    }
}
