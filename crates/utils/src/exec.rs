//! Local host diagnostics appended to alert notes.

use std::{future::Future, pin::Pin};

use tokio::process::Command;
use tracing::{debug, warn};

/// Boxed future type for diagnostic commands, enabling object safety.
pub type DiagnosticFuture<'a> = Pin<Box<dyn Future<Output = String> + Send + 'a>>;

/// Source of the host snippets added to every alert note.
///
/// Both calls always yield some text, a failure is reported inside the
/// returned string rather than as an error.
pub trait Diagnostics: Send + Sync {
    /// Load and uptime summary of the host.
    fn uptime(&self) -> DiagnosticFuture<'_>;

    /// Disk usage summary of the host.
    fn disk_usage(&self) -> DiagnosticFuture<'_>;
}

/// Diagnostics gathered by running `uptime` and `df -h` through the shell.
#[derive(Debug, Clone)]
pub struct ShellDiagnostics {
    shell: String,
}

impl ShellDiagnostics {
    pub fn new() -> Self {
        Self::with_shell("/bin/bash")
    }

    pub fn with_shell(shell: &str) -> Self {
        Self {
            shell: shell.to_string(),
        }
    }
}

impl Default for ShellDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics for ShellDiagnostics {
    fn uptime(&self) -> DiagnosticFuture<'_> {
        Box::pin(run_command(&self.shell, "uptime"))
    }

    fn disk_usage(&self) -> DiagnosticFuture<'_> {
        Box::pin(run_command(&self.shell, "df -h"))
    }
}

/// Runs `cmd` with `shell -c` and returns its standard output.
///
/// A command that cannot be spawned or exits unsuccessfully yields
/// `CMD <cmd> run failed`.
pub async fn run_command(shell: &str, cmd: &str) -> String {
    debug!(shell = %shell, cmd = %cmd, "Running diagnostic command");
    match Command::new(shell).arg("-c").arg(cmd).output().await {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).into_owned()
        }
        Ok(output) => {
            warn!(cmd = %cmd, status = %output.status, "Diagnostic command failed");
            format!("CMD {cmd} run failed")
        }
        Err(e) => {
            warn!(cmd = %cmd, error = %e, "Diagnostic command could not be started");
            format!("CMD {cmd} run failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_output() {
        let output = run_command("/bin/sh", "echo hello").await;
        assert_eq!(output, "hello\n");
    }

    #[tokio::test]
    async fn test_run_command_failure() {
        let output = run_command("/bin/sh", "exit 3").await;
        assert_eq!(output, "CMD exit 3 run failed");
    }

    #[tokio::test]
    async fn test_run_command_missing_shell() {
        let output = run_command("/nonexistent/shell", "uptime").await;
        assert_eq!(output, "CMD uptime run failed");
    }

    #[tokio::test]
    async fn test_shell_diagnostics_never_empty() {
        let diagnostics = ShellDiagnostics::with_shell("/bin/sh");
        assert!(!diagnostics.uptime().await.is_empty());
        assert!(!diagnostics.disk_usage().await.is_empty());
    }
}
