// External tool discovery and execution.
// Every invocation captures stdout and stderr and is bounded by a timeout;
// the child is killed when the timeout drops its future.

use crate::IsoEditError;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A resolved external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    pub name: String,
    pub path: PathBuf,
}

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub status_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Combined stdout and stderr, the way the tool printed them.
    pub fn diagnostics(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => format!("exit status {:?}, no output", self.status_code),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr),
        }
    }
}

impl ExternalTool {
    /// Resolve a tool from an explicit path or the first candidate found on `PATH`.
    pub fn locate(explicit: Option<&Path>, candidates: &[&str]) -> Result<Self, IsoEditError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Self::from_path(path.to_path_buf()));
            }
            return match which::which(path) {
                Ok(found) => Ok(Self::from_path(found)),
                Err(_) => Err(IsoEditError::ExternalToolMissing(path.display().to_string())),
            };
        }

        for candidate in candidates {
            if let Ok(found) = which::which(candidate) {
                debug!(tool = %candidate, path = %found.display(), "located external tool");
                return Ok(Self {
                    name: candidate.to_string(),
                    path: found,
                });
            }
        }

        Err(IsoEditError::ExternalToolMissing(candidates.join(" / ")))
    }

    pub fn is_available(candidates: &[&str]) -> bool {
        candidates.iter().any(|c| which::which(c).is_ok())
    }

    fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tool")
            .to_string();
        Self { name, path }
    }

    /// Run the tool to completion, capturing its output.
    ///
    /// A non-zero exit is reported through `ToolOutput::success`, not as an
    /// error; only spawn failures and timeouts are errors.
    pub async fn run<I, S>(&self, args: I, timeout: Duration) -> Result<ToolOutput, IsoEditError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = tokio::process::Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(tool = %self.name, command = ?cmd.as_std(), "spawning external tool");
        let started = Instant::now();

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IsoEditError::ExternalToolMissing(self.path.display().to_string()));
            }
            Ok(Err(e)) => return Err(IsoEditError::IoError(e)),
            Err(_) => {
                warn!(tool = %self.name, ?timeout, "external tool timed out and was killed");
                return Err(IsoEditError::Timeout(format!(
                    "{} did not finish within {:?}",
                    self.name, timeout
                )));
            }
        };

        let result = ToolOutput {
            status_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        info!(
            tool = %self.name,
            status = ?result.status_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "external tool finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_combines_streams() {
        let output = ToolOutput {
            status_code: Some(1),
            success: false,
            stdout: "writing image\n".to_string(),
            stderr: "no space left\n".to_string(),
        };
        assert_eq!(output.diagnostics(), "writing image\nno space left");

        let silent = ToolOutput {
            status_code: Some(2),
            ..Default::default()
        };
        assert!(silent.diagnostics().contains("no output"));
    }

    #[test]
    fn test_locate_reports_missing_tool() {
        let result = ExternalTool::locate(None, &["isoedit-no-such-tool-1", "isoedit-no-such-tool-2"]);
        match result {
            Err(IsoEditError::ExternalToolMissing(msg)) => {
                assert!(msg.contains("isoedit-no-such-tool-1"));
            }
            other => panic!("expected ExternalToolMissing, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_exit_status_and_output() {
        let sh = ExternalTool::locate(None, &["sh"]).unwrap();
        let output = sh
            .run(["-c", "echo out; echo err >&2; exit 3"], Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.status_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let sh = ExternalTool::locate(None, &["sh"]).unwrap();
        let result = sh.run(["-c", "sleep 5"], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(IsoEditError::Timeout(_))));
    }
}
