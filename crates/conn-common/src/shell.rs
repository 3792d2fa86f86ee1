//! Shell command execution with safe quoting.
//!
//! Route, resolver and link programming go through the standard Linux
//! tools. Every argument that comes from outside (interface names,
//! addresses read back from the kernel) must pass through [`shellquote`].
//!
//! ```ignore
//! use conn_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set dev {} up", IP_CMD, shellquote("wlan0"));
//! shell::exec_or_throw(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{ShellError, ShellResult};

/// Path to the `ip` command (routes, addresses, links).
pub const IP_CMD: &str = "/sbin/ip";

/// Path to `resolvectl` (per-link and global DNS servers, cache flush).
pub const RESOLVECTL_CMD: &str = "/usr/bin/resolvectl";

/// Path to `ss`, used to kill sockets bound to stale addresses.
pub const SS_CMD: &str = "/usr/bin/ss";

/// Path to `iptables`, used for IDLETIMER data-activity rules.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Characters that need escaping inside shell double-quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps `s` in double quotes, escaping `$`, `` ` ``, `"`, `\` and newline.
///
/// ```
/// use conn_common::shell::shellquote;
///
/// assert_eq!(shellquote("wlan0"), "\"wlan0\"");
/// assert_eq!(shellquote("a$b"), "\"a\\$b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Result of a shell command execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined, for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Runs `cmd` through `/bin/sh -c` and collects its output.
///
/// Only a spawn failure is an error; a non-zero exit is reported in the
/// returned [`ExecResult`].
pub async fn exec(cmd: &str) -> ShellResult<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| ShellError::Exec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs `cmd` and turns a non-zero exit into [`ShellError::CommandFailed`].
pub async fn exec_or_throw(cmd: &str) -> ShellResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(ShellError::CommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
