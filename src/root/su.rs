//! `su`-backed privileged runner

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use tracing::{debug, trace};

use super::{quote, RootRunner};
use crate::error::{AppError, Result};

/// Default `su` binary; resolved through PATH so Magisk/KernelSU wrappers
/// are picked up the same way a shell would.
const DEFAULT_SU: &str = "su";

/// Privileged runner invoking commands through a `su` binary
///
/// Each call spawns `su -c '<program> <args...> 2>&1'` with every element
/// individually quoted, waits for completion and captures the output. The
/// trailing redirection merges the inner command's stderr into the captured
/// stream; `su`'s own stderr (e.g. a denial message) is appended as well.
pub struct SuRunner {
    su_path: PathBuf,
}

impl SuRunner {
    /// Create a runner using a specific `su` binary
    pub fn new(su_path: impl Into<PathBuf>) -> Self {
        Self {
            su_path: su_path.into(),
        }
    }

    /// Build the quoted command line handed to `su -c`
    fn command_line(program: &str, args: &[&str]) -> String {
        let mut line = quote(program);
        for arg in args {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        line.push_str(" 2>&1");
        line
    }
}

impl Default for SuRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SU)
    }
}

impl RootRunner for SuRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let line = Self::command_line(program, args);
        trace!("su -c {}", line);

        let output = Command::new(&self.su_path)
            .arg("-c")
            .arg(&line)
            .output()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    // No su binary means the device is not rooted
                    AppError::PrivilegeDenied
                } else {
                    AppError::Exec(format!("Failed to spawn {}: {}", self.su_path.display(), e))
                }
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }
        let text = text.trim().to_string();

        if output.status.success() {
            Ok(text)
        } else {
            debug!("privileged command failed ({}): {}", output.status, text);
            if text.is_empty() {
                Err(AppError::Exec(format!("{} ({})", program, output.status)))
            } else {
                Err(AppError::Exec(text))
            }
        }
    }
}
