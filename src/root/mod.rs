//! Privileged command execution
//!
//! The sole gateway to the gadget control surface when the process itself is
//! not running as root. A [`RootRunner`] executes one program with elevated
//! privilege, captures merged stdout+stderr and returns it trimmed. Every
//! argument is quoted individually so path or display-name content can never
//! escape its argument boundary.

mod su;

pub use su::SuRunner;

use crate::error::Result;

/// Executes single privileged commands to completion
pub trait RootRunner: Send + Sync {
    /// Run a program with the given arguments at elevated privilege.
    ///
    /// Returns combined stdout+stderr text, trimmed. The command runs
    /// exactly once; there is no retry and no timeout - a hung privileged
    /// process hangs the caller.
    fn run(&self, program: &str, args: &[&str]) -> Result<String>;

    /// Privilege probe: true iff a trivial privileged command exits zero.
    fn probe(&self) -> bool {
        self.run("true", &[]).is_ok()
    }
}

/// Quote a string as a single sh word.
///
/// Wraps the value in single quotes and escapes embedded single quotes as
/// `'\''`, so the result is always exactly one argument to the shell no
/// matter what bytes the value contains.
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
