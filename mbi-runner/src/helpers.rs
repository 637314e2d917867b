// Copyright (c) The MBI Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for mbi-runner.

use camino::Utf8PathBuf;
use std::{ffi::OsString, process::ExitStatus};

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "file" if `count` is 1, otherwise "files".
    pub fn files_str(count: usize) -> &'static str {
        if count == 1 { "file" } else { "files" }
    }
}

/// Returns the exit code of `status`, or the negated signal number if it was killed by one.
pub(crate) fn return_code(status: ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::process::ExitStatusExt;
            status.signal().map(|signal| -signal)
        } else {
            None
        }
    }
}

/// Returns the line appended to a run log once the child has been reaped.
pub(crate) fn status_line(status: Option<ExitStatus>, elapsed_seconds: f64) -> String {
    match status.and_then(return_code) {
        Some(rc) if rc < 0 => {
            format!("Command killed by signal {}, elapsed time: {elapsed_seconds}\n", -rc)
        }
        Some(rc) => format!("Command return code: {rc}, elapsed time: {elapsed_seconds}\n"),
        None => format!("Command return code: unknown, elapsed time: {elapsed_seconds}\n"),
    }
}

/// Returns the current `PATH` with `dirs` prepended.
pub(crate) fn prepend_path(dirs: &[Utf8PathBuf]) -> Option<OsString> {
    if dirs.is_empty() {
        return None;
    }
    let current = std::env::var_os("PATH").unwrap_or_default();
    let paths = dirs
        .iter()
        .map(|dir| dir.as_std_path().to_path_buf())
        .chain(std::env::split_paths(&current));
    std::env::join_paths(paths).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn status_lines() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(
            status_line(Some(ExitStatus::from_raw(0)), 1.5),
            "Command return code: 0, elapsed time: 1.5\n"
        );
        // Exit code 3 is stored in the high byte of the raw wait status.
        assert_eq!(
            status_line(Some(ExitStatus::from_raw(3 << 8)), 2.0),
            "Command return code: 3, elapsed time: 2\n"
        );
        assert_eq!(
            status_line(Some(ExitStatus::from_raw(libc::SIGKILL)), 0.25),
            "Command killed by signal 9, elapsed time: 0.25\n"
        );
        assert_eq!(
            status_line(None, 0.25),
            "Command return code: unknown, elapsed time: 0.25\n"
        );
    }

    #[test]
    fn prepend_path_puts_dirs_first() {
        assert_eq!(prepend_path(&[]), None);
        let joined = prepend_path(&[Utf8PathBuf::from("/opt/tool/bin")]).expect("joined");
        let first = std::env::split_paths(&joined).next().expect("one entry");
        assert_eq!(first, std::path::Path::new("/opt/tool/bin"));
    }
}
