//! External tool invocation under a time budget

use crate::error::{Error, Result};
use std::process::{Command, ExitStatus};
use std::time::{Duration, Instant};

/// A command-line tool and the package that provides it
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tool<'a> {
    pub binary: &'a str,
    pub package: &'a str,
}

impl Tool<'_> {
    /// Whether `binary <flag>` can be spawned
    pub fn is_installed(&self, flag: &str) -> bool {
        Command::new(self.binary)
            .arg(flag)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok()
    }

    /// Run `command` to completion, killing it after `timeout`.
    ///
    /// Outputs go wherever the caller pointed them; tools here write files.
    pub fn run(&self, command: &mut Command, timeout: Duration, phase: &str) -> Result<()> {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DocumentProcessing(format!(
                    "{} not found (install {})",
                    self.binary, self.package
                )))
            }
            Err(e) => return Err(Error::Io(e)),
        };

        let started = Instant::now();
        let status: ExitStatus = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    phase: phase.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        if !status.success() {
            return Err(Error::DocumentProcessing(format!(
                "{} failed with {}",
                self.binary, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_names_package() {
        let tool = Tool {
            binary: "/nonexistent/anonyma-tool",
            package: "poppler-utils",
        };
        assert!(!tool.is_installed("-v"));
        let err = tool
            .run(
                &mut Command::new(tool.binary),
                Duration::from_secs(1),
                "extraction",
            )
            .unwrap_err();
        assert!(err.to_string().contains("install poppler-utils"));
    }
}
