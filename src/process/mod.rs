//! Thin wrapper around external command line tools.
//!
//! Every collaborator this crate drives (model compiler, `initdb`, `pg_ctl`,
//! `pg_dump`, `migra`) is invoked through [`Tool`], which captures output and
//! maps exit codes to [`TrekError::Process`].

use crate::util::{Result, TrekError};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Tool {
    program: String,
    args: Vec<OsString>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a variable on top of the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the tool to completion. Only a launch failure is an error here.
    pub async fn output(&self) -> Result<ToolOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        debug!(program = %self.program, args = ?self.args, "running tool");

        let output = command.output().await.map_err(|e| {
            TrekError::Process(format!(
                "Failed to run {}: {e}. Make sure it is installed and on PATH",
                self.program
            ))
        })?;

        Ok(ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }

    /// Runs the tool and requires a zero exit code.
    pub async fn run(&self) -> Result<ToolOutput> {
        self.run_accepting(&[0]).await
    }

    /// Runs the tool and accepts any of `codes` as success.
    pub async fn run_accepting(&self, codes: &[i32]) -> Result<ToolOutput> {
        let output = self.output().await?;
        match output.code {
            Some(code) if codes.contains(&code) => Ok(output),
            code => {
                let status = code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}"));
                let detail = if output.stderr.trim().is_empty() {
                    output.stdout.trim()
                } else {
                    output.stderr.trim()
                };
                Err(TrekError::Process(format!(
                    "{} failed with {status}: {detail}",
                    self.program
                )))
            }
        }
    }
}

/// Writes an executable shell script standing in for an external tool.
#[cfg(test)]
pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
