//! Utilities for running external tools with proper error handling and timeouts

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, error};

/// Ceiling applied to every external tool invocation unless configured otherwise
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Environment variables passed to an external tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolEnv {
    vars: BTreeMap<String, String>,
}

impl ToolEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variant of [`ToolEnv::add`]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.add(key, value);
        self
    }

    /// Add custom environment variable
    pub fn add(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Get all environment variables
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// Run a command, failing if it exits non-zero or outlives `timeout`
///
/// The child is spawned on a throwaway current-thread runtime so the timeout
/// can be enforced from synchronous code. A timed-out child is killed.
pub fn run_command(
    program: &str,
    args: &[String],
    env: &ToolEnv,
    timeout: Duration,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    for (key, value) in env.vars() {
        cmd.env(key, value);
    }

    debug!("Running command: {} {}", program, args.join(" "));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime for command execution")?;

    let output = runtime.block_on(async {
        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output.with_context(|| format!("Failed to execute {}", program)),
            Err(_) => Err(anyhow::anyhow!(
                "{} timed out after {:?}",
                program,
                timeout
            )),
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command failed: {} {}", program, args.join(" "));
        error!("Stderr: {}", stderr.trim());
        anyhow::bail!(
            "{} failed with exit code {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout.trim());
    }

    Ok(output)
}

/// Whether `program` can be found on PATH
pub fn tool_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Run a command and return stdout as string
pub fn run_command_stdout(
    program: &str,
    args: &[String],
    env: &ToolEnv,
    timeout: Duration,
) -> Result<String> {
    let output = run_command(program, args, env, timeout)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
