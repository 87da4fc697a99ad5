//! Command execution abstraction for testability
//!
//! Adapters and remote storage backends run their external tools through
//! [`CommandExecutor`] so tests can swap in [`mock::MockExecutor`].

use super::command::ToolEnv;
use anyhow::Result;
use std::process::Output;
use std::time::Duration;

/// Abstraction for command execution, enabling mocking in tests
pub trait CommandExecutor: Send + Sync {
    /// Run a command bounded by `timeout`
    fn run(
        &self,
        program: &str,
        args: &[String],
        env: &ToolEnv,
        timeout: Duration,
    ) -> Result<Output>;

    /// Run a command and return stdout as string
    fn run_stdout(
        &self,
        program: &str,
        args: &[String],
        env: &ToolEnv,
        timeout: Duration,
    ) -> Result<String> {
        let output = self.run(program, args, env, timeout)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn run(
        &self,
        program: &str,
        args: &[String],
        env: &ToolEnv,
        timeout: Duration,
    ) -> Result<Output> {
        super::command::run_command(program, args, env, timeout)
    }
}

/// A mock executor for testing that records calls and returns configured responses
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
        pub env: Vec<(String, String)>,
        pub timeout: Duration,
    }

    impl CommandCall {
        /// Whether any argument equals or contains `needle`
        pub fn has_arg(&self, needle: &str) -> bool {
            self.args.iter().any(|a| a == needle || a.contains(needle))
        }
    }

    /// Response configuration for mock
    #[derive(Clone, Debug)]
    pub enum MockResponse {
        Success { stdout: String },
        /// Succeeds and writes `content` to the path named by `flag`,
        /// either `--flag=path` or `--flag path`
        Produces { flag: String, content: Vec<u8> },
        Failure { stderr: String, exit_code: i32 },
        Timeout,
    }

    impl Default for MockResponse {
        fn default() -> Self {
            MockResponse::Success {
                stdout: String::new(),
            }
        }
    }

    /// Mock executor for testing
    #[derive(Clone, Default)]
    pub struct MockExecutor {
        calls: Arc<Mutex<Vec<CommandCall>>>,
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        default_response: Arc<Mutex<MockResponse>>,
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure a response for a specific program
        pub fn expect(self, program: &str, response: MockResponse) -> Self {
            if let Ok(mut responses) = self.responses.lock() {
                responses.insert(program.to_string(), response);
            }
            self
        }

        /// Set the default response for unconfigured programs
        pub fn with_default_response(self, response: MockResponse) -> Self {
            if let Ok(mut default) = self.default_response.lock() {
                *default = response;
            }
            self
        }

        /// Get all recorded calls
        pub fn get_calls(&self) -> Vec<CommandCall> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Calls made to one program, in order
        pub fn calls_to(&self, program: &str) -> Vec<CommandCall> {
            self.get_calls()
                .into_iter()
                .filter(|c| c.program == program)
                .collect()
        }

        /// Check if a program was called
        pub fn was_called(&self, program: &str) -> bool {
            self.call_count(program) > 0
        }

        /// Get number of calls to a specific program
        pub fn call_count(&self, program: &str) -> usize {
            self.calls_to(program).len()
        }

        fn record_call(&self, program: &str, args: &[String], env: &ToolEnv, timeout: Duration) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(CommandCall {
                    program: program.to_string(),
                    args: args.to_vec(),
                    env: env
                        .vars()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    timeout,
                });
            }
        }

        fn get_response(&self, program: &str) -> MockResponse {
            let configured = self
                .responses
                .lock()
                .ok()
                .and_then(|r| r.get(program).cloned());
            match configured {
                Some(response) => response,
                None => self
                    .default_response
                    .lock()
                    .map(|r| r.clone())
                    .unwrap_or_default(),
            }
        }

        fn output_path(flag: &str, args: &[String]) -> Option<PathBuf> {
            let prefix = format!("{}=", flag);
            for (i, arg) in args.iter().enumerate() {
                if let Some(path) = arg.strip_prefix(&prefix) {
                    return Some(PathBuf::from(path));
                }
                if arg == flag {
                    return args.get(i + 1).map(PathBuf::from);
                }
            }
            None
        }

        fn execute_response(&self, response: MockResponse, args: &[String]) -> Result<Output> {
            match response {
                MockResponse::Success { stdout } => Ok(success_output(stdout.into_bytes())),
                MockResponse::Produces { flag, content } => {
                    let path = Self::output_path(&flag, args).ok_or_else(|| {
                        anyhow::anyhow!("Mock expected output flag {} in arguments", flag)
                    })?;
                    std::fs::write(&path, content)?;
                    Ok(success_output(Vec::new()))
                }
                MockResponse::Failure { stderr, exit_code } => {
                    anyhow::bail!("Command failed with exit code {:?}: {}", exit_code, stderr)
                }
                MockResponse::Timeout => {
                    anyhow::bail!("Command timed out")
                }
            }
        }
    }

    fn success_output(stdout: Vec<u8>) -> Output {
        Output {
            status: std::process::ExitStatus::default(),
            stdout,
            stderr: Vec::new(),
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run(
            &self,
            program: &str,
            args: &[String],
            env: &ToolEnv,
            timeout: Duration,
        ) -> Result<Output> {
            self.record_call(program, args, env, timeout);
            let response = self.get_response(program);
            self.execute_response(response, args)
        }
    }
}
