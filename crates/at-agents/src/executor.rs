//! Agent executor: spawns the configured agent CLI as a subprocess, feeds it
//! a task prompt, and parses its single JSON document of output.
//!
//! Unlike an interactive PTY session, each invocation here is one-shot:
//! stdin is closed immediately (no follow-up turns), stdout/stderr are
//! piped and captured in full, and the process is expected to emit exactly
//! one JSON object on stdout before exiting. A hard 5-minute timeout bounds
//! every invocation regardless of the caller's requested timeout.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use at_api_types::Session;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

const HARD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("session budget of ${budget:.2} already exhausted (spent ${spent:.2})")]
    BudgetExceeded { budget: f64, spent: f64 },
    #[error("failed to spawn agent process: {0}")]
    Spawn(String),
    #[error("agent process timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent process exited with status {0}")]
    NonZeroExit(i32),
    #[error("failed to parse agent output as JSON: {0}")]
    ParseOutput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Options for a single agent invocation, lifted from a task's prompt and
/// metadata at dispatch time.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub prompt: String,
    pub project_path: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_budget_usd: Option<f64>,
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub agent: Option<String>,
    pub mcp_config: Option<serde_json::Value>,
    pub session_id: Option<uuid::Uuid>,
}

/// The single JSON document the agent CLI is expected to emit on stdout.
#[derive(Debug, Clone, Deserialize)]
struct AgentJsonOutput {
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    total_cost_usd: f64,
    #[serde(default)]
    usage: AgentUsage,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AgentUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// The outcome of a single agent invocation.
///
/// `budget_exceeded` is set when the post-execution budget check (step 6 of
/// [`AgentExecutor::execute`]) finds the session pushed past its configured
/// budget. The invocation still ran and still counts as a successful attempt
/// for statistics purposes, but callers must not attribute `cost_usd` to the
/// session in that case.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub result: String,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub budget_exceeded: bool,
}

/// Raw process output, abstracted for testability.
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

/// Abstraction over process spawning so the executor can be tested without
/// an actual agent CLI binary.
#[async_trait::async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Spawns the agent CLI via `tokio::process::Command` with stdin closed,
/// stdout/stderr piped, and a hard timeout enforced around the whole
/// spawn-wait-collect sequence.
pub struct ProcessSpawner;

#[async_trait::async_trait]
impl AgentSpawner for ProcessSpawner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        env: &[(String, String)],
        cwd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        // Explicitly close stdin so the agent never blocks waiting for
        // interactive input.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.shutdown().await.ok();
        }

        let wait = tokio::time::timeout(timeout, child.wait_with_output());
        let output = match wait.await {
            Ok(result) => result?,
            Err(_) => return Err(ExecutorError::Timeout(timeout)),
        };

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// The core agent execution engine.
pub struct AgentExecutor {
    spawner: std::sync::Arc<dyn AgentSpawner>,
    agent_path: String,
    toolchain_bin: String,
}

impl AgentExecutor {
    pub fn new(agent_path: impl Into<String>, toolchain_bin: impl Into<String>) -> Self {
        Self {
            spawner: std::sync::Arc::new(ProcessSpawner),
            agent_path: agent_path.into(),
            toolchain_bin: toolchain_bin.into(),
        }
    }

    pub fn with_spawner(
        spawner: std::sync::Arc<dyn AgentSpawner>,
        agent_path: impl Into<String>,
        toolchain_bin: impl Into<String>,
    ) -> Self {
        Self {
            spawner,
            agent_path: agent_path.into(),
            toolchain_bin: toolchain_bin.into(),
        }
    }

    /// Execute a single agent invocation.
    ///
    /// 1. Pre-check the session budget, if any, before spending anything.
    /// 2. Build the environment and CLI arguments.
    /// 3. Spawn and wait, bounded by the hard 5-minute timeout.
    /// 4. Parse the single JSON document emitted on stdout.
    /// 5. Post-check the budget against the actual spend. The invocation
    ///    already ran, so this never discards the result — it flags
    ///    `budget_exceeded` instead, which tells the caller to record the
    ///    attempt in statistics as usual but skip attributing `cost_usd`
    ///    to the session.
    pub async fn execute(&self, opts: &ExecuteOptions, session: Option<&Session>) -> Result<ExecutionOutcome> {
        if let (Some(session), Some(budget)) = (session, opts.max_budget_usd) {
            if session.is_over_budget(budget) {
                return Err(ExecutorError::BudgetExceeded {
                    budget,
                    spent: session.total_cost_usd,
                });
            }
        }

        let start = std::time::Instant::now();

        let env = self.build_env();
        let args = self.build_args(opts);

        info!(
            project_path = %opts.project_path,
            model = %opts.model,
            "spawning agent process"
        );

        let output = self
            .spawner
            .run(&self.agent_path, &args, &env, &opts.project_path, HARD_TIMEOUT)
            .await?;

        let duration_ms = start.elapsed().as_millis() as u64;

        if output.exit_code != 0 {
            warn!(
                exit_code = output.exit_code,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "agent process exited non-zero"
            );
            return Err(ExecutorError::NonZeroExit(output.exit_code));
        }

        let parsed: AgentJsonOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExecutorError::ParseOutput(e.to_string()))?;

        if parsed.is_error {
            return Err(ExecutorError::ParseOutput(parsed.result));
        }

        let mut budget_exceeded = false;
        if let (Some(session), Some(budget)) = (session, opts.max_budget_usd) {
            if session.would_exceed_budget(budget, parsed.total_cost_usd) {
                warn!(
                    session_id = %session.id,
                    budget,
                    spend = parsed.total_cost_usd,
                    "task pushed session over its configured budget, cost not attributed"
                );
                budget_exceeded = true;
            }
        }

        Ok(ExecutionOutcome {
            result: parsed.result,
            cost_usd: parsed.total_cost_usd,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            duration_ms,
            budget_exceeded,
        })
    }

    fn build_env(&self) -> Vec<(String, String)> {
        let mut env = HashMap::new();
        if let Ok(home) = std::env::var("HOME") {
            env.insert("HOME".to_string(), home);
        }
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), format!("{}:{}", self.toolchain_bin, path));
        } else {
            env.insert("PATH".to_string(), self.toolchain_bin.clone());
        }
        if let Ok(nvm_dir) = std::env::var("NVM_DIR") {
            env.insert("NVM_DIR".to_string(), nvm_dir);
        }
        env.insert(
            "IS_SANDBOX".to_string(),
            std::env::var("IS_SANDBOX").unwrap_or_else(|_| "1".to_string()),
        );
        env.into_iter().collect()
    }

    fn build_args(&self, opts: &ExecuteOptions) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            opts.prompt.clone(),
            "--output-format".to_string(),
            "json".to_string(),
        ];

        args.push("--model".to_string());
        args.push(opts.model.clone());

        if let Some(session_id) = opts.session_id {
            args.push("--session-id".to_string());
            args.push(session_id.to_string());
        }

        if let Some(system_prompt) = &opts.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }

        if let Some(budget) = opts.max_budget_usd {
            args.push("--max-budget-usd".to_string());
            args.push(budget.to_string());
        }

        if !opts.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_string());
            args.push(opts.allowed_tools.join(","));
        }

        if !opts.disallowed_tools.is_empty() {
            args.push("--disallowed-tools".to_string());
            args.push(opts.disallowed_tools.join(","));
        }

        if let Some(agent) = &opts.agent {
            args.push("--agent".to_string());
            args.push(agent.clone());
        }

        if let Some(mcp_config) = &opts.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(mcp_config.to_string());
        }

        args.push("--allow-dangerously-skip-permissions".to_string());

        args
    }
}
