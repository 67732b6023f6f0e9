//! Built-in actions.
//!
//! Small, generic leaves that every installation has: logging, variable
//! assignment, basic file access and subprocess execution.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::{ActionArg, ActionSpec, ArgType, ExtraArgs};

use super::registry::{ActionDeclaration, ActionRegistry, InstanceMode};
use super::{Action, ActionArgs, ExecutionContext};

/// Default subprocess timeout for `shell.run`
const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 60;

/// Register every built-in action
pub fn register_builtins(registry: &mut ActionRegistry) {
    registry.register(
        ActionDeclaration::from_spec(
            ActionSpec::new("log", "Log a message and return it.")
                .with_argument(ActionArg::new("message", ArgType::Any, true))
                .with_argument(
                    ActionArg::new("level", ArgType::String, false)
                        .with_description("debug, info, warn or error; default: info"),
                ),
        )
        .function(log),
    );

    registry.register(
        ActionDeclaration::from_spec(
            ActionSpec::new("set", "Store a value in the run context.")
                .with_argument(ActionArg::new("name", ArgType::String, true))
                .with_argument(ActionArg::new("value", ArgType::Any, false))
                .with_extra_arguments(ExtraArgs::Reject),
        )
        .function(set_variable),
    );

    registry.register(
        ActionDeclaration::from_spec(
            ActionSpec::new("file.exists", "Test if file exists.").with_argument(
                ActionArg::new("file", ArgType::String, true).with_description("File path"),
            ),
        )
        .function(file_exists),
    );

    registry.register(
        ActionDeclaration::from_spec(
            ActionSpec::new("file.read", "Read a text file.").with_argument(
                ActionArg::new("file", ArgType::String, true).with_description("File path"),
            ),
        )
        .function(file_read),
    );

    registry.register(
        ActionDeclaration::from_spec(
            ActionSpec::new("file.write", "Write content to a file.")
                .with_argument(
                    ActionArg::new("file", ArgType::String, true).with_description("File path"),
                )
                .with_argument(
                    ActionArg::new("content", ArgType::Any, true)
                        .with_description("Content to write; lists and dicts are written as JSON"),
                )
                .with_argument(
                    ActionArg::new("mode", ArgType::String, false)
                        .with_description("'w' to overwrite (default) or 'a' to append"),
                ),
        )
        .function(file_write),
    );

    registry.register(
        ActionDeclaration::from_spec(ShellAction::spec_definition())
            .class(InstanceMode::Shared, |spec| ShellAction::new(spec.clone())),
    );
}

fn log(args: ActionArgs, _ctx: &mut ExecutionContext) -> Result<Value> {
    let message = args.require("message")?.clone();
    let text = match &message {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match args.opt_str("level").unwrap_or("info") {
        "debug" => debug!(target: "playbook", "{}", text),
        "warn" | "warning" => warn!(target: "playbook", "{}", text),
        "error" => error!(target: "playbook", "{}", text),
        _ => info!(target: "playbook", "{}", text),
    }

    Ok(message)
}

fn set_variable(args: ActionArgs, ctx: &mut ExecutionContext) -> Result<Value> {
    let name = args.str("name")?.to_string();
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    ctx.set(name, value.clone());
    Ok(value)
}

fn file_exists(args: ActionArgs, _ctx: &mut ExecutionContext) -> Result<Value> {
    let path = Path::new(args.str("file")?);
    Ok(Value::Bool(path.is_file()))
}

fn file_read(args: ActionArgs, _ctx: &mut ExecutionContext) -> Result<Value> {
    let file = args.str("file")?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read file: {}", file))?;
    Ok(Value::String(content))
}

fn file_write(args: ActionArgs, _ctx: &mut ExecutionContext) -> Result<Value> {
    use std::io::Write;

    let file = args.str("file")?;
    let content = match args.require("content")? {
        Value::String(s) => s.clone(),
        other @ (Value::Array(_) | Value::Object(_)) => serde_json::to_string(other)?,
        other => other.to_string(),
    };

    let mut options = std::fs::OpenOptions::new();
    match args.opt_str("mode").unwrap_or("w") {
        "w" => options.write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        other => anyhow::bail!("Unsupported write mode '{}'", other),
    };

    let mut handle = options
        .open(file)
        .with_context(|| format!("Failed to open file for writing: {}", file))?;
    handle
        .write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", file))?;

    Ok(Value::Null)
}

/// Runs a subprocess, feeding optional input on stdin
pub struct ShellAction {
    spec: ActionSpec,
}

impl ShellAction {
    pub fn new(spec: ActionSpec) -> Self {
        Self { spec }
    }

    fn spec_definition() -> ActionSpec {
        ActionSpec::new("shell.run", "Run a command and capture its output.")
            .with_argument(
                ActionArg::new("command", ArgType::String, true).with_description("Program to run"),
            )
            .with_argument(ActionArg::new("args", ArgType::List, false))
            .with_argument(
                ActionArg::new("input", ArgType::String, false).with_description("Written to stdin"),
            )
            .with_argument(ActionArg::new("timeout_seconds", ArgType::Int, false))
    }

    async fn execute_subprocess(
        &self,
        command: &str,
        argv: &[String],
        input: Option<&str>,
        limit: Duration,
    ) -> Result<Value> {
        let mut child = Command::new(command)
            .args(argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", command))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Some(input) = input {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write to '{}' stdin", command))?;
            }
            // Drop stdin to signal EOF
        }

        let output = timeout(limit, child.wait_with_output())
            .await
            .with_context(|| format!("Command '{}' timed out after {:?}", command, limit))?
            .with_context(|| format!("Failed to wait for '{}'", command))?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Command '{}' failed with exit code {}: {}",
                command,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("Output of '{}' is not valid UTF-8", command))?;

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code(),
        }))
    }
}

#[async_trait]
impl Action for ShellAction {
    fn spec(&self) -> &ActionSpec {
        &self.spec
    }

    async fn perform(&self, args: ActionArgs, _ctx: &mut ExecutionContext) -> Result<Value> {
        let command = args.str("command")?;
        let mut argv: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        // Trailing positional values are appended as extra argv entries
        argv.extend(args.positional.iter().map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }));

        let limit = Duration::from_secs(
            args.opt_u64("timeout_seconds")
                .unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS),
        );

        self.execute_subprocess(command, &argv, args.opt_str("input"), limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> ActionRegistry {
        ActionRegistry::with_builtins()
    }

    #[test]
    fn test_builtins_registered() {
        let registry = registry();
        for name in ["log", "set", "file.exists", "file.read", "file.write", "shell.run"] {
            assert!(registry.contains(name), "missing builtin {}", name);
        }
    }

    #[tokio::test]
    async fn test_set_writes_context() {
        let action = registry().load("set").unwrap();
        let mut ctx = ExecutionContext::new();

        let args = ActionArgs::new()
            .with("name", json!("count"))
            .with("value", json!(3));
        let result = action.perform(args, &mut ctx).await.unwrap();

        assert_eq!(result, json!(3));
        assert_eq!(ctx.get("count"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_file_write_read_exists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.json");
        let file = path.to_string_lossy().to_string();
        let registry = registry();
        let mut ctx = ExecutionContext::new();

        let exists = registry.load("file.exists").unwrap();
        let before = exists
            .perform(ActionArgs::new().with("file", json!(file)), &mut ctx)
            .await
            .unwrap();
        assert_eq!(before, json!(false));

        let write = registry.load("file.write").unwrap();
        write
            .perform(
                ActionArgs::new()
                    .with("file", json!(file))
                    .with("content", json!({"a": 1})),
                &mut ctx,
            )
            .await
            .unwrap();

        let read = registry.load("file.read").unwrap();
        let content = read
            .perform(ActionArgs::new().with("file", json!(file)), &mut ctx)
            .await
            .unwrap();
        assert_eq!(content, json!("{\"a\":1}"));

        write
            .perform(
                ActionArgs::new()
                    .with("file", json!(file))
                    .with("content", json!("!"))
                    .with("mode", json!("a")),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}!");
    }

    #[tokio::test]
    async fn test_file_write_rejects_unknown_mode() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("x.txt").to_string_lossy().to_string();
        let write = registry().load("file.write").unwrap();
        let mut ctx = ExecutionContext::new();

        let result = write
            .perform(
                ActionArgs::new()
                    .with("file", json!(file))
                    .with("content", json!("x"))
                    .with("mode", json!("rw")),
                &mut ctx,
            )
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_run_pipes_stdin() {
        let shell = registry().load("shell.run").unwrap();
        let mut ctx = ExecutionContext::new();

        let result = shell
            .perform(
                ActionArgs::new()
                    .with("command", json!("cat"))
                    .with("input", json!("hello")),
                &mut ctx,
            )
            .await
            .unwrap();

        assert_eq!(result["stdout"], json!("hello"));
        assert_eq!(result["exit_code"], json!(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_run_nonzero_exit_fails() {
        let shell = registry().load("shell.run").unwrap();
        let mut ctx = ExecutionContext::new();

        let result = shell
            .perform(ActionArgs::new().with("command", json!("false")), &mut ctx)
            .await;
        assert!(result.is_err());
    }
}
