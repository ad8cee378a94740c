use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::core::{
    domain::Language,
    traits::tool::{CompileTool, Sandbox, SandboxInvocation, ToolError, ToolOutput},
};

/// Program plus leading arguments, e.g. `sh tools/runner.sh`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Splits a command line on whitespace. `None` for a blank line.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    /// Runs the tool to completion in its own process group. Dropping the
    /// returned future kills the whole group.
    #[tracing::instrument(skip(self), fields(program = %self.program))]
    pub async fn run<I, S>(&self, extra_args: I) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S> + std::fmt::Debug,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let child = cmd.spawn().map_err(|e| ToolError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;
        let group = ProcessGroup::new(child.id());

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::Wait {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;
        group.release();

        let output = ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        tracing::debug!("Tool finished with status {}", output.status);

        Ok(output)
    }
}

/// Kills the tool's process group when dropped before [`ProcessGroup::release`],
/// so grandchildren do not outlive a cancelled or timed out invocation.
struct ProcessGroup {
    pgid: Option<i32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()),
        }
    }

    fn release(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                tracing::debug!("Failed to kill process group {}: {}", pgid, e);
            }
        }
    }
}

/// Compilation tool reached over a process boundary.
#[derive(Clone, Debug)]
pub struct ScriptCompileTool {
    command: ToolCommand,
}

impl ScriptCompileTool {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait::async_trait]
impl CompileTool for ScriptCompileTool {
    async fn invoke(
        &self,
        source: &Path,
        language: Language,
        destination: &Path,
    ) -> Result<ToolOutput, ToolError> {
        self.command
            .run([
                source.as_os_str(),
                OsStr::new(language.extension()),
                destination.as_os_str(),
            ])
            .await
    }
}

/// Sandboxed execution environment reached over a process boundary.
#[derive(Clone, Debug)]
pub struct ScriptSandbox {
    command: ToolCommand,
}

impl ScriptSandbox {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

#[async_trait::async_trait]
impl Sandbox for ScriptSandbox {
    async fn execute(&self, invocation: &SandboxInvocation) -> Result<ToolOutput, ToolError> {
        self.command.run(invocation.args()).await
    }
}
