use std::path::{Path, PathBuf};

use crate::core::domain::{Language, RunLimits};

/// What an external tool left behind after it exited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    /// Outer process status, `-1` when the tool was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    #[error("failed to wait for `{program}`: {reason}")]
    Wait { program: String, reason: String },
}

/// Translates one source file. Invoked as `<source> <language> <destination>`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait CompileTool: std::fmt::Debug + Send + Sync {
    async fn invoke(
        &self,
        source: &Path,
        language: Language,
        destination: &Path,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxInvocation {
    pub limits: RunLimits,
    pub executable: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl SandboxInvocation {
    /// Positional arguments in the order the sandbox expects them.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.limits.time_limit_ms.to_string(),
            self.limits.memory_limit_kb.to_string(),
            self.executable.display().to_string(),
            self.input.display().to_string(),
            self.output.display().to_string(),
            self.limits.hard_time_limit_ms.to_string(),
            self.limits.hard_memory_limit_kb.to_string(),
        ]
    }
}

/// Runs one executable against one input under time and memory ceilings.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Sandbox: std::fmt::Debug + Send + Sync {
    async fn execute(&self, invocation: &SandboxInvocation) -> Result<ToolOutput, ToolError>;
}
