use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::{
    constants::COMPILED_DIR,
    core::{
        domain::{
            ArtifactPath, CompiledArtifact, Language, REASON_COMPILE_ERROR, REASON_COMPILED,
            Scope, SourceRef,
        },
        errors::CompileError,
        tool_output::ToolReport,
        traits::{ids::IdGenerator, store::SourceStore, tool::CompileTool},
    },
};

const COMPILED_MESSAGE: &str = "Now you can run this program.";

/// Turns stored scripts into executables through the external compilation tool.
#[derive(Clone, Debug)]
pub struct CompilerInvoker {
    store: Arc<dyn SourceStore>,
    tool: Arc<dyn CompileTool>,
    ids: Arc<dyn IdGenerator>,
    budget: Duration,
}

impl CompilerInvoker {
    pub fn new(
        store: Arc<dyn SourceStore>,
        tool: Arc<dyn CompileTool>,
        ids: Arc<dyn IdGenerator>,
        budget: Duration,
    ) -> Self {
        Self {
            store,
            tool,
            ids,
            budget,
        }
    }

    /// Resolves a stored script by name, taking the language from its extension.
    pub async fn compile_script(
        &self,
        scope: &Scope,
        file_name: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        let language = Language::from_file_name(file_name)?;
        self.compile(&SourceRef {
            scope: scope.clone(),
            file_name: file_name.to_string(),
            language,
        })
        .await
    }

    /// A rejected program is reported as an artifact with a non-zero exit
    /// code, not as an error.
    #[tracing::instrument(skip(self))]
    pub async fn compile(&self, source: &SourceRef) -> Result<CompiledArtifact, CompileError> {
        let source_path = source.path();
        if !self.store.exists(&source_path).await? {
            return Err(CompileError::SourceNotFound {
                path: source_path.to_string(),
            });
        }

        self.store
            .ensure_dir(&ArtifactPath::new(COMPILED_DIR))
            .await?;
        let executable =
            ArtifactPath::compiled(&format!("{}_{}", source.stem(), self.ids.next_id()));

        let source_file = self.store.local_path(&source_path)?;
        let destination = self.store.local_path(&executable)?;

        tracing::debug!("Start compiling {} into {}", source_path, executable);
        let invocation = self
            .tool
            .invoke(&source_file, source.language, &destination);
        let output = match timeout(self.budget, invocation).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!("Compilation tool could not run: {}", e);
                return Err(CompileError::InvocationError {
                    status: -1,
                    compile_time_ms: 0,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                tracing::warn!("Compilation exceeded {:?}", self.budget);
                self.discard(&executable).await;
                return Err(CompileError::TimeBudgetExceeded {
                    budget_ms: self.budget.as_millis() as u64,
                });
            }
        };

        if !output.success() {
            tracing::error!(
                "Compilation tool exited with status {}: {}",
                output.status,
                output.stderr
            );
            return Err(CompileError::InvocationError {
                status: output.status,
                compile_time_ms: 0,
                reason: output.stderr,
            });
        }

        let report = ToolReport::parse(&output.stdout).map_err(CompileError::MalformedToolOutput)?;
        let exit_code = report
            .require_parsed::<i32>("exit_code")
            .map_err(CompileError::MalformedToolOutput)?;
        let compile_time_ms = report
            .require_measurement("compile_time")
            .map_err(CompileError::MalformedToolOutput)?;

        let (reason, message) = if exit_code == 0 {
            (REASON_COMPILED, COMPILED_MESSAGE.to_string())
        } else {
            (REASON_COMPILE_ERROR, self.diagnostic_text(&executable).await)
        };
        tracing::debug!("Compilation finished: exit_code={}, reason={}", exit_code, reason);

        let diagnostics = BTreeMap::from([
            ("reason".to_string(), reason.to_string()),
            ("message".to_string(), message),
            ("time_unit".to_string(), "ms".to_string()),
            ("program_path".to_string(), source_path.to_string()),
        ]);

        Ok(CompiledArtifact {
            source: source.clone(),
            executable,
            exit_code,
            compile_time_ms,
            diagnostics,
        })
    }

    /// On failure the tool leaves the compiler's messages at the destination.
    async fn diagnostic_text(&self, executable: &ArtifactPath) -> String {
        match self.store.read(executable).await {
            Ok(content) => String::from_utf8_lossy(&content).to_string(),
            Err(e) => {
                tracing::warn!("No diagnostics at {}: {}", executable, e);
                String::new()
            }
        }
    }

    async fn discard(&self, executable: &ArtifactPath) {
        if let Err(e) = self.store.remove(executable).await {
            tracing::warn!("Failed to remove {}: {}", executable, e);
        }
    }
}
