use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::constants::DEFAULT_COMPARATOR_TIMEOUT_MS;
use crate::core::{
    compiler::CompilerInvoker,
    domain::{
        ArtifactPath, CompiledArtifact, ComparisonConfig, RunLimits, RunRequest, RunResult,
        Scope, SourceRef, Verdict,
    },
    errors::{CompileError, ExecutionError},
    orchestrator::ExecutionOrchestrator,
    traits::{comparator::Comparator, store::SourceStore},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSide {
    Program1,
    Program2,
    Comparator,
}

/// Why a comparison could not be decided. Undecided never means identical.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("comparison failed on {side:?} ({kind}): {reason}")]
pub struct ComparisonFailed {
    pub side: FailureSide,
    pub kind: &'static str,
    pub reason: String,
}

impl ComparisonFailed {
    fn new(side: FailureSide, kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            side,
            kind,
            reason: reason.into(),
        }
    }
}

/// Both run outcomes of a comparison, always paired, with the verdict.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgramComparison {
    pub verdict: Result<Verdict, ComparisonFailed>,
    pub program1: Result<RunResult, ExecutionError>,
    pub program2: Result<RunResult, ExecutionError>,
}

impl ProgramComparison {
    /// The verdict is only advisory unless both programs ran to completion.
    pub fn is_authoritative(&self) -> bool {
        self.verdict.is_ok()
            && matches!(&self.program1, Ok(result) if result.is_completed())
            && matches!(&self.program2, Ok(result) if result.is_completed())
    }
}

#[derive(Clone, Debug)]
pub struct GradingPipeline {
    store: Arc<dyn SourceStore>,
    compiler: CompilerInvoker,
    orchestrator: ExecutionOrchestrator,
    comparator: Arc<dyn Comparator>,
    comparator_timeout: Duration,
    sequential_runs: bool,
}

impl GradingPipeline {
    pub fn new(
        store: Arc<dyn SourceStore>,
        compiler: CompilerInvoker,
        orchestrator: ExecutionOrchestrator,
        comparator: Arc<dyn Comparator>,
    ) -> Self {
        Self {
            store,
            compiler,
            orchestrator,
            comparator,
            comparator_timeout: Duration::from_millis(DEFAULT_COMPARATOR_TIMEOUT_MS),
            sequential_runs: false,
        }
    }

    pub fn with_comparator_timeout(mut self, comparator_timeout: Duration) -> Self {
        self.comparator_timeout = comparator_timeout;
        self
    }

    /// Forces program2 to wait for program1 even on a concurrent store.
    pub fn with_sequential_runs(mut self, sequential_runs: bool) -> Self {
        self.sequential_runs = sequential_runs;
        self
    }

    pub async fn compile(&self, source: &SourceRef) -> Result<CompiledArtifact, CompileError> {
        self.compiler.compile(source).await
    }

    pub async fn compile_script(
        &self,
        scope: &Scope,
        file_name: &str,
    ) -> Result<CompiledArtifact, CompileError> {
        self.compiler.compile_script(scope, file_name).await
    }

    pub async fn run(&self, req: &RunRequest) -> Result<RunResult, ExecutionError> {
        self.orchestrator.run(req).await
    }

    /// Compares two outputs that already exist in the store.
    #[tracing::instrument(skip(self))]
    pub async fn compare_artifacts(
        &self,
        first: &ArtifactPath,
        second: &ArtifactPath,
        config: &ComparisonConfig,
    ) -> Result<Verdict, ComparisonFailed> {
        let first_content = self.read_output(first, FailureSide::Program1).await?;
        let second_content = self.read_output(second, FailureSide::Program2).await?;

        let outcome = timeout(
            self.comparator_timeout,
            self.comparator.compare(&first_content, &second_content, config),
        )
        .await;
        let comparison = match outcome {
            Ok(Ok(comparison)) => comparison,
            Ok(Err(e)) => {
                tracing::error!("Comparator failed: {}", e);
                return Err(ComparisonFailed::new(
                    FailureSide::Comparator,
                    "comparator_error",
                    e.to_string(),
                ));
            }
            Err(_) => {
                tracing::error!("Comparator gave no answer in {:?}", self.comparator_timeout);
                return Err(ComparisonFailed::new(
                    FailureSide::Comparator,
                    "comparator_timeout",
                    format!("no answer within {:?}", self.comparator_timeout),
                ));
            }
        };
        tracing::debug!("Comparison result: {:?}", comparison);

        Ok(Verdict {
            outputs_differ: comparison.outputs_differ,
            similarity: comparison.similarity,
            program1: None,
            program2: None,
        })
    }

    /// Runs both programs on the same input with the same limits, then
    /// compares their outputs once both runs are over.
    #[tracing::instrument(skip(self))]
    pub async fn compare_programs_on_input(
        &self,
        program1: &ArtifactPath,
        program2: &ArtifactPath,
        input: &ArtifactPath,
        limits: &RunLimits,
        config: &ComparisonConfig,
    ) -> ProgramComparison {
        let request1 = RunRequest {
            executable: program1.clone(),
            input: input.clone(),
            limits: *limits,
        };
        let request2 = RunRequest {
            executable: program2.clone(),
            input: input.clone(),
            limits: *limits,
        };

        let run1 = self.orchestrator.run(&request1);
        let run2 = self.orchestrator.run(&request2);
        let (result1, result2) = if self.sequential_runs || !self.store.supports_concurrent_writes()
        {
            tracing::debug!("Running programs one after another");
            let result1 = run1.await;
            (result1, run2.await)
        } else {
            futures::future::join(run1, run2).await
        };
        tracing::debug!("Run results: {:?} / {:?}", result1, result2);

        let verdict = match self.outputs_of(&result1, &result2) {
            Ok((output1, output2)) => self
                .compare_artifacts(output1, output2, config)
                .await
                .map(|verdict| Verdict {
                    program1: result1.as_ref().ok().cloned(),
                    program2: result2.as_ref().ok().cloned(),
                    ..verdict
                }),
            Err(failure) => Err(failure),
        };
        if let Err(failure) = &verdict {
            tracing::info!("Comparison undetermined: {}", failure);
        }

        ProgramComparison {
            verdict,
            program1: result1,
            program2: result2,
        }
    }

    fn outputs_of<'a>(
        &self,
        result1: &'a Result<RunResult, ExecutionError>,
        result2: &'a Result<RunResult, ExecutionError>,
    ) -> Result<(&'a ArtifactPath, &'a ArtifactPath), ComparisonFailed> {
        let output1 = usable_output(result1, FailureSide::Program1)?;
        let output2 = usable_output(result2, FailureSide::Program2)?;
        Ok((output1, output2))
    }

    async fn read_output(
        &self,
        path: &ArtifactPath,
        side: FailureSide,
    ) -> Result<Vec<u8>, ComparisonFailed> {
        match self.store.exists(path).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(ComparisonFailed::new(
                    side,
                    "output_not_found",
                    format!("output `{path}` does not exist"),
                ));
            }
            Err(e) => return Err(ComparisonFailed::new(side, "storage_error", e.to_string())),
        }
        self.store
            .read(path)
            .await
            .map_err(|e| ComparisonFailed::new(side, "storage_error", e.to_string()))
    }
}

fn usable_output(
    result: &Result<RunResult, ExecutionError>,
    side: FailureSide,
) -> Result<&ArtifactPath, ComparisonFailed> {
    match result {
        Ok(RunResult {
            output: Some(output),
            ..
        }) => Ok(output),
        Ok(result) => Err(ComparisonFailed::new(
            side,
            result.termination_reason.as_str(),
            format!("no usable output, run ended with {}", result.termination_reason),
        )),
        Err(e) => Err(ComparisonFailed::new(side, e.kind(), e.to_string())),
    }
}
