use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    config::{ConfigError, GraderConfig},
    core::{
        compiler::CompilerInvoker,
        domain::{ArtifactPath, ComparisonConfig, RunLimits, RunRequest, Scope},
        errors::IntakeError,
        intake::{Intake, SavedFile},
        orchestrator::ExecutionOrchestrator,
        pipeline::grading::GradingPipeline,
        response::{GradeResponse, ProgramReport},
        traits::{ids::IdGenerator, store::SourceStore},
    },
    native::{
        comparator::DiffComparator,
        ids::TimestampIds,
        store::FsStore,
        tools::{ScriptCompileTool, ScriptSandbox},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid job: {0}")]
    InvalidJob(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("can't read job: {0}")]
    Io(#[from] std::io::Error),
}

/// One request to the grader, tagged by `"job"`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    SaveInput {
        content: String,
        filename: Option<String>,
    },
    SaveScript {
        extension: String,
        content: String,
        filename: Option<String>,
        quiz: String,
        problem: String,
    },
    SaveOutput {
        content: Option<String>,
        filename: Option<String>,
    },
    Compile {
        quiz: String,
        problem: String,
        filename: String,
    },
    Run {
        program: String,
        input: String,
        #[serde(flatten)]
        limits: RunLimits,
    },
    ComparePrograms {
        program1: String,
        program2: String,
        input: String,
        #[serde(flatten)]
        limits: RunLimits,
        #[serde(default)]
        comparison: ComparisonConfig,
    },
    CompareFiles {
        output1: String,
        output2: String,
        #[serde(default)]
        comparison: ComparisonConfig,
    },
}

impl Job {
    pub fn from_json(json: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Everything a job needs, wired from configuration.
#[derive(Clone, Debug)]
pub struct Grader {
    intake: Intake,
    pipeline: GradingPipeline,
}

impl Grader {
    pub fn new(intake: Intake, pipeline: GradingPipeline) -> Self {
        Self { intake, pipeline }
    }

    pub fn from_config(config: &GraderConfig) -> Self {
        let store: Arc<dyn SourceStore> = Arc::new(FsStore::new(&config.storage_root));
        let ids: Arc<dyn IdGenerator> = Arc::new(TimestampIds);

        let compiler = CompilerInvoker::new(
            store.clone(),
            Arc::new(ScriptCompileTool::new(config.compiler.clone())),
            ids.clone(),
            config.compile_budget,
        );
        let orchestrator = ExecutionOrchestrator::new(
            store.clone(),
            Arc::new(ScriptSandbox::new(config.runner.clone())),
            ids.clone(),
            config.watchdog_grace,
        );
        let pipeline =
            GradingPipeline::new(store.clone(), compiler, orchestrator, Arc::new(DiffComparator))
                .with_comparator_timeout(config.comparator_timeout)
                .with_sequential_runs(config.sequential_runs);

        Self::new(Intake::new(store, ids), pipeline)
    }

    /// Failures are part of the returned document, never a panic or an `Err`.
    #[tracing::instrument(skip(self))]
    pub async fn execute(&self, job: Job) -> Value {
        match job {
            Job::SaveInput { content, filename } => saved(
                self.intake
                    .save_input(content.as_bytes(), filename.as_deref())
                    .await,
            ),
            Job::SaveScript {
                extension,
                content,
                filename,
                quiz,
                problem,
            } => {
                let result = self
                    .intake
                    .save_script(
                        &extension,
                        content.as_bytes(),
                        filename.as_deref(),
                        &Scope::new(quiz, problem),
                    )
                    .await;
                saved(result.map(|artifact| SavedFile::from(&artifact.reference().path())))
            }
            Job::SaveOutput { content, filename } => saved(
                self.intake
                    .save_output(content.as_deref().map(str::as_bytes), filename.as_deref())
                    .await,
            ),
            Job::Compile {
                quiz,
                problem,
                filename,
            } => {
                let result = self
                    .pipeline
                    .compile_script(&Scope::new(quiz, problem), &filename)
                    .await;
                to_value(ProgramReport::from(&result))
            }
            Job::Run {
                program,
                input,
                limits,
            } => {
                let request = RunRequest {
                    executable: ArtifactPath::compiled(&program),
                    input: ArtifactPath::input(&input),
                    limits,
                };
                let result = self.pipeline.run(&request).await;
                to_value(ProgramReport::from(&result))
            }
            Job::ComparePrograms {
                program1,
                program2,
                input,
                limits,
                comparison,
            } => {
                let result = self
                    .pipeline
                    .compare_programs_on_input(
                        &ArtifactPath::compiled(&program1),
                        &ArtifactPath::compiled(&program2),
                        &ArtifactPath::input(&input),
                        &limits,
                        &comparison,
                    )
                    .await;
                to_value(GradeResponse::from(&result))
            }
            Job::CompareFiles {
                output1,
                output2,
                comparison,
            } => {
                let verdict = self
                    .pipeline
                    .compare_artifacts(
                        &ArtifactPath::output(&output1),
                        &ArtifactPath::output(&output2),
                        &comparison,
                    )
                    .await;
                to_value(GradeResponse::from(&verdict))
            }
        }
    }
}

fn saved(result: Result<SavedFile, IntakeError>) -> Value {
    match result {
        Ok(file) => json!({
            "status": true,
            "message": "File saved!",
            "detail": file,
        }),
        Err(e) => {
            tracing::info!("Save rejected: {}", e);
            json!({
                "status": false,
                "error": e.kind(),
                "message": e.to_string(),
            })
        }
    }
}

fn to_value(response: impl serde::Serialize) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        tracing::error!("Response is not serializable: {}", e);
        json!({ "status": false, "error": "internal", "message": e.to_string() })
    })
}
