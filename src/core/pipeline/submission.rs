use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{Receiver, Sender};
use uuid::Uuid;

use crate::{
    constants::UPDATE_TX_ERR,
    core::{
        domain::{
            ArtifactPath, CompiledArtifact, RunLimits, RunRequest, RunResult, SourceRef,
            TerminationReason,
        },
        pipeline::grading::GradingPipeline,
    },
};

/// One program to grade: compiled, then run once against one input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: Uuid,
    pub source: SourceRef,
    pub input: ArtifactPath,
    pub limits: RunLimits,
}

impl Submission {
    pub fn new(source: SourceRef, input: ArtifactPath, limits: RunLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            input,
            limits,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Run,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmissionState {
    Submitted,
    Compiling,
    CompileFailed { msg: String },
    Compiled(CompiledArtifact),
    Running,
    TimeLimitExceeded(RunResult),
    MemoryLimitExceeded(RunResult),
    RuntimeError(RunResult),
    Completed(RunResult),
    /// The request itself is unusable, e.g. its input or program is missing
    /// or its limits contradict each other. Nothing is wrong with the grader.
    Rejected { stage: Stage, msg: String },
    /// The grader itself failed: broken store, unreadable tool output.
    SystemError { stage: Stage, msg: String },
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Submitted | Self::Compiling | Self::Compiled(_) | Self::Running
        )
    }

    /// Edges of the grading state machine. `Completed` is terminal for the
    /// submission; its output is what the comparator consumes.
    pub fn can_transition_to(&self, next: &SubmissionState) -> bool {
        use SubmissionState::*;

        if matches!(next, SystemError { .. }) {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Submitted, Compiling)
                | (Compiling, CompileFailed { .. })
                | (Compiling, Compiled(_))
                | (Compiled(_), Running)
                | (Running, TimeLimitExceeded(_))
                | (Running, MemoryLimitExceeded(_))
                | (Running, RuntimeError(_))
                | (Running, Completed(_))
                | (Running, Rejected { .. })
        )
    }

    fn after_run(result: RunResult) -> Self {
        match result.termination_reason {
            TerminationReason::Completed => Self::Completed(result),
            TerminationReason::TimeLimitExceeded => Self::TimeLimitExceeded(result),
            TerminationReason::MemoryLimitExceeded => Self::MemoryLimitExceeded(result),
            TerminationReason::RuntimeError => Self::RuntimeError(result),
            TerminationReason::SystemError => Self::SystemError {
                stage: Stage::Run,
                msg: "sandbox failed".to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionUpdate {
    pub id: Uuid,
    pub state: SubmissionState,
    pub at: DateTime<Utc>,
}

/// Grades every received submission on its own task, emitting each state
/// change on `res_tx`.
#[tracing::instrument(skip_all)]
pub fn handle_submissions(
    res_tx: Sender<SubmissionUpdate>,
    mut submission_rx: Receiver<Submission>,
    pipeline: Arc<GradingPipeline>,
) {
    tokio::spawn(async move {
        while let Some(submission) = submission_rx.recv().await {
            let res_tx = res_tx.clone();
            let pipeline = pipeline.clone();

            tokio::spawn(async move {
                process_submission(submission, res_tx, pipeline).await;
            });
        }
    });
}

struct Tracker {
    id: Uuid,
    state: SubmissionState,
    res_tx: Sender<SubmissionUpdate>,
}

impl Tracker {
    /// `false` once nobody listens anymore or the move is illegal.
    async fn advance(&mut self, next: SubmissionState) -> bool {
        if !self.state.can_transition_to(&next) {
            tracing::error!("Refused transition {:?} -> {:?}", self.state, next);
            return false;
        }
        self.state = next;
        let update = SubmissionUpdate {
            id: self.id,
            state: self.state.clone(),
            at: Utc::now(),
        };
        if self.res_tx.send(update).await.is_err() {
            tracing::warn!("{}", UPDATE_TX_ERR);
            return false;
        }
        true
    }
}

async fn process_submission(
    submission: Submission,
    res_tx: Sender<SubmissionUpdate>,
    pipeline: Arc<GradingPipeline>,
) {
    let mut tracker = Tracker {
        id: submission.id,
        state: SubmissionState::Submitted,
        res_tx,
    };

    if !tracker.advance(SubmissionState::Compiling).await {
        return;
    }
    tracing::debug!("Start compiling {}", submission.id);
    let artifact = match pipeline.compile(&submission.source).await {
        Ok(artifact) if artifact.is_runnable() => artifact,
        Ok(artifact) => {
            let msg = artifact.message().unwrap_or_default().to_string();
            tracker
                .advance(SubmissionState::CompileFailed { msg })
                .await;
            return;
        }
        Err(e) if e.is_internal() => {
            tracing::error!("Internal error while compiling: {}", e);
            tracker
                .advance(SubmissionState::SystemError {
                    stage: Stage::Compile,
                    msg: e.to_string(),
                })
                .await;
            return;
        }
        Err(e) => {
            tracker
                .advance(SubmissionState::CompileFailed { msg: e.to_string() })
                .await;
            return;
        }
    };

    let request = RunRequest {
        executable: artifact.executable.clone(),
        input: submission.input.clone(),
        limits: submission.limits,
    };
    if !tracker.advance(SubmissionState::Compiled(artifact)).await
        || !tracker.advance(SubmissionState::Running).await
    {
        return;
    }

    let next = match pipeline.run(&request).await {
        Ok(result) => SubmissionState::after_run(result),
        Err(e) if e.is_internal() => {
            tracing::error!("Internal error while running {}: {}", submission.id, e);
            SubmissionState::SystemError {
                stage: Stage::Run,
                msg: e.to_string(),
            }
        }
        Err(e) => {
            tracing::info!("Run of {} rejected: {}", submission.id, e);
            SubmissionState::Rejected {
                stage: Stage::Run,
                msg: e.to_string(),
            }
        }
    };
    tracing::info!("Submission {} finished: {:?}", submission.id, next);
    tracker.advance(next).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        core::{
            compiler::CompilerInvoker,
            domain::{Language, Scope},
            orchestrator::ExecutionOrchestrator,
            traits::{
                store::SourceStore,
                tool::{MockCompileTool, MockSandbox, ToolOutput},
            },
        },
        native::{comparator::DiffComparator, ids::SequentialIds, store::FsStore},
    };

    const LIMITS: RunLimits = RunLimits {
        time_limit_ms: 1000,
        memory_limit_kb: 65536,
        hard_time_limit_ms: 2000,
        hard_memory_limit_kb: 131072,
    };

    fn ok(stdout: &str) -> ToolOutput {
        ToolOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    async fn setup(
        compile_report: &'static str,
        run_report: &'static str,
    ) -> (tempfile::TempDir, Arc<GradingPipeline>, Submission) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::new(dir.path()));
        let scope = Scope::new("quiz", "problem");
        store
            .ensure_dir(&ArtifactPath::scripts_dir(&scope))
            .await
            .unwrap();
        store
            .write(&ArtifactPath::script(&scope, "main.c"), b"int main(){}")
            .await
            .unwrap();
        store.ensure_dir(&ArtifactPath::new("input")).await.unwrap();
        store
            .write(&ArtifactPath::input("in.txt"), b"1 2\n")
            .await
            .unwrap();

        let mut tool = MockCompileTool::new();
        tool.expect_invoke().returning(move |_, _, destination| {
            std::fs::write(destination, "main.c:1: error").unwrap();
            Ok(ok(compile_report))
        });
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(move |invocation| {
            std::fs::write(&invocation.output, "3\n").unwrap();
            Ok(ok(run_report))
        });

        let ids = Arc::new(SequentialIds::new("t"));
        let compiler = CompilerInvoker::new(
            store.clone(),
            Arc::new(tool),
            ids.clone(),
            Duration::from_secs(5),
        );
        let orchestrator = ExecutionOrchestrator::new(
            store.clone(),
            Arc::new(sandbox),
            ids,
            Duration::from_millis(100),
        );
        let pipeline =
            GradingPipeline::new(store, compiler, orchestrator, Arc::new(DiffComparator));

        let submission = Submission::new(
            SourceRef {
                scope,
                file_name: "main.c".to_string(),
                language: Language::C,
            },
            ArtifactPath::input("in.txt"),
            LIMITS,
        );
        (dir, Arc::new(pipeline), submission)
    }

    async fn collect(
        pipeline: Arc<GradingPipeline>,
        submission: Submission,
    ) -> Vec<SubmissionUpdate> {
        let (res_tx, mut res_rx) = mpsc::channel(10);
        let (submission_tx, submission_rx) = mpsc::channel(10);
        handle_submissions(res_tx, submission_rx, pipeline);
        submission_tx.send(submission).await.unwrap();

        let mut updates = Vec::new();
        while let Some(update) = res_rx.recv().await {
            let terminal = update.state.is_terminal();
            updates.push(update);
            if terminal {
                break;
            }
        }
        updates
    }

    #[tokio::test]
    async fn test_successful_submission() {
        let (_dir, pipeline, submission) = setup(
            "exit_code: 0\ncompile_time: 10\n",
            "cpu_time: 5\nvsize: 100\nrss: 50\nexit_code: 0\n",
        )
        .await;

        let updates = collect(pipeline, submission.clone()).await;

        assert!(updates.iter().all(|u| u.id == submission.id));
        assert!(matches!(updates[0].state, SubmissionState::Compiling));
        assert!(matches!(updates[1].state, SubmissionState::Compiled(_)));
        assert!(matches!(updates[2].state, SubmissionState::Running));
        let SubmissionState::Completed(result) = &updates[3].state else {
            panic!("unexpected state {:?}", updates[3].state);
        };
        assert!(result.output.is_some());
        assert_eq!(updates.len(), 4);
    }

    #[tokio::test]
    async fn test_compile_error_submission() {
        let (_dir, pipeline, submission) =
            setup("exit_code: 1\ncompile_time: 10\n", "unused").await;

        let updates = collect(pipeline, submission).await;

        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[1].state,
            SubmissionState::CompileFailed {
                msg: "main.c:1: error".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_time_limit_submission() {
        let (_dir, pipeline, submission) = setup(
            "exit_code: 0\ncompile_time: 10\n",
            "cpu_time: 1500\nvsize: 100\nrss: 50\n",
        )
        .await;

        let updates = collect(pipeline, submission).await;

        let last = &updates.last().unwrap().state;
        assert!(matches!(
            last,
            SubmissionState::TimeLimitExceeded(result) if result.output.is_none()
        ));
    }

    #[tokio::test]
    async fn test_malformed_run_report_is_system_error() {
        let (_dir, pipeline, submission) =
            setup("exit_code: 0\ncompile_time: 10\n", "cpu_time: 1\n").await;

        let updates = collect(pipeline, submission).await;

        assert!(matches!(
            updates.last().unwrap().state,
            SubmissionState::SystemError {
                stage: Stage::Run,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_input_is_rejected_not_system_error() {
        let (_dir, pipeline, submission) = setup(
            "exit_code: 0\ncompile_time: 10\n",
            "cpu_time: 5\nvsize: 100\nrss: 50\nexit_code: 0\n",
        )
        .await;
        let submission = Submission {
            input: ArtifactPath::input("absent.txt"),
            ..submission
        };

        let updates = collect(pipeline, submission).await;

        assert_eq!(updates.len(), 4);
        assert!(matches!(updates[2].state, SubmissionState::Running));
        assert_eq!(
            updates[3].state,
            SubmissionState::Rejected {
                stage: Stage::Run,
                msg: "input `input/absent.txt` not found".to_string(),
            }
        );
    }

    #[test]
    fn test_state_machine_edges() {
        let result = RunResult {
            output: None,
            exit_code: None,
            usage: None,
            termination_reason: TerminationReason::TimeLimitExceeded,
        };
        let system_error = SubmissionState::SystemError {
            stage: Stage::Compile,
            msg: "store down".to_string(),
        };

        assert!(SubmissionState::Submitted.can_transition_to(&SubmissionState::Compiling));
        assert!(SubmissionState::Compiling.can_transition_to(&system_error));
        assert!(SubmissionState::Running.can_transition_to(&SubmissionState::TimeLimitExceeded(
            result.clone()
        )));
        assert!(!SubmissionState::Submitted.can_transition_to(&SubmissionState::Running));
        assert!(!SubmissionState::Compiling.can_transition_to(&SubmissionState::Completed(
            result.clone()
        )));
        let timed_out = SubmissionState::TimeLimitExceeded(result.clone());
        assert!(!timed_out.can_transition_to(&system_error));
        assert!(!system_error.can_transition_to(&SubmissionState::Compiling));
        let rejected = SubmissionState::Rejected {
            stage: Stage::Run,
            msg: "input missing".to_string(),
        };
        assert!(SubmissionState::Running.can_transition_to(&rejected));
        assert!(!SubmissionState::Compiling.can_transition_to(&rejected));
        assert!(rejected.is_terminal());
        assert!(!rejected.can_transition_to(&system_error));
        assert!(SubmissionState::Completed(result).is_terminal());
        assert!(!SubmissionState::Running.is_terminal());
    }
}
