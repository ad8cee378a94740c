use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::time::timeout;

use crate::{
    constants::OUTPUT_DIR,
    core::{
        domain::{
            ArtifactPath, ResourceUsage, RunLimits, RunRequest, RunResult, TerminationReason,
        },
        errors::ExecutionError,
        tool_output::{ReportError, ToolReport},
        traits::{
            ids::IdGenerator,
            store::SourceStore,
            tool::{Sandbox, SandboxInvocation},
        },
    },
};

/// Drives single program runs through the sandbox and classifies them.
///
/// Limits are enforced by the sandbox. The only thing enforced here is a
/// watchdog of `hard_time_limit_ms + watchdog_grace`, so a defective
/// sandbox can never hang the caller.
#[derive(Clone, Debug)]
pub struct ExecutionOrchestrator {
    store: Arc<dyn SourceStore>,
    sandbox: Arc<dyn Sandbox>,
    ids: Arc<dyn IdGenerator>,
    watchdog_grace: Duration,
}

impl ExecutionOrchestrator {
    pub fn new(
        store: Arc<dyn SourceStore>,
        sandbox: Arc<dyn Sandbox>,
        ids: Arc<dyn IdGenerator>,
        watchdog_grace: Duration,
    ) -> Self {
        Self {
            store,
            sandbox,
            ids,
            watchdog_grace,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run(&self, req: &RunRequest) -> Result<RunResult, ExecutionError> {
        req.limits.validate()?;

        if !self.store.exists(&req.executable).await? {
            return Err(ExecutionError::ProgramNotFound {
                path: req.executable.to_string(),
            });
        }
        if !self.store.exists(&req.input).await? {
            return Err(ExecutionError::InputNotFound {
                path: req.input.to_string(),
            });
        }

        self.store.ensure_dir(&ArtifactPath::new(OUTPUT_DIR)).await?;
        let output = ArtifactPath::output(&format!(
            "{}_output_of_{}",
            self.ids.next_id(),
            req.input.file_name()
        ));

        let invocation = SandboxInvocation {
            limits: req.limits,
            executable: self.store.local_path(&req.executable)?,
            input: self.store.local_path(&req.input)?,
            output: self.store.local_path(&output)?,
        };
        let pending = PendingOutput::new(self.store.clone(), output);

        let watchdog =
            Duration::from_millis(req.limits.hard_time_limit_ms) + self.watchdog_grace;
        tracing::debug!("Start execution with watchdog {:?}", watchdog);

        let outcome = timeout(watchdog, self.sandbox.execute(&invocation)).await;
        let tool_output = match outcome {
            Ok(Ok(tool_output)) => tool_output,
            Ok(Err(e)) => {
                tracing::error!("Sandbox could not run: {}", e);
                pending.discard().await;
                return Ok(unmeasured(TerminationReason::SystemError));
            }
            Err(_) => {
                tracing::warn!(
                    "Watchdog fired after {:?}, sandbox did not stop the program",
                    watchdog
                );
                pending.discard().await;
                return Ok(unmeasured(TerminationReason::TimeLimitExceeded));
            }
        };

        if !tool_output.success() {
            tracing::error!(
                "Sandbox exited with status {}: {}",
                tool_output.status,
                tool_output.stderr
            );
            pending.discard().await;
            return Ok(unmeasured(TerminationReason::SystemError));
        }

        let report = ToolReport::parse(&tool_output.stdout)
            .map_err(ExecutionError::MalformedToolOutput)?;
        let (usage, exit_code, termination_reason) =
            classify(&req.limits, &report).map_err(ExecutionError::MalformedToolOutput)?;
        tracing::debug!(
            "Execution finished: reason={:?}, usage={:?}, exit_code={:?}",
            termination_reason,
            usage,
            exit_code
        );

        let output = if termination_reason.is_limit_exceeded()
            || termination_reason == TerminationReason::SystemError
        {
            pending.discard().await;
            None
        } else {
            pending.keep()
        };

        Ok(RunResult {
            output,
            exit_code,
            usage: Some(usage),
            termination_reason,
        })
    }
}

fn unmeasured(termination_reason: TerminationReason) -> RunResult {
    RunResult {
        output: None,
        exit_code: None,
        usage: None,
        termination_reason,
    }
}

/// Soft limits decide first: a program measured above them exceeded its
/// limit whatever killed it. A program killed by `SIGXCPU`, or killed once
/// its cpu time reached the hard ceiling, ran out of time even when the
/// measurement lands just under the soft limit. A program that failed with
/// its address space at the hard memory ceiling ran out of memory. Otherwise
/// the sandbox status and the exit code decide.
fn classify(
    limits: &RunLimits,
    report: &ToolReport,
) -> Result<(ResourceUsage, Option<i32>, TerminationReason), ReportError> {
    let usage = ResourceUsage {
        cpu_time_ms: report.require_measurement("cpu_time")?,
        vsize_kb: report.require_measurement("vsize")?,
        rss_kb: report.require_measurement("rss")?,
    };
    let exit_code = report.get_parsed::<i32>("exit_code")?;
    let signal = report.get_parsed::<i32>("signal")?;

    let reported = match report.get("status") {
        None => None,
        Some(status) => Some(match status.to_ascii_uppercase().as_str() {
            "OK" => TerminationReason::Completed,
            "TLE" | "TO" => TerminationReason::TimeLimitExceeded,
            "MLE" | "ML" => TerminationReason::MemoryLimitExceeded,
            "RE" | "SG" => TerminationReason::RuntimeError,
            "XX" => TerminationReason::SystemError,
            _ => {
                return Err(ReportError::InvalidValue {
                    key: "status".to_string(),
                    value: status.to_string(),
                });
            }
        }),
    };

    let killed = signal.is_some();
    let failed = killed || exit_code.is_some_and(|code| code != 0);
    let out_of_time = usage.cpu_time_ms > limits.time_limit_ms
        || signal == Some(Signal::SIGXCPU as i32)
        || (killed && usage.cpu_time_ms >= limits.hard_time_limit_ms);
    let out_of_memory = usage.rss_kb > limits.memory_limit_kb
        || (failed && usage.vsize_kb >= limits.hard_memory_limit_kb);

    let reason = if out_of_time {
        TerminationReason::TimeLimitExceeded
    } else if out_of_memory {
        TerminationReason::MemoryLimitExceeded
    } else if let Some(reason) = reported.filter(|r| *r != TerminationReason::Completed) {
        reason
    } else if failed {
        TerminationReason::RuntimeError
    } else {
        TerminationReason::Completed
    };

    Ok((usage, exit_code, reason))
}

/// Output file of an in-flight run. Unless kept, it is removed: explicitly
/// through [`PendingOutput::discard`], or in the background when the run is
/// cancelled by dropping its future.
struct PendingOutput {
    store: Arc<dyn SourceStore>,
    path: Option<ArtifactPath>,
}

impl PendingOutput {
    fn new(store: Arc<dyn SourceStore>, path: ArtifactPath) -> Self {
        Self {
            store,
            path: Some(path),
        }
    }

    fn keep(mut self) -> Option<ArtifactPath> {
        self.path.take()
    }

    async fn discard(mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.store.remove(&path).await {
                tracing::warn!("Failed to remove {}: {}", path, e);
            }
        }
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Partial output {} left behind", path);
            return;
        };

        tracing::debug!("Run cancelled, removing partial output {}", path);
        let store = self.store.clone();
        handle.spawn(async move {
            if let Err(e) = store.remove(&path).await {
                tracing::warn!("Failed to remove {}: {}", path, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::traits::tool::{MockSandbox, ToolError, ToolOutput},
        native::{
            ids::SequentialIds,
            store::FsStore,
            tools::{ScriptSandbox, ToolCommand},
        },
    };

    const LIMITS: RunLimits = RunLimits {
        time_limit_ms: 1000,
        memory_limit_kb: 65536,
        hard_time_limit_ms: 2000,
        hard_memory_limit_kb: 131072,
    };

    struct Fixture {
        dir: tempfile::TempDir,
        store: Arc<FsStore>,
        request: RunRequest,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::new(dir.path()));
        store.ensure_dir(&ArtifactPath::new("compiled")).await.unwrap();
        store.ensure_dir(&ArtifactPath::new("input")).await.unwrap();
        store
            .write(&ArtifactPath::compiled("prog"), b"\x7fELF")
            .await
            .unwrap();
        store
            .write(&ArtifactPath::input("in.txt"), b"1 2\n")
            .await
            .unwrap();

        Fixture {
            dir,
            store,
            request: RunRequest {
                executable: ArtifactPath::compiled("prog"),
                input: ArtifactPath::input("in.txt"),
                limits: LIMITS,
            },
        }
    }

    fn orchestrator(store: Arc<FsStore>, sandbox: Arc<dyn Sandbox>) -> ExecutionOrchestrator {
        ExecutionOrchestrator::new(
            store,
            sandbox,
            Arc::new(SequentialIds::new("run")),
            Duration::from_millis(100),
        )
    }

    /// Sandbox that writes `output` and reports `report`.
    fn reporting_sandbox(output: &str, report: impl Into<String>) -> MockSandbox {
        let output = output.to_string();
        let report = report.into();
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(move |invocation| {
            std::fs::write(&invocation.output, &output).unwrap();
            Ok(ToolOutput {
                status: 0,
                stdout: report.clone(),
                stderr: String::new(),
            })
        });
        sandbox
    }

    #[tokio::test]
    async fn test_completed_run() {
        let fx = fixture().await;
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_execute()
            .withf(|invocation: &SandboxInvocation| {
                invocation.limits == LIMITS
                    && invocation.executable.ends_with("compiled/prog")
                    && invocation.input.ends_with("input/in.txt")
                    && invocation.output.ends_with("output/run1_output_of_in.txt")
            })
            .times(1)
            .returning(|invocation| {
                std::fs::write(&invocation.output, "3\n").unwrap();
                Ok(ToolOutput {
                    status: 0,
                    stdout: "rss: 1024\ncpu_time: 15\nvsize: 4096\nexit_code: 0\n".to_string(),
                    stderr: String::new(),
                })
            });

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(
            result,
            RunResult {
                output: Some(ArtifactPath::output("run1_output_of_in.txt")),
                exit_code: Some(0),
                usage: Some(ResourceUsage {
                    cpu_time_ms: 15,
                    vsize_kb: 4096,
                    rss_kb: 1024,
                }),
                termination_reason: TerminationReason::Completed,
            }
        );
        assert_eq!(
            fx.store
                .read(&ArtifactPath::output("run1_output_of_in.txt"))
                .await
                .unwrap(),
            b"3\n"
        );
    }

    #[tokio::test]
    async fn test_repeated_runs_do_not_overwrite() {
        let fx = fixture().await;
        let orchestrator = orchestrator(
            fx.store.clone(),
            Arc::new(reporting_sandbox("x", "cpu_time: 1\nvsize: 1\nrss: 1\n")),
        );

        let first = orchestrator.run(&fx.request).await.unwrap();
        let second = orchestrator.run(&fx.request).await.unwrap();

        assert_ne!(first.output, second.output);
        assert!(fx.store.exists(first.output.as_ref().unwrap()).await.unwrap());
        assert!(fx.store.exists(second.output.as_ref().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cpu_time_above_soft_limit_is_tle() {
        let fx = fixture().await;
        let sandbox =
            reporting_sandbox("partial", "cpu_time: 1500\nvsize: 1\nrss: 1\nexit_code: 0\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::TimeLimitExceeded);
        assert_eq!(result.usage.unwrap().cpu_time_ms, 1500);
        assert_eq!(result.output, None);
        assert!(
            !fx.store
                .exists(&ArtifactPath::output("run1_output_of_in.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_killed_at_hard_limit_is_still_tle() {
        let fx = fixture().await;
        let sandbox = reporting_sandbox("", "cpu_time: 2000\nvsize: 1\nrss: 1\nsignal: 9\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::TimeLimitExceeded);
    }

    #[tokio::test]
    async fn test_rss_above_soft_limit_is_mle() {
        let fx = fixture().await;
        let sandbox =
            reporting_sandbox("", "cpu_time: 10\nvsize: 200000\nrss: 70000\nsignal: 11\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::MemoryLimitExceeded);
    }

    #[tokio::test]
    async fn test_sigxcpu_under_equal_limits_is_tle() {
        let fx = fixture().await;
        let request = RunRequest {
            limits: RunLimits {
                time_limit_ms: 1000,
                hard_time_limit_ms: 1000,
                ..LIMITS
            },
            ..fx.request.clone()
        };
        let sandbox =
            reporting_sandbox("", "cpu_time: 990\nvsize: 100\nrss: 100\nsignal: 24\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::TimeLimitExceeded);
        assert_eq!(result.output, None);
    }

    #[tokio::test]
    async fn test_limit_kills_measured_under_soft_limits() {
        let equal = RunLimits {
            time_limit_ms: 1000,
            hard_time_limit_ms: 1000,
            ..LIMITS
        };
        let cases = [
            (
                equal,
                "cpu_time: 1000\nvsize: 100\nrss: 100\nsignal: 9\n",
                TerminationReason::TimeLimitExceeded,
            ),
            (
                LIMITS,
                "cpu_time: 10\nvsize: 131072\nrss: 800\nsignal: 11\n",
                TerminationReason::MemoryLimitExceeded,
            ),
            (
                LIMITS,
                "cpu_time: 10\nvsize: 131072\nrss: 800\nexit_code: 134\n",
                TerminationReason::MemoryLimitExceeded,
            ),
            (
                LIMITS,
                "cpu_time: 10\nvsize: 131072\nrss: 800\nexit_code: 0\n",
                TerminationReason::Completed,
            ),
            (
                LIMITS,
                "cpu_time: 999\nvsize: 100\nrss: 100\nsignal: 9\n",
                TerminationReason::RuntimeError,
            ),
        ];

        for (limits, report, expected) in cases {
            let fx = fixture().await;
            let request = RunRequest {
                limits,
                ..fx.request.clone()
            };
            let sandbox = reporting_sandbox("", report);

            let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
                .run(&request)
                .await
                .unwrap();

            assert_eq!(result.termination_reason, expected, "report: {report}");
        }
    }

    #[tokio::test]
    async fn test_reported_status_and_exit_codes() {
        let cases = [
            ("status: TLE\n", TerminationReason::TimeLimitExceeded),
            ("status: mle\n", TerminationReason::MemoryLimitExceeded),
            ("status: RE\n", TerminationReason::RuntimeError),
            ("status: OK\nexit_code: 3\n", TerminationReason::RuntimeError),
            ("exit_code: 139\n", TerminationReason::RuntimeError),
            ("signal: 11\n", TerminationReason::RuntimeError),
            ("status: OK\nexit_code: 0\n", TerminationReason::Completed),
        ];

        for (extra, expected) in cases {
            let fx = fixture().await;
            let report = format!("cpu_time: 5\nvsize: 10\nrss: 10\n{extra}");
            let sandbox = reporting_sandbox("out", report.clone());

            let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
                .run(&fx.request)
                .await
                .unwrap();

            assert_eq!(result.termination_reason, expected, "report: {report}");
        }
    }

    #[tokio::test]
    async fn test_runtime_error_keeps_output() {
        let fx = fixture().await;
        let sandbox = reporting_sandbox("half", "cpu_time: 5\nvsize: 10\nrss: 10\nexit_code: 1\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::RuntimeError);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn test_missing_usage_is_malformed() {
        let fx = fixture().await;
        let sandbox = reporting_sandbox("", "cpu_time: 5\nrss: 10\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await;

        assert_eq!(
            result,
            Err(ExecutionError::MalformedToolOutput(ReportError::MissingKey {
                key: "vsize".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_unknown_status_is_malformed() {
        let fx = fixture().await;
        let sandbox = reporting_sandbox("", "cpu_time: 5\nvsize: 10\nrss: 10\nstatus: ??\n");

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await;

        assert!(matches!(
            result,
            Err(ExecutionError::MalformedToolOutput(ReportError::InvalidValue { .. }))
        ));
    }

    #[tokio::test]
    async fn test_failed_sandbox_is_system_error_without_usage() {
        let fx = fixture().await;
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(|invocation| {
            std::fs::write(&invocation.output, "garbage").unwrap();
            Ok(ToolOutput {
                status: 2,
                stdout: "nonsense without keys".to_string(),
                stderr: "cgroup unavailable".to_string(),
            })
        });

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::SystemError);
        assert_eq!(result.usage, None);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.output, None);
        assert!(
            !fx.store
                .exists(&ArtifactPath::output("run1_output_of_in.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_sandbox_not_started_is_system_error() {
        let fx = fixture().await;
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().returning(|_| {
            Err(ToolError::Spawn {
                program: "runner.sh".to_string(),
                reason: "no such file".to_string(),
            })
        });

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await
            .unwrap();

        assert_eq!(result.termination_reason, TerminationReason::SystemError);
        assert_eq!(result.usage, None);
    }

    #[tokio::test]
    async fn test_missing_files_never_reach_sandbox() {
        let fx = fixture().await;

        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().never();
        let orchestrator = orchestrator(fx.store.clone(), Arc::new(sandbox));

        let missing_input = RunRequest {
            input: ArtifactPath::input("nope.txt"),
            ..fx.request.clone()
        };
        assert_eq!(
            orchestrator.run(&missing_input).await,
            Err(ExecutionError::InputNotFound {
                path: "input/nope.txt".to_string()
            })
        );

        let missing_program = RunRequest {
            executable: ArtifactPath::compiled("nope"),
            ..fx.request.clone()
        };
        assert_eq!(
            orchestrator.run(&missing_program).await,
            Err(ExecutionError::ProgramNotFound {
                path: "compiled/nope".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_limits_never_reach_sandbox() {
        let fx = fixture().await;
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().never();

        let request = RunRequest {
            limits: RunLimits {
                hard_time_limit_ms: 10,
                ..LIMITS
            },
            ..fx.request.clone()
        };
        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&request)
            .await;

        assert!(matches!(result, Err(ExecutionError::InvalidLimits { .. })));
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_is_storage_error() {
        let fx = fixture().await;
        std::fs::write(fx.dir.path().join("output"), b"file in the way").unwrap();
        let mut sandbox = MockSandbox::new();
        sandbox.expect_execute().never();

        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&fx.request)
            .await;

        assert!(matches!(result, Err(ExecutionError::Storage(_))));
    }

    #[tokio::test]
    async fn test_watchdog_stops_a_hanging_sandbox() {
        let fx = fixture().await;
        let script = fx.dir.path().join("hang.sh");
        std::fs::write(&script, "echo partial > \"$5\"\nsleep 30\n").unwrap();
        let sandbox = ScriptSandbox::new(ToolCommand::new("sh").arg(script.display().to_string()));
        let request = RunRequest {
            limits: RunLimits {
                time_limit_ms: 100,
                memory_limit_kb: 1024,
                hard_time_limit_ms: 200,
                hard_memory_limit_kb: 1024,
            },
            ..fx.request.clone()
        };

        let started = std::time::Instant::now();
        let result = orchestrator(fx.store.clone(), Arc::new(sandbox))
            .run(&request)
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.termination_reason, TerminationReason::TimeLimitExceeded);
        assert_eq!(result.usage, None);
        assert_eq!(result.output, None);
        assert!(
            !fx.store
                .exists(&ArtifactPath::output("run1_output_of_in.txt"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_removes_partial_output() {
        let fx = fixture().await;
        let script = fx.dir.path().join("hang.sh");
        std::fs::write(&script, "echo partial > \"$5\"\nsleep 30\n").unwrap();
        let sandbox = ScriptSandbox::new(ToolCommand::new("sh").arg(script.display().to_string()));
        let orchestrator = orchestrator(fx.store.clone(), Arc::new(sandbox));
        let output = ArtifactPath::output("run1_output_of_in.txt");

        let cancelled =
            tokio::time::timeout(Duration::from_millis(500), orchestrator.run(&fx.request)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fx.store.exists(&output).await.unwrap());
    }
}
