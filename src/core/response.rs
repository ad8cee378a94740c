use serde::{Serialize, Serializer, ser::SerializeStruct};

use crate::core::{
    domain::{CompiledArtifact, RunResult, Verdict},
    errors::{CompileError, ExecutionError},
    pipeline::grading::{ComparisonFailed, FailureSide, ProgramComparison},
};

/// Serialized as `false` when undetermined, never mistaken for "identical".
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Judge {
    Undetermined,
    Decided { differ: bool, similarity: f64 },
}

impl Serialize for Judge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Judge::Undetermined => serializer.serialize_bool(false),
            Judge::Decided { differ, similarity } => {
                let mut state = serializer.serialize_struct("Judge", 2)?;
                state.serialize_field("output_file_difference", differ)?;
                state.serialize_field("output_file_similarity", similarity)?;
                state.end()
            }
        }
    }
}

impl From<&Result<Verdict, ComparisonFailed>> for Judge {
    fn from(verdict: &Result<Verdict, ComparisonFailed>) -> Self {
        match verdict {
            Ok(verdict) => Judge::Decided {
                differ: verdict.outputs_differ,
                similarity: verdict.similarity,
            },
            Err(_) => Judge::Undetermined,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgramReport {
    pub status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ProgramReport {
    fn failed(kind: &'static str, message: String) -> Self {
        Self {
            status: false,
            error: Some(kind),
            message,
            detail: None,
        }
    }
}

impl From<&RunResult> for ProgramReport {
    fn from(result: &RunResult) -> Self {
        Self {
            status: true,
            error: None,
            message: result.termination_reason.to_string(),
            detail: serde_json::to_value(result).ok(),
        }
    }
}

impl From<&ExecutionError> for ProgramReport {
    fn from(error: &ExecutionError) -> Self {
        Self::failed(error.kind(), error.to_string())
    }
}

impl From<&Result<RunResult, ExecutionError>> for ProgramReport {
    fn from(result: &Result<RunResult, ExecutionError>) -> Self {
        match result {
            Ok(result) => result.into(),
            Err(e) => e.into(),
        }
    }
}

/// A compile error is a result. Only a broken tool makes `status` false.
impl From<&Result<CompiledArtifact, CompileError>> for ProgramReport {
    fn from(result: &Result<CompiledArtifact, CompileError>) -> Self {
        match result {
            Ok(artifact) => Self {
                status: true,
                error: None,
                message: artifact.message().unwrap_or_default().to_string(),
                detail: serde_json::to_value(artifact).ok(),
            },
            Err(e) => Self::failed(e.kind(), e.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub side: FailureSide,
    pub kind: &'static str,
    pub message: String,
}

impl From<&ComparisonFailed> for FailureReport {
    fn from(failure: &ComparisonFailed) -> Self {
        Self {
            side: failure.side,
            kind: failure.kind,
            message: failure.reason.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GradeResponse {
    pub judge: Judge,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program1: Option<ProgramReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program2: Option<ProgramReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReport>,
}

/// Comparing pre-made files has no program side to report.
impl From<&Result<Verdict, ComparisonFailed>> for GradeResponse {
    fn from(verdict: &Result<Verdict, ComparisonFailed>) -> Self {
        Self {
            judge: verdict.into(),
            program1: None,
            program2: None,
            error: verdict.as_ref().err().map(FailureReport::from),
        }
    }
}

impl From<&ProgramComparison> for GradeResponse {
    fn from(comparison: &ProgramComparison) -> Self {
        Self {
            program1: Some((&comparison.program1).into()),
            program2: Some((&comparison.program2).into()),
            ..GradeResponse::from(&comparison.verdict)
        }
    }
}
