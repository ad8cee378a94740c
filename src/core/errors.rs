use crate::core::tool_output::ReportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language `{language}`, permitted are c or cpp")]
pub struct UnsupportedLanguage {
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("invalid artifact path `{path}`")]
    InvalidPath { path: String },
    #[error("can't create directory `{path}`: {reason}")]
    CreateDir { path: String, reason: String },
    #[error("can't read `{path}`: {reason}")]
    Read { path: String, reason: String },
    #[error("can't write `{path}`: {reason}")]
    Write { path: String, reason: String },
    #[error("can't remove `{path}`: {reason}")]
    Remove { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),
    #[error("script `{path}` does not exist")]
    SourceNotFound { path: String },
    /// The compilation tool could not run at all. Compile time is always zero.
    #[error("compilation tool failed with status {status}: {reason}")]
    InvocationError {
        status: i32,
        compile_time_ms: u64,
        reason: String,
    },
    #[error("compilation exceeded its {budget_ms}ms budget")]
    TimeBudgetExceeded { budget_ms: u64 },
    #[error("compilation tool: {0}")]
    MalformedToolOutput(ReportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CompileError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::UnsupportedLanguage(_) => "unsupported_language",
            CompileError::SourceNotFound { .. } => "source_not_found",
            CompileError::InvocationError { .. } => "invocation_error",
            CompileError::TimeBudgetExceeded { .. } => "compile_time_budget_exceeded",
            CompileError::MalformedToolOutput(_) => "malformed_tool_output",
            CompileError::Storage(_) => "storage_error",
        }
    }

    /// The judge is broken rather than the submission.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CompileError::InvocationError { .. }
                | CompileError::MalformedToolOutput(_)
                | CompileError::Storage(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid limits: {reason}")]
    InvalidLimits { reason: String },
    #[error("program `{path}` not found")]
    ProgramNotFound { path: String },
    #[error("input `{path}` not found")]
    InputNotFound { path: String },
    #[error("sandbox: {0}")]
    MalformedToolOutput(ReportError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::InvalidLimits { .. } => "invalid_limits",
            ExecutionError::ProgramNotFound { .. } => "program_not_found",
            ExecutionError::InputNotFound { .. } => "input_not_found",
            ExecutionError::MalformedToolOutput(_) => "malformed_tool_output",
            ExecutionError::Storage(_) => "storage_error",
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ExecutionError::MalformedToolOutput(_) | ExecutionError::Storage(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("content can't be empty")]
    EmptyContent,
    #[error("invalid file name `{file_name}`")]
    InvalidFileName { file_name: String },
    #[error("`{path}` already exists")]
    AlreadyExists { path: String },
    #[error(transparent)]
    UnsupportedLanguage(#[from] UnsupportedLanguage),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntakeError {
    pub fn kind(&self) -> &'static str {
        match self {
            IntakeError::EmptyContent => "empty_content",
            IntakeError::InvalidFileName { .. } => "invalid_file_name",
            IntakeError::AlreadyExists { .. } => "already_exists",
            IntakeError::UnsupportedLanguage(_) => "unsupported_language",
            IntakeError::Storage(_) => "storage_error",
        }
    }
}
