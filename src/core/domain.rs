use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{COMPILED_DIR, INPUT_DIR, OUTPUT_DIR, SCRIPTS_DIR};
use crate::core::errors::{ExecutionError, UnsupportedLanguage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    pub const ALLOWED: [Language; 2] = [Language::C, Language::Cpp];

    pub fn extension(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
        }
    }

    /// Derives the language from a script file name such as `main.cpp`.
    pub fn from_file_name(file_name: &str) -> Result<Self, UnsupportedLanguage> {
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.parse(),
            _ => Err(UnsupportedLanguage {
                language: file_name.to_string(),
            }),
        }
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALLOWED
            .into_iter()
            .find(|language| language.extension() == s)
            .ok_or_else(|| UnsupportedLanguage {
                language: s.to_string(),
            })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Logical grouping of scripts, `scripts/<quiz>/<problem>/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub quiz: String,
    pub problem: String,
}

impl Scope {
    pub fn new(quiz: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            quiz: quiz.into(),
            problem: problem.into(),
        }
    }
}

/// Store-relative, `/`-separated location of an artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactPath(String);

impl ArtifactPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn input(file_name: &str) -> Self {
        Self(format!("{INPUT_DIR}/{file_name}"))
    }

    pub fn script(scope: &Scope, file_name: &str) -> Self {
        Self(format!(
            "{SCRIPTS_DIR}/{}/{}/{file_name}",
            scope.quiz, scope.problem
        ))
    }

    pub fn scripts_dir(scope: &Scope) -> Self {
        Self(format!("{SCRIPTS_DIR}/{}/{}", scope.quiz, scope.problem))
    }

    pub fn compiled(file_name: &str) -> Self {
        Self(format!("{COMPILED_DIR}/{file_name}"))
    }

    pub fn output(file_name: &str) -> Self {
        Self(format!("{OUTPUT_DIR}/{file_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Directory part of the path, empty for top-level entries.
    pub fn dir(&self) -> &str {
        self.0.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    pub fn extension(&self) -> Option<&str> {
        match self.file_name().rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => Some(ext),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A submitted script. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceArtifact {
    pub scope: Scope,
    pub file_name: String,
    pub language: Language,
    pub content: Vec<u8>,
}

impl SourceArtifact {
    pub fn reference(&self) -> SourceRef {
        SourceRef {
            scope: self.scope.clone(),
            file_name: self.file_name.clone(),
            language: self.language,
        }
    }
}

/// Identity of a stored [`SourceArtifact`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub scope: Scope,
    pub file_name: String,
    pub language: Language,
}

impl SourceRef {
    pub fn path(&self) -> ArtifactPath {
        ArtifactPath::script(&self.scope, &self.file_name)
    }

    pub fn stem(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(&self.file_name)
    }
}

pub const REASON_COMPILED: &str = "compiled";
pub const REASON_COMPILE_ERROR: &str = "compile_error";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompiledArtifact {
    pub source: SourceRef,
    /// Runnable binary when `exit_code == 0`, diagnostic text otherwise.
    pub executable: ArtifactPath,
    pub exit_code: i32,
    pub compile_time_ms: u64,
    pub diagnostics: BTreeMap<String, String>,
}

impl CompiledArtifact {
    pub fn is_runnable(&self) -> bool {
        self.exit_code == 0
    }

    pub fn reason(&self) -> Option<&str> {
        self.diagnostics.get("reason").map(String::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.diagnostics.get("message").map(String::as_str)
    }
}

/// Soft limits are the judge policy, hard limits the ceiling at which the
/// sandbox kills the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub hard_time_limit_ms: u64,
    pub hard_memory_limit_kb: u64,
}

impl RunLimits {
    pub fn validate(&self) -> Result<(), ExecutionError> {
        if self.hard_time_limit_ms < self.time_limit_ms {
            return Err(ExecutionError::InvalidLimits {
                reason: format!(
                    "hard time limit {}ms is below time limit {}ms",
                    self.hard_time_limit_ms, self.time_limit_ms
                ),
            });
        }
        if self.hard_memory_limit_kb < self.memory_limit_kb {
            return Err(ExecutionError::InvalidLimits {
                reason: format!(
                    "hard memory limit {}kB is below memory limit {}kB",
                    self.hard_memory_limit_kb, self.memory_limit_kb
                ),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub executable: ArtifactPath,
    pub input: ArtifactPath,
    pub limits: RunLimits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_time_ms: u64,
    pub vsize_kb: u64,
    pub rss_kb: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Completed => "completed",
            TerminationReason::TimeLimitExceeded => "time_limit_exceeded",
            TerminationReason::MemoryLimitExceeded => "memory_limit_exceeded",
            TerminationReason::RuntimeError => "runtime_error",
            TerminationReason::SystemError => "system_error",
        }
    }

    /// The program was stopped for crossing a limit, so its output is partial.
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(
            self,
            TerminationReason::TimeLimitExceeded | TerminationReason::MemoryLimitExceeded
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunResult {
    /// Captured output, absent when the run left nothing worth comparing.
    pub output: Option<ArtifactPath>,
    pub exit_code: Option<i32>,
    /// Absent when the sandbox could not produce reliable figures.
    pub usage: Option<ResourceUsage>,
    pub termination_reason: TerminationReason,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.termination_reason == TerminationReason::Completed
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    pub ignore_case: bool,
    pub ignore_trailing_whitespace: bool,
    pub ignore_blank_lines: bool,
}

impl ComparisonConfig {
    pub fn is_exact(&self) -> bool {
        !(self.ignore_case || self.ignore_trailing_whitespace || self.ignore_blank_lines)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verdict {
    pub outputs_differ: bool,
    pub similarity: f64,
    pub program1: Option<RunResult>,
    pub program2: Option<RunResult>,
}
