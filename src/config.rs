use std::path::PathBuf;
use std::time::Duration;

use crate::{
    constants::{
        DEFAULT_COMPARATOR_TIMEOUT_MS, DEFAULT_COMPILE_BUDGET_MS, DEFAULT_COMPILER,
        DEFAULT_RUNNER, DEFAULT_STORAGE_ROOT, DEFAULT_WATCHDOG_GRACE_MS,
        ENV_COMPARATOR_TIMEOUT_MS, ENV_COMPILE_BUDGET_MS, ENV_COMPILER, ENV_RUNNER,
        ENV_SEQUENTIAL_RUNS, ENV_STORAGE_ROOT, ENV_WATCHDOG_GRACE_MS,
    },
    native::tools::ToolCommand,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is not a valid {expected}: `{value}`")]
    InvalidValue {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraderConfig {
    pub storage_root: PathBuf,
    pub compiler: ToolCommand,
    pub runner: ToolCommand,
    pub compile_budget: Duration,
    pub watchdog_grace: Duration,
    pub comparator_timeout: Duration,
    pub sequential_runs: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from(DEFAULT_STORAGE_ROOT),
            compiler: ToolCommand::new("sh").arg(DEFAULT_COMPILER),
            runner: ToolCommand::new("sh").arg(DEFAULT_RUNNER),
            compile_budget: Duration::from_millis(DEFAULT_COMPILE_BUDGET_MS),
            watchdog_grace: Duration::from_millis(DEFAULT_WATCHDOG_GRACE_MS),
            comparator_timeout: Duration::from_millis(DEFAULT_COMPARATOR_TIMEOUT_MS),
            sequential_runs: false,
        }
    }
}

impl GraderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unset or blank variables fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let storage_root = lookup(ENV_STORAGE_ROOT)
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);
        let compiler = lookup(ENV_COMPILER)
            .and_then(|line| ToolCommand::parse(&line))
            .unwrap_or(defaults.compiler);
        let runner = lookup(ENV_RUNNER)
            .and_then(|line| ToolCommand::parse(&line))
            .unwrap_or(defaults.runner);
        let compile_budget = match lookup(ENV_COMPILE_BUDGET_MS) {
            Some(value) => Duration::from_millis(parse_millis(ENV_COMPILE_BUDGET_MS, &value)?),
            None => defaults.compile_budget,
        };
        let watchdog_grace = match lookup(ENV_WATCHDOG_GRACE_MS) {
            Some(value) => Duration::from_millis(parse_millis(ENV_WATCHDOG_GRACE_MS, &value)?),
            None => defaults.watchdog_grace,
        };
        let comparator_timeout = match lookup(ENV_COMPARATOR_TIMEOUT_MS) {
            Some(value) => {
                Duration::from_millis(parse_millis(ENV_COMPARATOR_TIMEOUT_MS, &value)?)
            }
            None => defaults.comparator_timeout,
        };
        let sequential_runs = match lookup(ENV_SEQUENTIAL_RUNS) {
            Some(value) => parse_flag(ENV_SEQUENTIAL_RUNS, &value)?,
            None => defaults.sequential_runs,
        };

        Ok(Self {
            storage_root,
            compiler,
            runner,
            compile_budget,
            watchdog_grace,
            comparator_timeout,
            sequential_runs,
        })
    }
}

fn parse_millis(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            expected: "number of milliseconds",
        })
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            expected: "boolean",
        }),
    }
}
