pub const INPUT_DIR: &str = "input";
pub const SCRIPTS_DIR: &str = "scripts";
pub const COMPILED_DIR: &str = "compiled";
pub const OUTPUT_DIR: &str = "output";

pub const INPUT_EXTENSION: &str = "txt";
pub const OUTPUT_EXTENSION: &str = "txt";

pub const DEFAULT_STORAGE_ROOT: &str = "storage";
pub const DEFAULT_COMPILER: &str = "tools/compile.sh";
pub const DEFAULT_RUNNER: &str = "tools/runner.sh";
pub const DEFAULT_COMPILE_BUDGET_MS: u64 = 10_000;
pub const DEFAULT_WATCHDOG_GRACE_MS: u64 = 1_000;
pub const DEFAULT_COMPARATOR_TIMEOUT_MS: u64 = 30_000;

pub const ENV_STORAGE_ROOT: &str = "GRADER_STORAGE_ROOT";
pub const ENV_COMPILER: &str = "GRADER_COMPILER";
pub const ENV_RUNNER: &str = "GRADER_RUNNER";
pub const ENV_COMPILE_BUDGET_MS: &str = "GRADER_COMPILE_BUDGET_MS";
pub const ENV_WATCHDOG_GRACE_MS: &str = "GRADER_WATCHDOG_GRACE_MS";
pub const ENV_COMPARATOR_TIMEOUT_MS: &str = "GRADER_COMPARATOR_TIMEOUT_MS";
pub const ENV_SEQUENTIAL_RUNS: &str = "GRADER_SEQUENTIAL_RUNS";

pub const UPDATE_TX_ERR: &str = "Submission update receiver was dropped";
